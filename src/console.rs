//! Console messages and page errors collected per page.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collector::{CollectedEvent, PageCollector};
use crate::driver::PageEvent;

/// Collector buffering console output and uncaught page errors together, in
/// arrival order.
pub type ConsoleCollector = PageCollector<ConsoleEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleLevel::Log => write!(f, "log"),
            ConsoleLevel::Debug => write!(f, "debug"),
            ConsoleLevel::Info => write!(f, "info"),
            ConsoleLevel::Warning => write!(f, "warning"),
            ConsoleLevel::Error => write!(f, "error"),
        }
    }
}

impl FromStr for ConsoleLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "log" => Ok(ConsoleLevel::Log),
            "debug" | "verbose" => Ok(ConsoleLevel::Debug),
            "info" => Ok(ConsoleLevel::Info),
            "warn" | "warning" => Ok(ConsoleLevel::Warning),
            "error" => Ok(ConsoleLevel::Error),
            _ => Err(format!("Unknown console level: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    pub text: String,
    pub url: Option<String>,
    pub line: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl ConsoleMessage {
    pub fn new(level: ConsoleLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            url: None,
            line: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_location(mut self, url: impl Into<String>, line: Option<u64>) -> Self {
        self.url = Some(url.into());
        self.line = line;
        self
    }
}

/// An uncaught exception surfaced by the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageError {
    pub message: String,
    pub stack: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConsoleEvent {
    Message(ConsoleMessage),
    Error(PageError),
}

impl CollectedEvent for ConsoleEvent {
    fn from_event(event: &PageEvent) -> Option<Self> {
        match event {
            PageEvent::Console(console_event) => Some(console_event.clone()),
            _ => None,
        }
    }
}

pub fn format_console_event(event: &ConsoleEvent) -> String {
    match event {
        ConsoleEvent::Message(message) => {
            let mut line = format!("{}> {}", message.level, message.text);
            if let Some(url) = &message.url {
                line.push_str(&format!(" ({}:{})", url, message.line.unwrap_or(0)));
            }
            line
        }
        ConsoleEvent::Error(error) => match &error.stack {
            Some(stack) => format!("Error> {}\n{stack}", error.message),
            None => format!("Error> {}", error.message),
        },
    }
}
