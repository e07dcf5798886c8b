//! Network request records and their text rendering.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::collector::{CollectedEvent, PageCollector};
use crate::driver::{FrameId, PageEvent};

/// Collector keeping the request that triggered a navigation across the
/// navigation reset (see [`CollectedEvent::trim_on_navigation`] for
/// [`Arc<HttpRequest>`]).
pub type NetworkCollector = PageCollector<Arc<HttpRequest>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    TextTrack,
    Xhr,
    Fetch,
    Prefetch,
    EventSource,
    WebSocket,
    Manifest,
    SignedExchange,
    Ping,
    CspViolationReport,
    Preflight,
    Other,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceType::Document => "document",
            ResourceType::Stylesheet => "stylesheet",
            ResourceType::Image => "image",
            ResourceType::Media => "media",
            ResourceType::Font => "font",
            ResourceType::Script => "script",
            ResourceType::TextTrack => "texttrack",
            ResourceType::Xhr => "xhr",
            ResourceType::Fetch => "fetch",
            ResourceType::Prefetch => "prefetch",
            ResourceType::EventSource => "eventsource",
            ResourceType::WebSocket => "websocket",
            ResourceType::Manifest => "manifest",
            ResourceType::SignedExchange => "signedexchange",
            ResourceType::Ping => "ping",
            ResourceType::CspViolationReport => "cspviolationreport",
            ResourceType::Preflight => "preflight",
            ResourceType::Other => "other",
        };
        f.write_str(name)
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "document" => Ok(ResourceType::Document),
            "stylesheet" => Ok(ResourceType::Stylesheet),
            "image" => Ok(ResourceType::Image),
            "media" => Ok(ResourceType::Media),
            "font" => Ok(ResourceType::Font),
            "script" => Ok(ResourceType::Script),
            "texttrack" => Ok(ResourceType::TextTrack),
            "xhr" => Ok(ResourceType::Xhr),
            "fetch" => Ok(ResourceType::Fetch),
            "prefetch" => Ok(ResourceType::Prefetch),
            "eventsource" => Ok(ResourceType::EventSource),
            "websocket" => Ok(ResourceType::WebSocket),
            "manifest" => Ok(ResourceType::Manifest),
            "signedexchange" => Ok(ResourceType::SignedExchange),
            "ping" => Ok(ResourceType::Ping),
            "cspviolationreport" => Ok(ResourceType::CspViolationReport),
            "preflight" => Ok(ResourceType::Preflight),
            "other" => Ok(ResourceType::Other),
            _ => Err(format!("Unknown resource type: {s}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>) -> Self {
        Self { status, headers }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// One HTTP request observed on a page.
///
/// The outcome is resolved asynchronously: a record starts out pending and
/// later gains either a response or a failure, set through the shared record
/// while it already sits in a collector buffer.
#[derive(Debug)]
pub struct HttpRequest {
    url: String,
    method: String,
    resource_type: ResourceType,
    frame_id: Option<FrameId>,
    navigation_request: bool,
    headers: Vec<(String, String)>,
    /// Redirect hops that led to this request, most recent first.
    redirect_chain: Vec<Arc<HttpRequest>>,
    response: OnceLock<HttpResponse>,
    failure: OnceLock<String>,
}

impl HttpRequest {
    pub fn new(
        url: impl Into<String>,
        method: impl Into<String>,
        resource_type: ResourceType,
    ) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            resource_type,
            frame_id: None,
            navigation_request: false,
            headers: Vec::new(),
            redirect_chain: Vec::new(),
            response: OnceLock::new(),
            failure: OnceLock::new(),
        }
    }

    pub fn with_frame(mut self, frame_id: Option<FrameId>) -> Self {
        self.frame_id = frame_id;
        self
    }

    pub fn with_navigation(mut self, navigation_request: bool) -> Self {
        self.navigation_request = navigation_request;
        self
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_redirect_chain(mut self, redirect_chain: Vec<Arc<HttpRequest>>) -> Self {
        self.redirect_chain = redirect_chain;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn frame_id(&self) -> Option<&FrameId> {
        self.frame_id.as_ref()
    }

    /// Whether this request is a top-level navigation request.
    pub fn is_navigation_request(&self) -> bool {
        self.navigation_request
    }

    pub fn request_headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn redirect_chain(&self) -> &[Arc<HttpRequest>] {
        &self.redirect_chain
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        self.response.get()
    }

    /// Resolves the record with a response. Later calls are ignored.
    pub fn set_response(&self, response: HttpResponse) {
        let _ = self.response.set(response);
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.get().map(String::as_str)
    }

    /// Resolves the record with a failure. Later calls are ignored.
    pub fn set_failure(&self, error_text: impl Into<String>) {
        let _ = self.failure.set(error_text.into());
    }
}

impl CollectedEvent for Arc<HttpRequest> {
    fn from_event(event: &PageEvent) -> Option<Self> {
        match event {
            PageEvent::Request(request) => Some(Arc::clone(request)),
            _ => None,
        }
    }

    fn trim_on_navigation(events: &mut Vec<Self>, main_frame: &FrameId) {
        // The navigation request is usually observed before the navigation
        // commits; keep it and everything emitted after it so the record of
        // what caused this page survives the reset.
        let last_navigation = events
            .iter()
            .rposition(|request| {
                request.frame_id() == Some(main_frame) && request.is_navigation_request()
            });
        match last_navigation {
            Some(idx) => {
                events.drain(..idx);
            }
            None => events.clear(),
        }
    }
}

/// One-line summary used in request listings and redirect chains.
pub fn short_description(request: &HttpRequest) -> String {
    format!(
        "{} {} {}",
        request.url(),
        request.method(),
        status_label(request)
    )
}

pub fn status_label(request: &HttpRequest) -> String {
    if let Some(response) = request.response() {
        let status = response.status();
        if (200..=299).contains(&status) {
            format!("[success - {status}]")
        } else {
            format!("[failed - {status}]")
        }
    } else if let Some(failure) = request.failure() {
        format!("[failed - {failure}]")
    } else {
        "[pending]".to_string()
    }
}

pub fn format_headers(headers: &[(String, String)]) -> Vec<String> {
    headers
        .iter()
        .map(|(name, value)| format!("- {name}:{value}"))
        .collect()
}
