//! The boundary to the browser automation driver.
//!
//! Everything the session cache needs from the driver is expressed as
//! object-safe traits so the core can be exercised against a mock driver in
//! tests and bound to chromiumoxide (see [`crate::chrome`]) in production.
//! Event delivery follows a synchronous callback-registration model: a
//! listener runs to completion before control returns to the event source, so
//! collector mutation is atomic with respect to other events from the same
//! page.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::console::ConsoleEvent;
use crate::network::HttpRequest;
use crate::snapshot::AxTreeNode;

/// Stable identity of a page for the page's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub String);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a frame within a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(pub String);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Driver-side identifier for a DOM node backing an accessibility node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendNodeId(pub i64);

/// A live handle to an element resolved from a snapshot node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub backend_node_id: BackendNodeId,
    pub object_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogKind {
    Alert,
    Confirm,
    Prompt,
    BeforeUnload,
}

impl fmt::Display for DialogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogKind::Alert => write!(f, "alert"),
            DialogKind::Confirm => write!(f, "confirm"),
            DialogKind::Prompt => write!(f, "prompt"),
            DialogKind::BeforeUnload => write!(f, "beforeunload"),
        }
    }
}

/// A JavaScript dialog reported by the driver. At most one dialog is open per
/// page at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogInfo {
    pub kind: DialogKind,
    pub message: String,
    pub default_value: String,
}

/// One notification from a page's event stream.
#[derive(Debug, Clone)]
pub enum PageEvent {
    Request(Arc<HttpRequest>),
    Console(ConsoleEvent),
    /// A frame finished navigating. Carries the navigated frame's id; only a
    /// main-frame navigation invalidates collected state.
    FrameNavigated(FrameId),
    DialogOpened(DialogInfo),
}

pub type EventListener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Synchronous listener registry shared by driver implementations.
///
/// Listeners are invoked in registration order and run to completion before
/// `emit` returns. Unsubscribing happens by dropping the returned
/// [`Subscription`].
pub struct Listeners<E> {
    entries: Mutex<HashMap<u64, EventListener<E>>>,
    next_id: AtomicU64,
}

impl<E: 'static> Listeners<E> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn subscribe(self: &Arc<Self>, listener: EventListener<E>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().insert(id, listener);
        let registry = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.entries.lock().unwrap().remove(&id);
            }
        })
    }

    pub fn emit(&self, event: &E) {
        // Listeners may subscribe or unsubscribe while handling the event, so
        // the registry lock cannot be held during dispatch.
        let mut listeners: Vec<(u64, EventListener<E>)> = {
            let entries = self.entries.lock().unwrap();
            entries
                .iter()
                .map(|(id, listener)| (*id, Arc::clone(listener)))
                .collect()
        };
        listeners.sort_by_key(|(id, _)| *id);
        for (_, listener) in listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drop guard for a registered listener. Dropping it unregisters the listener.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageMimeType {
    Png,
    Jpeg,
    Webp,
}

impl ImageMimeType {
    pub fn extension(self) -> &'static str {
        match self {
            ImageMimeType::Png => "png",
            ImageMimeType::Jpeg => "jpeg",
            ImageMimeType::Webp => "webp",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageMimeType::Png => "image/png",
            ImageMimeType::Jpeg => "image/jpeg",
            ImageMimeType::Webp => "image/webp",
        }
    }
}

impl fmt::Display for ImageMimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreencastFormat {
    Webm,
    Gif,
}

#[derive(Debug, Clone)]
pub struct ScreencastOptions {
    /// Output location; a temporary directory is used when absent.
    pub path: Option<PathBuf>,
    pub format: ScreencastFormat,
    pub fps: u32,
    /// JPEG quality of captured frames, 1 to 100.
    pub quality: u32,
    pub scale: f64,
    pub speed: f64,
}

impl Default for ScreencastOptions {
    fn default() -> Self {
        Self {
            path: None,
            format: ScreencastFormat::Webm,
            fps: 30,
            quality: 80,
            scale: 1.0,
            speed: 1.0,
        }
    }
}

/// An in-progress screen recording owned by the session. The session enforces
/// at most one active recorder per process.
#[async_trait]
pub trait ScreenRecorder: Send {
    async fn stop(&mut self) -> Result<()>;
}

/// A target the driver noticed. Not every target resolves to a page (workers,
/// extension contexts); those return `None` and are ignored.
pub trait DriverTarget: Send + Sync {
    fn page(&self) -> Option<Arc<dyn DriverPage>>;
}

#[async_trait]
pub trait DriverBrowser: Send + Sync {
    /// Enumerates the currently open pages, in tab order.
    async fn pages(&self) -> Result<Vec<Arc<dyn DriverPage>>>;

    /// Opens a new page and returns it.
    async fn new_page(&self) -> Result<Arc<dyn DriverPage>>;

    /// Registry announcing newly created targets.
    fn target_events(&self) -> Arc<Listeners<Arc<dyn DriverTarget>>>;
}

#[async_trait]
pub trait DriverPage: Send + Sync {
    fn id(&self) -> PageId;

    fn url(&self) -> String;

    /// The page's top-level frame. Its id is stable across navigations.
    fn main_frame(&self) -> FrameId;

    fn is_closed(&self) -> bool;

    /// Registry delivering this page's events.
    fn events(&self) -> Arc<Listeners<PageEvent>>;

    fn set_default_timeout(&self, ms: u64);

    fn set_default_navigation_timeout(&self, ms: u64);

    fn default_navigation_timeout(&self) -> u64;

    /// Closes the page. `run_before_unload` controls whether unload handlers
    /// get a chance to run.
    async fn close(&self, run_before_unload: bool) -> Result<()>;

    /// Captures the page's accessibility tree, including nested frames.
    /// Returns `None` when the driver cannot produce a tree.
    async fn accessibility_tree(&self, include_iframes: bool) -> Result<Option<AxTreeNode>>;

    /// Resolves a live element handle for a node captured in a snapshot.
    /// Returns `None` when the underlying element no longer exists.
    async fn element_for_backend_node(
        &self,
        backend_node_id: BackendNodeId,
    ) -> Result<Option<ElementHandle>>;

    async fn screenshot(&self, format: ImageMimeType) -> Result<Vec<u8>>;

    async fn start_screencast(
        &self,
        options: ScreencastOptions,
    ) -> Result<Box<dyn ScreenRecorder>>;
}
