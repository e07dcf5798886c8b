//! Per-page event buffers with navigation-aware invalidation.
//!
//! A [`PageCollector`] attaches one buffer per page and resets it when the
//! page's main frame finishes navigating. Buffers are handed out as shared
//! handles and mutated in place: a caller that cached the handle before a
//! reset observes the truncated contents afterwards, never a stale copy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::Result;
use crate::driver::{DriverBrowser, DriverPage, FrameId, PageEvent, PageId, Subscription};

/// One domain of events a collector buffers.
pub trait CollectedEvent: Send + Sized + 'static {
    /// Extracts an event of this domain from a page notification.
    fn from_event(event: &PageEvent) -> Option<Self>;

    /// Invoked when the page's main frame finished navigating. The default
    /// discards everything collected so far.
    fn trim_on_navigation(events: &mut Vec<Self>, main_frame: &FrameId) {
        let _ = main_frame;
        events.clear();
    }
}

/// Shared handle to one page's buffer. Cloning the handle aliases the same
/// underlying storage.
pub struct EventBuffer<T> {
    inner: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for EventBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for EventBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventBuffer<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn push(&self, item: T) {
        self.inner.lock().unwrap().push(item);
    }

    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> R {
        f(&mut self.inner.lock().unwrap())
    }
}

impl<T: Clone> EventBuffer<T> {
    /// Copies out the current contents in arrival order.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().unwrap().clone()
    }
}

struct CollectorEntry<T> {
    page: Weak<dyn DriverPage>,
    buffer: EventBuffer<T>,
    _subscription: Subscription,
}

struct CollectorInner<T: CollectedEvent> {
    browser: Arc<dyn DriverBrowser>,
    entries: Mutex<HashMap<PageId, CollectorEntry<T>>>,
    target_subscription: Mutex<Option<Subscription>>,
}

/// Collects one domain of events for every page of a browser session.
///
/// Pages are associated weakly: an entry never keeps its page alive, and
/// entries whose page has gone away are reclaimed opportunistically.
pub struct PageCollector<T: CollectedEvent> {
    inner: Arc<CollectorInner<T>>,
}

impl<T: CollectedEvent> PageCollector<T> {
    pub fn new(browser: Arc<dyn DriverBrowser>) -> Self {
        Self {
            inner: Arc::new(CollectorInner {
                browser,
                entries: Mutex::new(HashMap::new()),
                target_subscription: Mutex::new(None),
            }),
        }
    }

    /// Attaches to every currently open page and arranges for pages opened
    /// later to be attached as they appear, exactly once per page.
    pub async fn init(&self) -> Result<()> {
        for page in self.inner.browser.pages().await? {
            self.inner.attach(&page);
        }
        let weak = Arc::downgrade(&self.inner);
        let subscription =
            self.inner
                .browser
                .target_events()
                .subscribe(Arc::new(move |target| {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    // Not every target is a page (workers, extension
                    // contexts); those are silently ignored.
                    let Some(page) = target.page() else {
                        return;
                    };
                    inner.attach(&page);
                }));
        *self.inner.target_subscription.lock().unwrap() = Some(subscription);
        Ok(())
    }

    /// Idempotent manual attach for a page obtained out of band.
    pub fn add_page(&self, page: &Arc<dyn DriverPage>) {
        self.inner.attach(page);
    }

    /// The buffer for a page, or an empty buffer if the page was never
    /// attached. The returned handle stays valid across resets.
    pub fn data(&self, page: &Arc<dyn DriverPage>) -> EventBuffer<T> {
        self.inner
            .entries
            .lock()
            .unwrap()
            .get(&page.id())
            .map(|entry| entry.buffer.clone())
            .unwrap_or_default()
    }
}

impl<T: CollectedEvent> CollectorInner<T> {
    fn attach(&self, page: &Arc<dyn DriverPage>) {
        let mut entries = self.entries.lock().unwrap();
        // Reclaim entries for pages that have gone away.
        entries.retain(|_, entry| entry.page.upgrade().is_some());

        let id = page.id();
        if entries.contains_key(&id) {
            return;
        }

        let buffer = EventBuffer::new();
        let main_frame = page.main_frame();
        let buf = buffer.clone();
        let page_id = id.clone();
        let subscription = page.events().subscribe(Arc::new(move |event| {
            if let Some(item) = T::from_event(event) {
                buf.push(item);
                return;
            }
            if let PageEvent::FrameNavigated(frame) = event
                && *frame == main_frame
            {
                debug!(page = %page_id, "main frame navigated, trimming buffer");
                buf.with_mut(|events| T::trim_on_navigation(events, frame));
            }
        }));

        entries.insert(
            id,
            CollectorEntry {
                page: Arc::downgrade(page),
                buffer,
                _subscription: subscription,
            },
        );
    }
}
