//! In-memory driver used to exercise the session core without a browser.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrome_session_core::Result;
use chrome_session_core::console::{ConsoleEvent, ConsoleLevel, ConsoleMessage};
use chrome_session_core::driver::{
    BackendNodeId, DriverBrowser, DriverPage, DriverTarget, ElementHandle, FrameId, ImageMimeType,
    Listeners, PageEvent, PageId, ScreenRecorder, ScreencastOptions,
};
use chrome_session_core::network::{HttpRequest, ResourceType};
use chrome_session_core::snapshot::AxTreeNode;
use chrome_session_core::timeouts;

pub struct MockPage {
    id: PageId,
    url: Mutex<String>,
    main_frame: FrameId,
    closed: AtomicBool,
    default_timeout_ms: AtomicU64,
    navigation_timeout_ms: AtomicU64,
    events: Arc<Listeners<PageEvent>>,
    tree: Mutex<Option<AxTreeNode>>,
    elements: Mutex<HashMap<i64, ElementHandle>>,
    pub recorder_stopped: Arc<AtomicBool>,
}

impl MockPage {
    pub fn new(id: &str, url: &str) -> Arc<Self> {
        Arc::new(Self {
            id: PageId(id.to_string()),
            url: Mutex::new(url.to_string()),
            main_frame: FrameId(format!("{id}-main")),
            closed: AtomicBool::new(false),
            default_timeout_ms: AtomicU64::new(timeouts::DEFAULT_TIMEOUT),
            navigation_timeout_ms: AtomicU64::new(timeouts::NAVIGATION_TIMEOUT),
            events: Listeners::new(),
            tree: Mutex::new(None),
            elements: Mutex::new(HashMap::new()),
            recorder_stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn emit(&self, event: PageEvent) {
        self.events.emit(&event);
    }

    pub fn emit_request(&self, url: &str, navigation: bool) -> Arc<HttpRequest> {
        let resource_type = if navigation {
            ResourceType::Document
        } else {
            ResourceType::Fetch
        };
        let request = Arc::new(
            HttpRequest::new(url, "GET", resource_type)
                .with_frame(Some(self.main_frame.clone()))
                .with_navigation(navigation),
        );
        self.emit(PageEvent::Request(Arc::clone(&request)));
        request
    }

    pub fn emit_console(&self, level: ConsoleLevel, text: &str) {
        self.emit(PageEvent::Console(ConsoleEvent::Message(
            ConsoleMessage::new(level, text),
        )));
    }

    pub fn navigate_main_frame(&self, new_url: &str) {
        *self.url.lock().unwrap() = new_url.to_string();
        self.emit(PageEvent::FrameNavigated(self.main_frame.clone()));
    }

    pub fn set_tree(&self, tree: AxTreeNode) {
        *self.tree.lock().unwrap() = Some(tree);
    }

    pub fn clear_tree(&self) {
        *self.tree.lock().unwrap() = None;
    }

    pub fn add_element(&self, backend_node_id: i64) {
        self.elements.lock().unwrap().insert(
            backend_node_id,
            ElementHandle {
                backend_node_id: BackendNodeId(backend_node_id),
                object_id: format!("object-{backend_node_id}"),
            },
        );
    }

    pub fn default_timeout(&self) -> u64 {
        self.default_timeout_ms.load(Ordering::SeqCst)
    }
}

struct MockRecorder {
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl ScreenRecorder for MockRecorder {
    async fn stop(&mut self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DriverPage for MockPage {
    fn id(&self) -> PageId {
        self.id.clone()
    }

    fn url(&self) -> String {
        self.url.lock().unwrap().clone()
    }

    fn main_frame(&self) -> FrameId {
        self.main_frame.clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn events(&self) -> Arc<Listeners<PageEvent>> {
        Arc::clone(&self.events)
    }

    fn set_default_timeout(&self, ms: u64) {
        self.default_timeout_ms.store(ms, Ordering::SeqCst);
    }

    fn set_default_navigation_timeout(&self, ms: u64) {
        self.navigation_timeout_ms.store(ms, Ordering::SeqCst);
    }

    fn default_navigation_timeout(&self) -> u64 {
        self.navigation_timeout_ms.load(Ordering::SeqCst)
    }

    async fn close(&self, _run_before_unload: bool) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn accessibility_tree(&self, _include_iframes: bool) -> Result<Option<AxTreeNode>> {
        Ok(self.tree.lock().unwrap().clone())
    }

    async fn element_for_backend_node(
        &self,
        backend_node_id: BackendNodeId,
    ) -> Result<Option<ElementHandle>> {
        Ok(self
            .elements
            .lock()
            .unwrap()
            .get(&backend_node_id.0)
            .cloned())
    }

    async fn screenshot(&self, _format: ImageMimeType) -> Result<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn start_screencast(
        &self,
        _options: ScreencastOptions,
    ) -> Result<Box<dyn ScreenRecorder>> {
        self.recorder_stopped.store(false, Ordering::SeqCst);
        Ok(Box::new(MockRecorder {
            stopped: Arc::clone(&self.recorder_stopped),
        }))
    }
}

struct MockTarget {
    page: Arc<MockPage>,
}

impl DriverTarget for MockTarget {
    fn page(&self) -> Option<Arc<dyn DriverPage>> {
        Some(Arc::clone(&self.page) as Arc<dyn DriverPage>)
    }
}

pub struct MockBrowser {
    pages: Mutex<Vec<Arc<MockPage>>>,
    target_listeners: Arc<Listeners<Arc<dyn DriverTarget>>>,
    next_id: AtomicU64,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl MockBrowser {
    pub fn new() -> Arc<Self> {
        init_tracing();
        Arc::new(Self {
            pages: Mutex::new(Vec::new()),
            target_listeners: Listeners::new(),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn with_pages(urls: &[&str]) -> (Arc<Self>, Vec<Arc<MockPage>>) {
        let browser = Self::new();
        let pages = urls.iter().map(|url| browser.add_page(url)).collect();
        (browser, pages)
    }

    pub fn page_at(&self, idx: usize) -> Arc<MockPage> {
        Arc::clone(&self.pages.lock().unwrap()[idx])
    }

    /// Adds a page and announces it the way a real browser announces a new
    /// target.
    pub fn add_page(&self, url: &str) -> Arc<MockPage> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let page = MockPage::new(&format!("page-{id}"), url);
        self.pages.lock().unwrap().push(Arc::clone(&page));
        let target: Arc<dyn DriverTarget> = Arc::new(MockTarget {
            page: Arc::clone(&page),
        });
        self.target_listeners.emit(&target);
        page
    }
}

#[async_trait]
impl DriverBrowser for MockBrowser {
    async fn pages(&self) -> Result<Vec<Arc<dyn DriverPage>>> {
        Ok(self
            .pages
            .lock()
            .unwrap()
            .iter()
            .filter(|page| !page.is_closed())
            .map(|page| Arc::clone(page) as Arc<dyn DriverPage>)
            .collect())
    }

    async fn new_page(&self) -> Result<Arc<dyn DriverPage>> {
        Ok(self.add_page("about:blank") as Arc<dyn DriverPage>)
    }

    fn target_events(&self) -> Arc<Listeners<Arc<dyn DriverTarget>>> {
        Arc::clone(&self.target_listeners)
    }
}
