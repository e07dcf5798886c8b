//! The per-session state cache shared by all command handlers.
//!
//! One [`SessionContext`] exists per session. It owns the page registry and
//! selected-page cursor, the network and console collectors, the current
//! accessibility snapshot, per-page emulation state, the open-dialog slot and
//! the screen recording state machine. Handlers borrow it mutably for the
//! duration of one command, so no two commands mutate it concurrently.

use std::collections::{HashMap, HashSet};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use crate::Result;
use crate::config::SessionConfig;
use crate::console::{ConsoleCollector, ConsoleEvent};
use crate::driver::{
    BackendNodeId, DialogInfo, DriverBrowser, DriverPage, ElementHandle, PageEvent, PageId,
    ScreenRecorder, ScreencastOptions, Subscription,
};
use crate::error::SessionError;
use crate::network::{HttpRequest, NetworkCollector};
use crate::snapshot::TextSnapshot;
use crate::timeouts::{self, NetworkConditions};
use crate::collector::EventBuffer;

enum RecordingState {
    Idle,
    Active(Box<dyn ScreenRecorder>),
}

pub struct SessionContext {
    browser: Arc<dyn DriverBrowser>,
    config: SessionConfig,
    pages: Vec<Arc<dyn DriverPage>>,
    selected_page_idx: Option<usize>,
    network_collector: NetworkCollector,
    console_collector: ConsoleCollector,
    snapshot: Option<TextSnapshot>,
    next_snapshot_generation: u64,
    network_conditions: HashMap<PageId, NetworkConditions>,
    cpu_throttling: HashMap<PageId, f64>,
    dialog: Arc<Mutex<Option<DialogInfo>>>,
    dialog_subscription: Option<Subscription>,
    recording: RecordingState,
    running_performance_trace: bool,
}

impl SessionContext {
    pub async fn from_browser(browser: Arc<dyn DriverBrowser>) -> Result<Self> {
        Self::with_config(browser, SessionConfig::default()).await
    }

    pub async fn with_config(
        browser: Arc<dyn DriverBrowser>,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;
        let network_collector = NetworkCollector::new(Arc::clone(&browser));
        let console_collector = ConsoleCollector::new(Arc::clone(&browser));
        network_collector.init().await?;
        console_collector.init().await?;

        let mut context = Self {
            browser,
            config,
            pages: Vec::new(),
            selected_page_idx: None,
            network_collector,
            console_collector,
            snapshot: None,
            next_snapshot_generation: 1,
            network_conditions: HashMap::new(),
            cpu_throttling: HashMap::new(),
            dialog: Arc::new(Mutex::new(None)),
            dialog_subscription: None,
            recording: RecordingState::Idle,
            running_performance_trace: false,
        };
        context.create_pages_snapshot().await?;
        if !context.pages.is_empty() {
            context.set_selected_page_idx(0)?;
        }
        Ok(context)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Refreshes the page registry from the browser. Emulation state of pages
    /// that have gone away is dropped here.
    pub async fn create_pages_snapshot(&mut self) -> Result<()> {
        self.pages = self.browser.pages().await?;
        let live: HashSet<PageId> = self.pages.iter().map(|page| page.id()).collect();
        self.network_conditions.retain(|id, _| live.contains(id));
        self.cpu_throttling.retain(|id, _| live.contains(id));
        Ok(())
    }

    pub fn pages(&self) -> &[Arc<dyn DriverPage>] {
        &self.pages
    }

    /// Opens a new page, registers it with both collectors and selects it.
    pub async fn new_page(&mut self) -> Result<Arc<dyn DriverPage>> {
        let page = self.browser.new_page().await?;
        self.network_collector.add_page(&page);
        self.console_collector.add_page(&page);
        self.create_pages_snapshot().await?;
        let idx = self
            .pages
            .iter()
            .position(|candidate| candidate.id() == page.id())
            .ok_or_else(|| {
                SessionError::Driver("newly created page not reported by the browser".into())
            })?;
        self.set_selected_page_idx(idx)?;
        Ok(page)
    }

    /// Closes the page at `idx`. The last open page can never be closed.
    /// Indices shift when the registry is refreshed, so the selection always
    /// resets to the first page rather than keeping a cursor that may now
    /// point at a different page.
    pub async fn close_page(&mut self, idx: usize) -> Result<()> {
        if self.pages.len() <= 1 {
            return Err(SessionError::CannotCloseLastPage);
        }
        let page = self.page_by_idx(idx)?;
        page.close(false).await?;
        self.create_pages_snapshot().await?;
        self.set_selected_page_idx(0)?;
        Ok(())
    }

    pub fn selected_page_idx(&self) -> Option<usize> {
        self.selected_page_idx
    }

    pub fn selected_page(&self) -> Result<Arc<dyn DriverPage>> {
        let idx = self.selected_page_idx.ok_or(SessionError::NoPageSelected)?;
        let page = self
            .pages
            .get(idx)
            .cloned()
            .ok_or(SessionError::NoPageSelected)?;
        if page.is_closed() {
            return Err(SessionError::SelectedPageClosed);
        }
        Ok(page)
    }

    pub fn page_by_idx(&self, idx: usize) -> Result<Arc<dyn DriverPage>> {
        self.pages
            .get(idx)
            .cloned()
            .ok_or(SessionError::NoPageAtIndex(idx))
    }

    /// Moves the cursor. The dialog listener follows the cursor: it is torn
    /// down on the previous page and installed on the new one.
    pub fn set_selected_page_idx(&mut self, idx: usize) -> Result<()> {
        let page = self.page_by_idx(idx)?;
        if page.is_closed() {
            return Err(SessionError::SelectedPageClosed);
        }

        self.dialog_subscription = None;
        let slot = Arc::clone(&self.dialog);
        let subscription = page.events().subscribe(Arc::new(move |event| {
            if let PageEvent::DialogOpened(dialog) = event {
                *slot.lock().unwrap() = Some(dialog.clone());
            }
        }));
        self.dialog_subscription = Some(subscription);
        self.selected_page_idx = Some(idx);
        self.update_selected_page_timeouts(&page);
        debug!(page = %page.id(), idx, "selected page");
        Ok(())
    }

    fn update_selected_page_timeouts(&self, page: &Arc<dyn DriverPage>) {
        let cpu_rate = self.cpu_throttling.get(&page.id()).copied().unwrap_or(1.0);
        page.set_default_timeout(timeouts::scaled(self.config.timeouts.default_ms, cpu_rate));

        let conditions = self.network_conditions.get(&page.id()).copied();
        page.set_default_navigation_timeout(timeouts::scaled(
            self.config.timeouts.navigation_ms,
            timeouts::network_multiplier(conditions),
        ));
    }

    /// Navigation timeout of the selected page with throttling applied.
    pub fn navigation_timeout(&self) -> Result<u64> {
        Ok(self.selected_page()?.default_navigation_timeout())
    }

    /// Sets or clears network throttling for the selected page and stretches
    /// its navigation timeout accordingly.
    pub fn set_network_conditions(&mut self, conditions: Option<NetworkConditions>) -> Result<()> {
        let page = self.selected_page()?;
        match conditions {
            Some(conditions) => {
                self.network_conditions.insert(page.id(), conditions);
            }
            None => {
                self.network_conditions.remove(&page.id());
            }
        }
        self.update_selected_page_timeouts(&page);
        Ok(())
    }

    pub fn get_network_conditions(&self) -> Option<NetworkConditions> {
        let page = self.selected_page().ok()?;
        self.network_conditions.get(&page.id()).copied()
    }

    /// Sets CPU throttling for the selected page and stretches its
    /// interaction timeout accordingly. A rate of 1.0 clears the emulation.
    pub fn set_cpu_throttling_rate(&mut self, rate: f64) -> Result<()> {
        let page = self.selected_page()?;
        if rate > 1.0 {
            self.cpu_throttling.insert(page.id(), rate);
        } else {
            self.cpu_throttling.remove(&page.id());
        }
        self.update_selected_page_timeouts(&page);
        Ok(())
    }

    pub fn get_cpu_throttling_rate(&self) -> f64 {
        self.selected_page()
            .ok()
            .and_then(|page| self.cpu_throttling.get(&page.id()).copied())
            .unwrap_or(1.0)
    }

    /// The dialog currently blocking the selected page, if any.
    pub fn dialog(&self) -> Option<DialogInfo> {
        self.dialog.lock().unwrap().clone()
    }

    pub fn clear_dialog(&mut self) {
        *self.dialog.lock().unwrap() = None;
    }

    /// The selected page's network buffer. The handle stays valid across
    /// navigation resets.
    pub fn network_requests(&self) -> Result<EventBuffer<Arc<HttpRequest>>> {
        Ok(self.network_collector.data(&self.selected_page()?))
    }

    /// Finds a collected request of the selected page by exact URL.
    pub fn network_request_by_url(&self, url: &str) -> Result<Arc<HttpRequest>> {
        let requests = self.network_requests()?.snapshot();
        if requests.is_empty() {
            return Err(SessionError::NoRequests);
        }
        requests
            .into_iter()
            .find(|request| request.url() == url)
            .ok_or(SessionError::RequestNotFound)
    }

    /// The selected page's console buffer.
    pub fn console_data(&self) -> Result<EventBuffer<ConsoleEvent>> {
        Ok(self.console_collector.data(&self.selected_page()?))
    }

    /// Captures a fresh accessibility snapshot of the selected page. When the
    /// driver produces no tree the previous snapshot is kept.
    pub async fn create_text_snapshot(&mut self) -> Result<()> {
        let page = self.selected_page()?;
        let Some(tree) = page.accessibility_tree(true).await? else {
            return Ok(());
        };
        let generation = self.next_snapshot_generation;
        self.next_snapshot_generation += 1;
        self.snapshot = Some(TextSnapshot::build(generation, tree));
        Ok(())
    }

    pub fn text_snapshot(&self) -> Option<&TextSnapshot> {
        self.snapshot.as_ref()
    }

    /// Resolves a uid from the current snapshot to a live element handle.
    pub async fn element_by_uid(&self, uid: &str) -> Result<ElementHandle> {
        let snapshot = self.snapshot.as_ref().ok_or(SessionError::NoSnapshot)?;
        let generation = uid.split('_').next().unwrap_or("");
        if generation != snapshot.generation().to_string() {
            return Err(SessionError::StaleSnapshot);
        }
        let node = snapshot.node(uid).ok_or(SessionError::ElementNotFound)?;
        let backend_node_id: BackendNodeId =
            node.backend_node_id.ok_or(SessionError::ElementNotFound)?;
        self.selected_page()?
            .element_for_backend_node(backend_node_id)
            .await?
            .ok_or(SessionError::ElementNotFound)
    }

    /// Writes an artifact under the configured output directory, or a fresh
    /// kept temporary directory when none is configured.
    pub async fn save_temporary_file(&self, filename: &str, data: &[u8]) -> Result<PathBuf> {
        let dir = match &self.config.artifacts.output_dir {
            Some(dir) => dir.clone(),
            None => tempfile::Builder::new()
                .prefix(&self.config.artifacts.temp_prefix)
                .tempdir()
                .map_err(SessionError::FileSave)?
                .keep(),
        };
        let path = dir.join(filename);
        self.save_file(&path, data).await?;
        Ok(path)
    }

    pub async fn save_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(SessionError::FileSave)?;
        }
        tokio::fs::write(path, data).await.map_err(|e| {
            error!(path = %path.display(), "failed to save file: {e}");
            SessionError::FileSave(e)
        })
    }

    /// Starts a screen recording of the selected page. At most one recording
    /// runs per session.
    pub async fn start_recording(&mut self, options: ScreencastOptions) -> Result<()> {
        if matches!(self.recording, RecordingState::Active(_)) {
            return Err(SessionError::RecordingInProgress);
        }
        let page = self.selected_page()?;
        let recorder = page.start_screencast(options).await?;
        self.recording = RecordingState::Active(recorder);
        Ok(())
    }

    /// Stops the active recording. The recording slot is freed even when
    /// stopping fails, so a new recording can always be started afterwards.
    pub async fn stop_recording(&mut self) -> Result<()> {
        match mem::replace(&mut self.recording, RecordingState::Idle) {
            RecordingState::Idle => Err(SessionError::NoActiveRecording),
            RecordingState::Active(mut recorder) => recorder.stop().await,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.recording, RecordingState::Active(_))
    }

    pub fn set_running_performance_trace(&mut self, running: bool) {
        self.running_performance_trace = running;
    }

    pub fn is_running_performance_trace(&self) -> bool {
        self.running_performance_trace
    }
}
