//! chromiumoxide-backed implementation of the driver traits.
//!
//! Bridges chromiumoxide's async event streams onto the synchronous listener
//! registries the session core consumes: one pump task per CDP event type,
//! each holding only a weak reference to its page wrapper so a dropped page
//! tears its pumps down.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::accessibility::{
    AxNode, AxPropertyName, AxValue, EnableParams as AccessibilityEnableParams,
    GetFullAxTreeParams,
};
use chromiumoxide::cdp::browser_protocol::dom as cdp_dom;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventLoadingFailed, EventRequestWillBeSent,
    EventResponseReceived, Headers,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams, CloseParams, DialogType,
    EnableParams as PageEnableParams, EventFrameNavigated, EventJavascriptDialogOpening,
};
use chromiumoxide::cdp::browser_protocol::target::CloseTargetParams;
use chromiumoxide::cdp::js_protocol::runtime::{
    EnableParams as RuntimeEnableParams, EventConsoleApiCalled, EventExceptionThrown,
};
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::Result;
use crate::console::{ConsoleEvent, ConsoleLevel, ConsoleMessage, PageError};
use crate::driver::{
    BackendNodeId, DialogInfo, DialogKind, DriverBrowser, DriverPage, DriverTarget, ElementHandle,
    FrameId, ImageMimeType, Listeners, PageEvent, PageId, ScreenRecorder, ScreencastOptions,
};
use crate::error::SessionError;
use crate::network::{HttpRequest, HttpResponse, ResourceType};
use crate::snapshot::{AxNodeAttributes, AxTreeNode, MixedState};

fn driver_error(err: impl std::fmt::Display) -> SessionError {
    SessionError::Driver(err.to_string())
}

pub struct ChromeBrowser {
    browser: Browser,
    pages: Mutex<HashMap<PageId, Arc<ChromePage>>>,
    target_listeners: Arc<Listeners<Arc<dyn DriverTarget>>>,
}

struct ChromeTarget {
    page: Arc<ChromePage>,
}

impl DriverTarget for ChromeTarget {
    fn page(&self) -> Option<Arc<dyn DriverPage>> {
        Some(Arc::clone(&self.page) as Arc<dyn DriverPage>)
    }
}

impl ChromeBrowser {
    pub fn new(browser: Browser) -> Self {
        Self {
            browser,
            pages: Mutex::new(HashMap::new()),
            target_listeners: Listeners::new(),
        }
    }

    /// Reconciles the wrapper map against the browser's current page list:
    /// wraps and announces pages seen for the first time, marks wrappers of
    /// vanished pages closed.
    async fn refresh(&self) -> Result<Vec<Arc<dyn DriverPage>>> {
        let pages = self.browser.pages().await.map_err(driver_error)?;

        let mut ordered = Vec::with_capacity(pages.len());
        let mut fresh = Vec::new();
        for page in pages {
            let id = PageId(page.target_id().inner().to_string());
            let existing = self.pages.lock().unwrap().get(&id).cloned();
            let wrapper = match existing {
                Some(wrapper) => wrapper,
                None => {
                    let wrapper = ChromePage::attach(page).await?;
                    self.pages
                        .lock()
                        .unwrap()
                        .insert(id.clone(), Arc::clone(&wrapper));
                    fresh.push(Arc::clone(&wrapper));
                    wrapper
                }
            };
            ordered.push(wrapper);
        }

        let live: HashSet<PageId> = ordered.iter().map(|wrapper| wrapper.id()).collect();
        self.pages.lock().unwrap().retain(|id, wrapper| {
            if live.contains(id) {
                true
            } else {
                wrapper.closed.store(true, Ordering::SeqCst);
                false
            }
        });

        for wrapper in fresh {
            let target: Arc<dyn DriverTarget> = Arc::new(ChromeTarget { page: wrapper });
            self.target_listeners.emit(&target);
        }

        Ok(ordered
            .into_iter()
            .map(|wrapper| wrapper as Arc<dyn DriverPage>)
            .collect())
    }
}

#[async_trait]
impl DriverBrowser for ChromeBrowser {
    async fn pages(&self) -> Result<Vec<Arc<dyn DriverPage>>> {
        self.refresh().await
    }

    async fn new_page(&self) -> Result<Arc<dyn DriverPage>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(driver_error)?;
        let id = PageId(page.target_id().inner().to_string());
        let wrapper = ChromePage::attach(page).await?;
        self.pages
            .lock()
            .unwrap()
            .insert(id, Arc::clone(&wrapper));
        let target: Arc<dyn DriverTarget> = Arc::new(ChromeTarget {
            page: Arc::clone(&wrapper),
        });
        self.target_listeners.emit(&target);
        Ok(wrapper as Arc<dyn DriverPage>)
    }

    fn target_events(&self) -> Arc<Listeners<Arc<dyn DriverTarget>>> {
        Arc::clone(&self.target_listeners)
    }
}

pub struct ChromePage {
    page: Page,
    id: PageId,
    url: Mutex<String>,
    main_frame: Mutex<FrameId>,
    closed: AtomicBool,
    default_timeout_ms: AtomicU64,
    default_navigation_timeout_ms: AtomicU64,
    events: Arc<Listeners<PageEvent>>,
    /// In-flight requests by CDP request id, for outcome and redirect
    /// resolution.
    requests: Mutex<HashMap<String, Arc<HttpRequest>>>,
}

impl ChromePage {
    async fn attach(page: Page) -> Result<Arc<Self>> {
        page.execute(PageEnableParams::default())
            .await
            .map_err(driver_error)?;
        page.execute(NetworkEnableParams::default())
            .await
            .map_err(driver_error)?;
        page.execute(RuntimeEnableParams::default())
            .await
            .map_err(driver_error)?;

        let id = PageId(page.target_id().inner().to_string());
        let url = page
            .url()
            .await
            .map_err(driver_error)?
            .unwrap_or_default();
        let main_frame = page
            .mainframe()
            .await
            .map_err(driver_error)?
            .map(|frame| FrameId(frame.inner().to_string()))
            .unwrap_or_default();

        let this = Arc::new(Self {
            page,
            id,
            url: Mutex::new(url),
            main_frame: Mutex::new(main_frame),
            closed: AtomicBool::new(false),
            default_timeout_ms: AtomicU64::new(crate::timeouts::DEFAULT_TIMEOUT),
            default_navigation_timeout_ms: AtomicU64::new(crate::timeouts::NAVIGATION_TIMEOUT),
            events: Listeners::new(),
            requests: Mutex::new(HashMap::new()),
        });
        this.spawn_event_pumps().await?;
        Ok(this)
    }

    async fn spawn_event_pumps(self: &Arc<Self>) -> Result<()> {
        macro_rules! pump {
            ($event:ty, $handler:ident) => {{
                let mut stream = self
                    .page
                    .event_listener::<$event>()
                    .await
                    .map_err(driver_error)?;
                let weak = Arc::downgrade(self);
                tokio::spawn(async move {
                    while let Some(event) = stream.next().await {
                        let Some(page) = weak.upgrade() else { break };
                        page.$handler(&event);
                    }
                });
            }};
        }

        pump!(EventFrameNavigated, on_frame_navigated);
        pump!(EventRequestWillBeSent, on_request);
        pump!(EventResponseReceived, on_response);
        pump!(EventLoadingFailed, on_loading_failed);
        pump!(EventConsoleApiCalled, on_console);
        pump!(EventExceptionThrown, on_exception);
        pump!(EventJavascriptDialogOpening, on_dialog);
        Ok(())
    }

    fn on_frame_navigated(&self, event: &EventFrameNavigated) {
        let frame_id = FrameId(event.frame.id.inner().to_string());
        if event.frame.parent_id.is_none() {
            *self.url.lock().unwrap() = event.frame.url.clone();
            *self.main_frame.lock().unwrap() = frame_id.clone();
        }
        self.events.emit(&PageEvent::FrameNavigated(frame_id));
    }

    fn on_request(&self, event: &EventRequestWillBeSent) {
        let request_id = event.request_id.inner().to_string();
        let frame_id = event
            .frame_id
            .as_ref()
            .map(|id| FrameId(id.inner().to_string()));
        let resource_type = event
            .r#type
            .as_ref()
            .and_then(|t| format!("{t:?}").parse().ok())
            .unwrap_or(ResourceType::Other);
        // A document request whose id equals its loader id is the request
        // that drives a top-level navigation.
        let navigation = frame_id.is_some()
            && event.request_id.inner() == event.loader_id.inner()
            && resource_type == ResourceType::Document;

        let mut requests = self.requests.lock().unwrap();
        let mut redirect_chain = Vec::new();
        if let Some(redirect_response) = &event.redirect_response
            && let Some(previous) = requests.remove(&request_id)
        {
            previous.set_response(HttpResponse::new(
                redirect_response.status as u16,
                headers_from(&redirect_response.headers),
            ));
            redirect_chain.push(Arc::clone(&previous));
            redirect_chain.extend(previous.redirect_chain().iter().cloned());
        }

        let record = Arc::new(
            HttpRequest::new(
                event.request.url.clone(),
                event.request.method.clone(),
                resource_type,
            )
            .with_frame(frame_id)
            .with_navigation(navigation)
            .with_headers(headers_from(&event.request.headers))
            .with_redirect_chain(redirect_chain),
        );
        requests.insert(request_id, Arc::clone(&record));
        drop(requests);
        self.events.emit(&PageEvent::Request(record));
    }

    fn on_response(&self, event: &EventResponseReceived) {
        let request_id = event.request_id.inner().to_string();
        if let Some(record) = self.requests.lock().unwrap().get(&request_id) {
            record.set_response(HttpResponse::new(
                event.response.status as u16,
                headers_from(&event.response.headers),
            ));
        }
    }

    fn on_loading_failed(&self, event: &EventLoadingFailed) {
        let request_id = event.request_id.inner().to_string();
        if let Some(record) = self.requests.lock().unwrap().get(&request_id) {
            record.set_failure(event.error_text.clone());
        }
    }

    fn on_console(&self, event: &EventConsoleApiCalled) {
        let level = format!("{:?}", event.r#type)
            .parse()
            .unwrap_or(ConsoleLevel::Log);
        let text = event
            .args
            .iter()
            .map(|arg| {
                arg.value
                    .as_ref()
                    .map(json_to_string)
                    .or_else(|| arg.description.clone())
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join(" ");

        let mut message = ConsoleMessage::new(level, text);
        if let Some(frame) = event
            .stack_trace
            .as_ref()
            .and_then(|stack| stack.call_frames.first())
        {
            message = message.with_location(frame.url.clone(), Some(frame.line_number as u64));
        }
        self.events
            .emit(&PageEvent::Console(ConsoleEvent::Message(message)));
    }

    fn on_exception(&self, event: &EventExceptionThrown) {
        let details = &event.exception_details;
        let message = details
            .exception
            .as_ref()
            .and_then(|exception| exception.description.clone())
            .unwrap_or_else(|| details.text.clone());
        let mut error = PageError::new(message);
        if let Some(stack_trace) = &details.stack_trace {
            let stack = stack_trace
                .call_frames
                .iter()
                .map(|frame| {
                    format!(
                        "    at {} ({}:{})",
                        frame.function_name, frame.url, frame.line_number
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            if !stack.is_empty() {
                error = error.with_stack(stack);
            }
        }
        self.events
            .emit(&PageEvent::Console(ConsoleEvent::Error(error)));
    }

    fn on_dialog(&self, event: &EventJavascriptDialogOpening) {
        let kind = match event.r#type {
            DialogType::Alert => DialogKind::Alert,
            DialogType::Confirm => DialogKind::Confirm,
            DialogType::Prompt => DialogKind::Prompt,
            DialogType::Beforeunload => DialogKind::BeforeUnload,
        };
        self.events.emit(&PageEvent::DialogOpened(DialogInfo {
            kind,
            message: event.message.clone(),
            default_value: event.default_prompt.clone().unwrap_or_default(),
        }));
    }
}

#[async_trait]
impl DriverPage for ChromePage {
    fn id(&self) -> PageId {
        self.id.clone()
    }

    fn url(&self) -> String {
        self.url.lock().unwrap().clone()
    }

    fn main_frame(&self) -> FrameId {
        self.main_frame.lock().unwrap().clone()
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
        self.default_navigation_timeout_ms.store(ms, Ordering::SeqCst);
    }

    fn default_navigation_timeout(&self) -> u64 {
        self.default_navigation_timeout_ms.load(Ordering::SeqCst)
    }

    async fn close(&self, run_before_unload: bool) -> Result<()> {
        if run_before_unload {
            self.page
                .execute(CloseParams::default())
                .await
                .map_err(driver_error)?;
        } else {
            let target_id = self.page.target_id().clone();
            self.page
                .execute(CloseTargetParams::new(target_id))
                .await
                .map_err(driver_error)?;
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn accessibility_tree(&self, include_iframes: bool) -> Result<Option<AxTreeNode>> {
        self.page
            .execute(AccessibilityEnableParams::default())
            .await
            .map_err(driver_error)?;

        let mut builder = GetFullAxTreeParams::builder();
        if !include_iframes
            && let Some(frame_id) = self.page.mainframe().await.map_err(driver_error)?
        {
            builder = builder.frame_id(frame_id);
        }
        let result = self
            .page
            .execute(builder.build())
            .await
            .map_err(driver_error)?;
        Ok(build_ax_tree(&result.nodes))
    }

    async fn element_for_backend_node(
        &self,
        backend_node_id: BackendNodeId,
    ) -> Result<Option<ElementHandle>> {
        let params = cdp_dom::ResolveNodeParams::builder()
            .backend_node_id(cdp_dom::BackendNodeId::new(backend_node_id.0))
            .build();
        // Resolution fails when the node has been detached since the
        // snapshot; callers treat that as element-not-found.
        let resolved = match self.page.execute(params).await {
            Ok(resolved) => resolved,
            Err(_) => return Ok(None),
        };
        Ok(resolved.object.object_id.as_ref().map(|object_id| {
            ElementHandle {
                backend_node_id,
                object_id: object_id.inner().to_string(),
            }
        }))
    }

    async fn screenshot(&self, format: ImageMimeType) -> Result<Vec<u8>> {
        let format = match format {
            ImageMimeType::Png => CaptureScreenshotFormat::Png,
            ImageMimeType::Jpeg => CaptureScreenshotFormat::Jpeg,
            ImageMimeType::Webp => CaptureScreenshotFormat::Webp,
        };
        let params = CaptureScreenshotParams::builder().format(format).build();
        let result = self.page.execute(params).await.map_err(driver_error)?;
        BASE64.decode(&result.data).map_err(driver_error)
    }

    async fn start_screencast(
        &self,
        options: ScreencastOptions,
    ) -> Result<Box<dyn ScreenRecorder>> {
        let frames_dir = match &options.path {
            Some(path) => {
                tokio::fs::create_dir_all(path)
                    .await
                    .map_err(SessionError::FileSave)?;
                path.clone()
            }
            None => tempfile::Builder::new()
                .prefix("recording")
                .tempdir()
                .map_err(SessionError::FileSave)?
                .keep(),
        };

        let fps = options.fps.max(1);
        let frame_interval = Duration::from_millis(1000 / fps as u64);
        let quality = options.quality.clamp(1, 100) as i64;
        let page = self.page.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        // Screenshot-based capture; frames land as numbered JPEGs for a
        // later encode step.
        let task = tokio::spawn(async move {
            let mut frame_count = 0u32;
            loop {
                let frame_start = Instant::now();
                let params = CaptureScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Jpeg)
                    .quality(quality)
                    .build();
                if let Ok(screenshot) = page.execute(params).await
                    && let Ok(data) = BASE64.decode(&screenshot.data)
                {
                    let path = frames_dir.join(format!("{frame_count:06}.jpg"));
                    if tokio::fs::write(&path, &data).await.is_ok() {
                        frame_count += 1;
                    }
                }
                let wait = frame_interval.saturating_sub(frame_start.elapsed());
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            debug!(frames = frame_count, "screencast capture finished");
        });

        Ok(Box::new(ChromeRecorder {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }))
    }
}

pub struct ChromeRecorder {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl ScreenRecorder for ChromeRecorder {
    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| SessionError::RecordingStopFailed(e.to_string()))?;
        }
        Ok(())
    }
}

fn headers_from(headers: &Headers) -> Vec<(String, String)> {
    headers
        .inner()
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(name, value)| (name.clone(), json_to_string(value)))
                .collect()
        })
        .unwrap_or_default()
}

fn json_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Rebuilds the node hierarchy from the flat list CDP returns. Ignored nodes
/// are dropped and their children lifted into the parent.
fn build_ax_tree(nodes: &[AxNode]) -> Option<AxTreeNode> {
    let by_id: HashMap<&str, &AxNode> = nodes
        .iter()
        .map(|node| (node.node_id.inner().as_str(), node))
        .collect();
    let root = nodes.iter().find(|node| node.parent_id.is_none())?;
    convert_ax_node(root, &by_id).into_iter().next()
}

fn convert_ax_node(node: &AxNode, by_id: &HashMap<&str, &AxNode>) -> Vec<AxTreeNode> {
    let mut children = Vec::new();
    for child_id in node.child_ids.iter().flatten() {
        if let Some(child) = by_id.get(child_id.inner().as_str()) {
            children.extend(convert_ax_node(child, by_id));
        }
    }
    if node.ignored {
        return children;
    }
    vec![AxTreeNode {
        role: ax_value_string(node.role.as_ref()),
        name: ax_value_string(node.name.as_ref()),
        attributes: attributes_from(node),
        backend_node_id: node
            .backend_dom_node_id
            .as_ref()
            .map(|id| BackendNodeId(*id.inner())),
        children,
    }]
}

fn ax_value_string(value: Option<&AxValue>) -> String {
    value
        .and_then(|v| v.value.as_ref())
        .map(json_to_string)
        .unwrap_or_default()
}

fn mixed_state(value: &serde_json::Value) -> Option<MixedState> {
    match value.as_str() {
        Some("true") => Some(MixedState::True),
        Some("false") => Some(MixedState::False),
        Some("mixed") => Some(MixedState::Mixed),
        _ => value.as_bool().map(|b| {
            if b {
                MixedState::True
            } else {
                MixedState::False
            }
        }),
    }
}

fn attributes_from(node: &AxNode) -> AxNodeAttributes {
    let mut attributes = AxNodeAttributes::default();
    if let Some(value) = node.value.as_ref().and_then(|v| v.value.as_ref()) {
        attributes.value = Some(json_to_string(value));
    }
    if let Some(description) = node.description.as_ref().and_then(|v| v.value.as_ref()) {
        attributes.description = Some(json_to_string(description));
    }
    for property in node.properties.iter().flatten() {
        let Some(value) = property.value.value.as_ref() else {
            continue;
        };
        match property.name {
            AxPropertyName::Valuetext => attributes.value_text = Some(json_to_string(value)),
            AxPropertyName::Valuemin => attributes.value_min = Some(json_to_string(value)),
            AxPropertyName::Valuemax => attributes.value_max = Some(json_to_string(value)),
            AxPropertyName::Level => attributes.level = Some(json_to_string(value)),
            AxPropertyName::Autocomplete => attributes.autocomplete = Some(json_to_string(value)),
            AxPropertyName::HasPopup => attributes.has_popup = Some(json_to_string(value)),
            AxPropertyName::Invalid => attributes.invalid = Some(json_to_string(value)),
            AxPropertyName::Orientation => attributes.orientation = Some(json_to_string(value)),
            AxPropertyName::Keyshortcuts => {
                attributes.key_shortcuts = Some(json_to_string(value));
            }
            AxPropertyName::Roledescription => {
                attributes.role_description = Some(json_to_string(value));
            }
            AxPropertyName::Disabled => attributes.disabled = value.as_bool(),
            AxPropertyName::Expanded => attributes.expanded = value.as_bool(),
            AxPropertyName::Focused => attributes.focused = value.as_bool(),
            AxPropertyName::Selected => attributes.selected = value.as_bool(),
            AxPropertyName::Modal => attributes.modal = value.as_bool().unwrap_or(false),
            AxPropertyName::Multiline => attributes.multiline = value.as_bool().unwrap_or(false),
            AxPropertyName::Readonly => attributes.readonly = value.as_bool().unwrap_or(false),
            AxPropertyName::Required => attributes.required = value.as_bool().unwrap_or(false),
            AxPropertyName::Multiselectable => {
                attributes.multiselectable = value.as_bool().unwrap_or(false);
            }
            AxPropertyName::Checked => attributes.checked = mixed_state(value),
            AxPropertyName::Pressed => attributes.pressed = mixed_state(value),
            _ => {}
        }
    }
    attributes
}
