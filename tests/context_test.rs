//! Session context behavior against the in-memory driver.

mod common;

use chrome_session_core::driver::{
    BackendNodeId, DialogInfo, DialogKind, DriverPage, PageEvent, ScreencastOptions,
};
use chrome_session_core::error::SessionError;
use chrome_session_core::snapshot::AxTreeNode;
use chrome_session_core::timeouts::NetworkConditions;
use chrome_session_core::{CLOSE_PAGE_ERROR, SessionContext};
use common::MockBrowser;
use std::sync::atomic::Ordering;

fn tree_with_backend_node(backend_node_id: i64) -> AxTreeNode {
    AxTreeNode {
        role: "RootWebArea".into(),
        name: "Page".into(),
        backend_node_id: Some(BackendNodeId(backend_node_id)),
        ..Default::default()
    }
}

#[tokio::test]
async fn selects_first_page_on_construction() {
    let (browser, _pages) = MockBrowser::with_pages(&["http://a.test", "http://b.test"]);
    let context = SessionContext::from_browser(browser).await.unwrap();
    assert_eq!(context.selected_page_idx(), Some(0));
    assert_eq!(context.selected_page().unwrap().url(), "http://a.test");
}

#[tokio::test]
async fn new_page_is_selected_and_collected() {
    let (browser, _pages) = MockBrowser::with_pages(&["http://a.test"]);
    let mut context = SessionContext::from_browser(browser.clone()).await.unwrap();

    context.new_page().await.unwrap();
    assert_eq!(context.pages().len(), 2);
    assert_eq!(context.selected_page_idx(), Some(1));

    // Events on the fresh page land in its buffer right away.
    browser.page_at(1).emit_request("http://new.test/api", false);
    assert_eq!(context.network_requests().unwrap().len(), 1);
}

#[tokio::test]
async fn last_page_cannot_be_closed() {
    let (browser, _pages) = MockBrowser::with_pages(&["http://a.test"]);
    let mut context = SessionContext::from_browser(browser).await.unwrap();

    let err = context.close_page(0).await.unwrap_err();
    assert!(matches!(err, SessionError::CannotCloseLastPage));
    assert_eq!(err.to_string(), CLOSE_PAGE_ERROR);
}

#[tokio::test]
async fn closing_the_selected_page_moves_the_cursor() {
    let (browser, _pages) = MockBrowser::with_pages(&["http://a.test", "http://b.test"]);
    let mut context = SessionContext::from_browser(browser).await.unwrap();

    context.set_selected_page_idx(1).unwrap();
    context.close_page(1).await.unwrap();

    assert_eq!(context.pages().len(), 1);
    assert_eq!(context.selected_page_idx(), Some(0));
    assert_eq!(context.selected_page().unwrap().url(), "http://a.test");
}

#[tokio::test]
async fn closing_any_page_resets_the_selection_to_the_first() {
    let (browser, _pages) =
        MockBrowser::with_pages(&["http://a.test", "http://b.test", "http://c.test"]);
    let mut context = SessionContext::from_browser(browser).await.unwrap();

    // Closing a page before the selected one shifts every later index.
    context.set_selected_page_idx(1).unwrap();
    context.close_page(0).await.unwrap();

    assert_eq!(context.selected_page_idx(), Some(0));
    assert_eq!(context.selected_page().unwrap().url(), "http://b.test");
}

#[tokio::test]
async fn selected_page_reports_external_close() {
    let (browser, pages) = MockBrowser::with_pages(&["http://a.test", "http://b.test"]);
    let context = SessionContext::from_browser(browser).await.unwrap();

    pages[0].close(false).await.unwrap();
    let err = context.selected_page().err().unwrap();
    assert!(matches!(err, SessionError::SelectedPageClosed));
}

#[tokio::test]
async fn page_by_idx_out_of_range() {
    let (browser, _pages) = MockBrowser::with_pages(&["http://a.test"]);
    let context = SessionContext::from_browser(browser).await.unwrap();
    let err = context.page_by_idx(5).err().unwrap();
    assert_eq!(err.to_string(), "No page found at index 5");
}

#[tokio::test]
async fn network_throttling_stretches_navigation_timeout_only() {
    let (browser, pages) = MockBrowser::with_pages(&["http://a.test"]);
    let mut context = SessionContext::from_browser(browser).await.unwrap();

    context
        .set_network_conditions(Some(NetworkConditions::Slow3G))
        .unwrap();
    assert_eq!(context.navigation_timeout().unwrap(), 100_000);
    assert_eq!(pages[0].default_timeout(), 5_000);

    context.set_network_conditions(None).unwrap();
    assert_eq!(context.navigation_timeout().unwrap(), 10_000);
}

#[tokio::test]
async fn cpu_throttling_stretches_interaction_timeout_only() {
    let (browser, pages) = MockBrowser::with_pages(&["http://a.test"]);
    let mut context = SessionContext::from_browser(browser).await.unwrap();

    context.set_cpu_throttling_rate(4.0).unwrap();
    assert_eq!(pages[0].default_timeout(), 20_000);
    assert_eq!(context.navigation_timeout().unwrap(), 10_000);
    assert_eq!(context.get_cpu_throttling_rate(), 4.0);

    context.set_cpu_throttling_rate(1.0).unwrap();
    assert_eq!(pages[0].default_timeout(), 5_000);
    assert_eq!(context.get_cpu_throttling_rate(), 1.0);
}

#[tokio::test]
async fn emulation_state_is_per_page() {
    let (browser, pages) = MockBrowser::with_pages(&["http://a.test", "http://b.test"]);
    let mut context = SessionContext::from_browser(browser).await.unwrap();

    context
        .set_network_conditions(Some(NetworkConditions::Fast3G))
        .unwrap();
    assert_eq!(
        context.get_network_conditions(),
        Some(NetworkConditions::Fast3G)
    );

    context.set_selected_page_idx(1).unwrap();
    assert_eq!(context.get_network_conditions(), None);
    assert_eq!(pages[1].default_navigation_timeout(), 10_000);

    context.set_selected_page_idx(0).unwrap();
    assert_eq!(
        context.get_network_conditions(),
        Some(NetworkConditions::Fast3G)
    );
}

#[tokio::test]
async fn snapshot_generations_increment_and_stale_uids_are_rejected() {
    let (browser, pages) = MockBrowser::with_pages(&["http://a.test"]);
    let mut context = SessionContext::from_browser(browser).await.unwrap();

    let err = context.element_by_uid("1_0").await.unwrap_err();
    assert!(matches!(err, SessionError::NoSnapshot));

    pages[0].set_tree(tree_with_backend_node(7));
    pages[0].add_element(7);
    context.create_text_snapshot().await.unwrap();
    assert_eq!(context.text_snapshot().unwrap().generation(), 1);

    let element = context.element_by_uid("1_0").await.unwrap();
    assert_eq!(element.backend_node_id, BackendNodeId(7));
    assert_eq!(element.object_id, "object-7");

    context.create_text_snapshot().await.unwrap();
    assert_eq!(context.text_snapshot().unwrap().generation(), 2);

    let err = context.element_by_uid("1_0").await.unwrap_err();
    assert!(matches!(err, SessionError::StaleSnapshot));
    assert!(context.element_by_uid("2_0").await.is_ok());
}

#[tokio::test]
async fn unknown_uid_in_current_generation_is_not_found() {
    let (browser, pages) = MockBrowser::with_pages(&["http://a.test"]);
    let mut context = SessionContext::from_browser(browser).await.unwrap();

    pages[0].set_tree(tree_with_backend_node(7));
    context.create_text_snapshot().await.unwrap();

    let err = context.element_by_uid("1_99").await.unwrap_err();
    assert!(matches!(err, SessionError::ElementNotFound));
}

#[tokio::test]
async fn missing_tree_keeps_previous_snapshot() {
    let (browser, pages) = MockBrowser::with_pages(&["http://a.test"]);
    let mut context = SessionContext::from_browser(browser).await.unwrap();

    pages[0].set_tree(tree_with_backend_node(7));
    context.create_text_snapshot().await.unwrap();

    pages[0].clear_tree();
    context.create_text_snapshot().await.unwrap();
    assert_eq!(context.text_snapshot().unwrap().generation(), 1);
}

#[tokio::test]
async fn dialog_follows_the_selected_page() {
    let (browser, pages) = MockBrowser::with_pages(&["http://a.test", "http://b.test"]);
    let mut context = SessionContext::from_browser(browser).await.unwrap();

    pages[0].emit(PageEvent::DialogOpened(DialogInfo {
        kind: DialogKind::Confirm,
        message: "Proceed?".into(),
        default_value: String::new(),
    }));
    let dialog = context.dialog().unwrap();
    assert_eq!(dialog.kind, DialogKind::Confirm);
    assert_eq!(dialog.message, "Proceed?");

    context.clear_dialog();
    context.set_selected_page_idx(1).unwrap();

    // The listener moved with the cursor; the old page no longer reports.
    pages[0].emit(PageEvent::DialogOpened(DialogInfo {
        kind: DialogKind::Alert,
        message: "ignored".into(),
        default_value: String::new(),
    }));
    assert!(context.dialog().is_none());
}

#[tokio::test]
async fn network_request_lookup_by_url() {
    let (browser, pages) = MockBrowser::with_pages(&["http://a.test"]);
    let context = SessionContext::from_browser(browser).await.unwrap();

    let err = context.network_request_by_url("http://a.test/api").unwrap_err();
    assert!(matches!(err, SessionError::NoRequests));

    pages[0].emit_request("http://a.test/api", false);
    let err = context.network_request_by_url("http://a.test/other").unwrap_err();
    assert!(matches!(err, SessionError::RequestNotFound));

    let request = context.network_request_by_url("http://a.test/api").unwrap();
    assert_eq!(request.url(), "http://a.test/api");
}

#[tokio::test]
async fn recording_is_exclusive_and_stoppable() {
    let (browser, pages) = MockBrowser::with_pages(&["http://a.test"]);
    let mut context = SessionContext::from_browser(browser).await.unwrap();

    assert!(!context.is_recording());
    context
        .start_recording(ScreencastOptions::default())
        .await
        .unwrap();
    assert!(context.is_recording());

    let err = context
        .start_recording(ScreencastOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::RecordingInProgress));

    context.stop_recording().await.unwrap();
    assert!(!context.is_recording());
    assert!(pages[0].recorder_stopped.load(Ordering::SeqCst));

    let err = context.stop_recording().await.unwrap_err();
    assert!(matches!(err, SessionError::NoActiveRecording));
}

#[tokio::test]
async fn saves_artifacts_under_configured_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = chrome_session_core::SessionConfig::default();
    config.artifacts.output_dir = Some(dir.path().to_path_buf());

    let (browser, _pages) = MockBrowser::with_pages(&["http://a.test"]);
    let context = SessionContext::with_config(browser, config).await.unwrap();

    let path = context
        .save_temporary_file("shot.png", &[0x89, b'P', b'N', b'G'])
        .await
        .unwrap();
    assert!(path.starts_with(dir.path()));
    assert_eq!(std::fs::read(&path).unwrap(), vec![0x89, b'P', b'N', b'G']);
}
