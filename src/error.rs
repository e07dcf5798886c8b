use thiserror::Error;

/// Message surfaced when a caller tries to close the only remaining page.
pub const CLOSE_PAGE_ERROR: &str =
    "The last open page cannot be closed. It is fine to keep it open.";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No page selected")]
    NoPageSelected,

    #[error("The selected page has been closed. Call list_pages to see open pages.")]
    SelectedPageClosed,

    #[error("No page found at index {0}")]
    NoPageAtIndex(usize),

    #[error("{CLOSE_PAGE_ERROR}")]
    CannotCloseLastPage,

    #[error("No snapshot found. Use take_snapshot to capture one.")]
    NoSnapshot,

    #[error(
        "This uid is coming from a stale snapshot. Call take_snapshot to get a fresh snapshot."
    )]
    StaleSnapshot,

    #[error("No such element found in the snapshot")]
    ElementNotFound,

    #[error("No requests found for selected page")]
    NoRequests,

    #[error("Request not found for selected page")]
    RequestNotFound,

    #[error(
        "A recording is already in progress. Stop the current recording before starting a new one."
    )]
    RecordingInProgress,

    #[error("No recording is currently in progress.")]
    NoActiveRecording,

    #[error("Failed to stop recording: {0}")]
    RecordingStopFailed(String),

    #[error("Could not save a screenshot to a file")]
    FileSave(#[source] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Driver error: {0}")]
    Driver(String),
}
