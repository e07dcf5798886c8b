//! Per-session browser state cache for automation agents.
//!
//! Sits between a browser automation driver and a set of command handlers:
//! tracks open pages and a selected-page cursor, buffers network and console
//! events per page with navigation-aware invalidation, captures versioned
//! accessibility snapshots with stable node uids, derives adaptive timeouts
//! under CPU/network throttling emulation, and assembles the final textual
//! response for each command invocation.

pub mod chrome;
pub mod collector;
pub mod config;
pub mod console;
pub mod context;
pub mod driver;
pub mod error;
pub mod network;
pub mod pagination;
pub mod response;
pub mod snapshot;
pub mod timeouts;

pub use config::SessionConfig;
pub use context::SessionContext;
pub use error::{CLOSE_PAGE_ERROR, SessionError};
pub use response::{ResponsePart, ToolResponse};

pub type Result<T> = std::result::Result<T, SessionError>;
