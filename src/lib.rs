//! Broadcaster Server Library
//!
//! Notification dispatch over SSE streams and push tokens, with a durable
//! delivery ledger. Modules are exposed for the binary and for testing.

pub mod config;
pub mod dispatch;
pub mod notifications;
pub mod push;
pub mod server;
pub mod sqlite_persistence;
pub mod token_store;
pub mod webhook;

// Re-export commonly used types for convenience
pub use dispatch::{ApiResponse, DispatchFacade};
pub use notifications::{NotificationLedger, SqliteNotificationLedger};
pub use server::{make_app, run_server, RequestsLoggingLevel};
pub use token_store::{FullTokenStore, SqliteTokenStore, TokenStore};
