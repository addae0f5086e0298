//! Notification ledger: delivery records, the status state machine and its
//! append-only history.

mod models;
mod schema;
mod sqlite_ledger;
mod status;

pub use models::{
    Notification, NotificationContent, NotificationPage, NotificationQuery, NotificationStatus,
    StatusHistoryEntry, TransitionResult,
};
pub use schema::NOTIFICATION_VERSIONED_SCHEMAS;
pub use sqlite_ledger::SqliteNotificationLedger;
pub use status::{ForwardOnlyTransitions, PermissiveTransitions, TransitionPolicy};

use anyhow::Result;

pub trait NotificationLedger: Send + Sync {
    /// Persists a new PENDING record with a generated id and its first history entry.
    fn create(
        &self,
        user_id: &str,
        system_id: &str,
        content: &NotificationContent,
    ) -> Result<Notification>;

    /// Same as [`NotificationLedger::create`] with a caller-chosen id.
    /// `None` when a record with that id already exists.
    fn create_with_id(
        &self,
        notification_id: &str,
        user_id: &str,
        system_id: &str,
        content: &NotificationContent,
    ) -> Result<Option<Notification>>;

    /// Overwrites the delivery counters. Returns false if the record does not exist.
    fn update_counts(
        &self,
        notification_id: &str,
        tokens_count: u32,
        success_count: u32,
        failure_count: u32,
    ) -> Result<bool>;

    fn transition_status(
        &self,
        notification_id: &str,
        new_status: NotificationStatus,
        metadata: Option<serde_json::Value>,
    ) -> Result<TransitionResult>;

    /// Whether the active transition policy lets a record move from `from` to `to`.
    fn allows_transition(&self, from: NotificationStatus, to: NotificationStatus) -> bool;

    fn get(&self, notification_id: &str) -> Result<Option<Notification>>;

    /// Newest first, unread before read within the page.
    fn list_for_user(&self, query: &NotificationQuery) -> Result<NotificationPage>;

    /// Oldest first. Empty for unknown ids.
    fn history(&self, notification_id: &str) -> Result<Vec<StatusHistoryEntry>>;
}
