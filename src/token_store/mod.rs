//! Durable push-token and group-membership storage.

mod models;
mod schema;
mod sqlite_token_store;
mod sweeper;

pub use models::{Group, PushToken, SavedToken};
pub use schema::TOKEN_VERSIONED_SCHEMAS;
pub use sqlite_token_store::SqliteTokenStore;
pub use sweeper::{spawn_token_sweeper, sweep_stale_tokens};

use anyhow::Result;
use chrono::{DateTime, Utc};

pub trait TokenStore: Send + Sync {
    /// Upserts a registration.
    ///
    /// With `id`, the record with that id is updated. Without it (or when the id
    /// is unknown) a record already holding `token` is reused and updated.
    /// Otherwise a new record is created. Token values stay globally unique.
    fn save_token(
        &self,
        id: Option<&str>,
        user_id: &str,
        system_id: &str,
        token: &str,
        device_info: Option<serde_json::Value>,
    ) -> Result<SavedToken>;

    fn get_token(&self, id: &str) -> Result<Option<PushToken>>;
    fn find_by_token(&self, token: &str) -> Result<Option<PushToken>>;

    /// Token values registered by a user for one system.
    fn get_user_tokens(&self, user_id: &str, system_id: &str) -> Result<Vec<String>>;

    /// Token values registered by any of `user_ids`, across all systems.
    fn get_tokens_for_users(&self, user_ids: &[String]) -> Result<Vec<String>>;

    fn get_all_tokens(&self) -> Result<Vec<String>>;

    /// Returns true if a record was deleted.
    fn delete_token_by_id(&self, id: &str) -> Result<bool>;
    /// Returns true if a record was deleted.
    fn delete_token(&self, token: &str) -> Result<bool>;

    fn remove_all_user_tokens(&self, user_id: &str) -> Result<usize>;
    fn remove_invalid_tokens(&self, tokens: &[String]) -> Result<usize>;

    /// Deletes every token whose `last_used` is strictly before `older_than`.
    fn cleanup_old_tokens(&self, older_than: DateTime<Utc>) -> Result<usize>;
}

pub trait GroupStore: Send + Sync {
    /// Creates the group or replaces its name and members.
    fn save_group(&self, group_id: &str, user_ids: &[String], name: Option<&str>)
        -> Result<Group>;

    /// Adds a member, creating the group if needed. Adding an existing member is a no-op.
    fn add_user_to_group(&self, group_id: &str, user_id: &str) -> Result<()>;

    /// Returns true if the user was a member.
    fn remove_user_from_group(&self, group_id: &str, user_id: &str) -> Result<bool>;

    fn get_group(&self, group_id: &str) -> Result<Option<Group>>;

    /// Union of the tokens of every member of `group_id`. Unknown groups have no tokens.
    fn get_group_tokens(&self, group_id: &str) -> Result<Vec<String>>;
}

/// Token storage with group lookups.
pub trait FullTokenStore: TokenStore + GroupStore {}

impl<T: TokenStore + GroupStore> FullTokenStore for T {}
