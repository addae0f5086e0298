//! SQLite schema of the notification ledger database.

use crate::sqlite_column;
use crate::sqlite_persistence::{ForeignKey, SqlType, Table, VersionedSchema};

const NOTIFICATIONS_TABLE_V1: Table = Table {
    name: "notifications",
    columns: &[
        sqlite_column!("notification_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!("system_id", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("body", &SqlType::Text, non_null = true),
        sqlite_column!("icon", &SqlType::Text),
        sqlite_column!("image", &SqlType::Text),
        sqlite_column!("data", &SqlType::Text),
        sqlite_column!(
            "tokens_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "success_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "failure_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("sent_at", &SqlType::Integer),
        sqlite_column!("delivered_at", &SqlType::Integer),
        sqlite_column!("read_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_notifications_user_system_created", "user_id, system_id, created_at"),
        ("idx_notifications_status", "status"),
    ],
};

const STATUS_HISTORY_TABLE_V1: Table = Table {
    name: "notification_status_history",
    columns: &[
        sqlite_column!("history_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "notification_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "notifications",
                foreign_column: "notification_id",
                on_delete: "CASCADE",
            })
        ),
        sqlite_column!("previous_status", &SqlType::Text),
        sqlite_column!("new_status", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
        sqlite_column!("metadata", &SqlType::Text),
    ],
    indices: &[(
        "idx_notification_status_history_notification",
        "notification_id, timestamp",
    )],
};

pub const NOTIFICATION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[NOTIFICATIONS_TABLE_V1, STATUS_HISTORY_TABLE_V1],
    migration: None,
}];
