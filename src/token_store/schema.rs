//! SQLite schema of the token database.

use crate::sqlite_column;
use crate::sqlite_persistence::{ForeignKey, SqlType, Table, VersionedSchema};

const PUSH_TOKENS_TABLE_V1: Table = Table {
    name: "push_tokens",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!("system_id", &SqlType::Text, non_null = true),
        sqlite_column!("token", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("device_info", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("last_used", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_push_tokens_user_system", "user_id, system_id"),
        ("idx_push_tokens_last_used", "last_used"),
    ],
};

const GROUPS_TABLE_V1: Table = Table {
    name: "push_groups",
    columns: &[
        sqlite_column!("group_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
};

const GROUP_FK: ForeignKey = ForeignKey {
    foreign_table: "push_groups",
    foreign_column: "group_id",
    on_delete: "CASCADE",
};

const GROUP_MEMBERS_TABLE_V1: Table = Table {
    name: "push_group_members",
    columns: &[
        sqlite_column!(
            "group_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&GROUP_FK)
        ),
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!("added_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_push_group_members_group", "group_id"),
        ("idx_push_group_members_user", "user_id"),
    ],
};

pub const TOKEN_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[PUSH_TOKENS_TABLE_V1, GROUPS_TABLE_V1, GROUP_MEMBERS_TABLE_V1],
    migration: None,
}];
