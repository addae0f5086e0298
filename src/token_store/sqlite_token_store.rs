use super::models::{Group, PushToken, SavedToken};
use super::schema::TOKEN_VERSIONED_SCHEMAS;
use super::{GroupStore, TokenStore};
use crate::sqlite_persistence::{from_millis, now_millis, open_versioned};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const TOKEN_COLUMNS: &str = "id, user_id, system_id, token, device_info, created_at, last_used";

pub struct SqliteTokenStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTokenStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), TOKEN_VERSIONED_SCHEMAS, "token")?;
        Ok(Self { conn })
    }

    fn row_to_token(row: &Row) -> rusqlite::Result<PushToken> {
        let device_info: Option<String> = row.get(4)?;
        Ok(PushToken {
            id: row.get(0)?,
            user_id: row.get(1)?,
            system_id: row.get(2)?,
            token: row.get(3)?,
            device_info: device_info.and_then(|raw| serde_json::from_str(&raw).ok()),
            created_at: from_millis(row.get(5)?),
            last_used: from_millis(row.get(6)?),
        })
    }

    fn select_by(conn: &Connection, column: &str, value: &str) -> Result<Option<PushToken>> {
        let token = conn
            .query_row(
                &format!("SELECT {TOKEN_COLUMNS} FROM push_tokens WHERE {column} = ?1"),
                params![value],
                Self::row_to_token,
            )
            .optional()?;
        Ok(token)
    }

    fn query_token_values(
        conn: &Connection,
        sql: &str,
        values: &[&str],
    ) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(sql)?;
        let tokens = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(tokens)
    }

    fn load_group(conn: &Connection, group_id: &str) -> Result<Option<Group>> {
        let header = conn
            .query_row(
                "SELECT name, created_at, updated_at FROM push_groups WHERE group_id = ?1",
                params![group_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((name, created_at, updated_at)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT user_id FROM push_group_members WHERE group_id = ?1 ORDER BY added_at, rowid",
        )?;
        let user_ids = stmt
            .query_map(params![group_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(Some(Group {
            group_id: group_id.to_string(),
            name,
            user_ids,
            created_at: from_millis(created_at),
            updated_at: from_millis(updated_at),
        }))
    }

    fn ensure_group(conn: &Connection, group_id: &str, now: i64) -> Result<()> {
        conn.execute(
            "INSERT INTO push_groups (group_id, name, created_at, updated_at)
             VALUES (?1, NULL, ?2, ?2)
             ON CONFLICT(group_id) DO UPDATE SET updated_at = ?2",
            params![group_id, now],
        )?;
        Ok(())
    }
}

impl TokenStore for SqliteTokenStore {
    fn save_token(
        &self,
        id: Option<&str>,
        user_id: &str,
        system_id: &str,
        token: &str,
        device_info: Option<serde_json::Value>,
    ) -> Result<SavedToken> {
        let mut conn = self.conn.lock().unwrap();
        let now = now_millis();
        let device_info_json = device_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize device info")?;

        let tx = conn.transaction()?;

        let by_id = match id {
            Some(id) => Self::select_by(&tx, "id", id)?,
            None => None,
        };
        let existing = match by_id {
            Some(record) => Some(record),
            None => Self::select_by(&tx, "token", token)?,
        };

        let (record_id, is_new_registration) = match existing {
            Some(record) => {
                // Another registration may already hold this token value.
                tx.execute(
                    "DELETE FROM push_tokens WHERE token = ?1 AND id != ?2",
                    params![token, record.id],
                )?;
                tx.execute(
                    "UPDATE push_tokens
                     SET user_id = ?1, system_id = ?2, token = ?3, device_info = ?4, last_used = ?5
                     WHERE id = ?6",
                    params![user_id, system_id, token, device_info_json, now, record.id],
                )?;
                (record.id, false)
            }
            None => {
                let new_id = uuid::Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO push_tokens (id, user_id, system_id, token, device_info, created_at, last_used)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    params![new_id, user_id, system_id, token, device_info_json, now],
                )?;
                (new_id, true)
            }
        };

        let saved = Self::select_by(&tx, "id", &record_id)?
            .with_context(|| format!("Token {} vanished after save", record_id))?;
        tx.commit()?;

        debug!(
            "Token {} for user {} in system {} ({})",
            record_id,
            user_id,
            system_id,
            if is_new_registration { "created" } else { "updated" }
        );

        Ok(SavedToken {
            token: saved,
            is_new_registration,
        })
    }

    fn get_token(&self, id: &str) -> Result<Option<PushToken>> {
        let conn = self.conn.lock().unwrap();
        Self::select_by(&conn, "id", id)
    }

    fn find_by_token(&self, token: &str) -> Result<Option<PushToken>> {
        let conn = self.conn.lock().unwrap();
        Self::select_by(&conn, "token", token)
    }

    fn get_user_tokens(&self, user_id: &str, system_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        Self::query_token_values(
            &conn,
            "SELECT token FROM push_tokens WHERE user_id = ?1 AND system_id = ?2 ORDER BY created_at",
            &[user_id, system_id],
        )
    }

    fn get_tokens_for_users(&self, user_ids: &[String]) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT token FROM push_tokens WHERE user_id = ?1 ORDER BY created_at",
        )?;
        let mut tokens = Vec::new();
        for user_id in user_ids {
            let user_tokens = stmt
                .query_map(params![user_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            tokens.extend(user_tokens);
        }
        Ok(tokens)
    }

    fn get_all_tokens(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        Self::query_token_values(&conn, "SELECT token FROM push_tokens ORDER BY created_at", &[])
    }

    fn delete_token_by_id(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM push_tokens WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn delete_token(&self, token: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM push_tokens WHERE token = ?1", params![token])?;
        Ok(deleted > 0)
    }

    fn remove_all_user_tokens(&self, user_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM push_tokens WHERE user_id = ?1", params![user_id])?;
        info!("Removed {} tokens of user {}", deleted, user_id);
        Ok(deleted)
    }

    fn remove_invalid_tokens(&self, tokens: &[String]) -> Result<usize> {
        if tokens.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM push_tokens WHERE token = ?1")?;
            for token in tokens {
                deleted += stmt.execute(params![token])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn cleanup_old_tokens(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM push_tokens WHERE last_used < ?1",
            params![older_than.timestamp_millis()],
        )?;
        Ok(deleted)
    }
}

impl GroupStore for SqliteTokenStore {
    fn save_group(
        &self,
        group_id: &str,
        user_ids: &[String],
        name: Option<&str>,
    ) -> Result<Group> {
        let mut conn = self.conn.lock().unwrap();
        let now = now_millis();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO push_groups (group_id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(group_id) DO UPDATE SET name = ?2, updated_at = ?3",
            params![group_id, name, now],
        )?;
        tx.execute(
            "DELETE FROM push_group_members WHERE group_id = ?1",
            params![group_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO push_group_members (group_id, user_id, added_at) VALUES (?1, ?2, ?3)",
            )?;
            let mut seen = std::collections::HashSet::new();
            for user_id in user_ids.iter().filter(|u| seen.insert(u.as_str())) {
                stmt.execute(params![group_id, user_id, now])?;
            }
        }

        let group = Self::load_group(&tx, group_id)?
            .with_context(|| format!("Group {} vanished after save", group_id))?;
        tx.commit()?;

        info!("Group {} saved with {} members", group_id, group.user_ids.len());
        Ok(group)
    }

    fn add_user_to_group(&self, group_id: &str, user_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let now = now_millis();
        let tx = conn.transaction()?;

        Self::ensure_group(&tx, group_id, now)?;
        let already_member = tx
            .query_row(
                "SELECT 1 FROM push_group_members WHERE group_id = ?1 AND user_id = ?2",
                params![group_id, user_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !already_member {
            tx.execute(
                "INSERT INTO push_group_members (group_id, user_id, added_at) VALUES (?1, ?2, ?3)",
                params![group_id, user_id, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn remove_user_from_group(&self, group_id: &str, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM push_group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group_id, user_id],
        )?;
        if deleted > 0 {
            conn.execute(
                "UPDATE push_groups SET updated_at = ?2 WHERE group_id = ?1",
                params![group_id, now_millis()],
            )?;
        }
        Ok(deleted > 0)
    }

    fn get_group(&self, group_id: &str) -> Result<Option<Group>> {
        let conn = self.conn.lock().unwrap();
        Self::load_group(&conn, group_id)
    }

    fn get_group_tokens(&self, group_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        Self::query_token_values(
            &conn,
            "SELECT token FROM push_tokens
             WHERE user_id IN (SELECT user_id FROM push_group_members WHERE group_id = ?1)
             ORDER BY created_at",
            &[group_id],
        )
    }
}
