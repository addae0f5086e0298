use super::models::{
    Notification, NotificationContent, NotificationPage, NotificationQuery, NotificationStatus,
    StatusHistoryEntry, TransitionResult,
};
use super::schema::NOTIFICATION_VERSIONED_SCHEMAS;
use super::status::{PermissiveTransitions, TransitionPolicy};
use super::NotificationLedger;
use crate::server::metrics;
use crate::sqlite_persistence::{from_millis, now_millis, open_versioned};
use anyhow::{Context, Result};
use chrono::Duration;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const NOTIFICATION_COLUMNS: &str = "notification_id, user_id, system_id, status, title, body, \
    icon, image, data, tokens_count, success_count, failure_count, created_at, sent_at, \
    delivered_at, read_at";

pub struct SqliteNotificationLedger {
    conn: Arc<Mutex<Connection>>,
    policy: Box<dyn TransitionPolicy>,
}

impl SqliteNotificationLedger {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_policy(db_path, Box::new(PermissiveTransitions))
    }

    pub fn with_policy<P: AsRef<Path>>(
        db_path: P,
        policy: Box<dyn TransitionPolicy>,
    ) -> Result<Self> {
        let conn = open_versioned(
            db_path.as_ref(),
            NOTIFICATION_VERSIONED_SCHEMAS,
            "notification",
        )?;
        Ok(Self { conn, policy })
    }

    fn parse_status(raw: String, column: usize) -> rusqlite::Result<NotificationStatus> {
        raw.parse().map_err(|e: anyhow::Error| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })
    }

    fn row_to_notification(row: &Row) -> rusqlite::Result<Notification> {
        let data: Option<String> = row.get(8)?;
        let data = data
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        let optional_time =
            |idx: usize| -> rusqlite::Result<_> { Ok(row.get::<_, Option<i64>>(idx)?.map(from_millis)) };

        Ok(Notification {
            notification_id: row.get(0)?,
            user_id: row.get(1)?,
            system_id: row.get(2)?,
            status: Self::parse_status(row.get(3)?, 3)?,
            content: NotificationContent {
                title: row.get(4)?,
                body: row.get(5)?,
                icon: row.get(6)?,
                image: row.get(7)?,
                data,
            },
            tokens_count: row.get(9)?,
            success_count: row.get(10)?,
            failure_count: row.get(11)?,
            created_at: from_millis(row.get(12)?),
            sent_at: optional_time(13)?,
            delivered_at: optional_time(14)?,
            read_at: optional_time(15)?,
        })
    }

    fn row_to_history(row: &Row) -> rusqlite::Result<StatusHistoryEntry> {
        let previous_status = match row.get::<_, Option<String>>(2)? {
            Some(raw) => Some(Self::parse_status(raw, 2)?),
            None => None,
        };
        let metadata: Option<String> = row.get(5)?;
        Ok(StatusHistoryEntry {
            history_id: row.get(0)?,
            notification_id: row.get(1)?,
            previous_status,
            new_status: Self::parse_status(row.get(3)?, 3)?,
            timestamp: from_millis(row.get(4)?),
            metadata: metadata.and_then(|raw| serde_json::from_str(&raw).ok()),
        })
    }

    fn load(conn: &Connection, notification_id: &str) -> Result<Option<Notification>> {
        let notification = conn
            .query_row(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE notification_id = ?1"
                ),
                params![notification_id],
                Self::row_to_notification,
            )
            .optional()?;
        Ok(notification)
    }

    fn append_history(
        conn: &Connection,
        notification_id: &str,
        previous_status: Option<NotificationStatus>,
        new_status: NotificationStatus,
        metadata: Option<&serde_json::Value>,
        timestamp: i64,
    ) -> Result<()> {
        let metadata = metadata
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize status metadata")?;
        conn.execute(
            "INSERT INTO notification_status_history
             (history_id, notification_id, previous_status, new_status, timestamp, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                notification_id,
                previous_status.map(|s| s.as_str()),
                new_status.as_str(),
                timestamp,
                metadata,
            ],
        )?;
        Ok(())
    }

    /// Timestamp column stamped when entering `status`, if any.
    fn timestamp_column(status: NotificationStatus) -> Option<&'static str> {
        match status {
            NotificationStatus::Sent => Some("sent_at"),
            NotificationStatus::Delivered => Some("delivered_at"),
            NotificationStatus::Read => Some("read_at"),
            NotificationStatus::Pending | NotificationStatus::Failed => None,
        }
    }
}

impl NotificationLedger for SqliteNotificationLedger {
    fn create(
        &self,
        user_id: &str,
        system_id: &str,
        content: &NotificationContent,
    ) -> Result<Notification> {
        let notification_id = uuid::Uuid::new_v4().to_string();
        self.create_with_id(&notification_id, user_id, system_id, content)?
            .with_context(|| format!("Generated notification id {} already taken", notification_id))
    }

    fn create_with_id(
        &self,
        notification_id: &str,
        user_id: &str,
        system_id: &str,
        content: &NotificationContent,
    ) -> Result<Option<Notification>> {
        let mut conn = self.conn.lock().unwrap();
        let now = now_millis();
        let data = if content.data.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&content.data).context("Failed to serialize data")?)
        };

        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO notifications
             (notification_id, user_id, system_id, status, title, body, icon, image, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                notification_id,
                user_id,
                system_id,
                NotificationStatus::Pending.as_str(),
                content.title,
                content.body,
                content.icon,
                content.image,
                data,
                now,
            ],
        )
        .with_context(|| format!("Failed to create notification {}", notification_id))?;
        if inserted == 0 {
            debug!("Notification {} already exists", notification_id);
            return Ok(None);
        }
        Self::append_history(
            &tx,
            notification_id,
            None,
            NotificationStatus::Pending,
            None,
            now,
        )?;
        let notification = Self::load(&tx, notification_id)?
            .with_context(|| format!("Notification {} vanished after insert", notification_id))?;
        tx.commit()?;

        metrics::record_status_transition(NotificationStatus::Pending.as_str());
        debug!(
            "Created notification {} for user {} in system {}",
            notification_id, user_id, system_id
        );
        Ok(Some(notification))
    }

    fn update_counts(
        &self,
        notification_id: &str,
        tokens_count: u32,
        success_count: u32,
        failure_count: u32,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE notifications SET tokens_count = ?2, success_count = ?3, failure_count = ?4
             WHERE notification_id = ?1",
            params![notification_id, tokens_count, success_count, failure_count],
        )?;
        if updated == 0 {
            warn!("Cannot update counters of unknown notification {}", notification_id);
        }
        Ok(updated > 0)
    }

    fn transition_status(
        &self,
        notification_id: &str,
        new_status: NotificationStatus,
        metadata: Option<serde_json::Value>,
    ) -> Result<TransitionResult> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM notifications WHERE notification_id = ?1",
                params![notification_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            warn!(
                "Cannot move unknown notification {} to {}",
                notification_id, new_status
            );
            return Ok(TransitionResult::NotFound);
        };
        let previous_status: NotificationStatus = current.parse()?;

        if !self.policy.allows(previous_status, new_status) {
            warn!(
                "Rejected transition {} -> {} for notification {}",
                previous_status, new_status, notification_id
            );
            return Ok(TransitionResult::Rejected {
                current_status: previous_status,
            });
        }

        let now = now_millis();
        let mut sql = String::from("UPDATE notifications SET status = ?2");
        if let Some(column) = Self::timestamp_column(new_status) {
            sql.push_str(&format!(", {} = ?3", column));
        }
        sql.push_str(" WHERE notification_id = ?1");

        let status_str = new_status.as_str();
        let mut values: Vec<&dyn ToSql> = vec![&notification_id, &status_str];
        if Self::timestamp_column(new_status).is_some() {
            values.push(&now);
        }
        tx.execute(&sql, values.as_slice())?;

        Self::append_history(
            &tx,
            notification_id,
            Some(previous_status),
            new_status,
            metadata.as_ref(),
            now,
        )?;
        tx.commit()?;

        metrics::record_status_transition(status_str);
        debug!(
            "Notification {} moved {} -> {}",
            notification_id, previous_status, new_status
        );
        Ok(TransitionResult::Transitioned { previous_status })
    }

    fn allows_transition(&self, from: NotificationStatus, to: NotificationStatus) -> bool {
        self.policy.allows(from, to)
    }

    fn get(&self, notification_id: &str) -> Result<Option<Notification>> {
        let conn = self.conn.lock().unwrap();
        Self::load(&conn, notification_id)
    }

    fn list_for_user(&self, query: &NotificationQuery) -> Result<NotificationPage> {
        let conn = self.conn.lock().unwrap();
        let since = now_millis() - Duration::days(query.days_back as i64).num_milliseconds();
        let page = query.page.max(1);
        let limit = query.limit.max(1);
        let offset = (page as i64 - 1) * limit as i64;

        let status_filter = query.status.map(|s| s.as_str());
        let mut where_clause =
            String::from("user_id = ?1 AND system_id = ?2 AND created_at >= ?3");
        let mut filter_values: Vec<&dyn ToSql> = vec![&query.user_id, &query.system_id, &since];
        if let Some(status) = status_filter.as_ref() {
            where_clause.push_str(" AND status = ?4");
            filter_values.push(status);
        }

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM notifications WHERE {where_clause}"),
            filter_values.as_slice(),
            |row| row.get(0),
        )?;

        let mut page_values = filter_values.clone();
        let limit_param = filter_values.len() + 1;
        page_values.push(&limit);
        page_values.push(&offset);
        let mut stmt = conn.prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE {where_clause}
             ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
            limit_param,
            limit_param + 1
        ))?;
        let mut notifications = stmt
            .query_map(page_values.as_slice(), Self::row_to_notification)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // Stable, so creation order is kept inside each partition.
        notifications.sort_by_key(|n| n.status == NotificationStatus::Read);

        Ok(NotificationPage {
            notifications,
            total: total as u64,
            page,
            limit,
        })
    }

    fn history(&self, notification_id: &str) -> Result<Vec<StatusHistoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT history_id, notification_id, previous_status, new_status, timestamp, metadata
             FROM notification_status_history
             WHERE notification_id = ?1
             ORDER BY timestamp, rowid",
        )?;
        let entries = stmt
            .query_map(params![notification_id], Self::row_to_history)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}
