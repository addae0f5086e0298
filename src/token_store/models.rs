use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One device/browser registration for push delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushToken {
    pub id: String,
    pub user_id: String,
    pub system_id: String,
    pub token: String,
    pub device_info: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedToken {
    pub token: PushToken,
    pub is_new_registration: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub group_id: String,
    pub name: Option<String>,
    pub user_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
