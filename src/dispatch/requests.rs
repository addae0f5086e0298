//! Request bodies and response payloads of the client-facing operations.

use serde::{Deserialize, Serialize};

use crate::notifications::{
    Notification, NotificationContent, NotificationStatus, StatusHistoryEntry,
};
use crate::token_store::PushToken;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub system_id: String,
    pub notification: NotificationContent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationData {
    pub notification_id: String,
    pub sent: u32,
    pub failed: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTokenRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub system_id: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub device_info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredToken {
    #[serde(flatten)]
    pub token: PushToken,
    pub is_new_registration: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnregisterTokenRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    #[serde(default)]
    pub notification_id: String,
    pub status: NotificationStatus,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeData {
    pub notification_id: String,
    pub previous_status: NotificationStatus,
    pub new_status: NotificationStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNotificationsRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub system_id: String,
    #[serde(default)]
    pub status: Option<NotificationStatus>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub days_back: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserNotificationsData {
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    #[serde(default)]
    pub notification_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryData {
    pub notification_id: String,
    pub history: Vec<StatusHistoryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveGroupRequest {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMemberRequest {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub user_id: String,
}
