use crate::notifications::NotificationContent;
use serde::Serialize;
use std::collections::BTreeMap;

/// Transport-neutral push payload. `data` is string-only, as push services require.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    /// Shown as the notification image on native clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Large image for web push clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webpush_image: Option<String>,
    pub data: BTreeMap<String, String>,
}

impl PushMessage {
    /// Builds the payload for a ledger record. The notification id is always
    /// included in `data` so clients can report status changes back.
    pub fn for_notification(notification_id: &str, content: &NotificationContent) -> Self {
        let mut data = coerce_data(&content.data);
        data.insert("notificationId".to_string(), notification_id.to_string());
        Self {
            title: content.title.clone(),
            body: content.body.clone(),
            image_url: content.icon.clone(),
            webpush_image: content.image.clone(),
            data,
        }
    }
}

/// Strings pass through, anything else becomes its JSON text.
pub fn coerce_data(data: &serde_json::Map<String, serde_json::Value>) -> BTreeMap<String, String> {
    data.iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerce_data_stringifies_non_strings() {
        let data = json!({
            "s": "text",
            "n": 42,
            "f": 1.5,
            "b": true,
            "nil": null,
            "obj": {"a": [1, 2]},
        });
        let coerced = coerce_data(data.as_object().unwrap());

        assert_eq!(coerced["s"], "text");
        assert_eq!(coerced["n"], "42");
        assert_eq!(coerced["f"], "1.5");
        assert_eq!(coerced["b"], "true");
        assert_eq!(coerced["nil"], "null");
        assert_eq!(coerced["obj"], r#"{"a":[1,2]}"#);
    }

    #[test]
    fn message_carries_notification_id_and_images() {
        let mut content = NotificationContent {
            title: "Hi".to_string(),
            body: "There".to_string(),
            icon: Some("icon.png".to_string()),
            image: Some("big.png".to_string()),
            ..Default::default()
        };
        content
            .data
            .insert("notificationId".to_string(), json!("spoofed"));

        let message = PushMessage::for_notification("n1", &content);

        assert_eq!(message.data["notificationId"], "n1");
        assert_eq!(message.image_url.as_deref(), Some("icon.png"));
        assert_eq!(message.webpush_image.as_deref(), Some("big.png"));
    }
}
