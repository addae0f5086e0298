use axum::response::sse::Event;
use serde::Serialize;

/// A single frame queued for an SSE connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// `event: <name>` followed by a JSON `data:` line.
    Event { name: String, data: String },
    /// `: <text>` comment line, ignored by clients.
    Comment(String),
}

impl SseFrame {
    pub fn event<T: Serialize>(name: &str, payload: &T) -> serde_json::Result<Self> {
        Ok(SseFrame::Event {
            name: name.to_string(),
            data: serde_json::to_string(payload)?,
        })
    }

    pub fn heartbeat() -> Self {
        SseFrame::Comment("heartbeat".to_string())
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            SseFrame::Event { name, .. } => Some(name),
            SseFrame::Comment(_) => None,
        }
    }

    pub fn into_event(self) -> Event {
        match self {
            SseFrame::Event { name, data } => Event::default().event(name).data(data),
            SseFrame::Comment(text) => Event::default().comment(text),
        }
    }
}
