mod versioned_schema;

pub use versioned_schema::*;

use chrono::{DateTime, Utc};

/// Current time as stored in every table: Unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
