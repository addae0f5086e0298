//! Shared constants for end-to-end tests

/// Maximum time to wait for the server to answer /health
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Interval between readiness polls
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

/// Timeout applied to every client request
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// How long a test waits for the next SSE event before giving up
pub const SSE_EVENT_TIMEOUT_MS: u64 = 3000;

pub const USER_1: &str = "u1";
pub const USER_2: &str = "u2";
pub const SYSTEM_1: &str = "s1";
