mod requests_logging;

pub use requests_logging::{log_requests, RequestsLoggingLevel, TRACKING_ID_HEADER};
