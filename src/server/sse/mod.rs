//! Server-Sent Events: the connection registry and the stream endpoint.

mod connection;
mod frame;
mod handler;

pub use connection::{ConnectionCount, ConnectionHandle, ConnectionRegistry, WriteError};
pub use frame::SseFrame;
pub use handler::make_stream_routes;
