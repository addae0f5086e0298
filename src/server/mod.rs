pub mod config;
mod http_layers;
pub mod metrics;
pub mod server;
pub mod sse;
pub mod state;
mod subscription_routes;

pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{make_app, run_server};
pub use subscription_routes::JsonBody;
