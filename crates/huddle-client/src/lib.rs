pub mod config;
pub mod gateway;
pub mod http;

pub use config::ClientConfig;
pub use gateway::{GatewayConfig, GatewayConnection, ReconnectPolicy};
pub use http::HttpBackend;
