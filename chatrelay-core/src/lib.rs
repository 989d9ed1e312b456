pub mod config;
pub mod consumer;
pub mod error;
pub mod http_client;
pub mod model;
pub mod provider;
pub mod providers;
pub mod relay;
pub mod server;
pub mod stream;
pub mod trailer;
pub mod usage;
