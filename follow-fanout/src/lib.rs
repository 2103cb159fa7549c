pub mod api;
pub mod app_context;
pub mod cache;
pub mod config;
pub mod consumer;
pub mod error;
pub mod fanout;
pub mod follow;
pub mod metrics_consts;
pub mod retry;
pub mod router;
pub mod seed;
pub mod seed_endpoint;
pub mod server;
pub mod types;
