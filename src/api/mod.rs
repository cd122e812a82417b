//! HTTP surface over the store, rule engine and manual alerts

pub mod handlers;
pub mod server;

pub use handlers::{ApiError, AppState};
pub use server::{build_router, run_server, ServerConfig};
