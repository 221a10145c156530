//! HTTP gateway for the claim-arena debate service.

pub mod config;
pub mod routes;

pub use config::ArenaConfig;
pub use routes::{build_router, AppState};
