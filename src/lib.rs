//! Sqlscope - Context-scoped database sessions for SQLite services
//!
//! This library crate exposes the HTTP integration (per-request session
//! middleware, error responses, the health server) and configuration loading
//! on top of `sqlscope-db`.

pub mod config;
pub mod error;
pub mod middleware;
pub mod server;

pub use middleware::{db_session_middleware, SessionLayerExt};
