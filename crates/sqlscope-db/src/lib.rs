//! Sqlscope-DB: Engines, context-scoped sessions, models and repositories
//!
//! This crate provides the database layer of sqlscope on top of SQLite with
//! rusqlite and r2d2 connection pooling.
//!
//! # Modules
//!
//! - `url` - `sqlite://` connection URLs
//! - `config` - Database, engine and session options
//! - `engine` - One connection pool per bind
//! - `model` - The `Model` trait and table-name derivation
//! - `metadata` - Metadata groups and the model registry
//! - `session` - The unit of work
//! - `context` - The per-context active session slot
//! - `database` - The facade tying engines, routing and sessions together
//! - `repository` - Generic CRUD over the active session
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sqlscope_db::{Database, DatabaseConfig, ModelRegistry};
//!
//! let db = Database::connect(
//!     DatabaseConfig::with_url("sqlite:///app.db").bind("reports", "sqlite:///reports.db"),
//!     Arc::new(ModelRegistry::new()),
//! )
//! .unwrap();
//!
//! db.session_scope(|session| {
//!     session.execute_batch(Some("reports"), "CREATE TABLE IF NOT EXISTS r (id INTEGER)")
//! })
//! .unwrap();
//! ```

pub mod config;
pub mod context;
pub mod database;
pub mod engine;
pub mod metadata;
pub mod model;
pub mod repository;
pub mod session;
pub mod url;

pub use config::{DatabaseConfig, EngineOptions, SessionOptions};
pub use database::{Database, SessionSource};
pub use engine::{DbPool, Engine, PooledConnection};
pub use metadata::{MetadataGroup, ModelRegistry, TableDef};
pub use model::{Column, Model, SqlType};
pub use repository::{BaseRepository, Repository};
pub use session::{Session, SessionFactory};
pub use url::DatabaseUrl;
