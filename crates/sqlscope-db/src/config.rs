//! Database configuration.
//!
//! These types are what [`Database::initialize`](crate::database::Database::initialize)
//! consumes. They deserialize from the `[database]` section of the config file:
//!
//! ```toml
//! [database]
//! url = "sqlite:///app.db"
//!
//! [database.binds]
//! reports = "sqlite:///reports.db"
//!
//! [database.engine]
//! pool_size = 8
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// URL of the default bind.
    #[serde(default)]
    pub url: Option<String>,

    /// Named binds, each with its own URL.
    #[serde(default)]
    pub binds: BTreeMap<String, String>,

    #[serde(default)]
    pub engine: EngineOptions,

    #[serde(default)]
    pub session: SessionOptions,
}

impl DatabaseConfig {
    /// Config with only a default bind.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Add a named bind.
    pub fn bind(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.binds.insert(name.into(), url.into());
        self
    }

    pub fn engine_options(mut self, options: EngineOptions) -> Self {
        self.engine = options;
        self
    }

    pub fn session_options(mut self, options: SessionOptions) -> Self {
        self.session = options;
        self
    }
}

/// Options applied to every engine the database creates.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineOptions {
    /// Run writes inside explicit transactions that `commit` ends. When
    /// false, every statement autocommits and `commit` does nothing.
    #[serde(default = "default_true")]
    pub future: bool,

    /// Maximum pooled connections per engine.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Seconds to wait for a pooled connection before failing.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Log every statement a session executes.
    #[serde(default)]
    pub echo: bool,

    /// Enable `PRAGMA foreign_keys` on each new connection.
    #[serde(default = "default_true")]
    pub foreign_keys: bool,

    /// Extra `PRAGMA name = value` pairs run on each new connection.
    #[serde(default)]
    pub pragmas: BTreeMap<String, String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            future: true,
            pool_size: default_pool_size(),
            connection_timeout_secs: default_connection_timeout(),
            echo: false,
            foreign_keys: true,
            pragmas: BTreeMap::new(),
        }
    }
}

/// Options applied to every session the database hands out.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionOptions {
    /// Begin a transaction implicitly on the first write. When false, writes
    /// require an explicit `Session::begin`.
    #[serde(default = "default_true")]
    pub autobegin: bool,

    /// Free-form values copied into every session's `info` map.
    #[serde(default)]
    pub info: BTreeMap<String, String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            autobegin: true,
            info: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_pool_size() -> u32 {
    4
}

fn default_connection_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = EngineOptions::default();
        assert!(options.future);
        assert_eq!(options.pool_size, 4);
        assert!(options.foreign_keys);
        assert!(SessionOptions::default().autobegin);
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: DatabaseConfig = toml::from_str(r#"url = "sqlite:///:memory:""#).unwrap();
        assert_eq!(config.url.as_deref(), Some("sqlite:///:memory:"));
        assert!(config.binds.is_empty());
        assert_eq!(config.engine, EngineOptions::default());
        assert_eq!(config.session, SessionOptions::default());
    }

    #[test]
    fn test_deserialize_full() {
        let config: DatabaseConfig = toml::from_str(
            r#"
            url = "sqlite:///app.db"

            [binds]
            reports = "sqlite:///reports.db"

            [engine]
            future = false
            pool_size = 2
            echo = true

            [engine.pragmas]
            busy_timeout = "5000"

            [session]
            autobegin = false

            [session.info]
            tenant = "acme"
            "#,
        )
        .unwrap();

        assert_eq!(config.binds["reports"], "sqlite:///reports.db");
        assert!(!config.engine.future);
        assert_eq!(config.engine.pool_size, 2);
        assert_eq!(config.engine.connection_timeout_secs, 30);
        assert!(config.engine.echo);
        assert_eq!(config.engine.pragmas["busy_timeout"], "5000");
        assert!(!config.session.autobegin);
        assert_eq!(config.session.info["tenant"], "acme");
    }

    #[test]
    fn test_builder() {
        let config = DatabaseConfig::with_url("sqlite://").bind("test", "sqlite://");
        assert_eq!(config.url.as_deref(), Some("sqlite://"));
        assert_eq!(config.binds.len(), 1);
    }
}
