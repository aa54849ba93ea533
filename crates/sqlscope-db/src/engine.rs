//! Engines: one r2d2 connection pool per bind.
//!
//! An [`Engine`] is cheap to clone and safe to share between tasks. Sessions
//! check connections out of it lazily and return them when they close.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use sqlscope_common::{EngineId, Error, Result};
use tempfile::TempDir;

use crate::config::EngineOptions;
use crate::url::{DatabaseUrl, Target};

/// Type alias for the database connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// A connection pool bound to one URL.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    id: EngineId,
    bind: Option<String>,
    url: DatabaseUrl,
    options: EngineOptions,
    path: PathBuf,
    pool: DbPool,
    /// Backing directory of an in-memory URL; removed with the engine.
    _scratch: Option<TempDir>,
}

impl Engine {
    /// Create an engine for `url` under the given bind name.
    ///
    /// Every new connection gets `PRAGMA foreign_keys` (unless disabled) and
    /// the configured extra pragmas.
    ///
    /// In-memory URLs are stored in a private WAL database inside a scratch
    /// directory owned by the engine. Connections of one engine see the same
    /// data, separate engines stay isolated, and the data lives exactly as
    /// long as the engine. Readers never fail while another session holds an
    /// open write transaction; competing writers wait for the busy timeout.
    pub fn create(bind: Option<&str>, url: &str, options: &EngineOptions) -> Result<Self> {
        let url = DatabaseUrl::parse(url)?;

        if options.pool_size == 0 {
            return Err(Error::configuration("engine pool_size must be at least 1"));
        }

        let (path, scratch) = match url.target() {
            Target::Memory => {
                let dir = tempfile::Builder::new()
                    .prefix("sqlscope-mem-")
                    .tempdir()
                    .map_err(|e| Error::database(format!("Failed to create scratch database: {}", e)))?;
                (dir.path().join("engine.db"), Some(dir))
            }
            Target::File(path) => (path.clone(), None),
        };

        let init_sql = init_statements(options, scratch.is_some())?;
        let manager = SqliteConnectionManager::file(&path).with_init(move |conn| {
            if init_sql.is_empty() {
                Ok(())
            } else {
                conn.execute_batch(&init_sql)
            }
        });

        let pool = Pool::builder()
            .max_size(options.pool_size)
            .connection_timeout(Duration::from_secs(options.connection_timeout_secs))
            .build(manager)
            .map_err(|e| Error::database(format!("Failed to create connection pool: {}", e)))?;

        let engine = Self {
            inner: Arc::new(EngineInner {
                id: EngineId::new(),
                bind: bind.map(str::to_string),
                url,
                options: options.clone(),
                path,
                pool,
                _scratch: scratch,
            }),
        };

        tracing::info!(
            engine_id = %engine.id(),
            bind = engine.bind().unwrap_or("<default>"),
            url = %engine.url(),
            path = %engine.path().display(),
            pool_size = options.pool_size,
            "Created engine"
        );

        Ok(engine)
    }

    pub fn id(&self) -> EngineId {
        self.inner.id
    }

    /// Bind name this engine was created for; `None` for the default bind.
    pub fn bind(&self) -> Option<&str> {
        self.inner.bind.as_deref()
    }

    pub fn url(&self) -> &DatabaseUrl {
        &self.inner.url
    }

    /// Database file the pool connects to. For in-memory URLs this is the
    /// engine's scratch file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    pub fn pool(&self) -> &DbPool {
        &self.inner.pool
    }

    /// Whether two handles refer to the same pool.
    pub fn ptr_eq(&self, other: &Engine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Get a connection from the pool.
    pub fn get_conn(&self) -> Result<PooledConnection> {
        self.inner
            .pool
            .get()
            .map_err(|e| Error::database(format!("Failed to get connection from pool: {}", e)))
    }

    /// Run `SELECT 1` on a pooled connection.
    pub fn ping(&self) -> Result<()> {
        let conn = self.get_conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| Error::database(e.to_string()))?;
        Ok(())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.inner.id)
            .field("bind", &self.inner.bind)
            .field("url", &self.inner.url.as_str())
            .finish()
    }
}

fn init_statements(options: &EngineOptions, scratch: bool) -> Result<String> {
    let mut sql = String::new();
    if options.foreign_keys {
        sql.push_str("PRAGMA foreign_keys = ON;");
    }
    if scratch {
        sql.push_str("PRAGMA journal_mode = WAL;");
    }
    for (name, value) in &options.pragmas {
        if !is_pragma_token(name) || !is_pragma_token(value) {
            return Err(Error::configuration(format!(
                "invalid pragma '{name} = {value}'"
            )));
        }
        sql.push_str(&format!("PRAGMA {name} = {value};"));
    }
    Ok(sql)
}

fn is_pragma_token(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_memory_engine() {
        let engine = Engine::create(None, "sqlite:///:memory:", &EngineOptions::default()).unwrap();
        assert_eq!(engine.pool().max_size(), 4);
        assert!(engine.bind().is_none());
        assert!(engine.url().is_memory());
        engine.ping().unwrap();
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let engine = Engine::create(None, "sqlite://", &EngineOptions::default()).unwrap();
        let conn = engine.get_conn().unwrap();

        let enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_extra_pragmas_applied() {
        let mut options = EngineOptions::default();
        options.pragmas.insert("busy_timeout".into(), "1234".into());
        let engine = Engine::create(Some("test"), "sqlite://", &options).unwrap();
        let conn = engine.get_conn().unwrap();

        let timeout: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 1234);
        assert_eq!(engine.bind(), Some("test"));
    }

    #[test]
    fn test_invalid_pragma_rejected() {
        let mut options = EngineOptions::default();
        options
            .pragmas
            .insert("journal_mode".into(), "WAL; DROP TABLE x".into());
        let err = Engine::create(None, "sqlite://", &options).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let options = EngineOptions {
            pool_size: 0,
            ..EngineOptions::default()
        };
        let err = Engine::create(None, "sqlite://", &options).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_memory_engines_are_isolated() {
        let a = Engine::create(None, "sqlite://", &EngineOptions::default()).unwrap();
        let b = Engine::create(None, "sqlite://", &EngineOptions::default()).unwrap();
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));

        a.get_conn()
            .unwrap()
            .execute_batch("CREATE TABLE only_in_a (id INTEGER PRIMARY KEY)")
            .unwrap();

        let count: i64 = b
            .get_conn()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'only_in_a'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_connections_share_memory_database() {
        let engine = Engine::create(None, "sqlite://", &EngineOptions::default()).unwrap();
        {
            let conn = engine.get_conn().unwrap();
            conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (7);")
                .unwrap();
        }

        let _held = engine.get_conn().unwrap();
        let conn = engine.get_conn().unwrap();
        let id: i64 = conn.query_row("SELECT id FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(id, 7);
    }

    #[test]
    fn test_file_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.db");
        let url = format!("sqlite:///{}", path.display());

        let engine = Engine::create(None, &url, &EngineOptions::default()).unwrap();
        engine.ping().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_memory_data_outlives_pooled_connections() {
        let engine = Engine::create(None, "sqlite://", &EngineOptions::default()).unwrap();
        engine
            .get_conn()
            .unwrap()
            .execute_batch("CREATE TABLE kept (id INTEGER PRIMARY KEY); INSERT INTO kept VALUES (3);")
            .unwrap();

        // A connection opened and closed outside the pool sees the same data,
        // and closing it does not discard anything.
        {
            let other = rusqlite::Connection::open(engine.path()).unwrap();
            let n: i64 = other.query_row("SELECT COUNT(*) FROM kept", [], |r| r.get(0)).unwrap();
            assert_eq!(n, 1);
        }

        let id: i64 = engine
            .get_conn()
            .unwrap()
            .query_row("SELECT id FROM kept", [], |r| r.get(0))
            .unwrap();
        assert_eq!(id, 3);
    }

    #[test]
    fn test_scratch_database_removed_with_engine() {
        let engine = Engine::create(None, "sqlite://", &EngineOptions::default()).unwrap();
        let path = engine.path().to_path_buf();
        assert!(path.exists());

        let journal: String = engine
            .get_conn()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |r| r.get(0))
            .unwrap();
        assert_eq!(journal, "wal");

        drop(engine);
        assert!(!path.exists());
    }
}
