//! The database facade.
//!
//! [`Database`] owns the configuration, builds one [`Engine`] per bind, routes
//! registered tables to their engines, and hands out sessions. Scoped
//! acquisition ([`Database::session_scope`], [`Database::scope`]) installs a
//! session in the context store for the duration of a closure or future.
//!
//! A database may be created uninitialized and initialized later, which lets
//! it be shared (for example with the HTTP middleware) before its
//! configuration is known.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use sqlscope_common::{Error, Result};

use crate::config::DatabaseConfig;
use crate::context;
use crate::engine::Engine;
use crate::metadata::{MetadataGroup, ModelRegistry};
use crate::session::{Routing, Session, SessionFactory};

/// Something that can open sessions for scoped acquisition.
pub trait SessionSource: Send + Sync {
    /// Open a new session. The caller owns it; nothing is installed in the
    /// context store.
    fn open_session(&self) -> Result<Session>;

    /// Whether the sessions this source opens are asynchronous.
    fn is_async(&self) -> bool {
        false
    }
}

/// Run `f` with the active session, opening and installing one if the
/// current context has none.
///
/// Only the call that opened the session closes it and clears the slot, so a
/// nested scope shares the outer session without tearing it down. Cleanup
/// runs when `f` returns, fails, or panics.
pub fn session_scope<S, T, F>(source: &S, f: F) -> Result<T>
where
    S: SessionSource + ?Sized,
    F: FnOnce(&Arc<Session>) -> Result<T>,
{
    if let Some(active) = context::get() {
        return f(&active);
    }

    let session = Arc::new(source.open_session()?);
    let _guard = InstalledSession::install(session.clone());
    f(&session)
}

/// Async counterpart of [`session_scope`]: run `fut` in a task-local context
/// holding a session.
///
/// Reuses the session already active in the caller's context, whether it
/// came from an enclosing async scope or the thread's slot; the owner of that
/// session stays responsible for closing it. Otherwise opens one, which is
/// closed when `fut` completes or when the returned future is dropped before
/// completion.
pub async fn scope<S, F>(source: &S, fut: F) -> Result<F::Output>
where
    S: SessionSource + ?Sized,
    F: Future,
{
    if let Some(active) = context::get() {
        if context::in_task_scope() {
            return Ok(fut.await);
        }
        return Ok(context::scope(Some(active), fut).await);
    }

    let session = Arc::new(source.open_session()?);
    let _guard = CloseOnDrop(session.clone());
    Ok(context::scope(Some(session), fut).await)
}

/// Installs a session in the current slot; closes it and clears the slot on drop.
struct InstalledSession(Arc<Session>);

impl InstalledSession {
    fn install(session: Arc<Session>) -> Self {
        context::set(Some(session.clone()));
        Self(session)
    }
}

impl Drop for InstalledSession {
    fn drop(&mut self) {
        self.0.close();
        context::set(None);
    }
}

struct CloseOnDrop(Arc<Session>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

struct Initialized {
    config: DatabaseConfig,
    engines: BTreeMap<Option<String>, Engine>,
    factory: SessionFactory,
}

/// Engines, routing and session factory for a set of binds.
pub struct Database {
    registry: Arc<ModelRegistry>,
    state: RwLock<Option<Arc<Initialized>>>,
}

impl Database {
    /// An uninitialized database over the given models.
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            state: RwLock::new(None),
        }
    }

    /// Create and initialize in one step.
    pub fn connect(config: DatabaseConfig, registry: Arc<ModelRegistry>) -> Result<Self> {
        let db = Self::new(registry);
        db.initialize(config)?;
        Ok(db)
    }

    /// Build engines for the default URL and every bind, then route the
    /// registered tables.
    ///
    /// Calling this again replaces the engines. Sessions already open keep
    /// the engines they started with.
    pub fn initialize(&self, config: DatabaseConfig) -> Result<()> {
        if config.url.is_none() && config.binds.is_empty() {
            return Err(Error::configuration("either \"url\" or \"binds\" must be set"));
        }

        let mut engines = BTreeMap::new();
        if let Some(url) = &config.url {
            engines.insert(None, Engine::create(None, url, &config.engine)?);
        }
        for (name, url) in &config.binds {
            engines.insert(
                Some(name.clone()),
                Engine::create(Some(name), url, &config.engine)?,
            );
        }

        let routing = Arc::new(Routing::build(&engines, &self.registry));
        let factory = SessionFactory::new(routing.clone(), config.session.clone());

        tracing::info!(
            engines = engines.len(),
            routed_tables = routing.table_count(),
            future = config.engine.future,
            "Database initialized"
        );

        let previous = self.state.write().replace(Arc::new(Initialized {
            config,
            engines,
            factory,
        }));
        if previous.is_some() {
            tracing::info!("Database re-initialized; previous engines released");
        }

        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    fn state(&self) -> Result<Arc<Initialized>> {
        self.state.read().clone().ok_or(Error::NotInitialized)
    }

    /// Engine of `bind`; `None` is the default bind.
    pub fn get_engine(&self, bind: Option<&str>) -> Result<Engine> {
        self.state()?
            .engines
            .get(&bind.map(str::to_string))
            .cloned()
            .ok_or_else(|| Error::unknown_bind(bind))
    }

    /// All engines, default bind first.
    pub fn engines(&self) -> Result<Vec<Engine>> {
        Ok(self.state()?.engines.values().cloned().collect())
    }

    /// The default bind's URL.
    pub fn url(&self) -> Option<String> {
        self.state().ok().and_then(|s| s.config.url.clone())
    }

    /// Named bind URLs.
    pub fn binds(&self) -> BTreeMap<String, String> {
        self.state()
            .map(|s| s.config.binds.clone())
            .unwrap_or_default()
    }

    pub fn config(&self) -> Result<DatabaseConfig> {
        Ok(self.state()?.config.clone())
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Metadata groups of the registered models, keyed by bind.
    pub fn metadatas(&self) -> &BTreeMap<Option<String>, MetadataGroup> {
        self.registry.groups()
    }

    pub fn session_factory(&self) -> Result<SessionFactory> {
        Ok(self.state()?.factory.clone())
    }

    /// The session active in the current context.
    pub fn session(&self) -> Result<Arc<Session>> {
        context::current()
    }

    /// See [`session_scope`].
    pub fn session_scope<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Arc<Session>) -> Result<T>,
    {
        session_scope(self, f)
    }

    /// See [`scope`].
    pub async fn scope<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        scope(self, fut).await
    }

    /// Create the tables of every metadata group on its engine.
    pub fn create_all(&self) -> Result<()> {
        self.for_each_group(|group, engine| {
            let conn = engine.get_conn()?;
            group.create_all(&conn)
        })
    }

    /// Drop the tables of every metadata group from its engine.
    pub fn drop_all(&self) -> Result<()> {
        self.for_each_group(|group, engine| {
            let conn = engine.get_conn()?;
            group.drop_all(&conn)
        })
    }

    fn for_each_group<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&MetadataGroup, &Engine) -> Result<()>,
    {
        let state = self.state()?;
        let routing = state.factory.routing();

        for group in self.registry.groups().values() {
            let engine = routing
                .engine(group.bind())
                .ok()
                .or(routing.default_engine());
            match engine {
                Some(engine) => f(group, engine)?,
                None => return Err(Error::unknown_bind(group.bind())),
            }
        }
        Ok(())
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new(Arc::new(ModelRegistry::new()))
    }
}

impl SessionSource for Database {
    fn open_session(&self) -> Result<Session> {
        Ok(self.state()?.factory.open())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("initialized", &self.is_initialized())
            .field("url", &self.url())
            .field("binds", &self.binds())
            .finish()
    }
}
