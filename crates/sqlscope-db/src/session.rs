//! Sessions: the unit of work.
//!
//! A [`Session`] checks out at most one pooled connection per engine, lazily,
//! the first time a statement needs that engine. Statements for a model go to
//! the engine its table is routed to; tables without a route use the default
//! engine.
//!
//! Writes open a transaction on their connection first (unless the engine runs
//! in legacy autocommit mode) and stay pending until [`Session::commit`].
//! Closing or dropping a session rolls back whatever is still pending and
//! returns the connections to their pools.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::{FromSql, ValueRef};
use rusqlite::{Connection, OptionalExtension};
use sqlscope_common::{EngineId, Error, Result, SessionId};

use crate::config::SessionOptions;
use crate::engine::{Engine, PooledConnection};
use crate::metadata::ModelRegistry;
use crate::model::{primary_key_column, quote_ident, Model};

/// Table → engine routing computed once per initialization.
#[derive(Debug)]
pub struct Routing {
    default: Option<Engine>,
    binds: BTreeMap<Option<String>, Engine>,
    tables: HashMap<String, Engine>,
}

impl Routing {
    /// Route every registered table whose bind has an engine to that engine.
    pub fn build(engines: &BTreeMap<Option<String>, Engine>, registry: &ModelRegistry) -> Self {
        let mut tables = HashMap::new();

        for (bind, group) in registry.groups() {
            match engines.get(bind) {
                Some(engine) => {
                    for table in group.tables() {
                        tables.insert(table.name.clone(), engine.clone());
                    }
                }
                None => {
                    if let Some(name) = bind {
                        tracing::warn!(
                            bind = %name,
                            tables = group.len(),
                            "Models declare a bind with no configured URL; their tables use the default engine"
                        );
                    }
                }
            }
        }

        Self {
            default: engines.get(&None).cloned(),
            binds: engines.clone(),
            tables,
        }
    }

    pub fn default_engine(&self) -> Option<&Engine> {
        self.default.as_ref()
    }

    /// Engine registered for `bind`.
    pub fn engine(&self, bind: Option<&str>) -> Result<&Engine> {
        self.binds
            .get(&bind.map(str::to_string))
            .ok_or_else(|| Error::unknown_bind(bind))
    }

    /// Engine a table's statements run on.
    pub fn engine_for_table(&self, table: &str) -> Result<&Engine> {
        self.tables
            .get(table)
            .or(self.default.as_ref())
            .ok_or_else(|| Error::UnboundTable(table.to_string()))
    }

    pub fn engines(&self) -> impl Iterator<Item = &Engine> {
        self.binds.values()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

/// Produces sessions bound to one routing table.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    routing: Arc<Routing>,
    options: SessionOptions,
}

impl SessionFactory {
    pub fn new(routing: Arc<Routing>, options: SessionOptions) -> Self {
        Self { routing, options }
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    pub fn open(&self) -> Session {
        Session::new(self.routing.clone(), self.options.clone())
    }
}

struct Checkout {
    engine: Engine,
    conn: PooledConnection,
}

#[derive(Default)]
struct SessionState {
    conns: HashMap<EngineId, Checkout>,
    begun: bool,
}

/// A unit of work over the engines of one database.
pub struct Session {
    id: SessionId,
    routing: Arc<Routing>,
    options: SessionOptions,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(routing: Arc<Routing>, options: SessionOptions) -> Self {
        let session = Self {
            id: SessionId::new(),
            routing,
            options,
            state: Mutex::new(SessionState::default()),
        };
        tracing::debug!(session_id = %session.id, "Opened session");
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Values from the `info` session option.
    pub fn info(&self) -> &BTreeMap<String, String> {
        &self.options.info
    }

    /// Whether a transaction is open on any checked out connection.
    pub fn in_transaction(&self) -> bool {
        let state = self.state.lock();
        state.begun || state.conns.values().any(|c| !c.conn.is_autocommit())
    }

    /// Start a transaction explicitly. Required before writing when the
    /// `autobegin` option is off.
    pub fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.begun {
            return Err(Error::session("a transaction is already begun on this session"));
        }
        state.begun = true;
        Ok(())
    }

    /// Insert `instance`, or update the existing row with the same primary key.
    ///
    /// An instance without a primary key is inserted and receives the key the
    /// database assigned.
    pub fn add<M: Model>(&self, instance: &mut M) -> Result<()> {
        let table = M::table_name();
        let pk = primary_key_column::<M>()?;
        let values = instance.to_values();
        if values.len() != M::COLUMNS.len() {
            return Err(Error::internal(format!(
                "{} produced {} values for {} columns",
                table,
                values.len(),
                M::COLUMNS.len()
            )));
        }

        let engine = self.routing.engine_for_table(&table)?.clone();

        match instance.primary_key() {
            None => {
                let (names, params): (Vec<_>, Vec<_>) = M::COLUMNS
                    .iter()
                    .zip(values)
                    .filter(|(column, _)| !column.primary_key)
                    .map(|(column, value)| (quote_ident(column.name), value))
                    .unzip();

                let sql = if names.is_empty() {
                    format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&table))
                } else {
                    format!(
                        "INSERT INTO {} ({}) VALUES ({})",
                        quote_ident(&table),
                        names.join(", "),
                        placeholders(names.len())
                    )
                };

                let rowid = self.with_engine_conn(&engine, true, |conn| {
                    self.echo(&engine, &sql);
                    conn.execute(&sql, rusqlite::params_from_iter(params.iter()))
                        .map_err(|e| Error::database(e.to_string()))?;
                    Ok(conn.last_insert_rowid())
                })?;

                let key = <M::Key as FromSql>::column_result(ValueRef::Integer(rowid)).map_err(|e| {
                    Error::internal(format!("cannot convert rowid of {table} to key: {e}"))
                })?;
                instance.set_primary_key(key);
            }
            Some(_) => {
                let names: Vec<String> = M::COLUMNS.iter().map(|c| quote_ident(c.name)).collect();
                let updates: Vec<String> = M::COLUMNS
                    .iter()
                    .filter(|c| !c.primary_key)
                    .map(|c| format!("{0} = excluded.{0}", quote_ident(c.name)))
                    .collect();

                let conflict = if updates.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    format!("DO UPDATE SET {}", updates.join(", "))
                };
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
                    quote_ident(&table),
                    names.join(", "),
                    placeholders(names.len()),
                    quote_ident(pk.name),
                    conflict
                );

                self.with_engine_conn(&engine, true, |conn| {
                    self.echo(&engine, &sql);
                    conn.execute(&sql, rusqlite::params_from_iter(values.iter()))
                        .map_err(|e| Error::database(e.to_string()))?;
                    Ok(())
                })?;
            }
        }

        Ok(())
    }

    pub fn add_all<M: Model>(&self, instances: &mut [M]) -> Result<()> {
        for instance in instances.iter_mut() {
            self.add(instance)?;
        }
        Ok(())
    }

    /// Delete the row of a persisted instance.
    pub fn delete<M: Model>(&self, instance: &M) -> Result<()> {
        let table = M::table_name();
        let key = instance.primary_key().ok_or_else(|| {
            Error::session(format!("cannot delete a {table} instance that has no primary key"))
        })?;
        let pk = primary_key_column::<M>()?;
        let engine = self.routing.engine_for_table(&table)?.clone();

        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_ident(&table),
            quote_ident(pk.name)
        );

        let deleted = self.with_engine_conn(&engine, true, |conn| {
            self.echo(&engine, &sql);
            conn.execute(&sql, rusqlite::params![key])
                .map_err(|e| Error::database(e.to_string()))
        })?;

        if deleted == 0 {
            tracing::debug!(session_id = %self.id, table = %table, key = ?key, "Delete matched no row");
        }
        Ok(())
    }

    /// Load one instance by primary key.
    pub fn get<M: Model>(&self, key: &M::Key) -> Result<Option<M>> {
        let table = M::table_name();
        let pk = primary_key_column::<M>()?;
        let engine = self.routing.engine_for_table(&table)?.clone();

        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            select_list::<M>(),
            quote_ident(&table),
            quote_ident(pk.name)
        );

        self.with_engine_conn(&engine, false, |conn| {
            self.echo(&engine, &sql);
            conn.query_row(&sql, rusqlite::params![*key], M::from_row)
                .optional()
                .map_err(|e| Error::database(e.to_string()))
        })
    }

    /// Load every row of `M`'s table, ordered by primary key.
    pub fn scalars<M: Model>(&self) -> Result<Vec<M>> {
        let table = M::table_name();
        let pk = primary_key_column::<M>()?;
        let engine = self.routing.engine_for_table(&table)?.clone();

        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            select_list::<M>(),
            quote_ident(&table),
            quote_ident(pk.name)
        );

        self.with_engine_conn(&engine, false, |conn| {
            self.echo(&engine, &sql);
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::database(e.to_string()))?;

            let rows = stmt
                .query_map([], M::from_row)
                .map_err(|e| Error::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::database(e.to_string()))?;

            Ok(rows)
        })
    }

    /// Reload `instance` from its row.
    pub fn refresh<M: Model>(&self, instance: &mut M) -> Result<()> {
        let table = M::table_name();
        let key = instance.primary_key().ok_or_else(|| {
            Error::session(format!("cannot refresh a {table} instance that has no primary key"))
        })?;

        match self.get::<M>(&key)? {
            Some(fresh) => {
                *instance = fresh;
                Ok(())
            }
            None => Err(Error::not_found(format!("{table} {key:?}"))),
        }
    }

    /// Commit the open transaction on every checked out connection.
    ///
    /// If one commit fails, the remaining connections are rolled back.
    pub fn commit(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.begun = false;

        let mut failure = None;
        for checkout in state.conns.values() {
            if checkout.conn.is_autocommit() {
                continue;
            }
            let sql = if failure.is_none() { "COMMIT" } else { "ROLLBACK" };
            self.echo(&checkout.engine, sql);
            if let Err(e) = checkout.conn.execute_batch(sql) {
                if failure.is_none() {
                    let _ = checkout.conn.execute_batch("ROLLBACK");
                    failure = Some(Error::database(format!(
                        "commit failed on {}: {}",
                        checkout.engine.url(),
                        e
                    )));
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Roll back the open transaction on every checked out connection.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.begun = false;
        rollback_all(self.id, &state.conns)
    }

    /// Roll back pending work and return every connection to its pool.
    ///
    /// The session stays usable; later statements check out new connections.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if let Err(e) = rollback_all(self.id, &state.conns) {
            tracing::warn!(session_id = %self.id, error = %e, "Rollback on close failed");
        }
        state.begun = false;
        let released = state.conns.len();
        state.conns.clear();
        tracing::debug!(session_id = %self.id, released, "Closed session");
    }

    /// Run raw SQL on the engine of `bind`, outside any model routing.
    pub fn execute_batch(&self, bind: Option<&str>, sql: &str) -> Result<()> {
        let engine = self.routing.engine(bind)?.clone();
        self.with_engine_conn(&engine, false, |conn| {
            self.echo(&engine, sql);
            conn.execute_batch(sql)
                .map_err(|e| Error::database(e.to_string()))
        })
    }

    /// Borrow this session's connection to the engine of `bind`.
    pub fn with_connection<T, F>(&self, bind: Option<&str>, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let engine = self.routing.engine(bind)?.clone();
        self.with_engine_conn(&engine, false, |conn| {
            f(conn).map_err(|e| Error::database(e.to_string()))
        })
    }

    fn with_engine_conn<T, F>(&self, engine: &Engine, write: bool, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let begun = state.begun;

        let checkout = match state.conns.entry(engine.id()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => entry.insert(Checkout {
                engine: engine.clone(),
                conn: engine.get_conn()?,
            }),
        };

        if write && engine.options().future && checkout.conn.is_autocommit() {
            if !begun && !self.options.autobegin {
                return Err(Error::session(
                    "autobegin is disabled; call begin() before writing",
                ));
            }
            self.echo(engine, "BEGIN IMMEDIATE");
            checkout
                .conn
                .execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| Error::database(e.to_string()))?;
        }

        f(&checkout.conn)
    }

    fn echo(&self, engine: &Engine, sql: &str) {
        if engine.options().echo {
            tracing::info!(
                target: "sqlscope::echo",
                session_id = %self.id,
                bind = engine.bind().unwrap_or("<default>"),
                "{}",
                sql
            );
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("info", &self.options.info)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.conns.is_empty() {
            return;
        }
        if let Err(e) = rollback_all(self.id, &state.conns) {
            tracing::warn!(session_id = %self.id, error = %e, "Rollback on drop failed");
        }
        state.conns.clear();
    }
}

fn rollback_all(id: SessionId, conns: &HashMap<EngineId, Checkout>) -> Result<()> {
    let mut failure = None;
    for checkout in conns.values() {
        if checkout.conn.is_autocommit() {
            continue;
        }
        tracing::debug!(session_id = %id, engine_id = %checkout.engine.id(), "Rolling back");
        if let Err(e) = checkout.conn.execute_batch("ROLLBACK") {
            failure.get_or_insert(Error::database(e.to_string()));
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn select_list<M: Model>() -> String {
    M::COLUMNS
        .iter()
        .map(|c| quote_ident(c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}
