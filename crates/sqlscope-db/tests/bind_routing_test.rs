//! Multi-bind routing tests
//!
//! Models declared for a named bind must be stored on that bind's engine,
//! and everything else on the default engine.

use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::Row;
use sqlscope_db::{
    BaseRepository, Column, Database, DatabaseConfig, Model, ModelRegistry, Repository, SqlType,
};

#[derive(Debug, Clone, PartialEq)]
struct Customer {
    id: Option<i64>,
    name: String,
}

impl Model for Customer {
    type Key = i64;

    const COLUMNS: &'static [Column] = &[
        Column::new("id", SqlType::Integer).primary_key(),
        Column::new("name", SqlType::Text),
    ];

    fn primary_key(&self) -> Option<i64> {
        self.id
    }

    fn set_primary_key(&mut self, key: i64) {
        self.id = Some(key);
    }

    fn to_values(&self) -> Vec<Value> {
        vec![self.id.into(), self.name.clone().into()]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct AuditEvent {
    code: String,
    detail: Option<String>,
}

impl Model for AuditEvent {
    type Key = String;

    const BIND_KEY: Option<&'static str> = Some("audit");
    const COLUMNS: &'static [Column] = &[
        Column::new("code", SqlType::Text).primary_key(),
        Column::new("detail", SqlType::Text).nullable(),
    ];

    fn primary_key(&self) -> Option<String> {
        Some(self.code.clone())
    }

    fn set_primary_key(&mut self, key: String) {
        self.code = key;
    }

    fn to_values(&self) -> Vec<Value> {
        vec![self.code.clone().into(), self.detail.clone().into()]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            code: row.get(0)?,
            detail: row.get(1)?,
        })
    }
}

fn registry() -> Arc<ModelRegistry> {
    let mut registry = ModelRegistry::new();
    registry
        .register::<Customer>()
        .unwrap()
        .register::<AuditEvent>()
        .unwrap();
    Arc::new(registry)
}

fn table_exists(db: &Database, bind: Option<&str>, table: &str) -> bool {
    let conn = db.get_engine(bind).unwrap().get_conn().unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .unwrap()
        == 1
}

#[test]
fn test_metadata_groups_per_bind() {
    let db = Database::new(registry());
    let groups = db.metadatas();

    assert_eq!(groups.len(), 2);
    assert!(groups[&None].table("customer").is_some());
    assert!(groups[&Some("audit".to_string())].table("audit_event").is_some());
}

#[test]
fn test_create_all_places_tables_on_their_bind() {
    let db = Database::connect(
        DatabaseConfig::with_url("sqlite://").bind("audit", "sqlite://"),
        registry(),
    )
    .unwrap();
    db.create_all().unwrap();

    assert!(table_exists(&db, None, "customer"));
    assert!(!table_exists(&db, None, "audit_event"));
    assert!(table_exists(&db, Some("audit"), "audit_event"));
    assert!(!table_exists(&db, Some("audit"), "customer"));

    db.drop_all().unwrap();
    assert!(!table_exists(&db, None, "customer"));
    assert!(!table_exists(&db, Some("audit"), "audit_event"));
}

#[test]
fn test_one_session_spans_both_binds() {
    let db = Database::connect(
        DatabaseConfig::with_url("sqlite://").bind("audit", "sqlite://"),
        registry(),
    )
    .unwrap();
    db.create_all().unwrap();

    let customers = BaseRepository::<Customer>::new();
    let events = BaseRepository::<AuditEvent>::new();

    db.session_scope(|_| {
        let saved = customers.save(Customer {
            id: None,
            name: "Ada".into(),
        })?;
        assert_eq!(saved.id, Some(1));

        events.save(AuditEvent {
            code: "customer.created".into(),
            detail: Some("Ada".into()),
        })?;

        assert_eq!(customers.find_all()?.len(), 1);
        let event = events.find_by_id(&"customer.created".to_string())?.unwrap();
        assert_eq!(event.detail.as_deref(), Some("Ada"));
        Ok(())
    })
    .unwrap();

    let audit_rows: i64 = db
        .get_engine(Some("audit"))
        .unwrap()
        .get_conn()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM audit_event", [], |row| row.get(0))
        .unwrap();
    assert_eq!(audit_rows, 1);
}

#[test]
fn test_bind_without_url_falls_back_to_default() {
    let db = Database::connect(DatabaseConfig::with_url("sqlite://"), registry()).unwrap();
    db.create_all().unwrap();

    assert!(table_exists(&db, None, "audit_event"));
    assert!(db.get_engine(Some("audit")).is_err());
}

#[test]
fn test_uncommitted_scope_work_is_discarded() {
    let db = Database::connect(DatabaseConfig::with_url("sqlite://"), registry()).unwrap();
    db.create_all().unwrap();

    db.session_scope(|session| {
        session.add(&mut Customer {
            id: None,
            name: "pending".into(),
        })
    })
    .unwrap();

    let count = db
        .session_scope(|session| Ok(session.scalars::<Customer>()?.len()))
        .unwrap();
    assert_eq!(count, 0);
}
