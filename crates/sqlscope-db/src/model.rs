//! The base model abstraction.
//!
//! A persisted type implements [`Model`]: it lists its columns, exposes its
//! primary key, and converts to and from rows. The table name is derived from
//! the type name unless [`Model::TABLE_NAME`] overrides it, and
//! [`Model::BIND_KEY`] assigns the type to a named bind.
//!
//! Implementing the trait does not make a model known to a database; that
//! happens through [`ModelRegistry::register`](crate::metadata::ModelRegistry::register).
//!
//! # Example
//!
//! ```
//! use rusqlite::types::Value;
//! use sqlscope_db::model::{Column, Model, SqlType};
//!
//! struct DummyModel {
//!     id: Option<i64>,
//!     name: String,
//! }
//!
//! impl Model for DummyModel {
//!     type Key = i64;
//!
//!     const COLUMNS: &'static [Column] = &[
//!         Column::new("id", SqlType::Integer).primary_key().autoincrement(),
//!         Column::new("name", SqlType::Text),
//!     ];
//!
//!     fn primary_key(&self) -> Option<i64> {
//!         self.id
//!     }
//!
//!     fn set_primary_key(&mut self, key: i64) {
//!         self.id = Some(key);
//!     }
//!
//!     fn to_values(&self) -> Vec<Value> {
//!         vec![self.id.into(), self.name.clone().into()]
//!     }
//!
//!     fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
//!         Ok(Self { id: row.get(0)?, name: row.get(1)? })
//!     }
//! }
//!
//! assert_eq!(DummyModel::table_name(), "dummy_model");
//! ```

use std::borrow::Cow;
use std::fmt;

use rusqlite::types::{FromSql, Value};
use rusqlite::{Row, ToSql};
use sqlscope_common::{Error, Result};

/// Storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Blob,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
        }
    }
}

/// Column definition used for DDL and statement generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    pub autoincrement: bool,
}

impl Column {
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            sql_type,
            nullable: false,
            primary_key: false,
            autoincrement: false,
        }
    }

    pub const fn nullable(self) -> Self {
        Self {
            nullable: true,
            ..self
        }
    }

    pub const fn primary_key(self) -> Self {
        Self {
            primary_key: true,
            ..self
        }
    }

    /// Let the database assign this key on insert. Only meaningful on an
    /// `INTEGER` primary key.
    pub const fn autoincrement(self) -> Self {
        Self {
            autoincrement: true,
            ..self
        }
    }

    /// Column clause for `CREATE TABLE`.
    pub fn ddl(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(self.name), self.sql_type.as_sql());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.autoincrement {
                sql.push_str(" AUTOINCREMENT");
            }
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        sql
    }
}

/// A persisted record type.
pub trait Model: Sized + Send + 'static {
    /// Primary key type.
    type Key: ToSql + FromSql + Clone + fmt::Debug + Send + Sync + 'static;

    /// Explicit table name; derived from the type name when `None`.
    const TABLE_NAME: Option<&'static str> = None;

    /// Bind this model's table lives in; the default bind when `None`.
    const BIND_KEY: Option<&'static str> = None;

    /// All columns, in the order `to_values` and `from_row` use.
    const COLUMNS: &'static [Column];

    /// The primary key, or `None` for an instance not yet inserted.
    fn primary_key(&self) -> Option<Self::Key>;

    fn set_primary_key(&mut self, key: Self::Key);

    /// One value per entry of `COLUMNS`, in the same order.
    fn to_values(&self) -> Vec<Value>;

    /// Build an instance from a row whose columns follow `COLUMNS`.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    fn table_name() -> Cow<'static, str> {
        match Self::TABLE_NAME {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(derive_table_name(short_type_name::<Self>())),
        }
    }
}

/// The primary key column of `M`.
pub fn primary_key_column<M: Model>() -> Result<&'static Column> {
    let mut keys = M::COLUMNS.iter().filter(|c| c.primary_key);
    match (keys.next(), keys.next()) {
        (Some(column), None) => Ok(column),
        (None, _) => Err(Error::configuration(format!(
            "model {} declares no primary key column",
            short_type_name::<M>()
        ))),
        (Some(_), Some(_)) => Err(Error::configuration(format!(
            "model {} declares more than one primary key column",
            short_type_name::<M>()
        ))),
    }
}

/// Convert a CamelCase type name to a snake_case table name.
///
/// An underscore goes before an uppercase letter that follows a lowercase
/// letter or digit, or that starts a new word after an acronym:
/// `DummyModel` → `dummy_model`, `HTTPServer` → `http_server`,
/// `Model2Thing` → `model2_thing`.
pub fn derive_table_name(type_name: &str) -> String {
    let chars: Vec<char> = type_name.chars().collect();
    let mut out = String::with_capacity(type_name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || next_is_lower {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }

    out.trim_start_matches('_').to_string()
}

/// Bare type name without module path or generic arguments.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Double-quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyModel {
        id: Option<i64>,
    }

    impl Model for DummyModel {
        type Key = i64;

        const COLUMNS: &'static [Column] =
            &[Column::new("id", SqlType::Integer).primary_key().autoincrement()];

        fn primary_key(&self) -> Option<i64> {
            self.id
        }

        fn set_primary_key(&mut self, key: i64) {
            self.id = Some(key);
        }

        fn to_values(&self) -> Vec<Value> {
            vec![self.id.into()]
        }

        fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self { id: row.get(0)? })
        }
    }

    struct Named;

    impl Model for Named {
        type Key = String;

        const TABLE_NAME: Option<&'static str> = Some("mock_model");
        const COLUMNS: &'static [Column] = &[
            Column::new("code", SqlType::Text).primary_key(),
            Column::new("a", SqlType::Integer),
            Column::new("b", SqlType::Integer).primary_key(),
        ];

        fn primary_key(&self) -> Option<String> {
            None
        }

        fn set_primary_key(&mut self, _key: String) {}

        fn to_values(&self) -> Vec<Value> {
            Vec::new()
        }

        fn from_row(_row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self)
        }
    }

    #[test]
    fn test_derived_table_name() {
        assert_eq!(DummyModel::table_name(), "dummy_model");
        let mut model = DummyModel { id: None };
        model.set_primary_key(3);
        assert_eq!(model.primary_key(), Some(3));
    }

    #[test]
    fn test_explicit_table_name_kept() {
        assert_eq!(Named::table_name(), "mock_model");
    }

    #[test]
    fn test_derive_table_name_cases() {
        assert_eq!(derive_table_name("DummyModel"), "dummy_model");
        assert_eq!(derive_table_name("User"), "user");
        assert_eq!(derive_table_name("HTTPServer"), "http_server");
        assert_eq!(derive_table_name("ABC"), "abc");
        assert_eq!(derive_table_name("Model2Thing"), "model2_thing");
        assert_eq!(derive_table_name("already_snake"), "already_snake");
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<DummyModel>(), "DummyModel");
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
    }

    #[test]
    fn test_primary_key_column() {
        assert_eq!(primary_key_column::<DummyModel>().unwrap().name, "id");
        assert!(matches!(
            primary_key_column::<Named>(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_column_ddl() {
        let id = Column::new("id", SqlType::Integer).primary_key().autoincrement();
        assert_eq!(id.ddl(), "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT");

        let name = Column::new("name", SqlType::Text);
        assert_eq!(name.ddl(), "\"name\" TEXT NOT NULL");

        let note = Column::new("note", SqlType::Text).nullable();
        assert_eq!(note.ddl(), "\"note\" TEXT");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
