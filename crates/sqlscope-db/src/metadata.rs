//! Metadata groups and the model registry.
//!
//! Each bind owns one [`MetadataGroup`]: the table definitions of every model
//! registered for that bind. [`ModelRegistry::register`] is the explicit
//! declaration step that places a model in its group. A database reads the
//! finished registry once at initialization to route tables to engines.

use std::collections::BTreeMap;

use rusqlite::Connection;
use sqlscope_common::{Error, Result};

use crate::model::{primary_key_column, quote_ident, short_type_name, Column, Model};

/// Table definition produced by registering one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub bind: Option<String>,
    /// Type name of the model that declared this table.
    pub model: &'static str,
    pub columns: &'static [Column],
}

impl TableDef {
    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(Column::ddl).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.name),
            columns.join(", ")
        )
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", quote_ident(&self.name))
    }
}

/// The tables associated with one bind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataGroup {
    bind: Option<String>,
    tables: BTreeMap<String, TableDef>,
}

impl MetadataGroup {
    pub fn new(bind: Option<&str>) -> Self {
        Self {
            bind: bind.map(str::to_string),
            tables: BTreeMap::new(),
        }
    }

    pub fn bind(&self) -> Option<&str> {
        self.bind.as_deref()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Create every table of this group that does not exist yet.
    pub fn create_all(&self, conn: &Connection) -> Result<()> {
        for table in self.tables.values() {
            conn.execute_batch(&table.create_sql())
                .map_err(|e| Error::database(format!("Failed to create {}: {}", table.name, e)))?;
        }
        Ok(())
    }

    /// Drop every table of this group, in reverse name order.
    pub fn drop_all(&self, conn: &Connection) -> Result<()> {
        for table in self.tables.values().rev() {
            conn.execute_batch(&table.drop_sql())
                .map_err(|e| Error::database(format!("Failed to drop {}: {}", table.name, e)))?;
        }
        Ok(())
    }
}

/// All metadata groups, keyed by bind (`None` is the default bind).
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    groups: BTreeMap<Option<String>, MetadataGroup>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `M`: derive its table definition and add it to the group of
    /// `M::BIND_KEY`, creating the group if needed.
    ///
    /// Registering the same model twice is a no-op. A different model that
    /// claims an already registered table name in the same group is rejected.
    pub fn register<M: Model>(&mut self) -> Result<&mut Self> {
        primary_key_column::<M>()?;

        let bind = M::BIND_KEY.map(str::to_string);
        let table = TableDef {
            name: M::table_name().into_owned(),
            bind: bind.clone(),
            model: short_type_name::<M>(),
            columns: M::COLUMNS,
        };

        // Sessions route by table name alone, so a name may live on one bind only.
        if let Some(other) = self
            .groups
            .values()
            .filter(|g| g.bind.as_deref() != bind.as_deref())
            .find_map(|g| g.tables.get(&table.name))
        {
            return Err(Error::configuration(format!(
                "table '{}' is already registered on bind '{}' by model {}",
                table.name,
                other.bind.as_deref().unwrap_or("<default>"),
                other.model
            )));
        }

        let group = self
            .groups
            .entry(bind.clone())
            .or_insert_with(|| MetadataGroup::new(bind.as_deref()));

        if let Some(existing) = group.tables.get(&table.name) {
            if existing == &table {
                return Ok(self);
            }
            return Err(Error::configuration(format!(
                "table '{}' is already defined by model {}",
                table.name, existing.model
            )));
        }

        tracing::debug!(
            table = %table.name,
            bind = table.bind.as_deref().unwrap_or("<default>"),
            model = table.model,
            "Registered model"
        );
        group.tables.insert(table.name.clone(), table);

        Ok(self)
    }

    pub fn groups(&self) -> &BTreeMap<Option<String>, MetadataGroup> {
        &self.groups
    }

    pub fn group(&self, bind: Option<&str>) -> Option<&MetadataGroup> {
        self.groups.get(&bind.map(str::to_string))
    }

    /// Every registered table across all groups.
    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.groups.values().flat_map(MetadataGroup::tables)
    }

    /// The bind a table was registered under, if the table is known.
    pub fn bind_of(&self, table: &str) -> Option<Option<&str>> {
        self.groups
            .values()
            .find(|group| group.tables.contains_key(table))
            .map(MetadataGroup::bind)
    }
}
