//! System catalog: schemas, tables, columns and the dependency graph
//!
//! Identifiers are case-insensitive; the lexer lowercases them and the
//! catalog keys on the lowercase form. Prepared statements register
//! dependency edges as weak back-references `(connection id, statement
//! name)` so CASCADE drops can notify the owning connection without an
//! ownership cycle.

use crate::error::{Error, Result};
use crate::types::{LogicalType, Value};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const DEFAULT_SCHEMA: &str = "main";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub datatype: LogicalType,
    pub nullable: bool,
    /// Bound default, constant-folded at CREATE TABLE time.
    pub default: Option<Value>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, datatype: LogicalType) -> Self {
        Self {
            name: name.into(),
            datatype,
            nullable: true,
            default: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCatalogEntry {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
}

impl TableCatalogEntry {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_types(&self) -> Vec<LogicalType> {
        self.columns.iter().map(|c| c.datatype.clone()).collect()
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Schema {
    tables: HashMap<String, TableCatalogEntry>,
}

/// A weak reference to a prepared statement: the connection that owns it
/// and the statement name within that connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependent {
    pub connection_id: u64,
    pub statement: String,
}

#[derive(Debug, Default)]
pub struct Catalog {
    schemas: HashMap<String, Schema>,
    /// table name -> dependents that must outlive it
    dependencies: HashMap<String, HashSet<Dependent>>,
}

impl Catalog {
    pub fn new() -> Self {
        let mut schemas = HashMap::new();
        schemas.insert(DEFAULT_SCHEMA.to_string(), Schema::default());
        Self {
            schemas,
            dependencies: HashMap::new(),
        }
    }

    fn schema_mut(&mut self, schema: &str) -> Result<&mut Schema> {
        self.schemas
            .get_mut(schema)
            .ok_or_else(|| Error::NotFound(format!("schema {}", schema)))
    }

    pub fn create_table(&mut self, entry: TableCatalogEntry) -> Result<()> {
        let key = entry.name.to_lowercase();
        let schema = self.schema_mut(DEFAULT_SCHEMA)?;
        if schema.tables.contains_key(&key) {
            return Err(Error::DuplicateName(format!("table {}", entry.name)));
        }
        schema.tables.insert(key, entry);
        Ok(())
    }

    /// Remove a table entry. Fails with `DependencyExists` while dependents
    /// are registered unless `cascade`; the removed dependents are returned
    /// so the caller can drop them from their owning connections.
    pub fn drop_table(&mut self, name: &str, cascade: bool) -> Result<Vec<Dependent>> {
        let key = name.to_lowercase();
        if !self
            .schemas
            .get(DEFAULT_SCHEMA)
            .map(|s| s.tables.contains_key(&key))
            .unwrap_or(false)
        {
            return Err(Error::NotFound(format!("table {}", name)));
        }
        let dependents = self.dependencies.get(&key).cloned().unwrap_or_default();
        if !dependents.is_empty() && !cascade {
            return Err(Error::DependencyExists {
                name: name.to_string(),
                dependents: dependents.len(),
            });
        }
        self.schema_mut(DEFAULT_SCHEMA)?.tables.remove(&key);
        self.dependencies.remove(&key);
        Ok(dependents.into_iter().collect())
    }

    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        let entry = self.lookup_mut(table)?;
        if entry.column_index(to).is_some() {
            return Err(Error::DuplicateName(format!("column {}", to)));
        }
        let index = entry
            .column_index(from)
            .ok_or_else(|| Error::UnknownColumn(from.to_string()))?;
        entry.columns[index].name = to.to_string();
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&TableCatalogEntry> {
        self.schemas
            .get(DEFAULT_SCHEMA)
            .and_then(|s| s.tables.get(&name.to_lowercase()))
            .ok_or_else(|| Error::NotFound(format!("table {}", name)))
    }

    fn lookup_mut(&mut self, name: &str) -> Result<&mut TableCatalogEntry> {
        self.schemas
            .get_mut(DEFAULT_SCHEMA)
            .and_then(|s| s.tables.get_mut(&name.to_lowercase()))
            .ok_or_else(|| Error::NotFound(format!("table {}", name)))
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableCatalogEntry> {
        self.schemas.values().flat_map(|s| s.tables.values())
    }

    /// Register a dependency edge `dependent -> table`.
    pub fn add_dependency(&mut self, dependent: Dependent, table: &str) {
        self.dependencies
            .entry(table.to_lowercase())
            .or_default()
            .insert(dependent);
    }

    /// Drop every edge held by `dependent` (statement deallocated or
    /// connection closed).
    pub fn remove_dependent(&mut self, dependent: &Dependent) {
        for deps in self.dependencies.values_mut() {
            deps.remove(dependent);
        }
        self.dependencies.retain(|_, deps| !deps.is_empty());
    }

    pub fn dependents_of(&self, table: &str) -> usize {
        self.dependencies
            .get(&table.to_lowercase())
            .map(|d| d.len())
            .unwrap_or(0)
    }

    /// Snapshot of all table entries, used by checkpointing.
    pub fn export_tables(&self) -> Vec<TableCatalogEntry> {
        self.tables().cloned().collect()
    }

    pub fn import_tables(&mut self, entries: Vec<TableCatalogEntry>) -> Result<()> {
        for entry in entries {
            self.create_table(entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> TableCatalogEntry {
        TableCatalogEntry {
            name: name.to_string(),
            columns: vec![ColumnDefinition::new("a", LogicalType::Integer)],
        }
    }

    #[test]
    fn names_are_case_insensitive() {
        let mut catalog = Catalog::new();
        catalog.create_table(table("Widgets")).unwrap();
        assert!(catalog.lookup("WIDGETS").is_ok());
        assert!(matches!(
            catalog.create_table(table("widgets")),
            Err(Error::DuplicateName(_))
        ));
    }

    #[test]
    fn drop_with_dependents_requires_cascade() {
        let mut catalog = Catalog::new();
        catalog.create_table(table("t")).unwrap();
        let dep = Dependent {
            connection_id: 1,
            statement: "p".into(),
        };
        catalog.add_dependency(dep.clone(), "t");

        assert!(matches!(
            catalog.drop_table("t", false),
            Err(Error::DependencyExists { .. })
        ));
        let removed = catalog.drop_table("t", true).unwrap();
        assert_eq!(removed, vec![dep]);
    }

    #[test]
    fn deallocating_clears_edges() {
        let mut catalog = Catalog::new();
        catalog.create_table(table("t")).unwrap();
        let dep = Dependent {
            connection_id: 1,
            statement: "p".into(),
        };
        catalog.add_dependency(dep.clone(), "t");
        catalog.remove_dependent(&dep);
        assert_eq!(catalog.dependents_of("t"), 0);
        assert!(catalog.drop_table("t", false).is_ok());
    }

    #[test]
    fn rename_column_rejects_duplicates() {
        let mut catalog = Catalog::new();
        let mut entry = table("t");
        entry
            .columns
            .push(ColumnDefinition::new("b", LogicalType::Integer));
        catalog.create_table(entry).unwrap();
        assert!(catalog.rename_column("t", "a", "b").is_err());
        catalog.rename_column("t", "a", "k").unwrap();
        assert!(catalog.lookup("t").unwrap().column_index("k").is_some());
    }
}
