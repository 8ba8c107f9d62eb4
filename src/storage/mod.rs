//! Storage manager: table data, MVCC maintenance, checkpointing
//!
//! Tables live in memory as row groups; durability comes from the WAL
//! (per-commit fsync) plus checkpoint snapshots written to the main
//! database file at open, clean close and explicit CHECKPOINT.

pub mod table;
pub mod wal;

use crate::catalog::TableCatalogEntry;
use crate::error::{Error, Result};
use crate::transaction::{Transaction, UndoEntry, UNCOMMITTED};
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use table::TableData;

const SNAPSHOT_MAGIC: &[u8; 8] = b"VEXDB\0\0\x01";

#[derive(Debug, Default)]
pub struct StorageManager {
    tables: HashMap<String, TableData>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, entry: &TableCatalogEntry) {
        self.tables
            .insert(entry.name.to_lowercase(), TableData::new(entry));
    }

    pub fn drop_table(&mut self, name: &str) -> Result<TableData> {
        self.tables
            .remove(&name.to_lowercase())
            .ok_or_else(|| Error::NotFound(format!("table data for {}", name)))
    }

    pub fn restore_table(&mut self, data: TableData) {
        self.tables.insert(data.name.to_lowercase(), data);
    }

    pub fn table(&self, name: &str) -> Result<&TableData> {
        self.tables
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::NotFound(format!("table data for {}", name)))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut TableData> {
        self.tables
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| Error::NotFound(format!("table data for {}", name)))
    }

    /// Update as logical delete + insert. Returns `(old_id, new_id)` pairs
    /// for the rows actually updated; rows deleted concurrently by this
    /// same transaction are skipped.
    pub fn update(
        &mut self,
        table: &str,
        row_ids: &[u64],
        new_rows: &[Vec<Value>],
        txn: &Transaction,
    ) -> Result<Vec<(u64, u64)>> {
        let data = self.table_mut(table)?;
        let deleted = data.delete(row_ids, txn)?;
        let replacements: Vec<Vec<Value>> = row_ids
            .iter()
            .zip(new_rows)
            .filter(|(id, _)| deleted.contains(id))
            .map(|(_, row)| row.clone())
            .collect();
        let new_ids = data.append_for(&replacements, txn)?;
        Ok(deleted.into_iter().zip(new_ids).collect())
    }

    /// Stamp a committing transaction's row versions with its commit id.
    pub fn stamp_commit(&mut self, undo: &[UndoEntry], commit_id: u64) -> Result<()> {
        for entry in undo {
            match entry {
                UndoEntry::Insert { table, row_id } => {
                    self.table_mut(table)?.version_mut(*row_id)?.inserted_commit = commit_id;
                }
                UndoEntry::Delete { table, row_id } => {
                    self.table_mut(table)?.version_mut(*row_id)?.deleted_commit = commit_id;
                }
                UndoEntry::Update {
                    table,
                    old_row,
                    new_row,
                } => {
                    let data = self.table_mut(table)?;
                    data.version_mut(*old_row)?.deleted_commit = commit_id;
                    data.version_mut(*new_row)?.inserted_commit = commit_id;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Revert one row-level undo entry; DDL entries are reverted by the
    /// engine, which owns the catalog.
    pub fn revert(&mut self, entry: &UndoEntry) -> Result<()> {
        match entry {
            UndoEntry::Insert { table, row_id } => {
                self.table_mut(table)?.version_mut(*row_id)?.tombstone();
            }
            UndoEntry::Delete { table, row_id } => {
                let version = self.table_mut(table)?.version_mut(*row_id)?;
                version.deleted_by = 0;
                version.deleted_commit = UNCOMMITTED;
            }
            UndoEntry::Update {
                table,
                old_row,
                new_row,
            } => {
                let data = self.table_mut(table)?;
                data.version_mut(*new_row)?.tombstone();
                let old = data.version_mut(*old_row)?;
                old.deleted_by = 0;
                old.deleted_commit = UNCOMMITTED;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Materialized committed state, the payload of the main database file.
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub commit_counter: u64,
    pub tables: Vec<SnapshotTable>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotTable {
    pub entry: TableCatalogEntry,
    /// Row slots ever allocated, deleted rows included; preserved so WAL
    /// records written after the checkpoint keep addressing valid ids.
    pub row_count: u64,
    /// Visible rows with their original row ids.
    pub rows: Vec<(u64, Vec<Value>)>,
}

/// Write the snapshot atomically: temp file, fsync, rename.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(SNAPSHOT_MAGIC)?;
        let payload = bincode::serialize(snapshot)?;
        file.write_all(&(payload.len() as u64).to_le_bytes())?;
        file.write_all(&payload)?;
        file.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    tracing::debug!(tables = snapshot.tables.len(), "checkpoint written");
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    let mut data = Vec::new();
    match fs::File::open(path) {
        Ok(mut file) => {
            file.read_to_end(&mut data)?;
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    if data.len() < SNAPSHOT_MAGIC.len() + 12 || &data[..8] != SNAPSHOT_MAGIC {
        return Err(Error::Io("not a database file".into()));
    }
    let length = u64::from_le_bytes(
        data[8..16]
            .try_into()
            .map_err(|_| Error::Io("truncated database file".into()))?,
    ) as usize;
    let end = 16 + length;
    if data.len() < end + 4 {
        return Err(Error::Io("truncated database file".into()));
    }
    let payload = &data[16..end];
    let crc = u32::from_le_bytes(
        data[end..end + 4]
            .try_into()
            .map_err(|_| Error::Io("truncated database file".into()))?,
    );
    if crc32fast::hash(payload) != crc {
        return Err(Error::Io("database file checksum mismatch".into()));
    }
    let snapshot = bincode::deserialize(payload).map_err(|e| Error::Io(e.to_string()))?;
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDefinition;
    use crate::types::LogicalType;

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let snapshot = Snapshot {
            commit_counter: 7,
            tables: vec![SnapshotTable {
                entry: TableCatalogEntry {
                    name: "t".into(),
                    columns: vec![ColumnDefinition::new("a", LogicalType::Integer)],
                },
                row_count: 3,
                rows: vec![(0, vec![Value::Integer(42)]), (2, vec![Value::Null])],
            }],
        };
        write_snapshot(&path, &snapshot).unwrap();
        let loaded = read_snapshot(&path).unwrap().unwrap();
        assert_eq!(loaded.commit_counter, 7);
        assert_eq!(loaded.tables[0].row_count, 3);
        assert_eq!(loaded.tables[0].rows.len(), 2);
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_snapshot(&dir.path().join("nope")).unwrap().is_none());
    }
}
