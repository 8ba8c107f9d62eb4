//! Table storage: row groups, column segments and MVCC version chains

use crate::catalog::TableCatalogEntry;
use crate::error::{Error, Result};
use crate::transaction::{Transaction, UNCOMMITTED};
use crate::types::{LogicalType, Value};
use crate::vector::{SelectionVector, Vector, STANDARD_VECTOR_SIZE};

/// Version metadata for one row. Ids above `TRANSACTION_ID_BASE` are
/// transaction-local; commit ids are stamped when the owning transaction
/// commits.
#[derive(Debug, Clone)]
pub struct RowVersion {
    pub inserted_by: u64,
    pub inserted_commit: u64,
    pub deleted_by: u64,
    pub deleted_commit: u64,
}

impl RowVersion {
    fn new(txn_id: u64) -> Self {
        Self {
            inserted_by: txn_id,
            inserted_commit: UNCOMMITTED,
            deleted_by: 0,
            deleted_commit: UNCOMMITTED,
        }
    }

    /// Pre-committed version, used by replay and checkpoint load.
    pub fn committed(commit_id: u64) -> Self {
        Self {
            inserted_by: 0,
            inserted_commit: commit_id,
            deleted_by: 0,
            deleted_commit: UNCOMMITTED,
        }
    }

    /// The MVCC visibility rule: inserted before the snapshot or by the
    /// transaction itself, and not deleted before the snapshot or by the
    /// transaction itself.
    pub fn visible_to(&self, txn_id: u64, start_time: u64) -> bool {
        let inserted = self.inserted_commit <= start_time || self.inserted_by == txn_id;
        let deleted = self.deleted_commit <= start_time || self.deleted_by == txn_id;
        inserted && !deleted
    }

    /// Make the version permanently invisible (rollback of an insert).
    pub fn tombstone(&mut self) {
        self.deleted_by = 0;
        self.deleted_commit = 0;
    }
}

/// A contiguous block of rows with aligned per-column storage and version
/// metadata.
#[derive(Debug)]
pub struct RowGroup {
    columns: Vec<Vector>,
    versions: Vec<RowVersion>,
}

impl RowGroup {
    fn new(types: &[LogicalType]) -> Self {
        Self {
            columns: types
                .iter()
                .map(|t| Vector::with_capacity(t.clone(), STANDARD_VECTOR_SIZE))
                .collect(),
            versions: Vec::with_capacity(STANDARD_VECTOR_SIZE),
        }
    }

    fn len(&self) -> usize {
        self.versions.len()
    }

    fn is_full(&self) -> bool {
        self.len() >= STANDARD_VECTOR_SIZE
    }
}

#[derive(Debug)]
pub struct TableData {
    pub name: String,
    types: Vec<LogicalType>,
    row_groups: Vec<RowGroup>,
}

/// One scan unit: a chunk of columns sliced to the visible rows, plus the
/// matching row ids.
pub struct ScanChunk {
    pub columns: Vec<Vector>,
    pub row_ids: Vec<u64>,
}

impl TableData {
    pub fn new(entry: &TableCatalogEntry) -> Self {
        Self {
            name: entry.name.clone(),
            types: entry.column_types(),
            row_groups: Vec::new(),
        }
    }

    pub fn row_group_count(&self) -> usize {
        self.row_groups.len()
    }

    pub fn column_count(&self) -> usize {
        self.types.len()
    }

    fn locate(&self, row_id: u64) -> Result<(usize, usize)> {
        let group = (row_id as usize) / STANDARD_VECTOR_SIZE;
        let offset = (row_id as usize) % STANDARD_VECTOR_SIZE;
        if group >= self.row_groups.len() || offset >= self.row_groups[group].len() {
            return Err(Error::Internal(format!(
                "row id {} out of range for table {}",
                row_id, self.name
            )));
        }
        Ok((group, offset))
    }

    pub fn version(&self, row_id: u64) -> Result<&RowVersion> {
        let (group, offset) = self.locate(row_id)?;
        Ok(&self.row_groups[group].versions[offset])
    }

    pub fn version_mut(&mut self, row_id: u64) -> Result<&mut RowVersion> {
        let (group, offset) = self.locate(row_id)?;
        Ok(&mut self.row_groups[group].versions[offset])
    }

    pub fn row_values(&self, row_id: u64) -> Result<Vec<Value>> {
        let (group, offset) = self.locate(row_id)?;
        Ok(self.row_groups[group]
            .columns
            .iter()
            .map(|c| c.value_at(offset))
            .collect())
    }

    /// Append rows with a fresh uncommitted version per row; returns the
    /// assigned row ids.
    pub fn append(&mut self, rows: &[Vec<Value>], version: RowVersion) -> Result<Vec<u64>> {
        let mut row_ids = Vec::with_capacity(rows.len());
        for row in rows {
            if self.row_groups.last().map(RowGroup::is_full).unwrap_or(true) {
                self.row_groups.push(RowGroup::new(&self.types));
            }
            let group_index = self.row_groups.len() - 1;
            let group = &mut self.row_groups[group_index];
            let row_id = (group_index * STANDARD_VECTOR_SIZE + group.len()) as u64;
            for (column, value) in group.columns.iter_mut().zip(row) {
                column.push_value(value)?;
            }
            group.versions.push(version.clone());
            row_ids.push(row_id);
        }
        Ok(row_ids)
    }

    pub fn append_for(&mut self, rows: &[Vec<Value>], txn: &Transaction) -> Result<Vec<u64>> {
        self.append(rows, RowVersion::new(txn.id))
    }

    /// Mark rows deleted by `txn`, returning the ids actually deleted. A
    /// row already deleted by another live or later-committed transaction
    /// is a write-write conflict.
    pub fn delete(&mut self, row_ids: &[u64], txn: &Transaction) -> Result<Vec<u64>> {
        // Validate before mutating so a conflict leaves no partial marks.
        let mut deletable = Vec::with_capacity(row_ids.len());
        for &row_id in row_ids {
            let version = self.version(row_id)?;
            if version.deleted_by == txn.id {
                continue;
            }
            if version.deleted_commit != UNCOMMITTED {
                if version.deleted_commit <= txn.start_time {
                    // Already deleted before this snapshot.
                    continue;
                }
                return Err(Error::Serialization(format!(
                    "row {} in table {} was deleted by a later commit",
                    row_id, self.name
                )));
            }
            if version.deleted_by != 0 {
                return Err(Error::Serialization(format!(
                    "row {} in table {} is being modified by another transaction",
                    row_id, self.name
                )));
            }
            deletable.push(row_id);
        }
        for &row_id in &deletable {
            let version = self.version_mut(row_id)?;
            version.deleted_by = txn.id;
        }
        Ok(deletable)
    }

    /// Scan one row group under the transaction's snapshot. Emits the
    /// requested columns sliced to the visible rows.
    pub fn scan_group(
        &self,
        group_index: usize,
        column_ids: &[usize],
        txn_id: u64,
        start_time: u64,
    ) -> Option<ScanChunk> {
        let group = self.row_groups.get(group_index)?;
        let mut selection = Vec::with_capacity(group.len());
        let mut row_ids = Vec::with_capacity(group.len());
        for (offset, version) in group.versions.iter().enumerate() {
            if version.visible_to(txn_id, start_time) {
                selection.push(offset as u32);
                row_ids.push((group_index * STANDARD_VECTOR_SIZE + offset) as u64);
            }
        }
        let sel = SelectionVector::new(selection);
        let columns = column_ids
            .iter()
            .map(|&c| group.columns[c].clone().slice(&sel))
            .collect();
        Some(ScanChunk { columns, row_ids })
    }

    /// Every row visible to the snapshot, with its row id; used by
    /// checkpointing. Row ids must survive the snapshot round-trip because
    /// WAL records written after a checkpoint address rows by id.
    pub fn visible_rows(&self, txn_id: u64, start_time: u64) -> Vec<(u64, Vec<Value>)> {
        let mut rows = Vec::new();
        for (group_index, group) in self.row_groups.iter().enumerate() {
            for (offset, version) in group.versions.iter().enumerate() {
                if version.visible_to(txn_id, start_time) {
                    rows.push((
                        (group_index * STANDARD_VECTOR_SIZE + offset) as u64,
                        group.columns.iter().map(|c| c.value_at(offset)).collect(),
                    ));
                }
            }
        }
        rows
    }

    /// Total number of row slots ever allocated, deleted rows included;
    /// the next insert takes this id.
    pub fn total_rows(&self) -> u64 {
        match self.row_groups.last() {
            Some(last) => ((self.row_groups.len() - 1) * STANDARD_VECTOR_SIZE + last.len()) as u64,
            None => 0,
        }
    }

    /// Rebuild a row at its original id during snapshot load. Gaps left by
    /// deleted rows are filled with tombstoned placeholders so later WAL
    /// records still address the right slots. Rows must arrive in
    /// increasing id order.
    pub fn place(&mut self, row_id: u64, values: &[Value], version: RowVersion) -> Result<()> {
        self.pad_to(row_id)?;
        let row: Vec<Value> = values.to_vec();
        self.append(&[row], version)?;
        Ok(())
    }

    /// Extend the table with tombstoned placeholder rows up to `total`.
    pub fn pad_to(&mut self, total: u64) -> Result<()> {
        let mut tombstone = RowVersion::committed(0);
        tombstone.tombstone();
        while self.total_rows() < total {
            let nulls = vec![Value::Null; self.types.len()];
            self.append(&[nulls], tombstone.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDefinition;
    use crate::transaction::TransactionManager;

    fn test_table() -> TableData {
        TableData::new(&TableCatalogEntry {
            name: "t".into(),
            columns: vec![ColumnDefinition::new("a", LogicalType::Integer)],
        })
    }

    #[test]
    fn own_writes_are_visible_before_commit() {
        let manager = TransactionManager::new();
        let txn = manager.begin(false);
        let other = manager.begin(false);
        let mut table = test_table();
        table
            .append_for(&[vec![Value::Integer(1)]], &txn)
            .unwrap();

        let mine = table.scan_group(0, &[0], txn.id, txn.start_time).unwrap();
        assert_eq!(mine.row_ids.len(), 1);
        let theirs = table
            .scan_group(0, &[0], other.id, other.start_time)
            .unwrap();
        assert_eq!(theirs.row_ids.len(), 0);
    }

    #[test]
    fn delete_conflict_is_serialization_error() {
        let manager = TransactionManager::new();
        let writer = manager.begin(false);
        let mut table = test_table();
        let ids = table
            .append(&[vec![Value::Integer(1)]], RowVersion::committed(1))
            .unwrap();
        table.delete(&ids, &writer).unwrap();

        let rival = manager.begin(false);
        assert!(matches!(
            table.delete(&ids, &rival),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn rows_split_across_row_groups() {
        let mut table = test_table();
        let rows: Vec<Vec<Value>> = (0..(STANDARD_VECTOR_SIZE as i32 + 10))
            .map(|i| vec![Value::Integer(i)])
            .collect();
        table.append(&rows, RowVersion::committed(1)).unwrap();
        assert_eq!(table.row_group_count(), 2);
        let chunk = table
            .scan_group(1, &[0], crate::transaction::CHECKPOINT_READER_ID, 1)
            .unwrap();
        assert_eq!(chunk.row_ids.len(), 10);
        assert_eq!(chunk.row_ids[0], STANDARD_VECTOR_SIZE as u64);
    }
}
