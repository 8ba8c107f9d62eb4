//! Transaction management: identifiers, snapshots, undo buffers
//!
//! Single-writer-multiple-reader MVCC. Transaction ids are allocated from a
//! high base so they can never collide with commit ids; `start_time` is the
//! commit counter at BEGIN and defines the snapshot. Commit stamping and
//! undo reversal walk the entries recorded here; the heavy lifting happens
//! in the storage layer.

use crate::catalog::TableCatalogEntry;
use crate::storage::table::TableData;
use crate::storage::wal::WalRecord;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Transaction ids live above this base; commit ids below it.
pub const TRANSACTION_ID_BASE: u64 = 1 << 62;

/// Commit id of a version that is not yet committed.
pub const UNCOMMITTED: u64 = u64::MAX;

/// Reader id for checkpoint scans. Never allocated to a transaction, so
/// it matches neither `inserted_by` nor the zero "never deleted" marker.
pub const CHECKPOINT_READER_ID: u64 = u64::MAX;

#[derive(Debug)]
pub enum UndoEntry {
    /// Row appended by this transaction.
    Insert { table: String, row_id: u64 },
    /// Row deleted by this transaction.
    Delete { table: String, row_id: u64 },
    /// Update recorded as its delete + insert halves.
    Update {
        table: String,
        old_row: u64,
        new_row: u64,
    },
    CreateTable {
        name: String,
    },
    DropTable {
        entry: TableCatalogEntry,
        data: TableData,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
}

#[derive(Debug)]
pub struct Transaction {
    pub id: u64,
    /// Snapshot: versions with `commit_id <= start_time` are visible.
    pub start_time: u64,
    pub undo: Vec<UndoEntry>,
    /// WAL records buffered until commit; discarded wholesale on rollback.
    pub wal_buffer: Vec<WalRecord>,
    pub modified_tables: HashSet<String>,
    /// Started by an explicit BEGIN, so it spans statements.
    pub explicit: bool,
    /// A failed statement aborted this transaction; only ROLLBACK is
    /// accepted until then.
    pub aborted: bool,
}

impl Transaction {
    pub fn record_wal(&mut self, record: WalRecord) {
        self.wal_buffer.push(record);
    }
}

#[derive(Debug)]
pub struct TransactionManager {
    commit_counter: AtomicU64,
    next_txn_id: AtomicU64,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            commit_counter: AtomicU64::new(1),
            next_txn_id: AtomicU64::new(TRANSACTION_ID_BASE),
        }
    }

    /// Current commit counter; new snapshots read everything committed so
    /// far.
    pub fn current_commit(&self) -> u64 {
        self.commit_counter.load(Ordering::SeqCst)
    }

    /// Used after replay and checkpoint load to continue the commit
    /// sequence.
    pub fn restore_commit_counter(&self, value: u64) {
        self.commit_counter.store(value.max(1), Ordering::SeqCst);
    }

    pub fn begin(&self, explicit: bool) -> Transaction {
        Transaction {
            id: self.next_txn_id.fetch_add(1, Ordering::SeqCst),
            start_time: self.current_commit(),
            undo: Vec::new(),
            wal_buffer: Vec::new(),
            modified_tables: HashSet::new(),
            explicit,
            aborted: false,
        }
    }

    /// Allocate the commit id for a transaction. Only called after the WAL
    /// write succeeded; commit order therefore matches WAL append order.
    pub fn next_commit(&self) -> u64 {
        self.commit_counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_never_collide_with_commit_ids() {
        let manager = TransactionManager::new();
        let txn = manager.begin(false);
        assert!(txn.id >= TRANSACTION_ID_BASE);
        assert!(manager.next_commit() < TRANSACTION_ID_BASE);
    }

    #[test]
    fn snapshots_track_the_commit_counter() {
        let manager = TransactionManager::new();
        let first = manager.begin(false);
        let commit = manager.next_commit();
        let second = manager.begin(false);
        assert!(first.start_time < commit);
        assert_eq!(second.start_time, commit);
    }
}
