//! Write-ahead log
//!
//! Append-only record stream framed as `[u32 length][u8 kind][payload]
//! [u32 crc32]` with bincode payloads. Records are buffered per
//! transaction and appended as one batch followed by a COMMIT marker, with
//! a single fsync per commit. Replay groups records by COMMIT marker and
//! discards an uncommitted or torn tail.

use crate::catalog::TableCatalogEntry;
use crate::error::{Error, Result};
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalRecord {
    CreateTable {
        entry: TableCatalogEntry,
    },
    DropTable {
        name: String,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    Insert {
        table: String,
        rows: Vec<Vec<Value>>,
    },
    Delete {
        table: String,
        row_ids: Vec<u64>,
    },
    /// Narrow single-column update; wide updates are logged as their
    /// delete + insert halves.
    Update {
        table: String,
        row_ids: Vec<u64>,
        column: usize,
        values: Vec<Value>,
    },
    Commit,
    Checkpoint,
}

impl WalRecord {
    fn kind(&self) -> u8 {
        match self {
            WalRecord::CreateTable { .. } => 1,
            WalRecord::DropTable { .. } => 2,
            WalRecord::RenameColumn { .. } => 3,
            WalRecord::Insert { .. } => 4,
            WalRecord::Delete { .. } => 5,
            WalRecord::Update { .. } => 6,
            WalRecord::Commit => 7,
            WalRecord::Checkpoint => 8,
        }
    }
}

fn checksum(kind: u8, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[kind]);
    hasher.update(payload);
    hasher.finalize()
}

pub struct WalWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl WalWriter {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
        })
    }

    fn write_record(&mut self, record: &WalRecord) -> Result<()> {
        let payload = bincode::serialize(record)?;
        let kind = record.kind();
        self.file.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.file.write_all(&[kind])?;
        self.file.write_all(&payload)?;
        self.file
            .write_all(&checksum(kind, &payload).to_le_bytes())?;
        Ok(())
    }

    /// Append a transaction's records plus its COMMIT marker, then flush
    /// and fsync. The transaction is durable once this returns.
    pub fn commit(&mut self, records: &[WalRecord]) -> Result<()> {
        for record in records {
            self.write_record(record)?;
        }
        self.write_record(&WalRecord::Commit)?;
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        Ok(())
    }

    /// Truncate after a checkpoint made the log's contents durable in the
    /// main file.
    pub fn truncate(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.sync_data()?;
        self.file = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        Ok(())
    }
}

/// Read back the committed record batches, in commit order. A torn tail
/// (short frame or checksum mismatch) ends replay; a trailing batch with no
/// COMMIT marker is discarded.
pub fn replay(path: &Path) -> Result<Vec<Vec<WalRecord>>> {
    let mut data = Vec::new();
    match File::open(path) {
        Ok(mut file) => {
            file.read_to_end(&mut data)?;
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    }

    let mut batches = Vec::new();
    let mut pending: Vec<WalRecord> = Vec::new();
    let mut cursor = 0usize;
    let mut torn = 0usize;
    loop {
        if cursor + 5 > data.len() {
            torn += usize::from(cursor < data.len());
            break;
        }
        let length = u32::from_le_bytes([
            data[cursor],
            data[cursor + 1],
            data[cursor + 2],
            data[cursor + 3],
        ]) as usize;
        let kind = data[cursor + 4];
        let frame_end = cursor + 5 + length + 4;
        if frame_end > data.len() {
            torn += 1;
            break;
        }
        let payload = &data[cursor + 5..cursor + 5 + length];
        let stored_crc = u32::from_le_bytes([
            data[frame_end - 4],
            data[frame_end - 3],
            data[frame_end - 2],
            data[frame_end - 1],
        ]);
        if checksum(kind, payload) != stored_crc {
            torn += 1;
            break;
        }
        let record: WalRecord = bincode::deserialize(payload)
            .map_err(|e| Error::Io(format!("corrupt WAL record: {}", e)))?;
        cursor = frame_end;
        match record {
            WalRecord::Commit => batches.push(std::mem::take(&mut pending)),
            WalRecord::Checkpoint => pending.clear(),
            other => pending.push(other),
        }
    }
    if torn > 0 || !pending.is_empty() {
        tracing::debug!(
            discarded = pending.len(),
            torn,
            "discarding uncommitted WAL tail"
        );
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDefinition;
    use crate::types::LogicalType;

    fn sample_records() -> Vec<WalRecord> {
        vec![
            WalRecord::CreateTable {
                entry: TableCatalogEntry {
                    name: "t".into(),
                    columns: vec![ColumnDefinition::new("a", LogicalType::Integer)],
                },
            },
            WalRecord::Insert {
                table: "t".into(),
                rows: vec![vec![Value::Integer(1)], vec![Value::Integer(2)]],
            },
        ]
    }

    #[test]
    fn round_trips_committed_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let mut writer = WalWriter::open(&path).unwrap();
        writer.commit(&sample_records()).unwrap();
        writer
            .commit(&[WalRecord::Delete {
                table: "t".into(),
                row_ids: vec![0],
            }])
            .unwrap();

        let batches = replay(&path).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], sample_records());
    }

    #[test]
    fn discards_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let mut writer = WalWriter::open(&path).unwrap();
        writer.commit(&sample_records()).unwrap();
        drop(writer);

        // Append garbage that looks like the start of a frame.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[200, 0, 0, 0, 4, 1, 2, 3]).unwrap();
        drop(file);

        let batches = replay(&path).unwrap();
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn skips_uncommitted_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let mut writer = WalWriter::open(&path).unwrap();
        writer.commit(&sample_records()).unwrap();
        // Records written without a COMMIT marker (simulated crash between
        // append and commit).
        writer
            .write_record(&WalRecord::Delete {
                table: "t".into(),
                row_ids: vec![0],
            })
            .unwrap();
        writer.file.flush().unwrap();
        drop(writer);

        let batches = replay(&path).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], sample_records());
    }
}
