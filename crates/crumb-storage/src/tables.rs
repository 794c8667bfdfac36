//! redb table definitions and durable record access
//!
//! Two tables back the compaction store: the records themselves, and a
//! secondary index ordered by last-touched time for retention sweeps.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crumb_core::Reference;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::StorageError;

// Table definitions
// Key: reference string, Value: postcard-encoded CompactionRecord
pub const COMPACTION_RECORDS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("compaction_records");

// Key: (last_touched_millis BE, reference) concatenated, Value: empty
pub const COMPACTION_TOUCHED: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("compaction_touched");

/// Durable form of one compaction record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionRecord {
    /// Original Full-shape string
    pub payload: String,
    /// Last time the reference was created or resolved
    pub last_touched_millis: i64,
}

impl CompactionRecord {
    pub fn new(payload: impl Into<String>, last_touched_millis: i64) -> Self {
        Self {
            payload: payload.into(),
            last_touched_millis,
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        postcard::to_allocvec(self).map_err(|e| StorageError::serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Build a secondary index key
fn touched_key(last_touched_millis: i64, reference: &Reference) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + reference.as_str().len());
    key.extend_from_slice(&touched_prefix(last_touched_millis));
    key.extend_from_slice(reference.as_str().as_bytes());
    key
}

/// Timestamps before the epoch clamp to zero
fn touched_prefix(millis: i64) -> [u8; 8] {
    (millis.max(0) as u64).to_be_bytes()
}

/// Handle to the compaction tables
#[derive(Clone)]
pub struct CompactionTables {
    db: Arc<Database>,
    path: PathBuf,
}

impl CompactionTables {
    /// Open or create the database
    #[instrument(skip(path), fields(path = %path.display()))]
    pub fn open(path: &Path, cache_size: usize) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::builder()
            .set_cache_size(cache_size)
            .create(path)
            .map_err(StorageError::database)?;

        info!("Opened redb database");

        let tables = Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        };
        tables.init_tables()?;
        Ok(tables)
    }

    fn init_tables(&self) -> Result<(), StorageError> {
        let write_txn = self.db.begin_write().map_err(StorageError::database)?;
        write_txn
            .open_table(COMPACTION_RECORDS)
            .map_err(StorageError::database)?;
        write_txn
            .open_table(COMPACTION_TOUCHED)
            .map_err(StorageError::database)?;
        write_txn.commit().map_err(StorageError::database)?;

        debug!("Initialized compaction tables");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read one record without touching it
    pub fn get(&self, reference: &Reference) -> Result<Option<CompactionRecord>, StorageError> {
        let read_txn = self.db.begin_read().map_err(StorageError::database)?;
        let table = read_txn
            .open_table(COMPACTION_RECORDS)
            .map_err(StorageError::database)?;

        match table.get(reference.as_str()).map_err(StorageError::database)? {
            Some(guard) => Ok(Some(CompactionRecord::from_bytes(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Write records and their index entries in one transaction.
    ///
    /// A record whose reference already holds a different payload aborts the
    /// whole batch with [`StorageError::Conflict`].
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub fn write_batch(&self, records: &[(Reference, CompactionRecord)]) -> Result<usize, StorageError> {
        let write_txn = self.db.begin_write().map_err(StorageError::database)?;
        {
            let mut table = write_txn
                .open_table(COMPACTION_RECORDS)
                .map_err(StorageError::database)?;
            let mut index = write_txn
                .open_table(COMPACTION_TOUCHED)
                .map_err(StorageError::database)?;

            for (reference, record) in records {
                let existing = match table.get(reference.as_str()).map_err(StorageError::database)? {
                    Some(guard) => Some(CompactionRecord::from_bytes(guard.value())?),
                    None => None,
                };
                if let Some(existing) = existing {
                    if existing.payload != record.payload {
                        return Err(StorageError::Conflict(reference.to_string()));
                    }
                    let old_key = touched_key(existing.last_touched_millis, reference);
                    index
                        .remove(old_key.as_slice())
                        .map_err(StorageError::database)?;
                }

                let bytes = record.to_bytes()?;
                table
                    .insert(reference.as_str(), bytes.as_slice())
                    .map_err(StorageError::database)?;
                let key = touched_key(record.last_touched_millis, reference);
                index
                    .insert(key.as_slice(), b"".as_slice())
                    .map_err(StorageError::database)?;
            }
        }
        write_txn.commit().map_err(StorageError::database)?;

        Ok(records.len())
    }

    /// References last touched strictly before `cutoff_millis`, oldest first
    pub fn stale(&self, cutoff_millis: i64) -> Result<Vec<Reference>, StorageError> {
        let read_txn = self.db.begin_read().map_err(StorageError::database)?;
        let index = read_txn
            .open_table(COMPACTION_TOUCHED)
            .map_err(StorageError::database)?;

        let upper = touched_prefix(cutoff_millis);
        let mut results = Vec::new();
        for entry in index.range(..upper.as_slice()).map_err(StorageError::database)? {
            let (key, _) = entry.map_err(StorageError::database)?;
            let key_bytes = key.value();
            let raw = std::str::from_utf8(&key_bytes[8..])
                .map_err(|e| StorageError::deserialization(e.to_string()))?;
            let reference =
                Reference::new(raw).map_err(|e| StorageError::deserialization(e.to_string()))?;
            results.push(reference);
        }
        Ok(results)
    }

    /// Remove records and their index entries, returning how many existed
    pub fn remove(&self, references: &[Reference]) -> Result<usize, StorageError> {
        let write_txn = self.db.begin_write().map_err(StorageError::database)?;
        let mut removed = 0;
        {
            let mut table = write_txn
                .open_table(COMPACTION_RECORDS)
                .map_err(StorageError::database)?;
            let mut index = write_txn
                .open_table(COMPACTION_TOUCHED)
                .map_err(StorageError::database)?;

            for reference in references {
                let existing = match table.remove(reference.as_str()).map_err(StorageError::database)? {
                    Some(guard) => Some(CompactionRecord::from_bytes(guard.value())?),
                    None => None,
                };
                if let Some(record) = existing {
                    let key = touched_key(record.last_touched_millis, reference);
                    index
                        .remove(key.as_slice())
                        .map_err(StorageError::database)?;
                    removed += 1;
                }
            }
        }
        write_txn.commit().map_err(StorageError::database)?;

        Ok(removed)
    }

    /// Number of durable records
    pub fn len(&self) -> Result<u64, StorageError> {
        let read_txn = self.db.begin_read().map_err(StorageError::database)?;
        let table = read_txn
            .open_table(COMPACTION_RECORDS)
            .map_err(StorageError::database)?;
        table.len().map_err(StorageError::database)
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_tables() -> (CompactionTables, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let tables = CompactionTables::open(&temp_dir.path().join("test.redb"), 1024 * 1024).unwrap();
        (tables, temp_dir)
    }

    fn reference(c: char) -> Reference {
        Reference::new(c.to_string().repeat(16)).unwrap()
    }

    #[test]
    fn test_write_and_get() {
        let (tables, _temp) = create_test_tables();
        let record = CompactionRecord::new("~{a:1}x", 100);

        tables.write_batch(&[(reference('a'), record.clone())]).unwrap();

        assert_eq!(tables.get(&reference('a')).unwrap(), Some(record));
        assert_eq!(tables.get(&reference('b')).unwrap(), None);
        assert_eq!(tables.len().unwrap(), 1);
    }

    #[test]
    fn test_conflict_rejected() {
        let (tables, _temp) = create_test_tables();
        tables
            .write_batch(&[(reference('a'), CompactionRecord::new("one", 1))])
            .unwrap();

        let result = tables.write_batch(&[
            (reference('b'), CompactionRecord::new("two", 1)),
            (reference('a'), CompactionRecord::new("other", 2)),
        ]);
        assert!(matches!(result, Err(StorageError::Conflict(_))));

        // the batch was aborted as a whole
        assert!(tables.get(&reference('b')).unwrap().is_none());
        assert_eq!(tables.get(&reference('a')).unwrap().unwrap().payload, "one");
    }

    #[test]
    fn test_touch_moves_index_entry() {
        let (tables, _temp) = create_test_tables();
        tables
            .write_batch(&[
                (reference('a'), CompactionRecord::new("one", 10)),
                (reference('b'), CompactionRecord::new("two", 20)),
            ])
            .unwrap();
        assert_eq!(tables.stale(15).unwrap(), vec![reference('a')]);

        // refresh a past the cutoff
        tables
            .write_batch(&[(reference('a'), CompactionRecord::new("one", 30))])
            .unwrap();
        assert!(tables.stale(15).unwrap().is_empty());
        assert_eq!(tables.stale(25).unwrap(), vec![reference('b')]);
        assert_eq!(tables.stale(31).unwrap(), vec![reference('b'), reference('a')]);
    }

    #[test]
    fn test_remove() {
        let (tables, _temp) = create_test_tables();
        tables
            .write_batch(&[(reference('a'), CompactionRecord::new("one", 10))])
            .unwrap();

        assert_eq!(tables.remove(&[reference('a'), reference('z')]).unwrap(), 1);
        assert!(tables.is_empty().unwrap());
        assert!(tables.stale(i64::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/dir/test.redb");
        {
            let tables = CompactionTables::open(&path, 1024 * 1024).unwrap();
            tables
                .write_batch(&[(reference('a'), CompactionRecord::new("kept", 5))])
                .unwrap();
        }
        let tables = CompactionTables::open(&path, 1024 * 1024).unwrap();
        assert_eq!(tables.get(&reference('a')).unwrap().unwrap().payload, "kept");
    }
}
