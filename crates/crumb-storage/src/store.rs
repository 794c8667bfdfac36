//! Compaction store
//!
//! Maps oversized Full-shape strings to short references. Records live in an
//! in-process cache and, when a database path is configured, in the durable
//! redb tables so references keep resolving across restarts.
//!
//! The cache mutex is held across every probe-then-insert sequence, so two
//! callers can never claim one slot for different content.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crumb_core::token::{MAX_TOKEN_LEN, REFERENCE_OPEN};
use crumb_core::{CodecError, Compactor, Persistence, Reference};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::StorageError;
use crate::reference::{Blake3Hasher, ReferenceHasher, next_probe, reference_for};
use crate::tables::{CompactionRecord, CompactionTables};

/// Configuration for the compaction store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the database file; `None` keeps records in memory only
    pub db_path: Option<PathBuf>,
    /// Payloads up to this length are returned unchanged
    pub token_budget: usize,
    /// Slots tried before giving up on a colliding payload
    pub max_probes: usize,
    /// redb cache size in bytes
    pub cache_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            token_budget: MAX_TOKEN_LEN,
            max_probes: 16,
            cache_size: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl StoreConfig {
    /// Durable store at `path` with default settings
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(path.into()),
            ..Default::default()
        }
    }
}

/// Store counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Records held in the in-process cache
    pub cached: usize,
    /// Cached records not yet written to the durable table
    pub dirty: usize,
    /// Records in the durable table
    pub durable: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: String,
    last_touched_millis: i64,
    dirty: bool,
}

impl CacheEntry {
    fn to_record(&self) -> CompactionRecord {
        CompactionRecord::new(self.payload.clone(), self.last_touched_millis)
    }
}

type Cache = HashMap<Reference, CacheEntry>;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Reference store for oversized callback tokens
pub struct CompactionStore {
    config: StoreConfig,
    hasher: Arc<dyn ReferenceHasher>,
    tables: Option<CompactionTables>,
    cache: Mutex<Cache>,
}

impl std::fmt::Debug for CompactionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionStore")
            .field("config", &self.config)
            .field("durable", &self.tables.is_some())
            .finish()
    }
}

impl CompactionStore {
    /// Cache-only store with default settings
    pub fn in_memory() -> Self {
        Self {
            config: StoreConfig::default(),
            hasher: Arc::new(Blake3Hasher),
            tables: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Open a store, creating the durable tables if a path is configured
    #[instrument(skip(config), fields(path = ?config.db_path))]
    pub fn open(config: StoreConfig) -> Result<Self, StorageError> {
        let tables = match &config.db_path {
            Some(path) => Some(CompactionTables::open(path, config.cache_size)?),
            None => None,
        };
        info!(durable = tables.is_some(), "Opened compaction store");
        Ok(Self {
            config,
            hasher: Arc::new(Blake3Hasher),
            tables,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Replace the content digest
    pub fn with_hasher(mut self, hasher: impl ReferenceHasher + 'static) -> Self {
        self.hasher = Arc::new(hasher);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn is_durable(&self) -> bool {
        self.tables.is_some()
    }

    /// Return `payload` unchanged if it fits the budget, else a Hashed token
    pub fn encode(&self, payload: &str, persistence: Persistence) -> Result<String, StorageError> {
        if payload.len() <= self.config.token_budget {
            return Ok(payload.to_string());
        }
        Ok(self.claim(payload, persistence)?.to_token())
    }

    /// Expand a Hashed token; anything else is returned unchanged
    pub fn decode(&self, token: &str) -> Result<String, StorageError> {
        if !token.starts_with(REFERENCE_OPEN) {
            return Ok(token.to_string());
        }
        let reference = Reference::from_token(token)
            .map_err(|_| StorageError::BadReference(token.to_string()))?;
        self.touch(&reference)
    }

    /// Read a record without refreshing it
    pub fn record(&self, reference: &Reference) -> Result<Option<CompactionRecord>, StorageError> {
        if let Some(entry) = self.cache.lock().get(reference) {
            return Ok(Some(entry.to_record()));
        }
        match &self.tables {
            Some(tables) => tables.get(reference),
            None => Ok(None),
        }
    }

    /// Find or create the slot for `payload`
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    fn claim(&self, payload: &str, persistence: Persistence) -> Result<Reference, StorageError> {
        let mut cache = self.cache.lock();
        let mut digest = self.hasher.digest(payload.as_bytes());

        for probe in 0..self.config.max_probes {
            let reference = reference_for(&digest)?;

            // read-only probe, no timestamp refresh
            let existing = match cache.get(&reference) {
                Some(entry) => Some(entry.payload == payload),
                None => match &self.tables {
                    Some(tables) => tables.get(&reference)?.map(|r| r.payload == payload),
                    None => None,
                },
            };

            match existing {
                Some(true) => {
                    let pending = cache.get(&reference).is_some_and(|e| e.dirty);
                    if persistence == Persistence::Immediate && pending {
                        self.persist(&mut cache, std::slice::from_ref(&reference))?;
                    }
                    debug!(%reference, probe, "Reusing compaction record");
                    return Ok(reference);
                }
                Some(false) => {
                    warn!(%reference, probe, "Reference collision, probing next slot");
                    digest = next_probe(self.hasher.as_ref(), &digest);
                }
                None => {
                    cache.insert(
                        reference.clone(),
                        CacheEntry {
                            payload: payload.to_string(),
                            last_touched_millis: now_millis(),
                            dirty: self.tables.is_some(),
                        },
                    );
                    if persistence == Persistence::Immediate {
                        if let Err(e) = self.persist(&mut cache, std::slice::from_ref(&reference)) {
                            cache.remove(&reference);
                            return Err(e);
                        }
                    }
                    debug!(%reference, probe, ?persistence, "Created compaction record");
                    return Ok(reference);
                }
            }
        }

        Err(StorageError::ProbesExhausted(self.config.max_probes))
    }

    /// Resolve a reference and refresh its last-touched time
    fn touch(&self, reference: &Reference) -> Result<String, StorageError> {
        let mut cache = self.cache.lock();
        let now = now_millis();

        if let Some(entry) = cache.get_mut(reference) {
            entry.last_touched_millis = now;
            entry.dirty = self.tables.is_some();
            debug!(%reference, "Cache hit");
            return Ok(entry.payload.clone());
        }

        let record = match &self.tables {
            Some(tables) => tables.get(reference)?,
            None => None,
        };
        match record {
            Some(record) => {
                debug!(%reference, "Cache miss, loaded from durable table");
                cache.insert(
                    reference.clone(),
                    CacheEntry {
                        payload: record.payload.clone(),
                        last_touched_millis: now,
                        dirty: true,
                    },
                );
                Ok(record.payload)
            }
            None => Err(StorageError::not_found(reference.as_str())),
        }
    }

    /// Write the given cached records through and mark them clean
    fn persist(&self, cache: &mut Cache, references: &[Reference]) -> Result<usize, StorageError> {
        let Some(tables) = &self.tables else {
            return Ok(0);
        };
        let records: Vec<(Reference, CompactionRecord)> = references
            .iter()
            .filter_map(|r| cache.get(r).map(|e| (r.clone(), e.to_record())))
            .collect();
        if records.is_empty() {
            return Ok(0);
        }

        let written = tables.write_batch(&records)?;
        for (reference, _) in &records {
            if let Some(entry) = cache.get_mut(reference) {
                entry.dirty = false;
            }
        }
        Ok(written)
    }

    fn flush_locked(&self, cache: &mut Cache) -> Result<usize, StorageError> {
        let dirty: Vec<Reference> = cache
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(r, _)| r.clone())
            .collect();
        self.persist(cache, &dirty)
    }

    /// Write every dirty record in one transaction
    #[instrument(skip(self))]
    pub fn flush(&self) -> Result<usize, StorageError> {
        let mut cache = self.cache.lock();
        let written = self.flush_locked(&mut cache)?;
        if written > 0 {
            info!(count = written, "Flushed compaction records");
        }
        Ok(written)
    }

    /// Flush, then drop every cached record
    pub fn clear_cache(&self) -> Result<usize, StorageError> {
        let mut cache = self.cache.lock();
        if self.tables.is_some() {
            self.flush_locked(&mut cache)?;
        }
        let cleared = cache.len();
        cache.clear();
        Ok(cleared)
    }

    fn stale_locked(&self, cache: &Cache, cutoff_millis: i64) -> Result<Vec<Reference>, StorageError> {
        let mut seen = HashSet::new();
        let mut stale = Vec::new();

        if let Some(tables) = &self.tables {
            for reference in tables.stale(cutoff_millis)? {
                // the cache may hold a newer touch than the durable table
                let fresh = cache
                    .get(&reference)
                    .is_some_and(|e| e.last_touched_millis >= cutoff_millis);
                if !fresh && seen.insert(reference.clone()) {
                    stale.push(reference);
                }
            }
        }
        for (reference, entry) in cache.iter() {
            if entry.last_touched_millis < cutoff_millis && seen.insert(reference.clone()) {
                stale.push(reference.clone());
            }
        }
        Ok(stale)
    }

    /// References last touched strictly before `cutoff_millis`
    pub fn stale(&self, cutoff_millis: i64) -> Result<Vec<Reference>, StorageError> {
        let cache = self.cache.lock();
        self.stale_locked(&cache, cutoff_millis)
    }

    /// Remove every record last touched before `cutoff_millis`
    #[instrument(skip(self))]
    pub fn sweep(&self, cutoff_millis: i64) -> Result<usize, StorageError> {
        let mut cache = self.cache.lock();
        self.flush_locked(&mut cache)?;
        let stale = self.stale_locked(&cache, cutoff_millis)?;

        let mut removed = 0;
        for reference in &stale {
            if cache.remove(reference).is_some() && self.tables.is_none() {
                removed += 1;
            }
        }
        if let Some(tables) = &self.tables {
            removed = tables.remove(&stale)?;
        }

        info!(removed, cutoff_millis, "Swept stale compaction records");
        Ok(removed)
    }

    /// Remove one record, returning whether it existed
    pub fn remove(&self, reference: &Reference) -> Result<bool, StorageError> {
        let mut cache = self.cache.lock();
        let cached = cache.remove(reference).is_some();
        let durable = match &self.tables {
            Some(tables) => tables.remove(std::slice::from_ref(reference))? > 0,
            None => false,
        };
        Ok(cached || durable)
    }

    pub fn stats(&self) -> Result<StoreStats, StorageError> {
        let cache = self.cache.lock();
        let durable = match &self.tables {
            Some(tables) => tables.len()?,
            None => 0,
        };
        Ok(StoreStats {
            cached: cache.len(),
            dirty: cache.values().filter(|e| e.dirty).count(),
            durable,
        })
    }
}

impl Compactor for CompactionStore {
    fn compact(&self, payload: &str, persistence: Persistence) -> Result<Reference, CodecError> {
        Ok(self.claim(payload, persistence)?)
    }

    fn expand(&self, reference: &Reference) -> Result<String, CodecError> {
        Ok(self.touch(reference)?)
    }
}

impl Drop for CompactionStore {
    fn drop(&mut self) {
        let mut cache = self.cache.lock();
        if let Err(e) = self.flush_locked(&mut cache) {
            warn!(error = %e, "Failed to flush compaction records on drop");
        }
    }
}
