//! # Crumb Storage
//!
//! Compaction store for Crumb callback tokens.
//!
//! When a Full-shape chain no longer fits the 64-byte budget, the codec hands
//! it to a [`CompactionStore`], which files it under a short content-derived
//! reference and returns a `<<reference>>` token instead.
//!
//! ## Features
//!
//! - **CompactionStore**: in-process cache backed by durable redb tables
//! - **ReferenceHasher**: pluggable digest, BLAKE3 by default
//! - **Retention**: last-touched index with `stale` and `sweep`
//! - **Flusher**: periodic batched flush on a tokio runtime
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use crumb_core::CallbackCodec;
//! use crumb_storage::{CompactionStore, StoreConfig};
//!
//! let store = Arc::new(CompactionStore::open(StoreConfig::at("./data/crumb.redb"))?);
//! let codec = CallbackCodec::new(schemas, store.clone());
//!
//! // a long chain comes back as <<reference>>
//! let token = codec.encode(&invocation, &history)?;
//! store.flush()?;
//! ```

pub mod error;
pub mod flusher;
pub mod reference;
pub mod store;
pub mod tables;

// Re-exports
pub use error::StorageError;
pub use flusher::{FlusherHandle, spawn_flusher};
pub use reference::{Blake3Hasher, Digest, ReferenceHasher};
pub use store::{CompactionStore, StoreConfig, StoreStats};
pub use tables::CompactionRecord;
