//! Reference derivation

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use crumb_core::Reference;

use crate::error::StorageError;

/// Bytes of digest kept in a reference (12 bytes = 16 base64 chars)
pub const REFERENCE_BYTES: usize = 12;

/// Full-width content digest
pub type Digest = [u8; 32];

/// Content digest used to place payloads
///
/// Pluggable so tests can force collisions.
pub trait ReferenceHasher: Send + Sync {
    fn digest(&self, data: &[u8]) -> Digest;
}

/// BLAKE3 content digest
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Hasher;

impl ReferenceHasher for Blake3Hasher {
    fn digest(&self, data: &[u8]) -> Digest {
        *blake3::hash(data).as_bytes()
    }
}

/// Truncate a digest into a reference
pub fn reference_for(digest: &Digest) -> Result<Reference, StorageError> {
    let encoded = URL_SAFE_NO_PAD.encode(&digest[..REFERENCE_BYTES]);
    Reference::new(encoded).map_err(|e| StorageError::BadReference(e.to_string()))
}

/// Next probe slot after a collision at `digest`
pub fn next_probe(hasher: &dyn ReferenceHasher, digest: &Digest) -> Digest {
    hasher.digest(digest)
}
