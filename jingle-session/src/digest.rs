//! Digest service seam
//!
//! The engine never hashes directly; it asks a [`DigestService`] so the
//! hashing backend can be swapped. [`Sha2Digests`] is the default.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use jingle_common::hash::{self, HashAlgorithm, Hasher};
use jingle_common::protocol::HashElement;

/// Digest computation and algorithm capability
#[async_trait]
pub trait DigestService: Send + Sync {
    /// Algorithms this service can compute
    fn supported_algorithms(&self) -> BTreeSet<HashAlgorithm>;

    /// Digest of an in-memory buffer, or `None` if unsupported
    fn compute(&self, algorithm: HashAlgorithm, bytes: &[u8]) -> Option<Vec<u8>>;

    /// Incremental hasher for streaming verification
    fn hasher(&self, algorithm: HashAlgorithm) -> Option<Hasher>;

    /// Digest of `length` bytes of a file starting at `offset`
    async fn compute_file(
        &self,
        algorithm: HashAlgorithm,
        path: &Path,
        offset: u64,
        length: u64,
    ) -> io::Result<Vec<u8>>;

    fn is_supported(&self, algorithm: HashAlgorithm) -> bool {
        self.supported_algorithms().contains(&algorithm)
    }
}

/// SHA-2 family digests backed by `jingle_common::hash`
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha2Digests;

#[async_trait]
impl DigestService for Sha2Digests {
    fn supported_algorithms(&self) -> BTreeSet<HashAlgorithm> {
        hash::supported_algorithms().into_iter().collect()
    }

    fn compute(&self, algorithm: HashAlgorithm, bytes: &[u8]) -> Option<Vec<u8>> {
        hash::compute(algorithm, bytes)
    }

    fn hasher(&self, algorithm: HashAlgorithm) -> Option<Hasher> {
        Hasher::new(algorithm)
    }

    async fn compute_file(
        &self,
        algorithm: HashAlgorithm,
        path: &Path,
        offset: u64,
        length: u64,
    ) -> io::Result<Vec<u8>> {
        hash::compute_partial_file_digest(path, algorithm, offset, length, None).await
    }
}

/// Check `bytes` against an expected digest
///
/// Returns `false` when the algorithm is unsupported; an unverifiable
/// digest never counts as a match.
pub fn verify(digests: &dyn DigestService, expected: &HashElement, bytes: &[u8]) -> bool {
    digests
        .compute(expected.algorithm, bytes)
        .is_some_and(|actual| actual == expected.value)
}
