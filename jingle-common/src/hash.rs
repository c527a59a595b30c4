//! Digest algorithms and file hashing utilities
//!
//! Algorithms are identified by their protocol text names (`sha-256`,
//! `sha3-512`, `id-blake2b256`, ...). Every name the hash registry defines
//! can be parsed, but only the SHA-2 family is computed locally.
//!
//! All async functions use `spawn_blocking` to run CPU-intensive hashing on a
//! dedicated thread pool, avoiding blocking tokio's async worker threads.
//!
//! ## Cancellation Support
//!
//! File hashing accepts an optional `AtomicBool` flag. The computation checks
//! this flag before each buffer read and returns `ErrorKind::Interrupted` if
//! cancellation is requested.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::{HASH_BUFFER_SIZE, NS_HASH_FUNCTION_PREFIX};

/// Hash algorithms known to the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
    Blake2b160,
    Blake2b256,
    Blake2b384,
    Blake2b512,
}

/// Every algorithm, in protocol registry order
pub const ALL_ALGORITHMS: [HashAlgorithm; 14] = [
    HashAlgorithm::Md5,
    HashAlgorithm::Sha1,
    HashAlgorithm::Sha224,
    HashAlgorithm::Sha256,
    HashAlgorithm::Sha384,
    HashAlgorithm::Sha512,
    HashAlgorithm::Sha3_224,
    HashAlgorithm::Sha3_256,
    HashAlgorithm::Sha3_384,
    HashAlgorithm::Sha3_512,
    HashAlgorithm::Blake2b160,
    HashAlgorithm::Blake2b256,
    HashAlgorithm::Blake2b384,
    HashAlgorithm::Blake2b512,
];

impl HashAlgorithm {
    /// Protocol text name of the algorithm
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha-1",
            Self::Sha224 => "sha-224",
            Self::Sha256 => "sha-256",
            Self::Sha384 => "sha-384",
            Self::Sha512 => "sha-512",
            Self::Sha3_224 => "sha3-224",
            Self::Sha3_256 => "sha3-256",
            Self::Sha3_384 => "sha3-384",
            Self::Sha3_512 => "sha3-512",
            Self::Blake2b160 => "id-blake2b160",
            Self::Blake2b256 => "id-blake2b256",
            Self::Blake2b384 => "id-blake2b384",
            Self::Blake2b512 => "id-blake2b512",
        }
    }

    /// Parse a protocol text name
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        ALL_ALGORITHMS.into_iter().find(|algo| algo.as_str() == s)
    }

    /// Whether digests for this algorithm can be computed locally
    #[must_use]
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            Self::Sha224 | Self::Sha256 | Self::Sha384 | Self::Sha512
        )
    }

    /// Capability feature announcing support for this algorithm
    #[must_use]
    pub fn feature(&self) -> String {
        format!("{NS_HASH_FUNCTION_PREFIX}{}", self.as_str())
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for HashAlgorithm {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown hash algorithm: {value}"))
    }
}

impl From<HashAlgorithm> for String {
    fn from(algo: HashAlgorithm) -> Self {
        algo.as_str().to_string()
    }
}

/// Algorithms that can be computed locally, strongest last
pub fn supported_algorithms() -> Vec<HashAlgorithm> {
    ALL_ALGORITHMS
        .into_iter()
        .filter(HashAlgorithm::is_supported)
        .collect()
}

/// Incremental digest state for one of the supported algorithms
#[derive(Clone)]
pub enum Hasher {
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    /// Create a hasher, or `None` if the algorithm is not computed locally
    #[must_use]
    pub fn new(algorithm: HashAlgorithm) -> Option<Self> {
        match algorithm {
            HashAlgorithm::Sha224 => Some(Self::Sha224(Sha224::new())),
            HashAlgorithm::Sha256 => Some(Self::Sha256(Sha256::new())),
            HashAlgorithm::Sha384 => Some(Self::Sha384(Sha384::new())),
            HashAlgorithm::Sha512 => Some(Self::Sha512(Sha512::new())),
            _ => None,
        }
    }

    /// Algorithm this hasher computes
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Sha224(_) => HashAlgorithm::Sha224,
            Self::Sha256(_) => HashAlgorithm::Sha256,
            Self::Sha384(_) => HashAlgorithm::Sha384,
            Self::Sha512(_) => HashAlgorithm::Sha512,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha224(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Consume the hasher and return the raw digest bytes
    #[must_use]
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha224(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hasher").field(&self.algorithm()).finish()
    }
}

/// Compute a digest over an in-memory buffer
#[must_use]
pub fn compute(algorithm: HashAlgorithm, data: &[u8]) -> Option<Vec<u8>> {
    let mut hasher = Hasher::new(algorithm)?;
    hasher.update(data);
    Some(hasher.finalize())
}

/// Compute the digest of an entire file
///
/// Runs on a blocking thread pool to avoid blocking async workers.
pub async fn compute_file_digest(path: &Path, algorithm: HashAlgorithm) -> io::Result<Vec<u8>> {
    compute_partial_file_digest(path, algorithm, 0, u64::MAX, None).await
}

/// Compute the digest of `max_bytes` of a file starting at `offset`
///
/// Used for ranged transfers. If the file ends before `offset + max_bytes`,
/// hashes up to the end of the file.
///
/// Runs on a blocking thread pool to avoid blocking async workers.
pub async fn compute_partial_file_digest(
    path: &Path,
    algorithm: HashAlgorithm,
    offset: u64,
    max_bytes: u64,
    cancel_flag: Option<Arc<AtomicBool>>,
) -> io::Result<Vec<u8>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        compute_partial_file_digest_sync(&path, algorithm, offset, max_bytes, cancel_flag.as_ref())
    })
    .await
    .map_err(|e| io::Error::other(format!("hash task failed: {e}")))?
}

/// Synchronous ranged file digest with cancellation support
///
/// # Returns
///
/// * `Ok(digest)` - The raw digest bytes
/// * `Err` with `ErrorKind::Unsupported` - If the algorithm is not computed locally
/// * `Err` with `ErrorKind::Interrupted` - If cancelled via `cancel_flag`
/// * `Err` with other kinds - For I/O errors
pub fn compute_partial_file_digest_sync(
    path: &Path,
    algorithm: HashAlgorithm,
    offset: u64,
    max_bytes: u64,
    cancel_flag: Option<&Arc<AtomicBool>>,
) -> io::Result<Vec<u8>> {
    let mut hasher = Hasher::new(algorithm).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::Unsupported,
            format!("hash algorithm {algorithm} is not supported"),
        )
    })?;

    if is_cancelled(cancel_flag) {
        return Err(cancelled_error());
    }

    if max_bytes == 0 {
        return Ok(hasher.finalize());
    }

    let mut file = File::open(path)?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset))?;
    }
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut remaining = max_bytes;

    while remaining > 0 {
        if is_cancelled(cancel_flag) {
            return Err(cancelled_error());
        }

        let to_read = remaining.min(buffer.len() as u64) as usize;
        let bytes_read = file.read(&mut buffer[..to_read])?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        remaining -= bytes_read as u64;
    }

    Ok(hasher.finalize())
}

fn is_cancelled(cancel_flag: Option<&Arc<AtomicBool>>) -> bool {
    cancel_flag.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

fn cancelled_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "hash computation cancelled")
}

/// Encode digest bytes the way hash elements carry them (standard base64)
#[must_use]
pub fn encode_base64(digest: &[u8]) -> String {
    STANDARD.encode(digest)
}

/// Decode a base64 digest value
pub fn decode_base64(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(value)
}

/// Hex form of a digest, for logs and display
#[must_use]
pub fn to_hex(digest: &[u8]) -> String {
    hex::encode(digest)
}
