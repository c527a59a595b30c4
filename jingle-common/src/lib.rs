//! Jingle Common Library
//!
//! Shared message structures, negotiation error codes, digest helpers and
//! input validators used by the Jingle session engine.

mod error_kind;
pub mod hash;
pub mod protocol;
pub mod validators;

pub use error_kind::NegotiationError;

/// Namespace of the Jingle session protocol itself
pub const NS_JINGLE: &str = "urn:xmpp:jingle:1";

/// Namespace of the file-transfer application description
pub const NS_FILE_TRANSFER: &str = "urn:xmpp:jingle:apps:file-transfer:5";

/// Namespace of the in-band bytestream transport method
pub const NS_IBB_TRANSPORT: &str = "urn:xmpp:jingle:transports:ibb:1";

/// Namespace announcing support for hash elements
pub const NS_HASHES: &str = "urn:xmpp:hashes:2";

/// Prefix for per-algorithm hash capability features
///
/// The full feature is this prefix followed by the algorithm's protocol name,
/// e.g. `urn:xmpp:hash-function-text-names:sha-256`.
pub const NS_HASH_FUNCTION_PREFIX: &str = "urn:xmpp:hash-function-text-names:";

/// Block size proposed for in-band bytestreams when none is given
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Largest block size an in-band bytestream may negotiate
pub const MAX_BLOCK_SIZE: u32 = 65535;

/// Buffer size for file hashing operations (1MB for fewer syscalls)
pub const HASH_BUFFER_SIZE: usize = 1024 * 1024;
