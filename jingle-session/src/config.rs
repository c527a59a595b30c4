//! Engine configuration
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration. Values are checked by [`EngineConfig::validate`], which
//! [`EngineConfig::load`] always runs.

use std::io;
use std::path::Path;
use std::time::Duration;

use jingle_common::hash::HashAlgorithm;
use jingle_common::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, NS_IBB_TRANSPORT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default bound on a single transport establishment attempt
pub const DEFAULT_ESTABLISH_TIMEOUT_SECS: u64 = 30;

/// Default chunk size when the transport does not dictate one (64KB)
pub const DEFAULT_TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

/// Largest accepted transfer chunk size (16MB)
pub const MAX_TRANSFER_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Error loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for a session registry and the transfers it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds a single `establish` attempt may take before it counts as failed
    pub establish_timeout_secs: u64,

    /// Block size proposed for in-band bytestreams
    pub ibb_block_size: u32,

    /// Largest in-band block size accepted from a peer
    pub max_ibb_block_size: u32,

    /// Chunk size for transports without a negotiated block size
    pub transfer_chunk_size: usize,

    /// Algorithm used to describe offered files
    pub digest_algorithm: HashAlgorithm,

    /// Transport namespaces in order of preference
    ///
    /// Registered transports not listed here rank after the listed ones,
    /// in registration order.
    pub transport_preference: Vec<String>,

    /// Minimum bytes between progress notifications (0 = every chunk)
    pub progress_interval_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            establish_timeout_secs: DEFAULT_ESTABLISH_TIMEOUT_SECS,
            ibb_block_size: DEFAULT_BLOCK_SIZE,
            max_ibb_block_size: MAX_BLOCK_SIZE,
            transfer_chunk_size: DEFAULT_TRANSFER_CHUNK_SIZE,
            digest_algorithm: HashAlgorithm::Sha256,
            transport_preference: vec![NS_IBB_TRANSPORT.to_string()],
            progress_interval_bytes: 0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file and validate it
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse configuration from a JSON string and validate it
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.establish_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "establish_timeout_secs must be positive".into(),
            ));
        }
        if self.max_ibb_block_size == 0 || self.max_ibb_block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "max_ibb_block_size must be between 1 and {MAX_BLOCK_SIZE}"
            )));
        }
        if self.ibb_block_size == 0 || self.ibb_block_size > self.max_ibb_block_size {
            return Err(ConfigError::Invalid(format!(
                "ibb_block_size must be between 1 and {}",
                self.max_ibb_block_size
            )));
        }
        if self.transfer_chunk_size == 0 || self.transfer_chunk_size > MAX_TRANSFER_CHUNK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "transfer_chunk_size must be between 1 and {MAX_TRANSFER_CHUNK_SIZE}"
            )));
        }
        if !self.digest_algorithm.is_supported() {
            return Err(ConfigError::Invalid(format!(
                "digest_algorithm {} is not supported",
                self.digest_algorithm
            )));
        }
        Ok(())
    }

    pub fn establish_timeout(&self) -> Duration {
        Duration::from_secs(self.establish_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ibb_block_size, 4096);
        assert_eq!(config.establish_timeout(), Duration::from_secs(30));
        assert_eq!(config.transport_preference, vec![NS_IBB_TRANSPORT]);
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config =
            EngineConfig::from_json(r#"{"ibb_block_size": 8192, "digest_algorithm": "sha-512"}"#)
                .unwrap();
        assert_eq!(config.ibb_block_size, 8192);
        assert_eq!(config.digest_algorithm, HashAlgorithm::Sha512);
        assert_eq!(config.transfer_chunk_size, DEFAULT_TRANSFER_CHUNK_SIZE);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(matches!(
            EngineConfig::from_json(r#"{"establish_timeout_secs": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{"ibb_block_size": 70000}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{"transfer_chunk_size": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{"digest_algorithm": "md5"}"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            EngineConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{"digest_algorithm": "crc32"}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"establish_timeout_secs": 5}}"#).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.establish_timeout(), Duration::from_secs(5));

        assert!(matches!(
            EngineConfig::load(Path::new("/nonexistent/jingle.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
