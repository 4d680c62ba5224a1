//! Parameters supplied by the embedding application at `initialise`

use crate::error::{Result, StoreError};
use crate::filename::MAX_IDENTIFIER_BITS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// log2 of the address map size used when creating a fresh store
pub const DEFAULT_IDENTIFIER_BITS: u32 = 20;

/// log2 of the entry table capacity used when creating a fresh store
pub const DEFAULT_ENTRY_BITS: u32 = 16;

/// Slot indices are held in 32-bit address map cells
const MAX_ENTRY_BITS: u32 = 31;

/// Configuration for the backing store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreParameters {
    /// Root directory of the store. `None` leaves the store disabled.
    pub path: Option<PathBuf>,
    /// Target upper bound on stored bytes. Zero leaves the store disabled.
    pub limit: u64,
    /// How many bytes below the limit an eviction pass frees
    pub hysteresis: u64,
    /// log2 of the address map size, fixed once the store is created
    pub identifier_bits: u32,
    /// log2 of the entry table capacity, fixed once the store is created
    pub entry_bits: u32,
}

impl Default for StoreParameters {
    fn default() -> Self {
        let limit = 1024 * 1024 * 1024; // 1GB
        Self {
            path: None,
            limit,
            hysteresis: limit / 5,
            identifier_bits: DEFAULT_IDENTIFIER_BITS,
            entry_bits: DEFAULT_ENTRY_BITS,
        }
    }
}

impl StoreParameters {
    pub fn new(path: impl Into<PathBuf>, limit: u64, hysteresis: u64) -> Self {
        Self {
            path: Some(path.into()),
            limit,
            hysteresis,
            ..Self::default()
        }
    }

    pub fn with_geometry(mut self, identifier_bits: u32, entry_bits: u32) -> Self {
        self.identifier_bits = identifier_bits;
        self.entry_bits = entry_bits;
        self
    }

    /// A store with no space or no directory is switched off, not an error.
    pub fn is_disabled(&self) -> bool {
        self.limit == 0 || self.path.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        validate_geometry(self.identifier_bits, self.entry_bits)
    }
}

pub(crate) fn validate_geometry(identifier_bits: u32, entry_bits: u32) -> Result<()> {
    if identifier_bits == 0 || identifier_bits > MAX_IDENTIFIER_BITS {
        return Err(StoreError::BadParameter(format!(
            "identifier_bits {} outside 1..={}",
            identifier_bits, MAX_IDENTIFIER_BITS
        )));
    }
    if entry_bits == 0 || entry_bits > MAX_ENTRY_BITS {
        return Err(StoreError::BadParameter(format!(
            "entry_bits {} outside 1..={}",
            entry_bits, MAX_ENTRY_BITS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parameters() {
        let params = StoreParameters::default();
        assert!(params.path.is_none());
        assert_eq!(params.limit, 1024 * 1024 * 1024);
        assert_eq!(params.hysteresis, params.limit / 5);
        assert_eq!(params.identifier_bits, 20);
        assert_eq!(params.entry_bits, 16);
        assert!(params.is_disabled());
    }

    #[test]
    fn test_zero_limit_is_disabled() {
        let params = StoreParameters::new("/tmp/cache", 0, 0);
        assert!(params.is_disabled());
        let params = StoreParameters::new("/tmp/cache", 10, 2);
        assert!(!params.is_disabled());
    }

    #[test]
    fn test_validate_rejects_wide_identifier() {
        let params = StoreParameters::new("/tmp/cache", 10, 2).with_geometry(37, 8);
        assert!(matches!(
            params.validate(),
            Err(StoreError::BadParameter(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_bits() {
        assert!(validate_geometry(0, 8).is_err());
        assert!(validate_geometry(8, 0).is_err());
        assert!(validate_geometry(12, 32).is_err());
        assert!(validate_geometry(12, 10).is_ok());
    }

    #[test]
    fn test_parameters_deserialize_with_defaults() {
        let json = r#"{ "path": "/var/cache/browser", "limit": 4096 }"#;
        let params: StoreParameters = serde_json::from_str(json).unwrap();
        assert_eq!(params.path, Some(PathBuf::from("/var/cache/browser")));
        assert_eq!(params.limit, 4096);
        assert_eq!(params.identifier_bits, DEFAULT_IDENTIFIER_BITS);
    }
}
