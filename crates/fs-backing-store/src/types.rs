//! Core types for the backing store

use serde::{Deserialize, Serialize};

/// Fixed-width key derived from a URL. Used both as the record tag and as
/// the probe value for the address map.
pub type Identifier = u32;

/// Which of the two objects held for a key an operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// The resource payload
    Data,
    /// Metadata describing the payload (headers, timestamps)
    Meta,
}

impl ObjectKind {
    /// Directory under the store root holding objects of this kind
    pub fn dir_name(self) -> &'static str {
        match self {
            ObjectKind::Data => "data",
            ObjectKind::Meta => "meta",
        }
    }
}

/// Statistics about the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub limit: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hit_bytes, 0);
    }

    #[test]
    fn test_cache_stats_serialization() {
        let stats = CacheStats {
            entries: 3,
            total_size: 120,
            limit: 100,
            hits: 7,
            misses: 2,
            hit_bytes: 280,
        };

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"total_size\":120"));
        assert!(json.contains("\"hit_bytes\":280"));

        let deserialized: CacheStats = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.entries, 3);
        assert_eq!(deserialized.misses, 2);
    }

    #[test]
    fn test_object_kind_dirs() {
        assert_eq!(ObjectKind::Data.dir_name(), "data");
        assert_eq!(ObjectKind::Meta.dir_name(), "meta");
        assert_eq!(serde_json::to_string(&ObjectKind::Meta).unwrap(), "\"meta\"");
    }
}
