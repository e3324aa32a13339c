//! Cache statistics

use serde::{Deserialize, Serialize};

/// Statistics for cache performance monitoring
///
/// `hits`, `misses` and `evictions` only grow;
/// `total_size_bytes` and `entry_count` track live contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_size_bytes: usize,
    pub entry_count: usize,
}

impl CacheStats {
    /// Calculate hit rate (hits / total lookups)
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_lookups();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Total number of lookups (hits + misses)
    pub fn total_lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);

        let stats = CacheStats { hits: 3, misses: 1, ..Default::default() };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(stats.total_lookups(), 4);
    }

    #[test]
    fn test_camel_case_fields() {
        let stats = CacheStats { total_size_bytes: 10, entry_count: 1, ..Default::default() };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["totalSizeBytes"], 10);
        assert_eq!(json["entryCount"], 1);
    }
}
