//! OPcache status snapshot as printed by `json_encode(opcache_get_status())`.
//!
//! Every struct defaults missing fields to zero and ignores unknown ones
//! (`scripts`, `jit`, `preload_statistics`, ...), so small differences between
//! PHP versions never turn into decode failures. A `null` reads as zero too.

use serde::{Deserialize, Deserializer, Serialize};

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// One poll of a target. An all-zero `StatusSnapshot::default()` stands in for
/// a failed poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSnapshot {
    #[serde(deserialize_with = "null_as_default")]
    pub opcache_enabled: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub cache_full: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub restart_pending: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub restart_in_progress: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub memory_usage: MemoryUsage,
    #[serde(deserialize_with = "null_as_default")]
    pub interned_strings_usage: InternedStringsUsage,
    #[serde(deserialize_with = "null_as_default")]
    pub opcache_statistics: Statistics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryUsage {
    #[serde(deserialize_with = "null_as_default")]
    pub used_memory: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub free_memory: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub wasted_memory: u64,
    /// Already scaled to 0..=100 by PHP.
    #[serde(deserialize_with = "null_as_default")]
    pub current_wasted_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InternedStringsUsage {
    #[serde(deserialize_with = "null_as_default")]
    pub buffer_size: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub used_memory: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub free_memory: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub number_of_strings: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    #[serde(deserialize_with = "null_as_default")]
    pub num_cached_scripts: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub num_cached_keys: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub max_cached_keys: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub hits: u64,
    /// Unix epoch seconds.
    #[serde(deserialize_with = "null_as_default")]
    pub start_time: i64,
    /// Unix epoch seconds, 0 if never restarted.
    #[serde(deserialize_with = "null_as_default")]
    pub last_restart_time: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub oom_restarts: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub hash_restarts: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub manual_restarts: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub misses: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub blacklist_misses: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub blacklist_miss_ratio: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub opcache_hit_rate: f64,
}

impl StatusSnapshot {
    /// Decodes a response body. Decoding is all-or-nothing; a bare `null`
    /// decodes to the zero snapshot.
    pub fn from_json(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice::<Option<Self>>(body).map(Option::unwrap_or_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHP_OUTPUT: &str = r#"{
        "opcache_enabled": true,
        "cache_full": false,
        "restart_pending": false,
        "restart_in_progress": false,
        "memory_usage": {
            "used_memory": 9538176,
            "free_memory": 124679552,
            "wasted_memory": 0,
            "current_wasted_percentage": 0
        },
        "interned_strings_usage": {
            "buffer_size": 8388608,
            "used_memory": 449864,
            "free_memory": 7938744,
            "number_of_strings": 5121
        },
        "opcache_statistics": {
            "num_cached_scripts": 12,
            "num_cached_keys": 14,
            "max_cached_keys": 16229,
            "hits": 327,
            "start_time": 1700000000,
            "last_restart_time": 0,
            "oom_restarts": 0,
            "hash_restarts": 0,
            "manual_restarts": 1,
            "misses": 13,
            "blacklist_misses": 0,
            "blacklist_miss_ratio": 0,
            "opcache_hit_rate": 96.17647058823529
        },
        "scripts": {"/var/www/index.php": {"hits": 3}},
        "jit": {"enabled": false}
    }"#;

    #[test]
    fn test_decode_php_output() {
        let status = StatusSnapshot::from_json(PHP_OUTPUT.as_bytes()).unwrap();

        assert!(status.opcache_enabled);
        assert!(!status.cache_full);
        assert_eq!(status.memory_usage.used_memory, 9538176);
        assert_eq!(status.memory_usage.current_wasted_percentage, 0.0);
        assert_eq!(status.interned_strings_usage.number_of_strings, 5121);
        assert_eq!(status.opcache_statistics.manual_restarts, 1);
        assert_eq!(status.opcache_statistics.start_time, 1700000000);
        assert!((status.opcache_statistics.opcache_hit_rate - 96.176).abs() < 0.001);
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let status =
            StatusSnapshot::from_json(br#"{"opcache_enabled": true, "memory_usage": {}}"#)
                .unwrap();

        assert!(status.opcache_enabled);
        assert_eq!(status.memory_usage, MemoryUsage::default());
        assert_eq!(status.opcache_statistics, Statistics::default());
    }

    #[test]
    fn test_null_values_read_as_zero() {
        let body = br#"{
            "opcache_enabled": true,
            "memory_usage": null,
            "opcache_statistics": {"hits": 5, "last_restart_time": null, "opcache_hit_rate": null}
        }"#;
        let status = StatusSnapshot::from_json(body).unwrap();

        assert!(status.opcache_enabled);
        assert_eq!(status.memory_usage, MemoryUsage::default());
        assert_eq!(status.opcache_statistics.hits, 5);
        assert_eq!(status.opcache_statistics.last_restart_time, 0);
        assert_eq!(status.opcache_statistics.opcache_hit_rate, 0.0);

        assert_eq!(
            StatusSnapshot::from_json(b"null").unwrap(),
            StatusSnapshot::default()
        );
    }

    #[test]
    fn test_non_object_payloads_fail() {
        // opcache_get_status() returns false when OPcache is disabled
        assert!(StatusSnapshot::from_json(b"false").is_err());
        assert!(StatusSnapshot::from_json(b"File not found.\n").is_err());
        assert!(StatusSnapshot::from_json(b"").is_err());
    }

    #[test]
    fn test_wrong_types_fail() {
        assert!(StatusSnapshot::from_json(br#"{"opcache_enabled": "yes"}"#).is_err());
    }
}
