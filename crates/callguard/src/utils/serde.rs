//! Serialization helpers for configuration and snapshot types
//!
//! Durations travel as integer milliseconds and byte budgets as (possibly
//! fractional) megabytes, matching how operators write them in config files.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serde serialization result type
type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

/// Bytes in one megabyte as used by the byte budget
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Serialize a `Duration` as milliseconds (u64)
///
/// # Usage
/// ```rust
/// use std::time::Duration;
///
/// use callguard::utils::duration_millis;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_millis")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::*;

    /// Serialize a Duration as milliseconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    /// Deserialize milliseconds (u64) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serialize a byte count as megabytes (f64)
pub mod megabytes {
    use super::*;

    /// Serialize bytes as megabytes
    pub fn serialize<S>(bytes: &usize, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_f64(*bytes as f64 / BYTES_PER_MB)
    }

    /// Deserialize megabytes into a byte count
    pub fn deserialize<'de, D>(deserializer: D) -> Result<usize, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mb = f64::deserialize(deserializer)?;
        if !mb.is_finite() || mb < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "megabytes must be a non-negative number, got {mb}"
            )));
        }
        Ok((mb * BYTES_PER_MB).round() as usize)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Limits {
        #[serde(with = "duration_millis")]
        ttl: Duration,
        #[serde(with = "megabytes")]
        max_size: usize,
    }

    #[test]
    fn test_serialize_units() {
        let limits = Limits { ttl: Duration::from_millis(1500), max_size: 2 * 1024 * 1024 };
        let json = serde_json::to_value(&limits).unwrap();
        assert_eq!(json["ttl"], 1500);
        assert_eq!(json["max_size"], 2.0);
    }

    #[test]
    fn test_fractional_megabytes() {
        let limits: Limits = serde_json::from_str(r#"{"ttl": 0, "max_size": 0.5}"#).unwrap();
        assert_eq!(limits.max_size, 512 * 1024);
        assert_eq!(limits.ttl, Duration::ZERO);
    }

    #[test]
    fn test_negative_megabytes_rejected() {
        let result: Result<Limits, _> = serde_json::from_str(r#"{"ttl": 10, "max_size": -1}"#);
        assert!(result.is_err());
    }
}
