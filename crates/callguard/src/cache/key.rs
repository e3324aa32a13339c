//! Deterministic cache key fingerprints
//!
//! Each part is canonicalized as JSON with object keys sorted at every depth
//! (strings keep their quotes, so a `:` inside a part cannot be confused
//! with the separator), the parts are joined with `:`, and the result is
//! hashed with SHA-256. Equal logical arguments always produce the same
//! 64-character hex key.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

const SEPARATOR: &str = ":";

/// Fingerprint a list of request parameters
pub fn generate_key(parts: &[Value]) -> String {
    let canonical: Vec<String> = parts.iter().map(|part| sorted(part).to_string()).collect();
    let digest = Sha256::digest(canonical.join(SEPARATOR).as_bytes());
    hex::encode(digest)
}

/// Convert any serializable value into a key part.
///
/// Values that cannot be represented as JSON (for example maps with
/// non-string keys) become `null`.
pub fn key_part<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        debug!(error = %e, "cache key part is not representable as JSON");
        Value::Null
    })
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), sorted(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Build a cache key from any number of serializable parts
///
/// ```rust
/// let a = callguard::cache_key!("quote", "AAPL", 1);
/// let b = callguard::cache_key!("quote", "AAPL", 1);
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
#[macro_export]
macro_rules! cache_key {
    ($($part:expr),+ $(,)?) => {
        $crate::cache::generate_key(&[$($crate::cache::key_part(&$part)),+])
    };
}
