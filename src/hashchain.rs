//! Canonical serialization and SHA-256 hash chaining for settlement records.
//!
//! Each settlement record is hash-chained: the hash of the current record
//! includes the hash of the previous record, giving tamper evidence without
//! the coordination cost of a distributed ledger — altering record N
//! requires recomputing every record N..last.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Produce a deterministic JSON encoding of `value`: sorted object keys, no
/// whitespace, numbers serialized without lossy intermediate conversion.
///
/// Routes through `serde_json::Value` rather than serializing straight to a
/// writer so that object keys always come out lexicographically sorted —
/// `serde_json::Map`'s default (non-`preserve_order`) backing is a
/// `BTreeMap`, so `Value::Object` iterates in sorted order regardless of the
/// source struct's field order or a `HashMap`'s iteration order. Values the
/// serializer can't represent (NaN, infinite floats) surface as an error
/// here rather than silently coercing.
pub fn canonical<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let as_value = serde_json::to_value(value)?;
    serde_json::to_vec(&as_value)
}

/// SHA-256 digest over `(previous_hash || canonical(payload))`, with
/// `previous_hash` omitted from the input iff it is `None`. Returns 64
/// lowercase hex characters.
pub fn hash<T: Serialize>(
    payload: &T,
    previous_hash: Option<&str>,
) -> Result<String, serde_json::Error> {
    let body = canonical(payload)?;
    let mut hasher = Sha256::new();
    if let Some(prev) = previous_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(&body);
    Ok(hex::encode(hasher.finalize()))
}

/// Recompute the hash of `payload` chained to `previous_hash` and compare it
/// to `expected`.
pub fn verify<T: Serialize>(
    payload: &T,
    previous_hash: Option<&str>,
    expected: &str,
) -> Result<bool, serde_json::Error> {
    Ok(hash(payload, previous_hash)? == expected)
}
