//! Drift detection between an intent and the live object
//!
//! An object is up to date when every field the intent sets is present in the
//! live object with the same value. Fields only the live object has (status,
//! server defaults, other managers' fields) are ignored. The intent carries a
//! fingerprint annotation, so any change to the intent itself also shows up
//! as a mismatch.

use kube::api::DynamicObject;
use serde_json::Value;

use crate::Result;

/// Compact deterministic hash of a string (16 hex chars of SHA-256)
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Fingerprint of an object's canonical JSON form
///
/// `serde_json` maps are ordered, so equal objects give equal fingerprints.
pub fn fingerprint(object: &DynamicObject) -> Result<String> {
    let value = serde_json::to_value(object)?;
    Ok(deterministic_hash(&value.to_string()))
}

/// True when `live` already contains everything `desired` sets
pub fn is_up_to_date(desired: &DynamicObject, live: &DynamicObject) -> Result<bool> {
    let desired = serde_json::to_value(desired)?;
    let live = serde_json::to_value(live)?;
    Ok(is_subset(&desired, &live))
}

/// Structural subset check
///
/// Objects compare key by key, arrays element by element with equal length,
/// scalars by equality. A desired `null` or empty container matches an
/// absent live field.
pub fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(d), Value::Object(l)) => d.iter().all(|(k, dv)| match l.get(k) {
            Some(lv) => is_subset(dv, lv),
            None => is_vacant(dv),
        }),
        (Value::Array(d), Value::Array(l)) => {
            d.len() == l.len() && d.iter().zip(l).all(|(dv, lv)| is_subset(dv, lv))
        }
        (Value::Null, _) => true,
        (d, l) => d == l,
    }
}

fn is_vacant(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}
