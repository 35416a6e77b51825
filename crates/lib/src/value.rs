//! Property values exchanged with providers and stored in state.
//!
//! Values are plain JSON. A [`PropertyMap`] keeps keys sorted so that state files
//! and plan output are stable across runs.

use std::collections::{BTreeMap, BTreeSet};

pub use serde_json::Value;

use crate::consts::SECRET_MASK;

/// Field name to value mapping for resource inputs and outputs.
pub type PropertyMap = BTreeMap<String, Value>;

/// Structural equality for a single field.
///
/// Objects compare key by key. Arrays compare positionally unless `as_set` is
/// true, in which case element order and duplicates are ignored.
pub fn values_equal(a: &Value, b: &Value, as_set: bool) -> bool {
  match (a, b) {
    (Value::Array(left), Value::Array(right)) if as_set => {
      let left: BTreeSet<String> = left.iter().map(canonical).collect();
      let right: BTreeSet<String> = right.iter().map(canonical).collect();
      left == right
    }
    (Value::Array(left), Value::Array(right)) => {
      left.len() == right.len() && left.iter().zip(right).all(|(l, r)| values_equal(l, r, false))
    }
    (Value::Object(left), Value::Object(right)) => {
      left.len() == right.len()
        && left
          .iter()
          .all(|(key, l)| right.get(key).is_some_and(|r| values_equal(l, r, false)))
    }
    (Value::Number(left), Value::Number(right)) => match (left.as_f64(), right.as_f64()) {
      (Some(l), Some(r)) => l == r,
      _ => left == right,
    },
    _ => a == b,
  }
}

/// Canonical text of a value, used as a set key.
///
/// `serde_json` objects without `preserve_order` are already key-sorted, so the
/// compact serialization is canonical.
fn canonical(value: &Value) -> String {
  match value {
    Value::Number(n) => match n.as_f64() {
      Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
      _ => n.to_string(),
    },
    other => other.to_string(),
  }
}

/// Render a value for humans, replacing it with a mask when secret.
pub fn display_value(value: &Value, secret: bool) -> String {
  if secret {
    return SECRET_MASK.to_string();
  }
  match value {
    Value::String(s) => format!("{:?}", s),
    other => other.to_string(),
  }
}

/// Copy of `map` with every field named in `secrets` masked.
pub fn mask_secrets(map: &PropertyMap, secrets: &BTreeSet<String>) -> PropertyMap {
  map
    .iter()
    .map(|(key, value)| {
      if secrets.contains(key) {
        (key.clone(), Value::String(SECRET_MASK.to_string()))
      } else {
        (key.clone(), value.clone())
      }
    })
    .collect()
}
