//! Stringly-typed metadata carried by requests, responses, chunks and metric events.
//!
//! Values are plain [`serde_json::Value`]s. The getters on [`MetadataExt`] never fail: a
//! missing key and a value of the wrong shape both come back as `None`, so callers can fall
//! back to their defaults.

use serde_json::{Map, Value};
use std::collections::HashMap;

pub type Metadata = HashMap<String, Value>;

/// Typed, forgiving accessors over [`Metadata`].
pub trait MetadataExt {
    fn get_value(&self, key: &str) -> Option<&Value>;

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_value(key).and_then(Value::as_bool)
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_value(key).and_then(|v| match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        })
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.get_i64(key).and_then(|v| u64::try_from(v).ok())
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        self.get_value(key).and_then(Value::as_f64)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.get_value(key).and_then(Value::as_str)
    }

    fn get_map(&self, key: &str) -> Option<&Map<String, Value>> {
        self.get_value(key).and_then(Value::as_object)
    }

    fn get_list(&self, key: &str) -> Option<&Vec<Value>> {
        self.get_value(key).and_then(Value::as_array)
    }
}

impl MetadataExt for Metadata {
    fn get_value(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

impl MetadataExt for Map<String, Value> {
    fn get_value(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}
