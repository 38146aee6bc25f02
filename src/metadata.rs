//! Run Metadata - Versioned Key/Value Store
//!
//! Values are restricted to a closed set so downstream consumers never have
//! to deal with arbitrary payloads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const METADATA_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Int(i) => Some(*i as f64),
            MetaValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MetaValue]> {
        match self {
            MetaValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Image dimensions as a `[width, height]` list.
    pub fn size(width: u32, height: u32) -> Self {
        MetaValue::List(vec![width.into(), height.into()])
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<u32> for MetaValue {
    fn from(v: u32) -> Self {
        MetaValue::Int(i64::from(v))
    }
}

impl From<u64> for MetaValue {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(MetaValue::Float(v as f64), MetaValue::Int)
    }
}

impl From<usize> for MetaValue {
    fn from(v: usize) -> Self {
        MetaValue::from(v as u64)
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Text(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Text(v)
    }
}

impl<T: Into<MetaValue>> From<Option<T>> for MetaValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(MetaValue::Null, Into::into)
    }
}

impl<T: Into<MetaValue>> From<Vec<T>> for MetaValue {
    fn from(v: Vec<T>) -> Self {
        MetaValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<Metadata> for MetaValue {
    fn from(v: Metadata) -> Self {
        MetaValue::Map(v.entries)
    }
}

impl From<serde_json::Value> for MetaValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => MetaValue::Null,
            Value::Bool(b) => MetaValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => MetaValue::Int(i),
                None => MetaValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => MetaValue::Text(s),
            Value::Array(items) => MetaValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                MetaValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Ordered metadata map carried through a run and attached to results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(flatten)]
    entries: BTreeMap<String, MetaValue>,
}

fn default_schema_version() -> u32 {
    METADATA_SCHEMA_VERSION
}

impl Metadata {
    pub fn new() -> Self {
        Self {
            schema_version: METADATA_SCHEMA_VERSION,
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Store any serializable value, converted into the closed value set.
    pub fn insert_serialized<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.entries.insert(key.into(), value.into());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn extend(&mut self, other: Metadata) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetaValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}
