//! Owned, bus-independent copy of the loosely typed values found in MPRIS
//! property maps.
//!
//! Players disagree on the shapes they send (`xesam:artist` as a string or a
//! list, `xesam:album` as a list, lengths as signed or unsigned integers), so
//! everything is first lowered into [`RawValue`] and interpreted later by the
//! normalizer.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use zvariant::{OwnedValue, Value};

/// Attribute bag as published under the `Metadata` property.
pub type RawMetadata = HashMap<String, RawValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<RawValue>),
    Map(BTreeMap<String, RawValue>),
}

impl RawValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawValue::Int(i) => Some(*i),
            RawValue::Float(f) if f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Int(i) => Some(*i as f64),
            RawValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RawValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Every string element of a list, or `None` if this is not a list.
    pub fn as_str_list(&self) -> Option<Vec<String>> {
        match self {
            RawValue::List(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl From<&Value<'_>> for RawValue {
    fn from(value: &Value<'_>) -> Self {
        match value {
            Value::U8(v) => RawValue::Int(i64::from(*v)),
            Value::Bool(v) => RawValue::Bool(*v),
            Value::I16(v) => RawValue::Int(i64::from(*v)),
            Value::U16(v) => RawValue::Int(i64::from(*v)),
            Value::I32(v) => RawValue::Int(i64::from(*v)),
            Value::U32(v) => RawValue::Int(i64::from(*v)),
            Value::I64(v) => RawValue::Int(*v),
            Value::U64(v) => RawValue::Int(i64::try_from(*v).unwrap_or(i64::MAX)),
            Value::F64(v) => RawValue::Float(*v),
            Value::Str(v) => RawValue::Str(v.to_string()),
            Value::Signature(s) => RawValue::Str(s.to_string()),
            Value::ObjectPath(o) => RawValue::Str(o.as_str().to_string()),
            Value::Value(v) => RawValue::from(&**v),
            Value::Array(a) => RawValue::List(a.iter().map(RawValue::from).collect()),
            Value::Dict(d) => RawValue::Map(
                d.iter()
                    .map(|(k, v)| (key_string(k), RawValue::from(v)))
                    .collect(),
            ),
            Value::Structure(s) => RawValue::List(s.fields().iter().map(RawValue::from).collect()),
            other => RawValue::Str(format!("{other:?}")),
        }
    }
}

impl From<&OwnedValue> for RawValue {
    fn from(value: &OwnedValue) -> Self {
        RawValue::from(&**value)
    }
}

fn key_string(key: &Value<'_>) -> String {
    match RawValue::from(key) {
        RawValue::Str(s) => s,
        other => serde_json::to_string(&other).unwrap_or_default(),
    }
}

/// Lower an `a{sv}` map into a [`RawMetadata`].
pub fn raw_metadata(map: &HashMap<String, OwnedValue>) -> RawMetadata {
    map.iter()
        .map(|(k, v)| (k.clone(), RawValue::from(v)))
        .collect()
}
