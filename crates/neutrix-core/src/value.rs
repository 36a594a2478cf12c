//! The state tree value type.
//!
//! [`Value`] mirrors the JSON data model, but its containers are persistent
//! collections from the `im` crate: `List` is an [`im::Vector`] and `Map` is
//! an [`im::OrdMap`]. Cloning a `Value` is O(1) and an update along one path
//! copies only the nodes on that path, leaving every other branch shared with
//! the previous snapshot.
//!
//! # Invariants
//!
//! 1. A `Value` is a finite tree. Owned persistent containers cannot alias,
//!    so reference cycles are unrepresentable.
//! 2. Conversion to and from [`serde_json::Value`] is lossless, except that
//!    non-finite floats become `Null` (as in `serde_json`).
//! 3. Equality is structural.

use std::fmt;

use im::{OrdMap, Vector};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Number;

use crate::path::is_reserved_key;

/// Maximum nesting depth accepted for a value installed into a store.
///
/// A payload that builds itself recursively never terminates in an owned
/// tree; it shows up as unbounded nesting instead, which the store rejects
/// once this bound is crossed.
pub const MAX_DEPTH: usize = 256;

/// A node of the state tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vector<Value>),
    Map(OrdMap<String, Value>),
}

impl Value {
    /// An empty map, the usual root of a state tree.
    #[must_use]
    pub fn map() -> Self {
        Value::Map(OrdMap::new())
    }

    /// An empty list.
    #[must_use]
    pub fn list() -> Self {
        Value::List(Vector::new())
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&Vector<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&OrdMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a single child: a map key, or a list index written in decimal.
    #[must_use]
    pub fn child(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            Value::List(items) => crate::path::as_index(key).and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Whether this value is a map or a list.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Map(_) | Value::List(_))
    }

    /// True when the tree nests more than `limit` containers deep.
    ///
    /// Recursion stops as soon as the limit is crossed, so the walk itself is
    /// bounded by `limit` regardless of how deep the value really is.
    #[must_use]
    pub fn exceeds_depth(&self, limit: usize) -> bool {
        fn walk(value: &Value, remaining: usize) -> bool {
            match value {
                Value::List(items) => {
                    remaining == 0 || items.iter().any(|child| walk(child, remaining - 1))
                }
                Value::Map(map) => {
                    remaining == 0 || map.values().any(|child| walk(child, remaining - 1))
                }
                _ => false,
            }
        }
        walk(self, limit)
    }

    /// First map key anywhere in the tree that is a reserved key
    /// (`__proto__`, `constructor`, `prototype`).
    #[must_use]
    pub fn reserved_key(&self) -> Option<&str> {
        match self {
            Value::Map(map) => map.iter().find_map(|(key, child)| {
                if is_reserved_key(key) {
                    Some(key.as_str())
                } else {
                    child.reserved_key()
                }
            }),
            Value::List(items) => items.iter().find_map(Value::reserved_key),
            _ => None,
        }
    }

    /// Convert into a `serde_json::Value`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        value.to_json()
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        value.to_json()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Value::Number(Number::from(n))
                }
            }
        )*
    };
}

from_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::from(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Serde
// ---------------------------------------------------------------------------

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => serializer.collect_seq(items.iter()),
            Value::Map(map) => serializer.collect_map(map.iter()),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_conversion_is_lossless() {
        let source = json!({
            "count": 3,
            "ratio": 0.5,
            "name": "cart",
            "tags": ["a", "b"],
            "nested": {"flag": true, "none": null}
        });
        let value = Value::from(source.clone());
        assert_eq!(value.to_json(), source);
    }

    #[test]
    fn serde_round_trip_through_string() {
        let value = Value::from(json!({"items": [1, 2, {"x": "y"}]}));
        let text = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn non_finite_float_becomes_null() {
        assert_eq!(Value::from(f64::NAN), Value::Null);
        assert_eq!(Value::from(1.5_f64).as_f64(), Some(1.5));
    }

    #[test]
    fn child_reads_map_keys_and_list_indices() {
        let value = Value::from(json!({"list": [10, 20]}));
        let list = value.child("list").unwrap();
        assert_eq!(list.child("1").and_then(Value::as_i64), Some(20));
        assert!(list.child("2").is_none());
        assert!(list.child("x").is_none());
        assert!(Value::from(5).child("a").is_none());
    }

    #[test]
    fn depth_limit() {
        let shallow = Value::from(json!({"a": {"b": 1}}));
        assert!(!shallow.exceeds_depth(2));
        assert!(shallow.exceeds_depth(1));
        assert!(!Value::from(1).exceeds_depth(0));

        let mut deep = Value::from(0);
        for _ in 0..10 {
            deep = Value::from(vec![deep]);
        }
        assert!(deep.exceeds_depth(9));
        assert!(!deep.exceeds_depth(10));
    }

    #[test]
    fn reserved_keys_are_found_at_any_depth() {
        let clean = Value::from(json!({"user": {"name": "x"}}));
        assert_eq!(clean.reserved_key(), None);

        let polluted = Value::from(json!({"user": [{"__proto__": {"admin": true}}]}));
        assert_eq!(polluted.reserved_key(), Some("__proto__"));

        let ctor = Value::from(json!({"constructor": 1}));
        assert_eq!(ctor.reserved_key(), Some("constructor"));
    }

    #[test]
    fn display_is_json() {
        let value = Value::from(json!({"a": [1, "b"]}));
        assert_eq!(value.to_string(), r#"{"a":[1,"b"]}"#);
    }

    #[test]
    fn from_iterator_builds_map() {
        let value: Value = [("a", 1), ("b", 2)].into_iter().collect();
        assert_eq!(value.child("b").and_then(Value::as_i64), Some(2));
    }

    #[test]
    fn clones_share_structure() {
        let value = Value::from(json!({"a": {"big": [1, 2, 3]}}));
        let copy = value.clone();
        assert_eq!(copy, value);
        if let (Value::Map(a), Value::Map(b)) = (&value, &copy) {
            assert!(a.ptr_eq(b));
        } else {
            panic!("expected maps");
        }
    }
}
