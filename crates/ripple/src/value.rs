//! Structured value carried by every outlet, conduit and persister.
//!
//! Values are totally ordered and hashable so they can key records,
//! keyed streams and sorted window accumulators.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use serde_json_any_key::any_key_map;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Nothing there: missing field, failed lookup, undefined arithmetic
    #[default]
    Absent,
    /// Present but carrying no data
    Extant,
    Bool(bool),
    Number(#[serde(with = "number_repr")] OrderedFloat<f64>),
    Text(Arc<str>),
    Record(Record),
}

/// Sorted map of fields. Keys are arbitrary values, usually text.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Record {
    #[serde(with = "any_key_map")]
    fields: BTreeMap<Value, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns the previous value of the field, if any.
    pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
        self.fields.insert(key, value)
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.fields.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.fields.iter()
    }
}

impl<K: Into<Value>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (Value, Value);
    type IntoIter = std::collections::btree_map::IntoIter<Value, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl Value {
    pub fn number(n: f64) -> Self {
        Value::Number(OrderedFloat(n))
    }

    pub fn text(s: impl Into<Arc<str>>) -> Self {
        Value::Text(s.into())
    }

    pub fn record<K: Into<Value>, V: Into<Value>>(fields: impl IntoIterator<Item = (K, V)>) -> Self {
        Value::Record(fields.into_iter().collect())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn is_defined(&self) -> bool {
        !self.is_absent()
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n.0),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Field lookup; anything that is not a record has no fields.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.as_record().and_then(|record| record.get(key))
    }

    /// Truthiness used by conditionals and boolean operators.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Absent => false,
            Value::Extant => true,
            Value::Bool(b) => *b,
            Value::Number(n) => n.0 != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Record(record) => !record.is_empty(),
        }
    }

    // ----- Operators -----

    pub fn plus(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Value::number(a.0 + b.0),
            (Value::Text(a), Value::Text(b)) => Value::text(format!("{a}{b}")),
            _ => Value::Absent,
        }
    }

    pub fn minus(&self, other: &Value) -> Value {
        self.numeric(other, |a, b| a - b)
    }

    pub fn times(&self, other: &Value) -> Value {
        self.numeric(other, |a, b| a * b)
    }

    pub fn divide(&self, other: &Value) -> Value {
        self.numeric(other, |a, b| a / b)
    }

    pub fn modulo(&self, other: &Value) -> Value {
        self.numeric(other, |a, b| a % b)
    }

    fn numeric(&self, other: &Value, op: impl Fn(f64, f64) -> f64) -> Value {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => match op(a, b) {
                n if n.is_finite() => Value::number(n),
                _ => Value::Absent,
            },
            _ => Value::Absent,
        }
    }

    pub fn negative(&self) -> Value {
        match self.as_number() {
            Some(n) => Value::number(-n),
            None => Value::Absent,
        }
    }

    pub fn positive(&self) -> Value {
        match self {
            Value::Number(_) => self.clone(),
            _ => Value::Absent,
        }
    }

    pub fn not(&self) -> Value {
        match self {
            Value::Absent => Value::Absent,
            other => Value::Bool(!other.is_truthy()),
        }
    }

    /// Comparison over the total order, absent if either side is absent.
    pub fn compare(&self, other: &Value, accept: impl Fn(std::cmp::Ordering) -> bool) -> Value {
        if self.is_absent() || other.is_absent() {
            return Value::Absent;
        }
        Value::Bool(accept(self.cmp(other)))
    }

    // ----- JSON bridge -----

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Extant,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Value::Absent, Value::number),
            serde_json::Value::String(s) => Value::text(s.as_str()),
            serde_json::Value::Array(items) => Value::record(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| (Value::number(index as f64), Value::from_json(item))),
            ),
            serde_json::Value::Object(fields) => Value::record(
                fields
                    .iter()
                    .map(|(key, value)| (Value::text(key.as_str()), Value::from_json(value))),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Value::Absent | Value::Extant => json!(null),
            Value::Bool(b) => json!(b),
            Value::Number(n) => json!(n.0),
            Value::Text(s) => json!(s.as_ref()),
            Value::Record(record) => serde_json::Value::Object(
                record
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Absent => write!(f, "absent"),
            Value::Extant => write!(f, "extant"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", n.0),
            Value::Text(s) => write!(f, "{s}"),
            Value::Record(record) => {
                write!(f, "{{")?;
                for (index, (key, value)) in record.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::text(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::text(s)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(record)
    }
}

/// JSON has no infinities or NaN; those are written as text.
mod number_repr {
    use ordered_float::OrderedFloat;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Finite(f64),
        NonFinite(String),
    }

    pub fn serialize<S: Serializer>(n: &OrderedFloat<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match n.0 {
            n if n.is_finite() => serializer.serialize_f64(n),
            n if n.is_nan() => serializer.serialize_str("NaN"),
            n if n > 0.0 => serializer.serialize_str("inf"),
            _ => serializer.serialize_str("-inf"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OrderedFloat<f64>, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Finite(n) => Ok(OrderedFloat(n)),
            Repr::NonFinite(text) => match text.as_str() {
                "NaN" => Ok(OrderedFloat(f64::NAN)),
                "inf" => Ok(OrderedFloat(f64::INFINITY)),
                "-inf" => Ok(OrderedFloat(f64::NEG_INFINITY)),
                other => Err(D::Error::custom(format!("not a number: {other:?}"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_on_mismatched_kinds_is_absent() {
        assert_eq!(Value::from(1).plus(&Value::from(2)), Value::from(3));
        assert_eq!(Value::from("a").plus(&Value::from("b")), Value::from("ab"));
        assert_eq!(Value::from(1).plus(&Value::from("b")), Value::Absent);
        assert_eq!(Value::from(7).modulo(&Value::from(4)), Value::from(3));
    }

    #[test]
    fn undefined_arithmetic_is_absent() {
        assert_eq!(Value::from(1).divide(&Value::from(0)), Value::Absent);
        assert_eq!(Value::from(0).divide(&Value::from(0)), Value::Absent);
        assert_eq!(Value::from(5).modulo(&Value::from(0)), Value::Absent);
        assert_eq!(Value::from(6).divide(&Value::from(4)), Value::from(1.5));
    }

    #[test]
    fn non_finite_numbers_survive_serde() {
        for n in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN, 2.5] {
            let value = Value::record([("n", Value::number(n))]);
            let json = serde_json::to_string(&value).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn comparison_with_absent_is_absent() {
        let lt = |o: std::cmp::Ordering| o.is_lt();
        assert_eq!(Value::from(1).compare(&Value::from(2), lt), Value::Bool(true));
        assert_eq!(Value::Absent.compare(&Value::from(2), lt), Value::Absent);
    }

    #[test]
    fn record_with_numeric_keys_survives_json() {
        let record = Value::record([(Value::from(1), Value::from("one")), (Value::from("k"), Value::Extant)]);
        let json = serde_json::to_string(&record).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn json_bridge() {
        let json = serde_json::json!({"a": 1, "b": "x", "c": [true]});
        let value = Value::from_json(&json);
        assert_eq!(value.get(&"a".into()), Some(&Value::from(1)));
        let c = value.get(&"c".into()).unwrap();
        assert_eq!(c.get(&Value::from(0)), Some(&Value::Bool(true)));
    }
}
