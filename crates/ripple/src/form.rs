//! Value codecs for durably stored types.
//!
//! A `Form` molds a Rust value into a [`Value`] and casts it back. Every type
//! that goes through a persister needs one.

use crate::value::{Record, Value};
use std::collections::{BTreeMap, BTreeSet};

pub trait Form: Sized {
    fn mold(&self) -> Value;
    fn cast(value: &Value) -> Option<Self>;
}

impl Form for Value {
    fn mold(&self) -> Value {
        self.clone()
    }

    fn cast(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl Form for bool {
    fn mold(&self) -> Value {
        Value::Bool(*self)
    }

    fn cast(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl Form for f64 {
    fn mold(&self) -> Value {
        Value::number(*self)
    }

    fn cast(value: &Value) -> Option<Self> {
        value.as_number()
    }
}

/// Integers past this magnitude are not exact as `f64` and mold to text.
const MAX_EXACT: u64 = 1 << 53;

impl Form for i64 {
    fn mold(&self) -> Value {
        if self.unsigned_abs() <= MAX_EXACT {
            Value::number(*self as f64)
        } else {
            Value::text(self.to_string())
        }
    }

    fn cast(value: &Value) -> Option<Self> {
        if let Some(text) = value.as_text() {
            return text.parse().ok();
        }
        value
            .as_number()
            .filter(|n| n.fract() == 0.0)
            .map(|n| n as i64)
    }
}

impl Form for u64 {
    fn mold(&self) -> Value {
        if *self <= MAX_EXACT {
            Value::number(*self as f64)
        } else {
            Value::text(self.to_string())
        }
    }

    fn cast(value: &Value) -> Option<Self> {
        if let Some(text) = value.as_text() {
            return text.parse().ok();
        }
        value
            .as_number()
            .filter(|n| n.fract() == 0.0 && *n >= 0.0)
            .map(|n| n as u64)
    }
}

impl Form for String {
    fn mold(&self) -> Value {
        Value::text(self.as_str())
    }

    fn cast(value: &Value) -> Option<Self> {
        value.as_text().map(str::to_owned)
    }
}

/// `None` molds to `Absent`.
impl<T: Form> Form for Option<T> {
    fn mold(&self) -> Value {
        match self {
            Some(inner) => inner.mold(),
            None => Value::Absent,
        }
    }

    fn cast(value: &Value) -> Option<Self> {
        match value {
            Value::Absent => Some(None),
            other => T::cast(other).map(Some),
        }
    }
}

/// Sequences mold to records keyed by position.
impl<T: Form> Form for Vec<T> {
    fn mold(&self) -> Value {
        Value::record(
            self.iter()
                .enumerate()
                .map(|(index, item)| (Value::number(index as f64), item.mold())),
        )
    }

    fn cast(value: &Value) -> Option<Self> {
        match value {
            Value::Record(record) => record.values().map(T::cast).collect(),
            Value::Extant => Some(Vec::new()),
            _ => None,
        }
    }
}

impl<A: Form, B: Form> Form for (A, B) {
    fn mold(&self) -> Value {
        Value::record([("0", self.0.mold()), ("1", self.1.mold())])
    }

    fn cast(value: &Value) -> Option<Self> {
        let record = value.as_record()?;
        let a = A::cast(record.get(&"0".into()).unwrap_or(&Value::Absent))?;
        let b = B::cast(record.get(&"1".into()).unwrap_or(&Value::Absent))?;
        Some((a, b))
    }
}

impl<K: Form + Ord, V: Form> Form for BTreeMap<K, V> {
    fn mold(&self) -> Value {
        Value::Record(self.iter().map(|(k, v)| (k.mold(), v.mold())).collect::<Record>())
    }

    fn cast(value: &Value) -> Option<Self> {
        match value {
            Value::Record(record) => record
                .iter()
                .map(|(k, v)| Some((K::cast(k)?, V::cast(v)?)))
                .collect(),
            Value::Extant => Some(BTreeMap::new()),
            _ => None,
        }
    }
}

/// Sets mold to records whose fields are all `Extant`.
impl<T: Form + Ord> Form for BTreeSet<T> {
    fn mold(&self) -> Value {
        Value::Record(self.iter().map(|item| (item.mold(), Value::Extant)).collect::<Record>())
    }

    fn cast(value: &Value) -> Option<Self> {
        match value {
            Value::Record(record) => record.keys().map(T::cast).collect(),
            Value::Extant => Some(BTreeSet::new()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_uses_absent_for_none() {
        assert_eq!(None::<f64>.mold(), Value::Absent);
        assert_eq!(Option::<f64>::cast(&Value::Absent), Some(None));
        assert_eq!(Option::<f64>::cast(&Value::from(2)), Some(Some(2.0)));
    }

    #[test]
    fn large_integers_stay_exact() {
        for n in [u64::MAX, (1 << 53) + 1, 1 << 53, 7] {
            assert_eq!(u64::cast(&n.mold()), Some(n));
        }
        for n in [i64::MIN, i64::MAX, -(1 << 53) - 1, -3] {
            assert_eq!(i64::cast(&n.mold()), Some(n));
        }
        assert_eq!(7u64.mold(), Value::from(7));
    }

    #[test]
    fn sequence_keeps_order() {
        let items = vec![3.0, 1.0, 2.0];
        assert_eq!(Vec::<f64>::cast(&items.mold()), Some(items));
    }

    #[test]
    fn map_rejects_mistyped_entries() {
        let value = Value::record([(Value::from(1), Value::from("x"))]);
        assert_eq!(BTreeMap::<u64, f64>::cast(&value), None);
        assert_eq!(BTreeMap::<u64, String>::cast(&value).unwrap()[&1], "x");
    }
}
