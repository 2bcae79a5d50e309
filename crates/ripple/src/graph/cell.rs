use super::Graph;
use super::node::KeyEffect;
use crate::arena::SlotId;
use crate::value::{Record, Value};
use std::rc::Rc;

static ABSENT: Value = Value::Absent;

/// Kind-specific behavior of a graph node.
///
/// The graph owns coherence bookkeeping; a cell only computes values from
/// inputs that are already coherent for the current version.
pub trait Cell {
    fn kind(&self) -> &'static str;

    /// Number of inlets.
    fn arity(&self) -> usize {
        0
    }

    /// Recompute the whole value.
    fn evaluate(&mut self, inputs: &Inputs<'_>, current: &Value) -> Value;

    /// Map inlets receive per-key effects from map-valued inputs instead of
    /// whole-value staleness.
    fn is_map_inlet(&self) -> bool {
        false
    }

    /// Recompute one key of a map-valued cell; `None` removes the key.
    fn evaluate_key(
        &mut self,
        key: &Value,
        effect: KeyEffect,
        _inputs: &Inputs<'_>,
        current: &Value,
    ) -> Option<Value> {
        match effect {
            KeyEffect::Update => current.get(key).cloned(),
            KeyEffect::Remove => None,
        }
    }
}

/// Read access to the values bound to a node's inlets.
pub struct Inputs<'a> {
    pub(super) graph: &'a Graph,
    pub(super) ports: &'a [Option<SlotId>],
}

impl<'a> Inputs<'a> {
    /// Value of the outlet bound to `port`, absent when unbound.
    pub fn get(&self, port: usize) -> &'a Value {
        self.ports
            .get(port)
            .copied()
            .flatten()
            .and_then(|slot| self.graph.value(slot))
            .unwrap_or(&ABSENT)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Value> + '_ {
        (0..self.ports.len()).map(|port| self.get(port))
    }
}

/// Externally driven value; recomputation keeps whatever was set.
pub struct SourceCell;

impl Cell for SourceCell {
    fn kind(&self) -> &'static str {
        "source"
    }

    fn evaluate(&mut self, _inputs: &Inputs<'_>, current: &Value) -> Value {
        current.clone()
    }
}

/// Externally driven record whose fields are updated key by key.
pub struct RecordCell;

impl Cell for RecordCell {
    fn kind(&self) -> &'static str {
        "record"
    }

    fn evaluate(&mut self, _inputs: &Inputs<'_>, current: &Value) -> Value {
        match current {
            Value::Record(_) => current.clone(),
            _ => Value::Record(Record::new()),
        }
    }
}

/// Proxy projecting one key of a map-valued outlet.
pub struct KeyCell {
    pub key: Value,
}

impl Cell for KeyCell {
    fn kind(&self) -> &'static str {
        "key"
    }

    fn evaluate(&mut self, inputs: &Inputs<'_>, _current: &Value) -> Value {
        inputs.get(0).get(&self.key).cloned().unwrap_or_default()
    }
}

/// Map-to-map transform applied field by field, so an update to one key of
/// the input recomputes only that key.
pub struct MapValuesCell {
    transform: Rc<dyn Fn(&Value, &Value) -> Value>,
}

impl MapValuesCell {
    pub fn new(transform: impl Fn(&Value, &Value) -> Value + 'static) -> Self {
        Self {
            transform: Rc::new(transform),
        }
    }
}

impl Cell for MapValuesCell {
    fn kind(&self) -> &'static str {
        "map_values"
    }

    fn arity(&self) -> usize {
        1
    }

    fn is_map_inlet(&self) -> bool {
        true
    }

    fn evaluate(&mut self, inputs: &Inputs<'_>, _current: &Value) -> Value {
        match inputs.get(0) {
            Value::Record(record) => Value::Record(
                record
                    .iter()
                    .map(|(key, value)| (key.clone(), (self.transform)(key, value)))
                    .collect(),
            ),
            _ => Value::Record(Record::new()),
        }
    }

    fn evaluate_key(
        &mut self,
        key: &Value,
        effect: KeyEffect,
        inputs: &Inputs<'_>,
        _current: &Value,
    ) -> Option<Value> {
        match effect {
            KeyEffect::Remove => None,
            KeyEffect::Update => inputs
                .get(0)
                .get(key)
                .map(|value| (self.transform)(key, value)),
        }
    }
}

/// Unary function of one input.
pub struct MapCell {
    transform: Rc<dyn Fn(&Value) -> Value>,
}

impl MapCell {
    pub fn new(transform: impl Fn(&Value) -> Value + 'static) -> Self {
        Self {
            transform: Rc::new(transform),
        }
    }
}

impl Cell for MapCell {
    fn kind(&self) -> &'static str {
        "map"
    }

    fn arity(&self) -> usize {
        1
    }

    fn evaluate(&mut self, inputs: &Inputs<'_>, _current: &Value) -> Value {
        (self.transform)(inputs.get(0))
    }
}
