//! Records bound to the coherence protocol.
//!
//! A [`RecordOutlet`] is a map-valued graph node whose fields are updated one
//! key at a time; every field can be observed through its own key outlet.
//! A [`RecordScope`] is a record used as the scope of compiled expressions.

use crate::arena::SlotId;
use crate::expression::{CompileError, Expr, Functions, compile};
use crate::graph::{Graph, RecordCell, Version};
use crate::value::{Record, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordOutlet {
    id: SlotId,
}

impl RecordOutlet {
    pub fn new(graph: &mut Graph, record: Record) -> Self {
        let id = graph.insert(RecordCell);
        for (key, value) in record {
            graph.set_key(id, key, value);
        }
        Self { id }
    }

    /// Wrap an existing map-valued node.
    pub fn from_id(id: SlotId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn get<'g>(&self, graph: &'g Graph, key: &Value) -> Option<&'g Value> {
        graph.value(self.id).and_then(|value| value.get(key))
    }

    pub fn keys(&self, graph: &Graph) -> Vec<Value> {
        graph
            .value(self.id)
            .and_then(Value::as_record)
            .map(|record| record.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set(&self, graph: &mut Graph, key: impl Into<Value>, value: impl Into<Value>) {
        graph.set_key(self.id, key.into(), value.into());
    }

    pub fn remove(&self, graph: &mut Graph, key: impl Into<Value>) {
        graph.remove_key(self.id, key.into());
    }

    /// Outlet of one field, materialized on first access.
    pub fn outlet(&self, graph: &mut Graph, key: impl Into<Value>) -> Option<SlotId> {
        graph.key_outlet(self.id, key.into())
    }

    /// Drain pending field effects and push the new version downstream.
    pub fn recohere(&self, graph: &mut Graph, version: Version) {
        graph.recohere(self.id, version);
    }
}

/// A record acting as the variable scope of compiled expressions.
pub struct RecordScope {
    outlet: RecordOutlet,
    functions: Functions,
}

impl RecordScope {
    pub fn new(graph: &mut Graph, record: Record) -> Self {
        Self::with_functions(graph, record, Functions::default())
    }

    pub fn with_functions(graph: &mut Graph, record: Record, functions: Functions) -> Self {
        Self {
            outlet: RecordOutlet::new(graph, record),
            functions,
        }
    }

    pub fn outlet(&self) -> RecordOutlet {
        self.outlet
    }

    pub fn functions(&self) -> &Functions {
        &self.functions
    }

    /// Compile `expr` against this scope. The compiled nodes are owned by
    /// the returned root, so disposing the root tears them all down.
    pub fn compile(&self, graph: &mut Graph, expr: &Expr) -> Result<SlotId, CompileError> {
        compile(graph, expr, self.outlet.id(), &self.functions)
    }

    pub fn set(&self, graph: &mut Graph, key: impl Into<Value>, value: impl Into<Value>) {
        self.outlet.set(graph, key, value);
    }

    pub fn remove(&self, graph: &mut Graph, key: impl Into<Value>) {
        self.outlet.remove(graph, key);
    }

    /// Start a new version and propagate every pending field change.
    pub fn commit(&self, graph: &mut Graph) -> Version {
        let version = graph.next_version();
        self.outlet.recohere(graph, version);
        version
    }
}
