use super::cell::Cell;
use crate::arena::SlotId;
use crate::value::Value;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Monotonically increasing stamp of one recomputation pass.
pub type Version = u64;

/// Why one key of a map-valued outlet is stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyEffect {
    Update,
    Remove,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coherence {
    Coherent(Version),
    Decoherent,
}

/// One input port of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InletRef {
    pub node: SlotId,
    pub port: u8,
}

impl InletRef {
    pub fn new(node: SlotId, port: u8) -> Self {
        Self { node, port }
    }
}

/// A reactive cell in the graph: an outlet with its own inlets.
pub(crate) struct Node {
    /// Taken out while the cell evaluates against the rest of the graph.
    pub cell: Option<Box<dyn Cell>>,
    pub kind: &'static str,
    pub map_inlet: bool,
    pub coherence: Coherence,
    /// Stale as a whole, not just some keys.
    pub whole: bool,
    pub value: Value,
    /// Each inlet is bound to at most one outlet.
    pub inputs: SmallVec<[Option<SlotId>; 2]>,
    /// Bound downstream inlets, in bind order.
    pub outputs: SmallVec<[InletRef; 2]>,
    /// Pending key effects of a map-valued node.
    pub effects: BTreeMap<Value, KeyEffect>,
    /// Lazily materialized per-key proxies.
    pub key_outlets: BTreeMap<Value, SlotId>,
    /// Set on key proxies: the map outlet and key they project.
    pub key_of: Option<(SlotId, Value)>,
    pub owner: Option<SlotId>,
    pub children: Vec<SlotId>,
    pub evaluations: u64,
}

impl Node {
    pub fn new(cell: Box<dyn Cell>) -> Self {
        let arity = cell.arity();
        Self {
            kind: cell.kind(),
            map_inlet: cell.is_map_inlet(),
            cell: Some(cell),
            coherence: Coherence::Decoherent,
            whole: true,
            value: Value::Absent,
            inputs: SmallVec::from_elem(None, arity),
            outputs: SmallVec::new(),
            effects: BTreeMap::new(),
            key_outlets: BTreeMap::new(),
            key_of: None,
            owner: None,
            children: Vec::new(),
            evaluations: 0,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.coherence == Coherence::Decoherent
    }
}
