//! Outlet graph with eager decoherence and lazy, version-deduplicated
//! recoherence.
//!
//! `decohere` marks a node stale and fans the staleness out to every bound
//! downstream inlet without computing anything. `recohere(version)` pulls
//! upstream inputs coherent first, evaluates the node once, then pushes the
//! same version downstream. A node that is already coherent ignores further
//! `recohere` calls, so a shared ancestor in a diamond is evaluated once per
//! pass no matter how many paths reach it.
//!
//! Map-valued nodes additionally track staleness per key. A key that is
//! accessed before anything produced it gets a proxy node (see
//! [`Graph::key_outlet`]) wired into the same fan-out.

mod cell;
mod node;

pub use cell::{Cell, Inputs, KeyCell, MapCell, MapValuesCell, RecordCell, SourceCell};
pub use node::{Coherence, InletRef, KeyEffect, Version};

use crate::arena::{Arena, SlotId};
use crate::value::{Record, Value};
use node::Node;
use rustc_hash::FxHashSet;
use smallvec::{SmallVec, smallvec};

#[derive(Default)]
pub struct Graph {
    nodes: Arena<Node>,
    version: Version,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new, decoherent node with unbound inlets.
    pub fn insert(&mut self, cell: impl Cell + 'static) -> SlotId {
        let id = self.nodes.insert(Node::new(Box::new(cell)));
        log::trace!("graph: insert {:?}", id);
        id
    }

    /// Insert an externally driven node holding `value`.
    pub fn source(&mut self, value: Value) -> SlotId {
        let id = self.insert(SourceCell);
        if let Some(node) = self.nodes.get_mut(id) {
            node.value = value;
        }
        id
    }

    /// Start a new recomputation pass.
    pub fn next_version(&mut self) -> Version {
        self.version += 1;
        self.version
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.nodes.contains(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Cached value; may be stale, see [`Graph::coherence`].
    pub fn value(&self, id: SlotId) -> Option<&Value> {
        self.nodes.get(id).map(|node| &node.value)
    }

    pub fn coherence(&self, id: SlotId) -> Option<Coherence> {
        self.nodes.get(id).map(|node| node.coherence)
    }

    pub fn is_coherent(&self, id: SlotId) -> bool {
        matches!(self.coherence(id), Some(Coherence::Coherent(_)))
    }

    pub fn kind(&self, id: SlotId) -> Option<&'static str> {
        self.nodes.get(id).map(|node| node.kind)
    }

    /// How many times the node's cell has recomputed its whole value.
    pub fn evaluations(&self, id: SlotId) -> u64 {
        self.nodes.get(id).map_or(0, |node| node.evaluations)
    }

    /// The outlet bound to an inlet, if any.
    pub fn input(&self, inlet: InletRef) -> Option<SlotId> {
        self.nodes
            .get(inlet.node)
            .and_then(|node| node.inputs.get(inlet.port as usize).copied().flatten())
    }

    /// Downstream inlets of an outlet in bind order.
    pub fn outputs(&self, id: SlotId) -> &[InletRef] {
        self.nodes.get(id).map_or(&[], |node| node.outputs.as_slice())
    }

    /// Keys with pending effects on a map-valued node.
    pub fn pending_keys(&self, id: SlotId) -> Vec<Value> {
        self.nodes
            .get(id)
            .map(|node| node.effects.keys().cloned().collect())
            .unwrap_or_default()
    }

    // ----- Binding -----

    /// Bind `inlet` to `outlet`, unbinding any previous outlet first.
    pub fn bind(&mut self, inlet: InletRef, outlet: SlotId) {
        if !self.nodes.contains(outlet) {
            return;
        }
        let Some(node) = self.nodes.get(inlet.node) else {
            return;
        };
        let port = inlet.port as usize;
        if port >= node.inputs.len() {
            log::warn!("graph: {:?} has no inlet {}", inlet.node, inlet.port);
            return;
        }
        if node.inputs[port] == Some(outlet) {
            return;
        }
        self.unbind(inlet);
        if let Some(node) = self.nodes.get_mut(inlet.node) {
            node.inputs[port] = Some(outlet);
        }
        if let Some(source) = self.nodes.get_mut(outlet) {
            source.outputs.push(inlet);
        }
        self.decohere(inlet.node);
    }

    /// Detach `inlet` from its outlet; the outlet's remaining outputs keep their order.
    pub fn unbind(&mut self, inlet: InletRef) {
        let Some(previous) = self.input(inlet) else {
            return;
        };
        if let Some(node) = self.nodes.get_mut(inlet.node) {
            node.inputs[inlet.port as usize] = None;
        }
        if let Some(source) = self.nodes.get_mut(previous) {
            source.outputs.retain(|output| *output != inlet);
        }
        self.decohere(inlet.node);
    }

    /// Record `child` as owned by `owner`, so disposing the owner disposes the child.
    /// An edge that would make `child` own one of its own owners is refused.
    pub fn adopt(&mut self, owner: SlotId, child: SlotId) {
        if owner == child || !self.nodes.contains(owner) {
            return;
        }
        if self.owns(child, owner) {
            log::warn!("graph: {child:?} already owns {owner:?}, not adopting");
            return;
        }
        let Some(node) = self.nodes.get_mut(child) else {
            return;
        };
        let previous = node.owner.replace(owner);
        if let Some(previous) = previous.and_then(|previous| self.nodes.get_mut(previous)) {
            previous.children.retain(|c| *c != child);
        }
        if let Some(owner) = self.nodes.get_mut(owner) {
            owner.children.push(child);
        }
    }

    /// Detach `child` from its owner; it is then freed only by disposing it.
    pub fn disown(&mut self, child: SlotId) {
        let Some(owner) = self.nodes.get_mut(child).and_then(|node| node.owner.take()) else {
            return;
        };
        if let Some(owner) = self.nodes.get_mut(owner) {
            owner.children.retain(|c| *c != child);
        }
    }

    pub fn owner(&self, id: SlotId) -> Option<SlotId> {
        self.nodes.get(id).and_then(|node| node.owner)
    }

    /// Whether `ancestor` is on the owner chain of `id`.
    pub fn owns(&self, ancestor: SlotId, id: SlotId) -> bool {
        let mut current = self.owner(id);
        for _ in 0..self.nodes.len() {
            match current {
                Some(owner) if owner == ancestor => return true,
                Some(owner) => current = self.owner(owner),
                None => return false,
            }
        }
        false
    }

    /// The proxy outlet projecting `key` of the map-valued node `map`,
    /// created on first access.
    pub fn key_outlet(&mut self, map: SlotId, key: Value) -> Option<SlotId> {
        let node = self.nodes.get(map)?;
        if let Some(existing) = node.key_outlets.get(&key) {
            return Some(*existing);
        }
        let id = self.insert(KeyCell { key: key.clone() });
        if let Some(proxy) = self.nodes.get_mut(id) {
            proxy.key_of = Some((map, key.clone()));
        }
        if let Some(node) = self.nodes.get_mut(map) {
            node.key_outlets.insert(key, id);
        }
        self.adopt(map, id);
        Some(id)
    }

    // ----- Sources -----

    /// Replace a node's value and decohere it.
    pub fn set_value(&mut self, id: SlotId, value: Value) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.value = value;
            node.whole = false;
        }
        self.decohere(id);
    }

    /// Update one field of a map-valued node and decohere that key.
    pub fn set_key(&mut self, id: SlotId, key: Value, value: Value) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        record_mut(&mut node.value).insert(key.clone(), value);
        self.decohere_key(id, key, KeyEffect::Update);
    }

    pub fn remove_key(&mut self, id: SlotId, key: Value) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        if record_mut(&mut node.value).remove(&key).is_some() {
            self.decohere_key(id, key, KeyEffect::Remove);
        }
    }

    // ----- Coherence protocol -----

    /// Mark the whole value stale and fan out to every downstream inlet.
    /// Idempotent while already stale.
    pub fn decohere(&mut self, id: SlotId) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        if node.is_stale() && node.whole {
            return;
        }
        node.coherence = Coherence::Decoherent;
        node.whole = true;
        let outputs: SmallVec<[InletRef; 4]> = node.outputs.iter().copied().collect();
        let proxies: SmallVec<[SlotId; 4]> = node.key_outlets.values().copied().collect();
        for output in outputs {
            self.decohere(output.node);
        }
        for proxy in proxies {
            self.decohere(proxy);
        }
    }

    /// Mark one key of a map-valued node stale. Map inlets downstream receive
    /// the key effect, other inlets see whole-value staleness.
    pub fn decohere_key(&mut self, id: SlotId, key: Value, effect: KeyEffect) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        if node.effects.get(&key) == Some(&effect) {
            return;
        }
        node.effects.insert(key.clone(), effect);
        node.coherence = Coherence::Decoherent;
        let outputs: SmallVec<[InletRef; 4]> = node.outputs.iter().copied().collect();
        let proxy = node.key_outlets.get(&key).copied();
        for output in outputs {
            let map_inlet = self.nodes.get(output.node).is_some_and(|n| n.map_inlet);
            if map_inlet {
                self.decohere_key(output.node, key.clone(), effect);
            } else {
                self.decohere(output.node);
            }
        }
        if let Some(proxy) = proxy {
            self.decohere(proxy);
        }
    }

    /// Make a node coherent for `version`: drain pending key effects,
    /// recompute once if stale as a whole, then push downstream.
    /// Does nothing if the node is already coherent.
    pub fn recohere(&mut self, id: SlotId, version: Version) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if !node.is_stale() {
            return;
        }
        self.pull_upstream(id, None, version);
        // Pulling upstream may have pushed this very node coherent already.
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if !node.is_stale() {
            return;
        }
        let keys: Vec<Value> = node.effects.keys().cloned().collect();
        for key in keys {
            self.recohere_key(id, &key, version);
        }
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        if !node.is_stale() {
            return;
        }
        node.coherence = Coherence::Coherent(version);
        if node.whole {
            node.whole = false;
            self.evaluate(id);
        }
        log::trace!("graph: recohere {:?} at v{}", id, version);
        let outputs: SmallVec<[InletRef; 4]> = self.outputs(id).iter().copied().collect();
        for output in outputs {
            self.recohere(output.node, version);
        }
        let proxies: SmallVec<[SlotId; 4]> = self
            .nodes
            .get(id)
            .map(|node| node.key_outlets.values().copied().collect())
            .unwrap_or_default();
        for proxy in proxies {
            self.recohere(proxy, version);
        }
    }

    /// Make one key of a map-valued node coherent for `version`.
    pub fn recohere_key(&mut self, id: SlotId, key: &Value, version: Version) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if !node.is_stale() || !node.effects.contains_key(key) {
            return;
        }
        self.pull_upstream(id, Some(key), version);
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let Some(effect) = node.effects.remove(key) else {
            return;
        };
        self.evaluate_key(id, key, effect);

        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let outputs: SmallVec<[InletRef; 4]> = node.outputs.iter().copied().collect();
        let proxy = node.key_outlets.get(key).copied();
        for output in outputs {
            if self.nodes.get(output.node).is_some_and(|n| n.map_inlet) {
                self.recohere_key(output.node, key, version);
            }
        }
        if let Some(proxy) = proxy {
            self.recohere(proxy, version);
        }
    }

    fn pull_upstream(&mut self, id: SlotId, key: Option<&Value>, version: Version) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if let Some((map, projected)) = node.key_of.clone() {
            self.recohere_key(map, &projected, version);
            return;
        }
        let map_inlet = node.map_inlet;
        let inputs: SmallVec<[SlotId; 4]> = node.inputs.iter().flatten().copied().collect();
        for input in inputs {
            match key {
                Some(key) if map_inlet => self.recohere_key(input, key, version),
                _ => self.recohere(input, version),
            }
        }
    }

    fn ports(&self, id: SlotId) -> SmallVec<[Option<SlotId>; 2]> {
        match self.nodes.get(id) {
            Some(node) => match &node.key_of {
                Some((map, _)) => smallvec![Some(*map)],
                None => node.inputs.clone(),
            },
            None => SmallVec::new(),
        }
    }

    fn evaluate(&mut self, id: SlotId) {
        let ports = self.ports(id);
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let Some(mut cell) = node.cell.take() else {
            return;
        };
        let current = std::mem::take(&mut node.value);
        let value = cell.evaluate(&Inputs { graph: self, ports: &ports }, &current);
        if let Some(node) = self.nodes.get_mut(id) {
            node.cell = Some(cell);
            node.value = value;
            node.evaluations += 1;
        }
    }

    fn evaluate_key(&mut self, id: SlotId, key: &Value, effect: KeyEffect) {
        let ports = self.ports(id);
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let Some(mut cell) = node.cell.take() else {
            return;
        };
        let current = std::mem::take(&mut node.value);
        let result = cell.evaluate_key(key, effect, &Inputs { graph: self, ports: &ports }, &current);
        if let Some(node) = self.nodes.get_mut(id) {
            node.cell = Some(cell);
            node.value = current;
            let record = record_mut(&mut node.value);
            match result {
                Some(value) => {
                    record.insert(key.clone(), value);
                }
                None => {
                    record.remove(key);
                }
            }
        }
    }

    // ----- Teardown -----

    /// Tear down `root` and everything it owns.
    ///
    /// Phase one unbinds the inputs of every owned node; phase two
    /// disconnects the subtree from whatever is still bound to it and frees
    /// the nodes. No node is visited after its inputs are unbound.
    pub fn dispose(&mut self, root: SlotId) {
        let mut owned = Vec::new();
        self.collect_owned(root, &mut owned);

        for &id in &owned {
            let arity = self.nodes.get(id).map_or(0, |node| node.inputs.len());
            for port in 0..arity {
                self.detach(InletRef::new(id, port as u8));
            }
            let key_of = self.nodes.get(id).and_then(|node| node.key_of.clone());
            if let Some((map, key)) = key_of
                && let Some(map) = self.nodes.get_mut(map)
            {
                map.key_outlets.remove(&key);
            }
        }

        for &id in &owned {
            let outputs: SmallVec<[InletRef; 4]> = self.outputs(id).iter().copied().collect();
            for output in outputs {
                if let Some(node) = self.nodes.get_mut(output.node) {
                    node.inputs[output.port as usize] = None;
                }
                self.decohere(output.node);
            }
            let owner = self.nodes.get(id).and_then(|node| node.owner);
            if let Some(owner) = owner.and_then(|owner| self.nodes.get_mut(owner)) {
                owner.children.retain(|child| *child != id);
            }
        }
        for id in owned.into_iter().rev() {
            self.nodes.remove(id);
        }
        log::debug!("graph: disposed {:?}, {} nodes left", root, self.nodes.len());
    }

    /// Pre-order walk of the ownership tree under `root`, each node once.
    fn collect_owned(&self, root: SlotId, owned: &mut Vec<SlotId>) {
        let mut seen = FxHashSet::default();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            owned.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
    }

    /// Unbind without decohering the node being torn down.
    fn detach(&mut self, inlet: InletRef) {
        let Some(previous) = self.input(inlet) else {
            return;
        };
        if let Some(node) = self.nodes.get_mut(inlet.node) {
            node.inputs[inlet.port as usize] = None;
        }
        if let Some(source) = self.nodes.get_mut(previous) {
            source.outputs.retain(|output| *output != inlet);
        }
    }
}

fn record_mut(value: &mut Value) -> &mut Record {
    if !matches!(value, Value::Record(_)) {
        *value = Value::Record(Record::new());
    }
    match value {
        Value::Record(record) => record,
        _ => unreachable!("value was just replaced by a record"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_cell() -> impl Cell {
        struct Sum;
        impl Cell for Sum {
            fn kind(&self) -> &'static str {
                "sum"
            }
            fn arity(&self) -> usize {
                2
            }
            fn evaluate(&mut self, inputs: &Inputs<'_>, _current: &Value) -> Value {
                inputs.get(0).plus(inputs.get(1))
            }
        }
        Sum
    }

    /// a -> b, a -> c, (b, c) -> d
    fn diamond(graph: &mut Graph) -> [SlotId; 4] {
        let a = graph.source(Value::from(1));
        let b = graph.insert(MapCell::new(|v| v.times(&Value::from(10))));
        let c = graph.insert(MapCell::new(|v| v.plus(&Value::from(1))));
        let d = graph.insert(sum_cell());
        graph.bind(InletRef::new(b, 0), a);
        graph.bind(InletRef::new(c, 0), a);
        graph.bind(InletRef::new(d, 0), b);
        graph.bind(InletRef::new(d, 1), c);
        [a, b, c, d]
    }

    #[test]
    fn diamond_evaluates_each_node_once_per_version() {
        let mut graph = Graph::new();
        let [a, b, c, d] = diamond(&mut graph);

        let version = graph.next_version();
        graph.recohere(a, version);
        assert_eq!(graph.value(d), Some(&Value::from(12)));
        for id in [a, b, c, d] {
            assert_eq!(graph.evaluations(id), 1);
        }

        graph.set_value(a, Value::from(2));
        let version = graph.next_version();
        graph.recohere(a, version);
        graph.recohere(a, version);
        graph.recohere(d, version);
        assert_eq!(graph.value(d), Some(&Value::from(23)));
        assert_eq!(graph.evaluations(d), 2);
        assert_eq!(graph.evaluations(b), 2);
    }

    #[test]
    fn recohere_from_the_sink_pulls_upstream_first() {
        let mut graph = Graph::new();
        let [a, b, c, d] = diamond(&mut graph);
        let version = graph.next_version();
        graph.recohere(d, version);
        assert_eq!(graph.value(d), Some(&Value::from(12)));
        for id in [a, b, c, d] {
            assert!(graph.is_coherent(id));
            assert_eq!(graph.evaluations(id), 1);
        }
    }

    #[test]
    fn decohere_reaches_only_downstream_nodes() {
        let mut graph = Graph::new();
        let [a, b, c, d] = diamond(&mut graph);
        let version = graph.next_version();
        graph.recohere(a, version);

        graph.decohere(b);
        assert!(graph.is_coherent(a));
        assert!(!graph.is_coherent(b));
        assert!(graph.is_coherent(c));
        assert!(!graph.is_coherent(d));
    }

    #[test]
    fn rebinding_unbinds_the_previous_outlet() {
        let mut graph = Graph::new();
        let x = graph.source(Value::from(1));
        let y = graph.source(Value::from(2));
        let m = graph.insert(MapCell::new(Value::clone));
        graph.bind(InletRef::new(m, 0), x);
        graph.bind(InletRef::new(m, 0), y);
        assert!(graph.outputs(x).is_empty());
        assert_eq!(graph.outputs(y), &[InletRef::new(m, 0)]);
        let version = graph.next_version();
        graph.recohere(m, version);
        assert_eq!(graph.value(m), Some(&Value::from(2)));
    }

    #[test]
    fn unbind_preserves_fan_out_order() {
        let mut graph = Graph::new();
        let src = graph.source(Value::Extant);
        let sinks: Vec<SlotId> = (0..4).map(|_| graph.insert(MapCell::new(Value::clone))).collect();
        for sink in &sinks {
            graph.bind(InletRef::new(*sink, 0), src);
        }
        graph.unbind(InletRef::new(sinks[1], 0));
        let order: Vec<SlotId> = graph.outputs(src).iter().map(|inlet| inlet.node).collect();
        assert_eq!(order, vec![sinks[0], sinks[2], sinks[3]]);
    }

    #[test]
    fn key_effects_recompute_only_the_touched_key() {
        let mut graph = Graph::new();
        let map = graph.insert(RecordCell);
        graph.set_key(map, "a".into(), Value::from(1));
        graph.set_key(map, "b".into(), Value::from(2));
        let doubled = graph.insert(MapValuesCell::new(|_, v| v.times(&Value::from(2))));
        graph.bind(InletRef::new(doubled, 0), map);
        let b_out = graph.key_outlet(doubled, "b".into()).unwrap();

        let version = graph.next_version();
        graph.recohere(map, version);
        graph.recohere(b_out, version);
        assert_eq!(graph.value(b_out), Some(&Value::from(4)));
        let whole_evaluations = graph.evaluations(doubled);

        graph.set_key(map, "a".into(), Value::from(10));
        assert!(graph.is_coherent(b_out));
        assert_eq!(graph.pending_keys(doubled), vec![Value::from("a")]);

        let version = graph.next_version();
        graph.recohere(map, version);
        assert!(graph.is_coherent(doubled));
        assert!(graph.pending_keys(doubled).is_empty());
        assert_eq!(graph.evaluations(doubled), whole_evaluations);
        assert_eq!(graph.value(doubled).unwrap().get(&"a".into()), Some(&Value::from(20)));

        graph.remove_key(map, "b".into());
        let version = graph.next_version();
        graph.recohere(map, version);
        assert_eq!(graph.value(b_out), Some(&Value::Absent));
    }

    #[test]
    fn key_outlet_is_materialized_once() {
        let mut graph = Graph::new();
        let map = graph.insert(RecordCell);
        let first = graph.key_outlet(map, "missing".into());
        let second = graph.key_outlet(map, "missing".into());
        assert_eq!(first, second);
        let version = graph.next_version();
        graph.recohere(first.unwrap(), version);
        assert_eq!(graph.value(first.unwrap()), Some(&Value::Absent));
    }

    #[test]
    fn dispose_frees_owned_subtree_and_unbinds_dependents() {
        let mut graph = Graph::new();
        let [a, b, c, d] = diamond(&mut graph);
        graph.adopt(b, c);
        graph.dispose(b);
        assert!(!graph.contains(b));
        assert!(!graph.contains(c));
        assert!(graph.outputs(a).is_empty());
        assert_eq!(graph.input(InletRef::new(d, 0)), None);
        assert_eq!(graph.input(InletRef::new(d, 1)), None);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn adopt_refuses_ownership_cycles() {
        let mut graph = Graph::new();
        let [a, b, c, _] = diamond(&mut graph);
        graph.adopt(a, b);
        graph.adopt(b, c);
        graph.adopt(c, a);
        assert_eq!(graph.owner(a), None);
        assert!(graph.owns(a, c));

        graph.dispose(a);
        assert_eq!(graph.len(), 1);
    }
}
