use super::flow::{Conduit, Emitter};
use super::{Combine, Expand, Transform};
use crate::schedule::{Millis, TimerId};
use crate::state::{MapPersister, ValuePersister};
use crate::value::{Record, Value};
use crate::window::{KeyedPaneManager, KeyedWindowSpec, PaneManager, Storage, Window};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

/// A [`PaneManager`] over values with its window type erased.
pub(crate) trait WindowPanes {
    fn process(&mut self, value: &Value, now: Millis) -> Vec<Value>;
    fn close_due(&mut self, now: Millis) -> Vec<Value>;
    fn take_new_deadlines(&mut self) -> Vec<Millis>;
    fn pending_deadlines(&self) -> Vec<Millis>;
}

impl<W: Window + 'static> WindowPanes for PaneManager<Value, W, Value> {
    fn process(&mut self, value: &Value, now: Millis) -> Vec<Value> {
        PaneManager::process(self, value, now)
            .into_iter()
            .map(|(_, result)| result)
            .collect()
    }

    fn close_due(&mut self, now: Millis) -> Vec<Value> {
        PaneManager::close_due(self, now)
            .into_iter()
            .map(|(_, result)| result)
            .collect()
    }

    fn take_new_deadlines(&mut self) -> Vec<Millis> {
        PaneManager::take_new_deadlines(self)
    }

    fn pending_deadlines(&self) -> Vec<Millis> {
        PaneManager::pending_deadlines(self)
    }
}

pub(crate) fn window_panes<W: Window + 'static>(panes: PaneManager<Value, W, Value>) -> Box<dyn WindowPanes> {
    Box::new(panes)
}

/// A [`KeyedPaneManager`] over values with its window type erased.
pub(crate) trait KeyedPanes {
    fn process(&mut self, key: &Value, value: &Value, now: Millis) -> Vec<Value>;
    fn remove_key(&mut self, key: &Value) -> bool;
    fn keys(&self) -> Vec<Value>;
    fn close_due(&mut self, now: Millis) -> Vec<(Value, Value)>;
    fn take_new_deadlines(&mut self) -> Vec<Millis>;
    fn pending_deadlines(&self) -> Vec<Millis>;
}

impl<W: Window + 'static> KeyedPanes for KeyedPaneManager<W, Value> {
    fn process(&mut self, key: &Value, value: &Value, now: Millis) -> Vec<Value> {
        KeyedPaneManager::process(self, key, value, now)
            .into_iter()
            .map(|(_, result)| result)
            .collect()
    }

    fn remove_key(&mut self, key: &Value) -> bool {
        KeyedPaneManager::remove_key(self, key)
    }

    fn keys(&self) -> Vec<Value> {
        KeyedPaneManager::keys(self)
    }

    fn close_due(&mut self, now: Millis) -> Vec<(Value, Value)> {
        KeyedPaneManager::close_due(self, now)
            .into_iter()
            .map(|(key, _, result)| (key, result))
            .collect()
    }

    fn take_new_deadlines(&mut self) -> Vec<Millis> {
        KeyedPaneManager::take_new_deadlines(self)
    }

    fn pending_deadlines(&self) -> Vec<Millis> {
        KeyedPaneManager::pending_deadlines(self)
    }
}

pub(crate) fn keyed_panes<W: Window + 'static>(
    spec: KeyedWindowSpec<W, Value>,
    storage: Storage,
    grace: Millis,
) -> Box<dyn KeyedPanes> {
    let spec = match spec.grace() {
        Some(_) => spec,
        None => spec.with_grace(grace),
    };
    Box::new(KeyedPaneManager::new(spec, storage))
}

/// Entry point for values pushed from outside.
pub(crate) struct SourceConduit;

impl Conduit for SourceConduit {
    fn kind(&self) -> &'static str {
        "source"
    }

    fn receive(&mut self, _port: u8, value: &Value, emitter: &mut Emitter<'_>) {
        emitter.emit(value.clone());
    }
}

/// Forwards values from any input port.
pub(crate) struct MergeConduit;

impl Conduit for MergeConduit {
    fn kind(&self) -> &'static str {
        "merge"
    }

    fn receive(&mut self, _port: u8, value: &Value, emitter: &mut Emitter<'_>) {
        emitter.emit(value.clone());
    }
}

pub(crate) struct TransformConduit {
    pub(crate) f: Transform,
}

impl Conduit for TransformConduit {
    fn kind(&self) -> &'static str {
        "transform"
    }

    fn receive(&mut self, _port: u8, value: &Value, emitter: &mut Emitter<'_>) {
        emitter.emit((self.f)(value));
    }
}

pub(crate) struct FilterConduit {
    pub(crate) predicate: Rc<dyn Fn(&Value) -> bool>,
}

impl Conduit for FilterConduit {
    fn kind(&self) -> &'static str {
        "filter"
    }

    fn receive(&mut self, _port: u8, value: &Value, emitter: &mut Emitter<'_>) {
        if (self.predicate)(value) {
            emitter.emit(value.clone());
        }
    }
}

pub(crate) struct FlatMapConduit {
    pub(crate) f: Expand,
}

impl Conduit for FlatMapConduit {
    fn kind(&self) -> &'static str {
        "flat map"
    }

    fn receive(&mut self, _port: u8, value: &Value, emitter: &mut Emitter<'_>) {
        for item in (self.f)(value) {
            emitter.emit(item);
        }
    }
}

/// Running aggregate. `state` is `None` only for a reduce that has not seen
/// a value yet.
pub(crate) struct FoldConduit {
    state: Option<Value>,
    combine: Combine,
    persister: Option<ValuePersister<Value>>,
}

impl FoldConduit {
    pub(crate) fn fold(initial: Value, combine: Combine, persister: Option<ValuePersister<Value>>) -> Self {
        let state = persister.as_ref().and_then(ValuePersister::get).unwrap_or(initial);
        Self {
            state: Some(state),
            combine,
            persister,
        }
    }

    pub(crate) fn reduce(combine: Combine, persister: Option<ValuePersister<Value>>) -> Self {
        let state = persister.as_ref().and_then(ValuePersister::get);
        Self {
            state,
            combine,
            persister,
        }
    }
}

impl Conduit for FoldConduit {
    fn kind(&self) -> &'static str {
        "fold"
    }

    fn receive(&mut self, _port: u8, value: &Value, emitter: &mut Emitter<'_>) {
        let next = match &self.state {
            Some(state) => (self.combine)(state, value),
            None => value.clone(),
        };
        if let Some(persister) = &self.persister {
            persister.set(&next);
        }
        self.state = Some(next.clone());
        emitter.emit(next);
    }
}

/// Emits each value after `steps - 1` later values arrived.
pub(crate) struct DelayConduit {
    steps: usize,
    buffer: VecDeque<Value>,
}

impl DelayConduit {
    pub(crate) fn new(steps: usize) -> Self {
        Self {
            steps,
            buffer: VecDeque::with_capacity(steps),
        }
    }
}

impl Conduit for DelayConduit {
    fn kind(&self) -> &'static str {
        "delay"
    }

    fn receive(&mut self, _port: u8, value: &Value, emitter: &mut Emitter<'_>) {
        self.buffer.push_back(value.clone());
        if self.buffer.len() >= self.steps {
            if let Some(oldest) = self.buffer.pop_front() {
                emitter.emit(oldest);
            }
        }
    }
}

/// Windowed aggregation timestamped by the scheduler clock.
pub(crate) struct WindowConduit {
    panes: Box<dyn WindowPanes>,
}

impl WindowConduit {
    pub(crate) fn new(panes: Box<dyn WindowPanes>) -> Self {
        Self { panes }
    }
}

impl Conduit for WindowConduit {
    fn kind(&self) -> &'static str {
        "window"
    }

    fn receive(&mut self, _port: u8, value: &Value, emitter: &mut Emitter<'_>) {
        for result in self.panes.process(value, emitter.now()) {
            emitter.emit(result);
        }
        for deadline in self.panes.take_new_deadlines() {
            emitter.schedule_at(deadline);
        }
    }

    fn on_timer(&mut self, _timer: TimerId, emitter: &mut Emitter<'_>) {
        for result in self.panes.close_due(emitter.now()) {
            emitter.emit(result);
        }
    }

    fn start(&mut self, emitter: &mut Emitter<'_>) {
        for deadline in self.panes.pending_deadlines() {
            emitter.schedule_at(deadline);
        }
    }
}

/// Keyed windows over record-valued input. Emits the snapshot of every live
/// key's latest result; keys without a released result show as `Extant`.
pub(crate) struct PartitionConduit {
    panes: Box<dyn KeyedPanes>,
    latest: BTreeMap<Value, Value>,
    persister: Option<MapPersister<Value, Value>>,
}

impl PartitionConduit {
    pub(crate) fn new(panes: Box<dyn KeyedPanes>, persister: Option<MapPersister<Value, Value>>) -> Self {
        let latest = persister.as_ref().map(MapPersister::entries).unwrap_or_default();
        Self {
            panes,
            latest,
            persister,
        }
    }

    fn record(&mut self, key: &Value, result: Value) {
        if let Some(persister) = &self.persister {
            persister.insert(key.clone(), result.clone());
        }
        self.latest.insert(key.clone(), result);
    }

    fn forget(&mut self, key: &Value) {
        if let Some(persister) = &self.persister {
            persister.remove(key);
        }
        self.latest.remove(key);
    }

    fn snapshot(&self) -> Value {
        let record: Record = self
            .panes
            .keys()
            .into_iter()
            .map(|key| {
                let result = self.latest.get(&key).cloned().unwrap_or(Value::Extant);
                (key, result)
            })
            .collect();
        Value::Record(record)
    }
}

impl Conduit for PartitionConduit {
    fn kind(&self) -> &'static str {
        "partition"
    }

    fn receive(&mut self, _port: u8, value: &Value, emitter: &mut Emitter<'_>) {
        let Some(fields) = value.as_record() else {
            log::warn!("partition ignores non-record value {value}");
            return;
        };
        let now = emitter.now();
        for (key, field) in fields.iter() {
            if field.is_absent() {
                self.panes.remove_key(key);
                self.forget(key);
                continue;
            }
            for result in self.panes.process(key, field, now) {
                self.record(key, result);
            }
        }
        for deadline in self.panes.take_new_deadlines() {
            emitter.schedule_at(deadline);
        }
        emitter.emit(self.snapshot());
    }

    fn on_timer(&mut self, _timer: TimerId, emitter: &mut Emitter<'_>) {
        let closed = self.panes.close_due(emitter.now());
        if closed.is_empty() {
            return;
        }
        for (key, result) in closed {
            self.record(&key, result);
        }
        emitter.emit(self.snapshot());
    }

    fn start(&mut self, emitter: &mut Emitter<'_>) {
        for deadline in self.panes.pending_deadlines() {
            emitter.schedule_at(deadline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::schedule::VirtualClock;

    fn run(conduit: &mut dyn Conduit, values: &[Value]) -> Vec<Value> {
        let mut arena = Arena::new();
        let owner = arena.insert(());
        let mut clock = VirtualClock::new();
        let mut out = Vec::new();
        for value in values {
            let mut emitter = Emitter::new(owner, &mut clock);
            conduit.receive(0, value, &mut emitter);
            out.extend(emitter.into_emitted());
        }
        out
    }

    fn numbers(values: &[i32]) -> Vec<Value> {
        values.iter().map(|&n| Value::from(n)).collect()
    }

    #[test]
    fn delay_lags_by_steps_minus_one() {
        let mut delay = DelayConduit::new(3);
        assert_eq!(run(&mut delay, &numbers(&[1, 2, 3, 4])), numbers(&[1, 2]));
    }

    #[test]
    fn reduce_starts_from_the_first_value() {
        let mut reduce = FoldConduit::reduce(Rc::new(Value::times), None);
        assert_eq!(run(&mut reduce, &numbers(&[2, 3, 4])), numbers(&[2, 6, 24]));
    }

    #[test]
    fn flat_map_emits_in_order() {
        let mut flat = FlatMapConduit {
            f: Rc::new(|value: &Value| vec![value.clone(), value.negative()]),
        };
        assert_eq!(run(&mut flat, &numbers(&[1, 2])), numbers(&[1, -1, 2, -2]));
    }
}
