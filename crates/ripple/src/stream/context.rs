use super::decoupling::{DecoupleConduit, PERIOD_PORT};
use super::flow::{Flow, SinkId};
use super::modal::{CONTROL_PORT, DATA_PORT, ModalConduit};
use super::operators::{
    DelayConduit, FilterConduit, FlatMapConduit, FoldConduit, MergeConduit, PartitionConduit, SourceConduit,
    TransformConduit, WindowConduit,
};
use super::{Period, Stream, StreamKind, StreamNode};
use crate::arena::SlotId;
use crate::config::RuntimeConfig;
use crate::schedule::{Millis, Scheduler, VirtualClock};
use crate::state::{MemoryStore, PersistenceProvider, StateTag, StreamId};
use crate::value::Value;
use crate::window::Storage;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Mints process-unique stream ids and takes them back.
#[derive(Debug)]
struct IdPool {
    next: StreamId,
    live: BTreeSet<StreamId>,
    released: BTreeSet<StreamId>,
}

impl IdPool {
    fn new(first: StreamId) -> Self {
        Self {
            next: first,
            live: BTreeSet::new(),
            released: BTreeSet::new(),
        }
    }

    fn create(&mut self) -> StreamId {
        while let Some(id) = self.released.pop_first() {
            if self.live.insert(id) {
                return id;
            }
        }
        while self.live.contains(&self.next) {
            self.next += 1;
        }
        let id = self.next;
        self.next += 1;
        self.live.insert(id);
        id
    }

    fn claim(&mut self, id: StreamId) -> bool {
        self.released.remove(&id);
        self.live.insert(id)
    }

    fn release(&mut self, id: StreamId) -> bool {
        if !self.live.remove(&id) {
            return false;
        }
        if id < self.next {
            self.released.insert(id);
        }
        true
    }
}

/// Instantiates streams into a live [`Flow`] and drives it.
///
/// The context owns the clock, the persistence provider and the id pool.
/// Each declarative stream is instantiated at most once, so sub-streams
/// shared by several consumers feed all of them from one conduit.
pub struct BindingContext {
    config: RuntimeConfig,
    flow: Flow,
    clock: VirtualClock,
    persistence: PersistenceProvider,
    instances: FxHashMap<*const StreamNode, (Stream, SlotId)>,
    /// Ids this context holds for live conduits, minted or claimed.
    held: FxHashMap<SlotId, StreamId>,
    ids: IdPool,
}

impl Default for BindingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingContext {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            ids: IdPool::new(config.first_stream_id),
            config,
            flow: Flow::new(),
            clock: VirtualClock::new(),
            persistence: PersistenceProvider::memory(&MemoryStore::new()),
            instances: FxHashMap::default(),
            held: FxHashMap::default(),
        }
    }

    /// Store persisted stream state through `persistence`. Set this before
    /// binding anything.
    pub fn with_persistence(mut self, persistence: PersistenceProvider) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn persistence(&self) -> &PersistenceProvider {
        &self.persistence
    }

    pub fn now(&self) -> Millis {
        self.clock.now()
    }

    pub fn create_id(&mut self) -> StreamId {
        self.ids.create()
    }

    /// Reserve a specific id, typically one persisted state was stored
    /// under. Returns false when the id is already live.
    pub fn claim_id(&mut self, id: StreamId) -> bool {
        self.ids.claim(id)
    }

    pub fn release_id(&mut self, id: StreamId) -> bool {
        let released = self.ids.release(id);
        if released {
            log::debug!("released stream id {id}");
        }
        released
    }

    pub fn instance(&self, stream: &Stream) -> Option<SlotId> {
        self.instances
            .get(&stream.ptr())
            .map(|(_, id)| *id)
            .filter(|id| self.flow.contains(*id))
    }

    /// Attach `sink` to every value `stream` emits, instantiating it first.
    pub fn bind_sink(&mut self, stream: &Stream, sink: impl FnMut(&Value) + 'static) -> SinkId {
        let id = self.instantiate(stream);
        self.flow.add_sink(id, sink)
    }

    pub fn unbind_sink(&mut self, sink: SinkId) -> bool {
        self.flow.remove_sink(sink)
    }

    /// Push a value into a source stream and run the cascade to completion.
    pub fn push(&mut self, source: &Stream, value: Value) {
        if !matches!(source.node.kind, StreamKind::Source) {
            log::warn!("cannot push into a {} stream", source.kind_name());
            return;
        }
        let id = self.instantiate(source);
        self.flow.deliver(id, 0, &value, &mut self.clock);
    }

    /// Move virtual time forward, firing due timers in order.
    pub fn advance_by(&mut self, ms: Millis) {
        let target = self.clock.now() + ms;
        while let Some(fired) = self.clock.pop_due(target) {
            self.flow.fire(fired.owner, fired.timer, &mut self.clock);
        }
        self.clock.advance_to(target);
    }

    /// Tear down `stream` and everything downstream of it. Ids held by the
    /// removed conduits are released.
    pub fn dispose(&mut self, stream: &Stream) {
        let Some(id) = self.instance(stream) else {
            return;
        };
        let removed = self.flow.dispose(id, &mut self.clock);
        self.instances.retain(|_, (_, id)| !removed.contains(id));
        for id in removed {
            if let Some(stream_id) = self.held.remove(&id) {
                self.release_id(stream_id);
            }
        }
    }

    pub fn instantiate(&mut self, stream: &Stream) -> SlotId {
        if let Some(id) = self.instance(stream) {
            return id;
        }
        let (persist, held) = self.persist_id(stream);
        let (id, inputs) = self.build(stream, persist);
        if let Some(stream_id) = persist.filter(|_| held) {
            self.held.insert(id, stream_id);
        }
        self.instances.insert(stream.ptr(), (stream.clone(), id));
        for (input, port) in inputs {
            let source = self.instantiate(&input);
            self.flow.connect(source, id, port);
        }
        log::debug!("instantiated {} as {id:?}", stream.kind_name());
        self.flow.start(id, &mut self.clock);
        id
    }

    /// The id `stream` persists under, and whether this instance holds it.
    /// An explicit id that is already live is shared, not held.
    fn persist_id(&mut self, stream: &Stream) -> (Option<StreamId>, bool) {
        if let Some(id) = stream.persisted_as() {
            let claimed = self.ids.claim(id);
            if !claimed {
                log::warn!("stream id {id} is already in use, persisted state will be shared");
            }
            return (Some(id), claimed);
        }
        if self.config.persist_by_default && stream.is_stateful() {
            return (Some(self.create_id()), true);
        }
        (None, false)
    }

    fn build(&mut self, stream: &Stream, persist: Option<StreamId>) -> (SlotId, Vec<(Stream, u8)>) {
        let provider = &self.persistence;
        let value_persister = |tag: fn(StreamId) -> StateTag| persist.map(|id| provider.for_value::<Value>(tag(id)));
        let storage = match persist {
            Some(id) => Storage::durable(provider.clone(), StateTag::state(id)),
            None => Storage::Transient,
        };
        let grace = self.config.window_grace_ms;

        match &stream.node.kind {
            StreamKind::Source => (self.flow.insert(SourceConduit), Vec::new()),
            StreamKind::Transform(input, f) => (
                self.flow.insert(TransformConduit { f: f.clone() }),
                vec![(input.clone(), 0)],
            ),
            StreamKind::Filter(input, predicate) => (
                self.flow.insert(FilterConduit {
                    predicate: predicate.clone(),
                }),
                vec![(input.clone(), 0)],
            ),
            StreamKind::FlatMap(input, f) => (
                self.flow.insert(FlatMapConduit { f: f.clone() }),
                vec![(input.clone(), 0)],
            ),
            StreamKind::Fold {
                input,
                initial,
                combine,
            } => {
                let conduit = FoldConduit::fold(initial.clone(), combine.clone(), value_persister(StateTag::state));
                (self.flow.insert(conduit), vec![(input.clone(), 0)])
            }
            StreamKind::Reduce { input, combine } => {
                let conduit = FoldConduit::reduce(combine.clone(), value_persister(StateTag::state));
                (self.flow.insert(conduit), vec![(input.clone(), 0)])
            }
            StreamKind::Merge(inputs) => {
                let ports = inputs
                    .iter()
                    .enumerate()
                    .map(|(port, input)| (input.clone(), port as u8))
                    .collect();
                (self.flow.insert(MergeConduit), ports)
            }
            StreamKind::Delay { input, steps } => {
                (self.flow.insert(DelayConduit::new(*steps)), vec![(input.clone(), 0)])
            }
            StreamKind::Window { input, build } => {
                let conduit = WindowConduit::new(build(&storage, grace));
                (self.flow.insert(conduit), vec![(input.clone(), 0)])
            }
            StreamKind::Partition { input, build } => {
                let latest = persist.map(|id| provider.for_map(StateTag::state(id).slot("latest", None)));
                let conduit = PartitionConduit::new(build(&storage, grace), latest);
                (self.flow.insert(conduit), vec![(input.clone(), 0)])
            }
            StreamKind::Modal {
                data,
                control,
                mode,
                op,
            } => {
                let conduit = ModalConduit::new(
                    op.clone(),
                    mode.clone(),
                    value_persister(StateTag::mode),
                    value_persister(StateTag::state),
                );
                (
                    self.flow.insert(conduit),
                    vec![(data.clone(), DATA_PORT), (control.clone(), CONTROL_PORT)],
                )
            }
            StreamKind::Decouple { input, period, mode } => {
                let mode = mode.unwrap_or(self.config.decoupling);
                let (conduit, periods) = match period {
                    Period::Constant(period) => (DecoupleConduit::new(mode, *period, None), None),
                    Period::Dynamic { initial, periods } => {
                        let persister = persist.map(|id| provider.for_value::<u64>(StateTag::period(id)));
                        (DecoupleConduit::new(mode, *initial, persister), Some(periods.clone()))
                    }
                };
                let mut inputs = vec![(input.clone(), 0)];
                inputs.extend(periods.map(|periods| (periods, PERIOD_PORT)));
                (self.flow.insert(conduit), inputs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn collect(context: &mut BindingContext, stream: &Stream) -> Rc<RefCell<Vec<Value>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        context.bind_sink(stream, move |value| sink.borrow_mut().push(value.clone()));
        seen
    }

    #[test]
    fn ids_are_unique_and_reclaimable() {
        let mut context = BindingContext::new();
        let a = context.create_id();
        let b = context.create_id();
        assert_ne!(a, b);
        assert!(context.claim_id(10));
        assert!(!context.claim_id(10));
        assert!(context.release_id(a));
        assert!(!context.release_id(a));
        assert_eq!(context.create_id(), a);
    }

    #[test]
    fn shared_streams_are_instantiated_once() {
        let mut context = BindingContext::new();
        let source = Stream::source("n");
        let doubled = source.transform(|value| value.times(&Value::from(2)));
        let a = doubled.transform(|value| value.plus(&Value::from(1)));
        let b = doubled.transform(|value| value.minus(&Value::from(1)));
        let seen_a = collect(&mut context, &a);
        let seen_b = collect(&mut context, &b);
        assert_eq!(context.flow().len(), 4);

        context.push(&source, Value::from(5));
        assert_eq!(*seen_a.borrow(), vec![Value::from(11)]);
        assert_eq!(*seen_b.borrow(), vec![Value::from(9)]);
    }

    #[test]
    fn dispose_tears_down_downstream_and_timers() {
        let mut context = BindingContext::new();
        let source = Stream::source("n");
        let slow = source.decouple(Period::Constant(100), None).unwrap();
        let seen = collect(&mut context, &slow);

        context.push(&source, Value::from(1));
        context.push(&source, Value::from(2));
        assert_eq!(*seen.borrow(), vec![Value::from(1)]);

        context.dispose(&slow);
        assert_eq!(context.instance(&slow), None);
        assert!(context.instance(&source).is_some());
        context.advance_by(500);
        assert_eq!(*seen.borrow(), vec![Value::from(1)]);
    }

    #[test]
    fn persist_by_default_mints_ids_for_stateful_streams() {
        let store = MemoryStore::new();
        let config = RuntimeConfig {
            persist_by_default: true,
            ..RuntimeConfig::default()
        };
        let run = |values: &[i32]| {
            let mut context =
                BindingContext::with_config(config.clone()).with_persistence(PersistenceProvider::memory(&store));
            let source = Stream::source("n");
            let total = source.fold(Value::from(0), Value::plus);
            let seen = collect(&mut context, &total);
            for &n in values {
                context.push(&source, Value::from(n));
            }
            let last = seen.borrow().last().cloned();
            last
        };
        assert_eq!(run(&[1, 2]), Some(Value::from(3)));
        assert_eq!(run(&[4]), Some(Value::from(7)));
    }

    #[test]
    fn explicit_ids_are_released_on_dispose() {
        let mut context = BindingContext::new();
        let source = Stream::source("n");
        let total = source.fold(Value::from(0), Value::plus).persist(4);
        let seen = collect(&mut context, &total);
        context.push(&source, Value::from(2));
        context.dispose(&total);
        assert!(!context.release_id(4));

        // A fresh instance holds the id again and resumes the stored state.
        let total = source.fold(Value::from(0), Value::plus).persist(4);
        let resumed = collect(&mut context, &total);
        context.push(&source, Value::from(3));
        assert_eq!(*seen.borrow(), vec![Value::from(2)]);
        assert_eq!(*resumed.borrow(), vec![Value::from(5)]);
        assert!(!context.claim_id(4));

        context.dispose(&total);
        assert!(context.claim_id(4));
    }

    #[test]
    fn pushing_into_derived_streams_is_ignored() {
        let mut context = BindingContext::new();
        let source = Stream::source("n");
        let derived = source.transform(Value::clone);
        let seen = collect(&mut context, &derived);
        context.push(&derived, Value::from(1));
        assert!(seen.borrow().is_empty());
    }
}
