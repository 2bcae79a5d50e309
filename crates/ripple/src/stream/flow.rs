//! Live conduit graph.
//!
//! Values travel depth-first: every value a conduit emits is handed to its
//! sinks and then to each downstream conduit, in binding order, before the
//! conduit's next emission is looked at.

use crate::arena::{Arena, SlotId};
use crate::schedule::{Millis, Scheduler, TimerId};
use crate::value::Value;
use smallvec::SmallVec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

/// Runtime half of a stream operator.
pub trait Conduit {
    fn kind(&self) -> &'static str;

    fn receive(&mut self, port: u8, value: &Value, emitter: &mut Emitter<'_>);

    fn on_timer(&mut self, _timer: TimerId, _emitter: &mut Emitter<'_>) {}

    /// Called once the conduit is wired in, e.g. to reschedule timers of
    /// rehydrated state.
    fn start(&mut self, _emitter: &mut Emitter<'_>) {}
}

/// What a conduit can do while handling an event.
pub struct Emitter<'a> {
    owner: SlotId,
    scheduler: &'a mut dyn Scheduler,
    out: SmallVec<[Value; 2]>,
}

impl<'a> Emitter<'a> {
    pub fn new(owner: SlotId, scheduler: &'a mut dyn Scheduler) -> Self {
        Self {
            owner,
            scheduler,
            out: SmallVec::new(),
        }
    }

    pub fn emit(&mut self, value: Value) {
        self.out.push(value);
    }

    pub fn now(&self) -> Millis {
        self.scheduler.now()
    }

    pub fn schedule(&mut self, delay: Millis) -> TimerId {
        self.scheduler.schedule(delay, self.owner)
    }

    /// Schedule at an absolute time, immediately if it already passed.
    pub fn schedule_at(&mut self, at: Millis) -> TimerId {
        let delay = at.saturating_sub(self.scheduler.now());
        self.schedule(delay)
    }

    pub fn cancel(&mut self, timer: TimerId) -> bool {
        self.scheduler.cancel(timer)
    }

    pub(crate) fn into_emitted(self) -> SmallVec<[Value; 2]> {
        self.out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Edge {
    target: SlotId,
    port: u8,
}

struct Entry {
    conduit: Box<dyn Conduit>,
    inputs: SmallVec<[SlotId; 2]>,
    outputs: SmallVec<[Edge; 2]>,
    sinks: Vec<(SinkId, Box<dyn FnMut(&Value)>)>,
}

#[derive(Default)]
pub struct Flow {
    conduits: Arena<Entry>,
    next_sink: u64,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, conduit: impl Conduit + 'static) -> SlotId {
        self.conduits.insert(Entry {
            conduit: Box::new(conduit),
            inputs: SmallVec::new(),
            outputs: SmallVec::new(),
            sinks: Vec::new(),
        })
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.conduits.contains(id)
    }

    pub fn len(&self) -> usize {
        self.conduits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conduits.is_empty()
    }

    pub fn kind(&self, id: SlotId) -> Option<&'static str> {
        self.conduits.get(id).map(|entry| entry.conduit.kind())
    }

    /// Feed `source` into `port` of `target`. Fan-out follows bind order.
    pub fn connect(&mut self, source: SlotId, target: SlotId, port: u8) {
        if !self.conduits.contains(target) {
            log::warn!("connect to missing conduit {target:?}");
            return;
        }
        let Some(entry) = self.conduits.get_mut(source) else {
            log::warn!("connect from missing conduit {source:?}");
            return;
        };
        entry.outputs.push(Edge { target, port });
        if let Some(entry) = self.conduits.get_mut(target) {
            entry.inputs.push(source);
        }
    }

    /// Observe every value `id` emits. A sink on a missing conduit never fires.
    pub fn add_sink(&mut self, id: SlotId, sink: impl FnMut(&Value) + 'static) -> SinkId {
        let sink_id = SinkId(self.next_sink);
        self.next_sink += 1;
        match self.conduits.get_mut(id) {
            Some(entry) => entry.sinks.push((sink_id, Box::new(sink))),
            None => log::warn!("sink bound to missing conduit {id:?}"),
        }
        sink_id
    }

    pub fn remove_sink(&mut self, sink: SinkId) -> bool {
        let ids: Vec<SlotId> = self.conduits.iter().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(entry) = self.conduits.get_mut(id) {
                if let Some(index) = entry.sinks.iter().position(|(candidate, _)| *candidate == sink) {
                    drop(entry.sinks.remove(index));
                    return true;
                }
            }
        }
        false
    }

    pub fn start(&mut self, id: SlotId, scheduler: &mut dyn Scheduler) {
        let emitted = {
            let Some(entry) = self.conduits.get_mut(id) else {
                return;
            };
            let mut emitter = Emitter::new(id, scheduler);
            entry.conduit.start(&mut emitter);
            emitter.into_emitted()
        };
        self.dispatch(id, emitted, scheduler);
    }

    /// Deliver `value` to `port` of `target` and run the cascade to completion.
    pub fn deliver(&mut self, target: SlotId, port: u8, value: &Value, scheduler: &mut dyn Scheduler) {
        let emitted = {
            let Some(entry) = self.conduits.get_mut(target) else {
                log::warn!("value delivered to missing conduit {target:?}");
                return;
            };
            log::trace!("{} {target:?} <- {value} on port {port}", entry.conduit.kind());
            let mut emitter = Emitter::new(target, scheduler);
            entry.conduit.receive(port, value, &mut emitter);
            emitter.into_emitted()
        };
        self.dispatch(target, emitted, scheduler);
    }

    pub fn fire(&mut self, owner: SlotId, timer: TimerId, scheduler: &mut dyn Scheduler) {
        let emitted = {
            let Some(entry) = self.conduits.get_mut(owner) else {
                return;
            };
            let mut emitter = Emitter::new(owner, scheduler);
            entry.conduit.on_timer(timer, &mut emitter);
            emitter.into_emitted()
        };
        self.dispatch(owner, emitted, scheduler);
    }

    /// Two-phase teardown: unbind `root` from its inputs, then remove it and
    /// everything downstream of it, cancelling their timers. Returns the
    /// removed conduits.
    pub fn dispose(&mut self, root: SlotId, scheduler: &mut dyn Scheduler) -> Vec<SlotId> {
        if !self.conduits.contains(root) {
            return Vec::new();
        }
        let inputs = self
            .conduits
            .get(root)
            .map(|entry| entry.inputs.clone())
            .unwrap_or_default();
        for input in inputs {
            if let Some(entry) = self.conduits.get_mut(input) {
                entry.outputs.retain(|edge| edge.target != root);
            }
        }

        let mut doomed = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if doomed.contains(&id) {
                continue;
            }
            if let Some(entry) = self.conduits.get(id) {
                stack.extend(entry.outputs.iter().map(|edge| edge.target));
                doomed.push(id);
            }
        }
        for &id in &doomed {
            scheduler.cancel_owned(id);
            if let Some(entry) = self.conduits.remove(id) {
                log::debug!("disposed {} {id:?}", entry.conduit.kind());
                for input in entry.inputs {
                    if let Some(upstream) = self.conduits.get_mut(input) {
                        upstream.outputs.retain(|edge| edge.target != id);
                    }
                }
            }
        }
        doomed
    }

    fn dispatch(&mut self, source: SlotId, emitted: SmallVec<[Value; 2]>, scheduler: &mut dyn Scheduler) {
        for value in emitted {
            let outputs = {
                let Some(entry) = self.conduits.get_mut(source) else {
                    return;
                };
                for (_, sink) in &mut entry.sinks {
                    sink(&value);
                }
                entry.outputs.clone()
            };
            for edge in outputs {
                self.deliver(edge.target, edge.port, &value, scheduler);
            }
        }
    }
}
