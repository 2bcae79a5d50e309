//! Declarative streams.
//!
//! A [`Stream`] is a cheap, cloneable description of a dataflow. Nothing
//! runs until a [`BindingContext`] instantiates it into conduits. Shared
//! sub-streams are instantiated once per context.
//!
//! ```
//! use ripple::stream::{BindingContext, Stream};
//! use ripple::value::Value;
//! use std::{cell::RefCell, rc::Rc};
//!
//! let numbers = Stream::source("numbers");
//! let total = numbers.fold(Value::from(0), Value::plus);
//!
//! let mut context = BindingContext::new();
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = seen.clone();
//! context.bind_sink(&total, move |value| sink.borrow_mut().push(value.clone()));
//! context.push(&numbers, Value::from(2));
//! context.push(&numbers, Value::from(3));
//! assert_eq!(*seen.borrow(), vec![Value::from(2), Value::from(5)]);
//! ```

mod context;
mod decoupling;
mod flow;
mod modal;
mod operators;

pub use context::BindingContext;
pub use flow::{Conduit, Emitter, Flow, SinkId};

use crate::schedule::Millis;
use crate::state::StreamId;
use crate::value::Value;
use crate::window::{KeyedWindowSpec, PaneManager, Storage, Window};
use operators::{KeyedPanes, WindowPanes};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Delays must span more than one step.
    InvalidDelay(usize),
    InvalidWindow(String),
    /// Decoupling periods must be positive.
    InvalidPeriod(Millis),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::InvalidDelay(steps) => {
                write!(f, "a delay of {steps} step(s) is not a delay, use more than 1")
            }
            StreamError::InvalidWindow(reason) => write!(f, "invalid window: {reason}"),
            StreamError::InvalidPeriod(period) => {
                write!(f, "invalid decoupling period of {period} ms")
            }
        }
    }
}

impl std::error::Error for StreamError {}

/// How a decoupled stream treats values arriving between ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecouplingMode {
    /// Sample: emit only on ticks, the latest value since the previous tick.
    Discrete,
    /// Rate-limit: pass a value right away when idle, then at most one per
    /// period, always ending on the latest value.
    Continuous,
}

#[derive(Clone)]
pub enum Period {
    Constant(Millis),
    /// Durations in ms supplied by another stream, starting from `initial`.
    Dynamic { initial: Millis, periods: Stream },
}

pub type Transform = Rc<dyn Fn(&Value) -> Value>;
pub type Combine = Rc<dyn Fn(&Value, &Value) -> Value>;
pub type Expand = Rc<dyn Fn(&Value) -> Vec<Value>>;

/// Operation selected by a modal operator's current mode.
#[derive(Clone)]
pub(crate) enum ModalOp {
    Transform(Rc<dyn Fn(&Value) -> Transform>),
    Fold {
        initial: Value,
        select: Rc<dyn Fn(&Value) -> Combine>,
    },
    FlatMap(Rc<dyn Fn(&Value) -> Expand>),
    Reduce(Rc<dyn Fn(&Value) -> Combine>),
}

impl ModalOp {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            ModalOp::Transform(_) => "modal transform",
            ModalOp::Fold { .. } => "modal fold",
            ModalOp::FlatMap(_) => "modal flat map",
            ModalOp::Reduce(_) => "modal reduce",
        }
    }
}

pub(crate) type BuildWindow = Rc<dyn Fn(&Storage, Millis) -> Box<dyn WindowPanes>>;
pub(crate) type BuildKeyed = Rc<dyn Fn(&Storage, Millis) -> Box<dyn KeyedPanes>>;

pub(crate) enum StreamKind {
    Source,
    Transform(Stream, Transform),
    Filter(Stream, Rc<dyn Fn(&Value) -> bool>),
    FlatMap(Stream, Expand),
    Fold {
        input: Stream,
        initial: Value,
        combine: Combine,
    },
    Reduce {
        input: Stream,
        combine: Combine,
    },
    Merge(Vec<Stream>),
    Delay {
        input: Stream,
        steps: usize,
    },
    Window {
        input: Stream,
        build: BuildWindow,
    },
    Partition {
        input: Stream,
        build: BuildKeyed,
    },
    Modal {
        data: Stream,
        control: Stream,
        mode: Value,
        op: ModalOp,
    },
    Decouple {
        input: Stream,
        period: Period,
        mode: Option<DecouplingMode>,
    },
}

pub(crate) struct StreamNode {
    pub(crate) name: Option<Arc<str>>,
    pub(crate) kind: StreamKind,
    /// Explicit identity for persisted state.
    pub(crate) persist: Option<StreamId>,
}

#[derive(Clone)]
pub struct Stream {
    pub(crate) node: Rc<StreamNode>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("kind", &self.kind_name())
            .field("name", &self.node.name)
            .field("persist", &self.node.persist)
            .finish()
    }
}

impl Stream {
    fn new(kind: StreamKind) -> Self {
        Self {
            node: Rc::new(StreamNode {
                name: None,
                kind,
                persist: None,
            }),
        }
    }

    /// Values pushed in through [`BindingContext::push`].
    pub fn source(name: &str) -> Self {
        Self {
            node: Rc::new(StreamNode {
                name: Some(name.into()),
                kind: StreamKind::Source,
                persist: None,
            }),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.node.name.as_deref()
    }

    pub fn persisted_as(&self) -> Option<StreamId> {
        self.node.persist
    }

    /// Persist this stream's state under `id`. Reusing the id of a previous
    /// run picks that state up again.
    ///
    /// Only meaningful on stateful operators: fold, reduce, window,
    /// partition, the modal operators and dynamic decoupling.
    pub fn persist(self, id: StreamId) -> Self {
        let node = match Rc::try_unwrap(self.node) {
            Ok(mut node) => {
                node.persist = Some(id);
                node
            }
            Err(shared) => StreamNode {
                name: shared.name.clone(),
                kind: shared.kind.share(),
                persist: Some(id),
            },
        };
        Self {
            node: Rc::new(node),
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match &self.node.kind {
            StreamKind::Source => "source",
            StreamKind::Transform(..) => "transform",
            StreamKind::Filter(..) => "filter",
            StreamKind::FlatMap(..) => "flat map",
            StreamKind::Fold { .. } => "fold",
            StreamKind::Reduce { .. } => "reduce",
            StreamKind::Merge(_) => "merge",
            StreamKind::Delay { .. } => "delay",
            StreamKind::Window { .. } => "window",
            StreamKind::Partition { .. } => "partition",
            StreamKind::Modal { op, .. } => op.name(),
            StreamKind::Decouple { .. } => "decouple",
        }
    }

    pub(crate) fn is_stateful(&self) -> bool {
        matches!(
            &self.node.kind,
            StreamKind::Fold { .. }
                | StreamKind::Reduce { .. }
                | StreamKind::Window { .. }
                | StreamKind::Partition { .. }
                | StreamKind::Modal { .. }
                | StreamKind::Decouple {
                    period: Period::Dynamic { .. },
                    ..
                }
        )
    }

    pub fn transform(&self, f: impl Fn(&Value) -> Value + 'static) -> Self {
        Self::new(StreamKind::Transform(self.clone(), Rc::new(f)))
    }

    pub fn filter(&self, predicate: impl Fn(&Value) -> bool + 'static) -> Self {
        Self::new(StreamKind::Filter(self.clone(), Rc::new(predicate)))
    }

    pub fn flat_map(&self, f: impl Fn(&Value) -> Vec<Value> + 'static) -> Self {
        Self::new(StreamKind::FlatMap(self.clone(), Rc::new(f)))
    }

    /// Running aggregate, emitted after every value.
    pub fn fold(&self, initial: Value, combine: impl Fn(&Value, &Value) -> Value + 'static) -> Self {
        Self::new(StreamKind::Fold {
            input: self.clone(),
            initial,
            combine: Rc::new(combine),
        })
    }

    /// Like [`Stream::fold`], seeded with the first value.
    pub fn reduce(&self, combine: impl Fn(&Value, &Value) -> Value + 'static) -> Self {
        Self::new(StreamKind::Reduce {
            input: self.clone(),
            combine: Rc::new(combine),
        })
    }

    pub fn merge(streams: &[Stream]) -> Self {
        Self::new(StreamKind::Merge(streams.to_vec()))
    }

    /// Emit each value once `steps - 1` further values have arrived.
    pub fn delay(&self, steps: usize) -> Result<Self, StreamError> {
        if steps <= 1 {
            return Err(StreamError::InvalidDelay(steps));
        }
        Ok(Self::new(StreamKind::Delay {
            input: self.clone(),
            steps,
        }))
    }

    /// Windowed aggregation. `build` receives the storage of the panes and
    /// returns the manager; released window results are emitted as values.
    pub fn window<W: Window + 'static>(
        &self,
        build: impl Fn(&Storage) -> PaneManager<Value, W, Value> + 'static,
    ) -> Self {
        Self::new(StreamKind::Window {
            input: self.clone(),
            build: Rc::new(move |storage: &Storage, grace: Millis| {
                let panes = match storage {
                    Storage::Transient => build(storage),
                    Storage::Durable { provider, tag } => {
                        build(&storage.retag(tag.clone().slot("panes", None)))
                            .with_state_persister(provider.for_value(tag.clone().slot("assigner", None)))
                    }
                };
                operators::window_panes(panes.with_grace(grace))
            }),
        })
    }

    /// Keyed windowed aggregation over record-valued input: every field
    /// feeds the panes of its key, an absent field removes the key. Emits a
    /// record from every live key to its latest released result.
    pub fn partition<W: Window + 'static>(&self, spec: KeyedWindowSpec<W, Value>) -> Self {
        Self::new(StreamKind::Partition {
            input: self.clone(),
            build: Rc::new(move |storage: &Storage, grace: Millis| {
                operators::keyed_panes(spec.clone(), storage.clone(), grace)
            }),
        })
    }

    /// Transform with the function picked by the latest mode on `control`.
    pub fn modal_transform(
        &self,
        control: &Stream,
        initial_mode: Value,
        select: impl Fn(&Value) -> Transform + 'static,
    ) -> Self {
        self.modal(control, initial_mode, ModalOp::Transform(Rc::new(select)))
    }

    /// Running aggregate whose combining function follows the mode. The
    /// aggregate carries over mode changes.
    pub fn modal_fold(
        &self,
        control: &Stream,
        initial_mode: Value,
        initial: Value,
        select: impl Fn(&Value) -> Combine + 'static,
    ) -> Self {
        self.modal(
            control,
            initial_mode,
            ModalOp::Fold {
                initial,
                select: Rc::new(select),
            },
        )
    }

    pub fn modal_flat_map(
        &self,
        control: &Stream,
        initial_mode: Value,
        select: impl Fn(&Value) -> Expand + 'static,
    ) -> Self {
        self.modal(control, initial_mode, ModalOp::FlatMap(Rc::new(select)))
    }

    pub fn modal_reduce(
        &self,
        control: &Stream,
        initial_mode: Value,
        select: impl Fn(&Value) -> Combine + 'static,
    ) -> Self {
        self.modal(control, initial_mode, ModalOp::Reduce(Rc::new(select)))
    }

    fn modal(&self, control: &Stream, mode: Value, op: ModalOp) -> Self {
        Self::new(StreamKind::Modal {
            data: self.clone(),
            control: control.clone(),
            mode,
            op,
        })
    }

    /// Change the emission cadence. `mode` falls back to the context's
    /// configured default.
    pub fn decouple(&self, period: Period, mode: Option<DecouplingMode>) -> Result<Self, StreamError> {
        let initial = match &period {
            Period::Constant(period) => *period,
            Period::Dynamic { initial, .. } => *initial,
        };
        if initial == 0 {
            return Err(StreamError::InvalidPeriod(initial));
        }
        Ok(Self::new(StreamKind::Decouple {
            input: self.clone(),
            period,
            mode,
        }))
    }

    pub(crate) fn ptr(&self) -> *const StreamNode {
        Rc::as_ptr(&self.node)
    }
}

impl StreamKind {
    /// Same operator over the same inputs.
    fn share(&self) -> Self {
        match self {
            StreamKind::Source => StreamKind::Source,
            StreamKind::Transform(input, f) => StreamKind::Transform(input.clone(), f.clone()),
            StreamKind::Filter(input, f) => StreamKind::Filter(input.clone(), f.clone()),
            StreamKind::FlatMap(input, f) => StreamKind::FlatMap(input.clone(), f.clone()),
            StreamKind::Fold {
                input,
                initial,
                combine,
            } => StreamKind::Fold {
                input: input.clone(),
                initial: initial.clone(),
                combine: combine.clone(),
            },
            StreamKind::Reduce { input, combine } => StreamKind::Reduce {
                input: input.clone(),
                combine: combine.clone(),
            },
            StreamKind::Merge(inputs) => StreamKind::Merge(inputs.clone()),
            StreamKind::Delay { input, steps } => StreamKind::Delay {
                input: input.clone(),
                steps: *steps,
            },
            StreamKind::Window { input, build } => StreamKind::Window {
                input: input.clone(),
                build: build.clone(),
            },
            StreamKind::Partition { input, build } => StreamKind::Partition {
                input: input.clone(),
                build: build.clone(),
            },
            StreamKind::Modal {
                data,
                control,
                mode,
                op,
            } => StreamKind::Modal {
                data: data.clone(),
                control: control.clone(),
                mode: mode.clone(),
                op: op.clone(),
            },
            StreamKind::Decouple { input, period, mode } => StreamKind::Decouple {
                input: input.clone(),
                period: period.clone(),
                mode: *mode,
            },
        }
    }
}
