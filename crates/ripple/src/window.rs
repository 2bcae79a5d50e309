//! Windowed stateful aggregation.
//!
//! A [`PaneManager`] runs every incoming `(value, timestamp)` through
//! the same five stages:
//!
//! 1. the assigner picks the target windows and threads [`WindowState`],
//! 2. the updater folds the value into each window's accumulator,
//! 3. the evictor drops entries outside its bound,
//! 4. the evaluator derives the window result,
//! 5. the trigger decides whether to emit and whether to purge.
//!
//! Stage pairings are enforced by types: [`ThresholdEvictor`] and
//! [`ReducingEvaluator`] only exist for the sorted-map accumulator of
//! [`MapUpdater`].

mod accumulators;
mod assigner;
mod evaluator;
mod evictor;
mod keyed;
mod pane;
mod trigger;
mod updater;

pub use accumulators::{
    DurableAccumulators, Storage, TransientAccumulators, WindowAccumulators, for_map_state,
    for_sequences_state, for_simple_state,
};
pub use assigner::{CountWindows, SlidingWindows, TemporalWindowAssigner, TumblingWindows};
pub use evaluator::{Evaluator, IdentityEvaluator, ReducingEvaluator, WindowFunction};
pub use evictor::{Evictor, NoOpEvictor, ThresholdEvictor};
pub use keyed::{KeyedPaneManager, KeyedWindowSpec};
pub use pane::PaneManager;
pub use trigger::{EveryUpdate, EveryUpdateUntilClose, OnClose, Trigger, TriggerAction};
pub use updater::{MapUpdater, ReduceUpdater, SequenceUpdater, Updater};

use crate::form::Form;
use crate::schedule::Millis;
use crate::value::Value;
use std::fmt::Debug;

/// Assigner state threaded from one value to the next.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowState {
    /// Highest timestamp seen so far.
    pub watermark: Millis,
    /// Number of values seen so far.
    pub position: u64,
}

impl WindowState {
    /// State after observing one more value at `timestamp`.
    pub fn advance(self, timestamp: Millis) -> Self {
        Self {
            watermark: self.watermark.max(timestamp),
            position: self.position + 1,
        }
    }
}

impl Form for WindowState {
    fn mold(&self) -> Value {
        Value::record([
            ("watermark", self.watermark.mold()),
            ("position", self.position.mold()),
        ])
    }

    fn cast(value: &Value) -> Option<Self> {
        Some(Self {
            watermark: u64::cast(value.get(&"watermark".into())?)?,
            position: u64::cast(value.get(&"position".into())?)?,
        })
    }
}

/// Window identity. Windows key accumulator maps, so they are ordered and
/// need a [`Form`] to be stored durably.
pub trait Window: Clone + Ord + Debug + Form {
    /// Time after which the window can no longer receive on-time values.
    fn deadline(&self) -> Option<Millis>;

    /// Whether assigner progress has moved past this window.
    fn is_closed(&self, state: &WindowState, grace: Millis) -> bool;

    fn to_value(&self) -> Value {
        self.mold()
    }
}

/// Half-open time interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeWindow {
    pub start: Millis,
    pub end: Millis,
}

impl Window for TimeWindow {
    fn deadline(&self) -> Option<Millis> {
        Some(self.end)
    }

    fn is_closed(&self, state: &WindowState, grace: Millis) -> bool {
        state.watermark >= self.end.saturating_add(grace)
    }
}

impl Form for TimeWindow {
    fn mold(&self) -> Value {
        Value::record([("start", self.start.mold()), ("end", self.end.mold())])
    }

    fn cast(value: &Value) -> Option<Self> {
        Some(Self {
            start: u64::cast(value.get(&"start".into())?)?,
            end: u64::cast(value.get(&"end".into())?)?,
        })
    }
}

/// Positions `[first, first + size)` of the input sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CountWindow {
    pub first: u64,
    pub size: u64,
}

impl Window for CountWindow {
    fn deadline(&self) -> Option<Millis> {
        None
    }

    fn is_closed(&self, state: &WindowState, _grace: Millis) -> bool {
        state.position >= self.first.saturating_add(self.size)
    }
}

impl Form for CountWindow {
    fn mold(&self) -> Value {
        Value::record([("first", self.first.mold()), ("size", self.size.mold())])
    }

    fn cast(value: &Value) -> Option<Self> {
        Some(Self {
            first: u64::cast(value.get(&"first".into())?)?,
            size: u64::cast(value.get(&"size".into())?)?,
        })
    }
}
