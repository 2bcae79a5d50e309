use crate::form::Form;
use crate::schedule::Millis;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Folds one value into a window accumulator.
pub trait Updater<T> {
    type Acc: Clone + Form;

    fn create(&self) -> Self::Acc;

    /// `position` is the value's index in the input sequence.
    fn update(&self, acc: &mut Self::Acc, value: &T, timestamp: Millis, position: u64);
}

/// Keeps every raw value in arrival order.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequenceUpdater;

impl<T: Clone + Form> Updater<T> for SequenceUpdater {
    type Acc = Vec<T>;

    fn create(&self) -> Vec<T> {
        Vec::new()
    }

    fn update(&self, acc: &mut Vec<T>, value: &T, _timestamp: Millis, _position: u64) {
        acc.push(value.clone());
    }
}

/// Folds with a binary operator, keeping no per-entry history.
pub struct ReduceUpdater<T> {
    op: Rc<dyn Fn(&T, &T) -> T>,
}

impl<T> ReduceUpdater<T> {
    pub fn new(op: impl Fn(&T, &T) -> T + 'static) -> Self {
        Self { op: Rc::new(op) }
    }
}

impl<T> Clone for ReduceUpdater<T> {
    fn clone(&self) -> Self {
        Self {
            op: self.op.clone(),
        }
    }
}

impl<T: Clone + Form> Updater<T> for ReduceUpdater<T> {
    type Acc = Option<T>;

    fn create(&self) -> Option<T> {
        None
    }

    fn update(&self, acc: &mut Option<T>, value: &T, _timestamp: Millis, _position: u64) {
        *acc = Some(match acc.take() {
            Some(current) => (self.op)(&current, value),
            None => value.clone(),
        });
    }
}

/// Indexes values by an orderable eviction criterion.
pub struct MapUpdater<K, T> {
    criterion: Rc<dyn Fn(&T, Millis, u64) -> K>,
}

impl<K, T> MapUpdater<K, T> {
    pub fn new(criterion: impl Fn(&T, Millis, u64) -> K + 'static) -> Self {
        Self {
            criterion: Rc::new(criterion),
        }
    }
}

impl<T> MapUpdater<u64, T> {
    /// Entries keyed by input position.
    pub fn by_position() -> Self {
        Self::new(|_, _, position| position)
    }
}

impl<T> MapUpdater<(Millis, u64), T> {
    /// Entries keyed by timestamp, ties broken by position.
    pub fn by_timestamp() -> Self {
        Self::new(|_, timestamp, position| (timestamp, position))
    }
}

impl<K, T> Clone for MapUpdater<K, T> {
    fn clone(&self) -> Self {
        Self {
            criterion: self.criterion.clone(),
        }
    }
}

impl<K: Ord + Clone + Form, T: Clone + Form> Updater<T> for MapUpdater<K, T> {
    type Acc = BTreeMap<K, T>;

    fn create(&self) -> BTreeMap<K, T> {
        BTreeMap::new()
    }

    fn update(&self, acc: &mut BTreeMap<K, T>, value: &T, timestamp: Millis, position: u64) {
        acc.insert((self.criterion)(value, timestamp, position), value.clone());
    }
}
