use super::WindowState;
use std::collections::BTreeMap;
use std::rc::Rc;

pub trait Evictor<W, A> {
    fn evict(&self, window: &W, acc: &mut A, state: &WindowState);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpEvictor;

impl<W, A> Evictor<W, A> for NoOpEvictor {
    fn evict(&self, _window: &W, _acc: &mut A, _state: &WindowState) {}
}

/// Drops sorted-map entries whose criterion falls outside a bound. Only
/// applies to the accumulator of [`super::MapUpdater`].
pub struct ThresholdEvictor<K> {
    most_recent: Option<usize>,
    horizon: Option<Rc<dyn Fn(&WindowState) -> K>>,
}

impl<K> ThresholdEvictor<K> {
    /// Keep at most the `count` entries with the greatest criterion.
    pub fn most_recent(count: usize) -> Self {
        Self {
            most_recent: Some(count),
            horizon: None,
        }
    }

    /// Drop entries whose criterion is below `lower(state)`.
    pub fn horizon(lower: impl Fn(&WindowState) -> K + 'static) -> Self {
        Self {
            most_recent: None,
            horizon: Some(Rc::new(lower)),
        }
    }

    pub fn and_most_recent(mut self, count: usize) -> Self {
        self.most_recent = Some(count);
        self
    }
}

impl<K> Clone for ThresholdEvictor<K> {
    fn clone(&self) -> Self {
        Self {
            most_recent: self.most_recent,
            horizon: self.horizon.clone(),
        }
    }
}

impl<W, K: Ord, T> Evictor<W, BTreeMap<K, T>> for ThresholdEvictor<K> {
    fn evict(&self, _window: &W, acc: &mut BTreeMap<K, T>, state: &WindowState) {
        if let Some(lower) = &self.horizon {
            let kept = acc.split_off(&lower(state));
            *acc = kept;
        }
        if let Some(count) = self.most_recent {
            while acc.len() > count {
                acc.pop_first();
            }
        }
    }
}
