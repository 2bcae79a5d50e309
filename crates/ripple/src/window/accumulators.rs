use super::Window;
use crate::form::Form;
use crate::state::{MapPersister, PersistenceProvider, StateTag};
use std::collections::BTreeMap;

/// Window to accumulator map. At most one live accumulator per window.
pub trait WindowAccumulators<W, A> {
    fn get(&self, window: &W) -> Option<A>;
    fn put(&mut self, window: W, acc: A);
    fn remove(&mut self, window: &W) -> Option<A>;
    fn windows(&self) -> Vec<W>;
    fn clear(&mut self);
}

/// Where accumulators live.
#[derive(Clone)]
pub enum Storage {
    Transient,
    Durable {
        provider: PersistenceProvider,
        tag: StateTag,
    },
}

impl Storage {
    pub fn durable(provider: PersistenceProvider, tag: StateTag) -> Self {
        Storage::Durable { provider, tag }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, Storage::Durable { .. })
    }

    /// Same backend under a different tag.
    pub fn retag(&self, tag: StateTag) -> Self {
        match self {
            Storage::Transient => Storage::Transient,
            Storage::Durable { provider, .. } => Storage::Durable {
                provider: provider.clone(),
                tag,
            },
        }
    }
}

pub struct TransientAccumulators<W, A> {
    panes: BTreeMap<W, A>,
}

impl<W, A> Default for TransientAccumulators<W, A> {
    fn default() -> Self {
        Self {
            panes: BTreeMap::new(),
        }
    }
}

impl<W: Ord + Clone, A: Clone> WindowAccumulators<W, A> for TransientAccumulators<W, A> {
    fn get(&self, window: &W) -> Option<A> {
        self.panes.get(window).cloned()
    }

    fn put(&mut self, window: W, acc: A) {
        self.panes.insert(window, acc);
    }

    fn remove(&mut self, window: &W) -> Option<A> {
        self.panes.remove(window)
    }

    fn windows(&self) -> Vec<W> {
        self.panes.keys().cloned().collect()
    }

    fn clear(&mut self) {
        self.panes.clear();
    }
}

/// Accumulators written through to a persisted map.
pub struct DurableAccumulators<W, A> {
    panes: MapPersister<W, A>,
}

impl<W: Form + Ord, A: Form> DurableAccumulators<W, A> {
    pub fn new(provider: &PersistenceProvider, tag: StateTag) -> Self {
        Self {
            panes: provider.for_map(tag),
        }
    }
}

impl<W: Form + Ord, A: Form> WindowAccumulators<W, A> for DurableAccumulators<W, A> {
    fn get(&self, window: &W) -> Option<A> {
        self.panes.get(window)
    }

    fn put(&mut self, window: W, acc: A) {
        self.panes.insert(window, acc);
    }

    fn remove(&mut self, window: &W) -> Option<A> {
        self.panes.remove(window)
    }

    fn windows(&self) -> Vec<W> {
        self.panes.keys()
    }

    fn clear(&mut self) {
        self.panes.clear();
    }
}

fn accumulators<W, A>(storage: &Storage) -> Box<dyn WindowAccumulators<W, A>>
where
    W: Window + 'static,
    A: Clone + Form + 'static,
{
    match storage {
        Storage::Transient => Box::new(TransientAccumulators::default()),
        Storage::Durable { provider, tag } => {
            Box::new(DurableAccumulators::new(provider, tag.clone()))
        }
    }
}

/// Accumulators of a reducing updater.
pub fn for_simple_state<W, T>(storage: &Storage) -> Box<dyn WindowAccumulators<W, Option<T>>>
where
    W: Window + 'static,
    T: Clone + Form + 'static,
{
    accumulators(storage)
}

/// Accumulators of a sorted-map updater.
pub fn for_map_state<W, K, T>(storage: &Storage) -> Box<dyn WindowAccumulators<W, BTreeMap<K, T>>>
where
    W: Window + 'static,
    K: Ord + Clone + Form + 'static,
    T: Clone + Form + 'static,
{
    accumulators(storage)
}

/// Accumulators of a sequence updater.
pub fn for_sequences_state<W, T>(storage: &Storage) -> Box<dyn WindowAccumulators<W, Vec<T>>>
where
    W: Window + 'static,
    T: Clone + Form + 'static,
{
    accumulators(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStore;
    use crate::window::CountWindow;

    #[test]
    fn durable_accumulators_survive_reopening() {
        let store = MemoryStore::new();
        let storage = Storage::durable(PersistenceProvider::memory(&store), StateTag::state(1));
        let window = CountWindow { first: 0, size: 2 };

        let mut panes = for_sequences_state::<CountWindow, i64>(&storage);
        panes.put(window, vec![1, 2]);
        drop(panes);

        let mut reopened = for_sequences_state::<CountWindow, i64>(&storage);
        assert_eq!(reopened.windows(), vec![window]);
        assert_eq!(reopened.get(&window), Some(vec![1, 2]));
        assert_eq!(reopened.remove(&window), Some(vec![1, 2]));
        assert!(reopened.windows().is_empty());
    }

    #[test]
    fn transient_accumulators_are_private() {
        let window = CountWindow { first: 0, size: 1 };
        let mut panes = for_simple_state::<CountWindow, f64>(&Storage::Transient);
        panes.put(window, Some(1.0));
        assert!(for_simple_state::<CountWindow, f64>(&Storage::Transient).get(&window).is_none());
        assert_eq!(panes.get(&window), Some(Some(1.0)));
    }
}
