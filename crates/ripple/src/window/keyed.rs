use super::{PaneManager, Storage, Window, WindowState};
use crate::schedule::Millis;
use crate::state::{SetPersister, StateTag};
use crate::value::Value;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Builds the pane manager of one key. Every key of a keyed stream shares
/// the same assigner, trigger and eviction setup.
pub struct KeyedWindowSpec<W, U> {
    build: Rc<dyn Fn(&Value, &Storage) -> PaneManager<Value, W, U>>,
    grace: Option<Millis>,
}

impl<W, U> KeyedWindowSpec<W, U> {
    /// `build` receives the key and the storage for that key's panes.
    pub fn new(build: impl Fn(&Value, &Storage) -> PaneManager<Value, W, U> + 'static) -> Self {
        Self {
            build: Rc::new(build),
            grace: None,
        }
    }

    /// Grace applied to every key's panes, overriding what `build` set.
    pub fn with_grace(mut self, grace: Millis) -> Self {
        self.grace = Some(grace);
        self
    }

    pub fn grace(&self) -> Option<Millis> {
        self.grace
    }
}

impl<W, U> Clone for KeyedWindowSpec<W, U> {
    fn clone(&self) -> Self {
        Self {
            build: self.build.clone(),
            grace: self.grace,
        }
    }
}

/// One lazily created [`PaneManager`] per observed key.
///
/// With durable storage the live-key set is persisted too, so per-key
/// managers are rehydrated on construction.
pub struct KeyedPaneManager<W, U> {
    spec: KeyedWindowSpec<W, U>,
    storage: Storage,
    managers: BTreeMap<Value, PaneManager<Value, W, U>>,
    live_keys: Option<SetPersister<Value>>,
}

impl<W: Window + 'static, U: 'static> KeyedPaneManager<W, U> {
    pub fn new(spec: KeyedWindowSpec<W, U>, storage: Storage) -> Self {
        let live_keys = match &storage {
            Storage::Transient => None,
            Storage::Durable { provider, tag } => Some(provider.for_set(tag.clone().slot("keys", None))),
        };
        let mut keyed = Self {
            spec,
            storage,
            managers: BTreeMap::new(),
            live_keys,
        };
        let stored: Vec<Value> = keyed
            .live_keys
            .as_ref()
            .map(|keys| keys.get().into_iter().collect())
            .unwrap_or_default();
        for key in stored {
            log::debug!("rehydrating panes of key {key}");
            let manager = keyed.build(&key);
            keyed.managers.insert(key, manager);
        }
        keyed
    }

    pub fn keys(&self) -> Vec<Value> {
        self.managers.keys().cloned().collect()
    }

    pub fn manager(&self, key: &Value) -> Option<&PaneManager<Value, W, U>> {
        self.managers.get(key)
    }

    pub fn process(&mut self, key: &Value, value: &Value, timestamp: Millis) -> Vec<(W, U)> {
        if !self.managers.contains_key(key) {
            let manager = self.build(key);
            self.managers.insert(key.clone(), manager);
            if let Some(live_keys) = &self.live_keys {
                live_keys.insert(key.clone());
            }
        }
        match self.managers.get_mut(key) {
            Some(manager) => manager.process(value, timestamp),
            None => Vec::new(),
        }
    }

    /// Close due windows of every key, in key order.
    pub fn close_due(&mut self, now: Millis) -> Vec<(Value, W, U)> {
        let mut emitted = Vec::new();
        for (key, manager) in &mut self.managers {
            for (window, result) in manager.close_due(now) {
                emitted.push((key.clone(), window, result));
            }
        }
        emitted
    }

    pub fn take_new_deadlines(&mut self) -> Vec<Millis> {
        self.managers
            .values_mut()
            .flat_map(|manager| manager.take_new_deadlines())
            .collect()
    }

    pub fn pending_deadlines(&self) -> Vec<Millis> {
        self.managers
            .values()
            .flat_map(|manager| manager.pending_deadlines())
            .collect()
    }

    /// Forget a key together with its panes and stored state.
    pub fn remove_key(&mut self, key: &Value) -> bool {
        let Some(mut manager) = self.managers.remove(key) else {
            return false;
        };
        manager.clear();
        if let Some(live_keys) = &self.live_keys {
            live_keys.remove(key);
        }
        true
    }

    fn build(&self, key: &Value) -> PaneManager<Value, W, U> {
        let manager = match &self.storage {
            Storage::Transient => (self.spec.build)(key, &Storage::Transient),
            Storage::Durable { provider, tag } => {
                let panes = self.storage.retag(slot(tag, "panes", key));
                let state = provider.for_value::<WindowState>(slot(tag, "assigner", key));
                (self.spec.build)(key, &panes).with_state_persister(state)
            }
        };
        match self.spec.grace {
            Some(grace) => manager.with_grace(grace),
            None => manager,
        }
    }
}

fn slot(tag: &StateTag, name: &str, key: &Value) -> StateTag {
    tag.clone().slot(name, Some(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MemoryStore, PersistenceProvider};
    use crate::window::{
        CountWindow, CountWindows, IdentityEvaluator, NoOpEvictor, OnClose, ReduceUpdater, for_simple_state,
    };

    fn spec() -> KeyedWindowSpec<CountWindow, Value> {
        KeyedWindowSpec::new(|_key, storage| {
            PaneManager::new(
                CountWindows::tumbling(2).unwrap(),
                OnClose,
                ReduceUpdater::new(Value::plus),
                NoOpEvictor,
                IdentityEvaluator,
                for_simple_state(storage),
            )
        })
    }

    #[test]
    fn keys_are_created_lazily() {
        let mut keyed = KeyedPaneManager::new(spec(), Storage::Transient);
        keyed.process(&"a".into(), &1.into(), 0);
        assert_eq!(keyed.keys(), vec![Value::from("a")]);
        keyed.process(&"b".into(), &2.into(), 0);
        let emitted = keyed.process(&"a".into(), &3.into(), 0);
        assert_eq!(emitted, vec![(CountWindow { first: 0, size: 2 }, Value::from(4))]);
        assert_eq!(keyed.keys(), vec![Value::from("a"), Value::from("b")]);

        assert!(keyed.remove_key(&"a".into()));
        assert!(!keyed.remove_key(&"a".into()));
        assert_eq!(keyed.keys(), vec![Value::from("b")]);
    }

    #[test]
    fn durable_keys_and_panes_are_rehydrated() {
        let store = MemoryStore::new();
        let storage = Storage::durable(PersistenceProvider::memory(&store), StateTag::state(9));

        let mut keyed = KeyedPaneManager::new(spec(), storage.clone());
        keyed.process(&"a".into(), &1.into(), 0);
        keyed.process(&"b".into(), &10.into(), 0);
        drop(keyed);

        let mut restarted = KeyedPaneManager::new(spec(), storage);
        assert_eq!(restarted.keys(), vec![Value::from("a"), Value::from("b")]);
        let emitted = restarted.process(&"b".into(), &5.into(), 0);
        assert_eq!(emitted, vec![(CountWindow { first: 0, size: 2 }, Value::from(15))]);
    }
}
