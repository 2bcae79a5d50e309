use super::store::{MemoryStore, Store, StoreError};
use super::tag::StateTag;
use crate::form::Form;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::rc::Rc;

/// Hands out typed persisters over a shared [`Store`].
///
/// # Panics
///
/// Persisters panic when the underlying store fails on I/O. A failed write
/// aborts the propagation pass in flight, and the flow has to be rebuilt.
/// Stored data that no longer decodes is logged and treated as missing.
#[derive(Clone)]
pub struct PersistenceProvider {
    store: Rc<dyn Store>,
}

impl PersistenceProvider {
    pub fn new(store: impl Store + 'static) -> Self {
        Self {
            store: Rc::new(store),
        }
    }

    pub fn memory(store: &MemoryStore) -> Self {
        Self::new(store.clone())
    }

    pub fn for_value<T: Form>(&self, tag: StateTag) -> ValuePersister<T> {
        ValuePersister {
            cell: Persisted::new(self.store.clone(), tag),
            _type: PhantomData,
        }
    }

    pub fn for_list<T: Form>(&self, tag: StateTag) -> ListPersister<T> {
        ListPersister {
            cell: Persisted::new(self.store.clone(), tag),
            _type: PhantomData,
        }
    }

    pub fn for_set<T: Form + Ord>(&self, tag: StateTag) -> SetPersister<T> {
        SetPersister {
            cell: Persisted::new(self.store.clone(), tag),
            _type: PhantomData,
        }
    }

    pub fn for_map<K: Form + Ord, V: Form>(&self, tag: StateTag) -> MapPersister<K, V> {
        MapPersister {
            cell: Persisted::new(self.store.clone(), tag),
            _type: PhantomData,
        }
    }
}

/// One tagged cell in the store.
#[derive(Clone)]
struct Persisted {
    store: Rc<dyn Store>,
    tag: StateTag,
}

impl Persisted {
    fn new(store: Rc<dyn Store>, tag: StateTag) -> Self {
        Self { store, tag }
    }

    fn read<T: Form>(&self) -> Option<T> {
        let value = match self.store.load(&self.tag) {
            Ok(value) => value?,
            Err(error @ StoreError::Json { .. }) => {
                log::warn!("ignoring unreadable state {}: {error}", self.tag);
                return None;
            }
            Err(error) => panic!("failed to load state {}: {error}", self.tag),
        };
        let cast = T::cast(&value);
        if cast.is_none() {
            log::warn!("ignoring state {} that does not match its form: {value}", self.tag);
        }
        cast
    }

    fn write<T: Form>(&self, value: &T) {
        if let Err(error) = self.store.save(&self.tag, &value.mold()) {
            panic!("failed to save state {}: {error}", self.tag);
        }
    }

    fn clear(&self) {
        if let Err(error) = self.store.remove(&self.tag) {
            panic!("failed to remove state {}: {error}", self.tag);
        }
    }
}

pub struct ValuePersister<T> {
    cell: Persisted,
    _type: PhantomData<T>,
}

impl<T: Form> ValuePersister<T> {
    pub fn tag(&self) -> &StateTag {
        &self.cell.tag
    }

    pub fn get(&self) -> Option<T> {
        self.cell.read()
    }

    pub fn set(&self, value: &T) {
        self.cell.write(value);
    }

    /// Read, transform, write back. Returns the stored value.
    pub fn update(&self, f: impl FnOnce(Option<T>) -> T) -> T {
        let value = f(self.get());
        self.set(&value);
        value
    }

    pub fn clear(&self) {
        self.cell.clear();
    }
}

pub struct ListPersister<T> {
    cell: Persisted,
    _type: PhantomData<T>,
}

impl<T: Form> ListPersister<T> {
    pub fn get(&self) -> Vec<T> {
        self.cell.read().unwrap_or_default()
    }

    pub fn set(&self, items: Vec<T>) {
        self.cell.write(&items);
    }

    pub fn push(&self, item: T) {
        let mut items = self.get();
        items.push(item);
        self.set(items);
    }

    pub fn update(&self, f: impl FnOnce(&mut Vec<T>)) {
        let mut items = self.get();
        f(&mut items);
        self.set(items);
    }

    pub fn len(&self) -> usize {
        self.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cell.clear();
    }
}

pub struct SetPersister<T> {
    cell: Persisted,
    _type: PhantomData<T>,
}

impl<T: Form + Ord> SetPersister<T> {
    pub fn get(&self) -> BTreeSet<T> {
        self.cell.read().unwrap_or_default()
    }

    /// Returns true when `item` was not yet present.
    pub fn insert(&self, item: T) -> bool {
        let mut items = self.get();
        let inserted = items.insert(item);
        if inserted {
            self.cell.write(&items);
        }
        inserted
    }

    pub fn remove(&self, item: &T) -> bool {
        let mut items = self.get();
        let removed = items.remove(item);
        if removed {
            self.cell.write(&items);
        }
        removed
    }

    pub fn contains(&self, item: &T) -> bool {
        self.get().contains(item)
    }

    pub fn len(&self) -> usize {
        self.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cell.clear();
    }
}

/// A map persisted one entry per tag, with the key set kept under the base
/// tag. Updating an existing key writes only that entry.
pub struct MapPersister<K, V> {
    cell: Persisted,
    _type: PhantomData<(K, V)>,
}

impl<K: Form + Ord, V: Form> MapPersister<K, V> {
    /// `{entries: <base key>, entry: <key>}` under the base element and kind.
    fn entry(&self, key: &K) -> Persisted {
        let base = &self.cell.tag;
        let mut tag = StateTag::new(base.element, base.kind);
        tag.key = Some(Value::record([
            ("entries", base.key.clone().unwrap_or_default()),
            ("entry", key.mold()),
        ]));
        Persisted::new(self.cell.store.clone(), tag)
    }

    fn index(&self) -> BTreeSet<K> {
        self.cell.read().unwrap_or_default()
    }

    pub fn entries(&self) -> BTreeMap<K, V> {
        self.index()
            .into_iter()
            .filter_map(|key| {
                let value = self.entry(&key).read()?;
                Some((key, value))
            })
            .collect()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entry(key).read()
    }

    pub fn insert(&self, key: K, value: V) {
        self.entry(&key).write(&value);
        let mut index = self.index();
        if index.insert(key) {
            self.cell.write(&index);
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let entry = self.entry(key);
        let removed = entry.read();
        let mut index = self.index();
        if index.remove(key) {
            entry.clear();
            self.cell.write(&index);
        }
        removed
    }

    pub fn keys(&self) -> Vec<K> {
        self.index().into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for key in self.index() {
            self.entry(&key).clear();
        }
        self.cell.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FileStore;

    #[test]
    fn value_persister_updates_in_place() {
        let store = MemoryStore::new();
        let provider = PersistenceProvider::memory(&store);
        let counter = provider.for_value::<i64>(StateTag::state(1));
        assert_eq!(counter.get(), None);
        assert_eq!(counter.update(|n| n.unwrap_or(0) + 1), 1);
        assert_eq!(counter.update(|n| n.unwrap_or(0) + 1), 2);

        let reopened = PersistenceProvider::memory(&store).for_value::<i64>(StateTag::state(1));
        assert_eq!(reopened.get(), Some(2));
    }

    #[test]
    fn mismatched_state_is_ignored() {
        let store = MemoryStore::new();
        let provider = PersistenceProvider::memory(&store);
        provider.for_value::<String>(StateTag::mode(1)).set(&"fast".to_string());
        assert_eq!(provider.for_value::<bool>(StateTag::mode(1)).get(), None);
    }

    #[test]
    fn collections() {
        let provider = PersistenceProvider::memory(&MemoryStore::new());

        let list = provider.for_list::<i64>(StateTag::state(1));
        list.push(3);
        list.push(1);
        assert_eq!(list.get(), vec![3, 1]);

        let set = provider.for_set::<String>(StateTag::state(2));
        assert!(set.insert("b".into()));
        assert!(set.insert("a".into()));
        assert!(!set.insert("a".into()));
        assert_eq!(set.get().into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(set.remove(&"a".to_string()));
        assert_eq!(set.len(), 1);

        let map = provider.for_map::<String, f64>(StateTag::state(3));
        map.insert("x".into(), 1.5);
        map.insert("y".into(), 2.0);
        assert_eq!(map.get(&"x".to_string()), Some(1.5));
        assert_eq!(map.remove(&"x".to_string()), Some(1.5));
        assert_eq!(map.keys(), vec!["y".to_string()]);
    }

    #[test]
    fn map_entries_are_stored_apart() {
        let store = MemoryStore::new();
        let map = PersistenceProvider::memory(&store).for_map::<String, i64>(StateTag::state(4).slot("panes", None));
        map.insert("a".into(), 1);
        map.insert("b".into(), 2);
        // Two entries plus the key index.
        assert_eq!(store.len(), 3);

        map.insert("a".into(), 10);
        assert_eq!(store.len(), 3);
        let reopened = PersistenceProvider::memory(&store).for_map::<String, i64>(StateTag::state(4).slot("panes", None));
        assert_eq!(
            reopened.entries(),
            BTreeMap::from([("a".to_string(), 10), ("b".to_string(), 2)])
        );

        assert_eq!(reopened.remove(&"b".to_string()), Some(2));
        assert_eq!(store.len(), 2);
        reopened.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn non_finite_values_reload_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let open = || PersistenceProvider::new(FileStore::new(dir.path()).unwrap());
        open().for_value::<Value>(StateTag::state(1)).set(&Value::number(f64::INFINITY));
        assert_eq!(
            open().for_value::<Value>(StateTag::state(1)).get(),
            Some(Value::number(f64::INFINITY))
        );
    }

    #[test]
    fn unreadable_files_count_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2-state.json"), "{not json").unwrap();
        let provider = PersistenceProvider::new(FileStore::new(dir.path()).unwrap());
        assert_eq!(provider.for_value::<i64>(StateTag::state(2)).get(), None);
    }
}
