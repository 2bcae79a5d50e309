//! Generational arena shared by the outlet graph and the conduit flow.

use std::fmt;

/// Generational index into an [`Arena`].
/// Allows safe reuse of slots with use-after-free detection.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId {
    pub index: u32,
    pub generation: u32,
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

struct Entry<T> {
    generation: u32,
    item: Option<T>,
}

pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    free_list: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Allocate a slot for `item`, reusing a freed slot when possible.
    pub fn insert(&mut self, item: T) -> SlotId {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let entry = &mut self.entries[index as usize];
            entry.item = Some(item);
            SlotId {
                index,
                generation: entry.generation,
            }
        } else {
            let index = self.entries.len() as u32;
            self.entries.push(Entry {
                generation: 0,
                item: Some(item),
            });
            SlotId { index, generation: 0 }
        }
    }

    /// Free a slot. The generation is bumped immediately so stale ids stop resolving.
    pub fn remove(&mut self, slot: SlotId) -> Option<T> {
        if !self.contains(slot) {
            return None;
        }
        let entry = &mut self.entries[slot.index as usize];
        entry.generation += 1;
        self.free_list.push(slot.index);
        self.live -= 1;
        entry.item.take()
    }

    pub fn contains(&self, slot: SlotId) -> bool {
        self.entries
            .get(slot.index as usize)
            .is_some_and(|entry| entry.generation == slot.generation && entry.item.is_some())
    }

    pub fn get(&self, slot: SlotId) -> Option<&T> {
        self.entries
            .get(slot.index as usize)
            .filter(|entry| entry.generation == slot.generation)
            .and_then(|entry| entry.item.as_ref())
    }

    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut T> {
        self.entries
            .get_mut(slot.index as usize)
            .filter(|entry| entry.generation == slot.generation)
            .and_then(|entry| entry.item.as_mut())
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            entry.item.as_ref().map(|item| {
                (
                    SlotId {
                        index: index as u32,
                        generation: entry.generation,
                    },
                    item,
                )
            })
        })
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_insert_and_remove() {
        let mut arena = Arena::new();

        let slot1 = arena.insert("a");
        let slot2 = arena.insert("b");
        assert_ne!(slot1, slot2);
        assert_eq!(arena.len(), 2);

        assert_eq!(arena.remove(slot1), Some("a"));
        assert!(!arena.contains(slot1));
        assert_eq!(arena.len(), 1);

        // Reuse freed slot
        let slot3 = arena.insert("c");
        assert_eq!(slot3.index, slot1.index);
        assert_ne!(slot3.generation, slot1.generation);
    }

    #[test]
    fn arena_generation_check() {
        let mut arena = Arena::new();

        let slot1 = arena.insert(1);
        arena.remove(slot1);
        let slot2 = arena.insert(2);

        // Old slot ID should be invalid
        assert_eq!(arena.get(slot1), None);
        assert_eq!(arena.get(slot2), Some(&2));
        assert_eq!(arena.remove(slot1), None);
    }
}
