//! A binary min-heap that supports removal of arbitrary entries.
//!
//! Same idea as [`std::collections::BinaryHeap`], but every insertion returns
//! a stable [`HeapKey`] through which that particular entry can later be
//! removed in O(log n), without scanning. Performance characteristics:
//!
//! * `insert`   O(log n)
//! * `remove`   O(log n), for *any* resident entry
//! * `peek`     O(1)
//!
//! The heap is laid out as an implicit complete tree in a `Vec`; a slot table
//! maps keys to current array positions and is updated on every sift swap.
//! Keys are generational: once an entry has left the heap (by `remove` or
//! `clear`), its key is permanently stale and can never alias an entry
//! inserted later. `remove` with a stale key is a no-op returning `None`.
//!
//! Values are owned by the heap and only handed back out on removal, so an
//! entry's ordering cannot change while it is resident.

/// Stable identity of one heap entry. Stays valid until the entry is removed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HeapKey {
    slot: u32,
    generation: u32,
}

struct Entry<T> {
    key: HeapKey,
    value: T,
}

#[derive(Clone, Copy)]
struct Slot {
    generation: u32,
    /// Current position in the entry array; `None` while the slot is free.
    pos: Option<u32>,
}

pub struct IndexedBinHeap<T> {
    entries: Vec<Entry<T>>,
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
}

impl<T: Ord> IndexedBinHeap<T> {
    pub fn new() -> IndexedBinHeap<T> {
        IndexedBinHeap {
            entries: Vec::new(),
            slots: Vec::new(),
            free_slots: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True iff the key's entry is still resident.
    pub fn contains(&self, key: HeapKey) -> bool {
        self.slots
            .get(key.slot as usize)
            .is_some_and(|slot| slot.generation == key.generation && slot.pos.is_some())
    }

    /// The smallest entry, or `None` if the heap is empty.
    pub fn peek(&self) -> Option<(HeapKey, &T)> {
        self.entries.first().map(|entry| (entry.key, &entry.value))
    }

    pub fn insert(&mut self, value: T) -> HeapKey {
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    pos: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let pos = self.entries.len();
        let key = HeapKey {
            slot,
            generation: self.slots[slot as usize].generation,
        };
        self.slots[slot as usize].pos = Some(pos as u32);
        self.entries.push(Entry { key, value });

        self.sift_up(pos);
        key
    }

    /// Removes the entry behind `key`, wherever it sits in the heap.
    ///
    /// Returns `None` if the key is stale, i.e. its entry was removed before
    /// (possibly by `clear`).
    pub fn remove(&mut self, key: HeapKey) -> Option<T> {
        let slot = self.slots.get_mut(key.slot as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let pos = slot.pos? as usize;

        slot.generation = slot.generation.wrapping_add(1);
        slot.pos = None;
        self.free_slots.push(key.slot);

        // Swap with the terminal entry, cut it off, then restore the heap
        // property for the replacement in both directions.
        let last = self.entries.len() - 1;
        self.entries.swap(pos, last);
        let removed = self.entries.pop().expect("resident key implies a non-empty heap");

        if pos < self.entries.len() {
            let moved_key = self.entries[pos].key;
            self.slots[moved_key.slot as usize].pos = Some(pos as u32);
            self.sift_down(pos);
            self.sift_up(pos);
        }

        Some(removed.value)
    }

    /// Drops all entries and invalidates all outstanding keys.
    pub fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            let slot = &mut self.slots[entry.key.slot as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.pos = None;
            self.free_slots.push(entry.key.slot);
        }
    }

    fn swap_entries(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        let key_a = self.entries[a].key;
        let key_b = self.entries[b].key;
        self.slots[key_a.slot as usize].pos = Some(a as u32);
        self.slots[key_b.slot as usize].pos = Some(b as u32);
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.entries[pos].value < self.entries[parent].value {
                self.swap_entries(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < self.entries.len() && self.entries[left].value < self.entries[smallest].value {
                smallest = left;
            }
            if right < self.entries.len() && self.entries[right].value < self.entries[smallest].value
            {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.swap_entries(pos, smallest);
            pos = smallest;
        }
    }

    /// Validate the internal structure completely. Use for testing only.
    #[cfg(test)]
    pub(crate) fn validate(&self) {
        for (pos, entry) in self.entries.iter().enumerate() {
            if pos > 0 {
                let parent = (pos - 1) / 2;
                assert!(
                    self.entries[parent].value <= entry.value,
                    "heap order violated at position {}",
                    pos
                );
            }

            let slot = &self.slots[entry.key.slot as usize];
            assert_eq!(slot.generation, entry.key.generation);
            assert_eq!(slot.pos, Some(pos as u32));
        }

        let resident = self.slots.iter().filter(|slot| slot.pos.is_some()).count();
        assert_eq!(resident, self.entries.len());
        assert_eq!(self.free_slots.len() + resident, self.slots.len());
        for &slot in &self.free_slots {
            assert!(self.slots[slot as usize].pos.is_none());
        }
    }
}

impl<T: Ord> Default for IndexedBinHeap<T> {
    fn default() -> Self {
        IndexedBinHeap::new()
    }
}
