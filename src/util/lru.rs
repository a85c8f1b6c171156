//! A fixed-capacity LRU map with pre-allocated value slots.

use generic_array::{ArrayLength, GenericArray};
use typenum::marker_traits::Unsigned;

const NIL: u8 = 0xFF;

/// One slot: key, recency links, and the value storage itself.
pub struct Slot<V> {
    key: u32,
    prev: u8,
    next: u8,
    used: bool,
    value: V,
}

impl<V: Default> Default for Slot<V> {
    fn default() -> Self {
        Self { key: 0, prev: NIL, next: NIL, used: false, value: V::default() }
    }
}

/// Fixed-capacity LRU keyed by `u32`.
///
/// All storage is allocated up front; recency is a doubly-linked list of slot
/// indices, so hits and evictions never move the values themselves.
pub struct LruCache<V, N>
where
    V: Default,
    N: ArrayLength<Slot<V>>,
{
    slots: GenericArray<Slot<V>, N>,
    head: u8, // most recently used
    tail: u8, // least recently used
    len: u8,
}

impl<V, N> LruCache<V, N>
where
    V: Default,
    N: ArrayLength<Slot<V>>,
{
    pub fn new() -> Self {
        debug_assert!(N::to_usize() < NIL as usize);

        Self {
            slots: GenericArray::default(),
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        N::to_usize()
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn find(&self, key: u32) -> Option<usize> {
        // N is small; a linear scan beats maintaining a separate index
        self.slots.as_slice().iter().position(|s| s.used && s.key == key)
    }

    fn unlink(&mut self, i: usize) {
        let slots = self.slots.as_mut_slice();
        let prev = slots[i].prev;
        let next = slots[i].next;

        if prev == NIL { self.head = next; } else { slots[prev as usize].next = next; }
        if next == NIL { self.tail = prev; } else { slots[next as usize].prev = prev; }

        slots[i].prev = NIL;
        slots[i].next = NIL;
    }

    fn push_front(&mut self, i: usize) {
        let slots = self.slots.as_mut_slice();
        slots[i].prev = NIL;
        slots[i].next = self.head;

        if self.head != NIL {
            slots[self.head as usize].prev = i as u8;
        }
        self.head = i as u8;

        if self.tail == NIL {
            self.tail = i as u8;
        }
    }

    fn touch(&mut self, i: usize) {
        if self.head != i as u8 {
            self.unlink(i);
            self.push_front(i);
        }
    }

    /// Look a key up, refreshing its recency on a hit.
    pub fn get(&mut self, key: u32) -> Option<&V> {
        let i = self.find(key)?;
        self.touch(i);
        Some(&self.slots.as_slice()[i].value)
    }

    /// Hand out the slot for `key`, evicting the least-recently-used entry if
    /// the cache is full. The second value is `true` when the slot is new;
    /// its contents are then whatever the previous occupant left behind and
    /// the caller is expected to write them in place.
    pub fn get_or_create(&mut self, key: u32) -> (&mut V, bool) {
        if let Some(i) = self.find(key) {
            self.touch(i);
            return (&mut self.slots.as_mut_slice()[i].value, false);
        }

        let i = if (self.len as usize) < self.capacity() {
            let i = self
                .slots
                .as_slice()
                .iter()
                .position(|s| !s.used)
                .unwrap_or(0);
            self.len += 1;
            i
        } else {
            let i = self.tail as usize;
            self.unlink(i);
            i
        };

        {
            let s = &mut self.slots.as_mut_slice()[i];
            s.key = key;
            s.used = true;
        }
        self.push_front(i);

        (&mut self.slots.as_mut_slice()[i].value, true)
    }

    /// Copy `value` in under `key` and return the stored slot.
    pub fn insert(&mut self, key: u32, value: &V) -> &mut V
    where
        V: Clone,
    {
        let (slot, _) = self.get_or_create(key);
        slot.clone_from(value);
        slot
    }

    /// Returns whether the key was present.
    pub fn remove(&mut self, key: u32) -> bool {
        match self.find(key) {
            Some(i) => {
                self.unlink(i);
                self.slots.as_mut_slice()[i].used = false;
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        for s in self.slots.as_mut_slice().iter_mut() {
            s.used = false;
            s.prev = NIL;
            s.next = NIL;
        }
        self.head = NIL;
        self.tail = NIL;
        self.len = 0;
    }
}

#[cfg(test)]
mod lru {
    use super::*;
    use typenum::consts::U4;

    use assert_eq as eq;

    #[test]
    fn fill_and_evict_in_access_order() {
        let mut c: LruCache<u32, U4> = LruCache::new();
        eq!(c.capacity(), 4);

        for k in 1..=4 {
            c.insert(k, &(k * 10));
        }
        eq!(c.len(), 4);

        // Refresh 1, then overflow twice: 2 and 3 are now the oldest.
        eq!(c.get(1), Some(&10));
        c.insert(5, &50);
        c.insert(6, &60);

        eq!(c.len(), 4);
        eq!(c.get(2), None);
        eq!(c.get(3), None);
        eq!(c.get(1), Some(&10));
        eq!(c.get(5), Some(&50));
        eq!(c.get(6), Some(&60));
    }

    #[test]
    fn overwrite_refreshes() {
        let mut c: LruCache<u32, U4> = LruCache::new();

        for k in 1..=4 {
            c.insert(k, &k);
        }
        c.insert(1, &100);
        c.insert(5, &5);

        // 2 was the LRU once 1 got rewritten.
        eq!(c.get(2), None);
        eq!(c.get(1), Some(&100));
    }

    #[test]
    fn get_or_create_flags_new_slots() {
        let mut c: LruCache<u32, U4> = LruCache::new();

        let (slot, new) = c.get_or_create(9);
        assert!(new);
        *slot = 99;

        let (slot, new) = c.get_or_create(9);
        assert!(!new);
        eq!(*slot, 99);
    }

    #[test]
    fn remove_and_reuse() {
        let mut c: LruCache<u32, U4> = LruCache::new();

        for k in 1..=4 {
            c.insert(k, &k);
        }
        assert!(c.remove(3));
        assert!(!c.remove(3));
        eq!(c.len(), 3);

        c.insert(7, &7);
        eq!(c.len(), 4);
        eq!(c.get(7), Some(&7));
        eq!(c.get(1), Some(&1));
    }

    #[test]
    fn clear_empties() {
        let mut c: LruCache<u32, U4> = LruCache::new();
        c.insert(1, &1);
        c.clear();

        eq!(c.len(), 0);
        eq!(c.get(1), None);
    }
}
