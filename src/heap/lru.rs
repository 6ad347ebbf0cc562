use ahash::AHashMap;

const NIL: usize = usize::MAX;

struct Slot<V> {
    key: u32,
    value: V,
    prev: usize,
    next: usize,
}

/// Bounded LRU keyed by dense object id, backing the object store in indexed
/// mode. Slots live in an arena and are linked by index, so eviction and
/// promotion never reallocate.
pub struct LruCache<V> {
    capacity: usize,
    map: AHashMap<u32, usize>,
    slots: Vec<Slot<V>>,
    head: usize,
    tail: usize,
    free: Vec<usize>,
}

impl<V> LruCache<V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        LruCache {
            capacity,
            map: AHashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            head: NIL,
            tail: NIL,
            free: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn detach(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slots[next].prev = prev;
        }
    }

    fn push_front(&mut self, slot: usize) {
        self.slots[slot].prev = NIL;
        self.slots[slot].next = self.head;
        if self.head != NIL {
            self.slots[self.head].prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    pub fn get(&mut self, key: u32) -> Option<&V> {
        let slot = *self.map.get(&key)?;
        self.detach(slot);
        self.push_front(slot);
        Some(&self.slots[slot].value)
    }

    pub fn get_mut(&mut self, key: u32) -> Option<&mut V> {
        let slot = *self.map.get(&key)?;
        self.detach(slot);
        self.push_front(slot);
        Some(&mut self.slots[slot].value)
    }

    pub fn contains(&self, key: u32) -> bool {
        self.map.contains_key(&key)
    }

    pub fn insert(&mut self, key: u32, value: V) {
        if let Some(&slot) = self.map.get(&key) {
            self.slots[slot].value = value;
            self.detach(slot);
            self.push_front(slot);
            return;
        }
        if self.map.len() == self.capacity {
            let victim = self.tail;
            self.detach(victim);
            self.map.remove(&self.slots[victim].key);
            self.free.push(victim);
        }
        let slot = match self.free.pop() {
            Some(reused) => {
                self.slots[reused].key = key;
                self.slots[reused].value = value;
                reused
            }
            None => {
                self.slots.push(Slot {
                    key,
                    value,
                    prev: NIL,
                    next: NIL,
                });
                self.slots.len() - 1
            }
        };
        self.map.insert(key, slot);
        self.push_front(slot);
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert(1, "a");
        cache.insert(2, "b");
        cache.insert(3, "c");
        assert!(!cache.contains(1));
        assert!(cache.contains(2));
        assert!(cache.contains(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn get_promotes_entry() {
        let mut cache = LruCache::new(2);
        cache.insert(1, "a");
        cache.insert(2, "b");
        assert_eq!(cache.get(1), Some(&"a"));
        cache.insert(3, "c");
        // 2 was least recently used after the get(1) promotion
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
    }

    #[test]
    fn reinsert_replaces_value() {
        let mut cache = LruCache::new(2);
        cache.insert(1, "a");
        cache.insert(1, "z");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(1), Some(&"z"));
    }

    #[test]
    fn capacity_one() {
        let mut cache = LruCache::new(1);
        for key in 0..10 {
            cache.insert(key, key);
            assert_eq!(cache.len(), 1);
            assert_eq!(cache.get(key), Some(&key));
        }
    }

    #[test]
    fn clear_resets_everything() {
        let mut cache = LruCache::new(4);
        cache.insert(1, "a");
        cache.insert(2, "b");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get(1), None);
        cache.insert(3, "c");
        assert_eq!(cache.get(3), Some(&"c"));
    }
}
