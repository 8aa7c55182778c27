/// An implementation of an LRU (Least Recently Used) cache.
///
use std::{collections::HashMap, fmt::Debug, hash::Hash, sync::Arc};

use parking_lot::Mutex;

use crate::errors::Result;

/// An LRU (least recently used) cache.
///
/// Values must implement ``Cacheable``, which self reports size, intended to
/// be the number of bytes (more or less) an object takes up in memory. We use
/// the number of bytes in the serialized representation, which is close
/// enough.
///
/// The ``limit`` is passed in when instantiating the Cache. When an object is
/// added to the cache which causes the total size of objects stored in the
/// cache to exceed the limit, objects are evicted from the cache until the
/// total size is back under the limit, in least recently used order.
///
/// The cache is thread safe. Loads are performed outside the cache lock; two
/// threads racing on the same missing key may both load it, and the loser's
/// copy is dropped when the winner's lands. Loads here come from a
/// seek-then-read on a file handle that is itself behind a mutex, so the race
/// costs one redundant read at worst.
pub struct Cache<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    recent: Mutex<Entries<K, V>>,
}

/// A trait for objects that can be cached
///
/// Cacheable objects must be able to self report their size via the ``size``
/// method.
///
pub trait Cacheable: Sized {
    /// Return the number of bytes in the serialized representation
    fn size(&self) -> u64;
}

/// A structure containing the entries stored in this cache.
///
/// Entries are directly accessible via ``map`` and also stored in a doubly
/// linked list where ``most_recent`` and ``least_recent`` are the two ends.
///
struct Entries<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    /// Sum of sizes of all entries must stay below this limit. If adding a
    /// new entry to the cache causes this limit to be exceeded, entries are
    /// evicted from the cache, starting with the ``least_recent`` end of the
    /// linked list structure.
    limit: u64,

    /// Current sum of sizes of all entries.
    size: u64,

    /// Direct mapping from key to cache entry
    map: HashMap<K, CacheEntry<K, V>>,

    /// The most recently used key
    most_recent: Option<K>,

    /// The least recently used key
    least_recent: Option<K>,
}

/// An entry in the cache
struct CacheEntry<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    /// The key for the object in this entry
    key: K,

    /// The object stored by this entry
    object: Arc<V>,

    /// The next more recent key
    more_recent: Option<K>,

    /// The next less recent key
    less_recent: Option<K>,

    /// The size of this entry, as reported by the object's
    /// ``Cacheable::size`` method
    size: u64,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    /// Instantiate an empty cache with given size limit.
    ///
    pub fn new(limit: u64) -> Self {
        let recent = Mutex::new(Entries {
            limit,
            size: 0,
            map: HashMap::new(),
            most_recent: None,
            least_recent: None,
        });

        Self { recent }
    }

    /// Check if an object is already stored in the cache. If it is, move it
    /// to the most recently used position and return a new reference to it.
    ///
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut entries = self.recent.lock();
        let entry = entries.remove(key);
        match entry {
            None => None,
            Some(entry) => {
                let object = Arc::clone(&entry.object);
                entries.push_most_recent(entry);
                Some(object)
            }
        }
    }

    /// Get an object by key, calling ``load`` to produce it on a cache miss
    /// and storing the result.
    ///
    pub fn get_or_load<F>(&self, key: K, load: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(object) = self.get(&key) {
            return Ok(object);
        }

        let object = Arc::new(load()?);
        self.recent.lock().insert(key, &object);

        Ok(object)
    }
}

impl<K, V> Entries<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    /// Move an entry to the most recently used spot in the linked list.
    ///
    fn push_most_recent(&mut self, entry: CacheEntry<K, V>) {
        let old_head_key = self.most_recent;

        // Try to short circuit this operation
        if let Some(old_head_key) = old_head_key {
            if old_head_key == entry.key {
                // Already at head, nothing to do
                self.map.insert(entry.key, entry);
                return;
            }

            // The old head needs to be updated to point to new head in the
            // more recent link
            if let Some(old_head) = self.map.remove(&old_head_key) {
                let less_recent = old_head.less_recent;
                let old_head = old_head.update(Some(entry.key), less_recent);
                self.map.insert(old_head_key, old_head);
            }
        }

        let entry = entry.update(None, old_head_key);
        self.most_recent = Some(entry.key);
        if self.least_recent.is_none() {
            // This is only object in the list, so it is also the tail
            self.least_recent = Some(entry.key);
        }
        self.map.insert(entry.key, entry);
    }

    /// Remove an entry from the cache
    ///
    fn remove(&mut self, key: &K) -> Option<CacheEntry<K, V>> {
        match self.map.remove(key) {
            None => None,
            Some(entry) => {
                if self.most_recent == Some(entry.key) {
                    self.most_recent = entry.less_recent;
                }

                if self.least_recent == Some(entry.key) {
                    self.least_recent = entry.more_recent;
                }

                if let Some(key) = entry.less_recent {
                    if let Some(less_recent) = self.map.remove(&key) {
                        let less_recent_less_recent = less_recent.less_recent;
                        let less_recent =
                            less_recent.update(entry.more_recent, less_recent_less_recent);
                        self.map.insert(key, less_recent);
                    }
                }

                if let Some(key) = entry.more_recent {
                    if let Some(more_recent) = self.map.remove(&key) {
                        let more_recent_more_recent = more_recent.more_recent;
                        let more_recent =
                            more_recent.update(more_recent_more_recent, entry.less_recent);
                        self.map.insert(key, more_recent);
                    }
                }

                Some(entry)
            }
        }
    }

    /// Add a new object to the cache.
    ///
    /// If the addition of this object causes ``size`` to exceed ``limit``,
    /// entries will be evicted until ``size`` is at or below ``limit`` again
    /// before returning.
    ///
    fn insert(&mut self, key: K, object: &Arc<V>) {
        if let Some(existing) = self.remove(&key) {
            // A racing load beat us here; keep the newer object.
            self.size -= existing.size;
        }
        let entry = CacheEntry::new(key, object);
        self.size += entry.size;
        self.push_most_recent(entry);

        // Enforce size limit by removing objects from tail (least recent)
        // until size is within limit
        while self.size > self.limit {
            let tail = match self.least_recent {
                Some(tail) => tail,
                None => break,
            };
            match self.remove(&tail) {
                Some(evicted) => self.size -= evicted.size,
                None => break,
            }
        }
    }
}

impl<K, V> CacheEntry<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    fn new(key: K, object: &Arc<V>) -> Self {
        Self {
            key,
            object: Arc::clone(object),
            more_recent: None,
            less_recent: None,
            size: object.size(),
        }
    }

    /// Create a copy of this cache entry with updated links to next entries
    /// in chain.
    ///
    fn update(self, more_recent: Option<K>, less_recent: Option<K>) -> Self {
        Self {
            key: self.key,
            object: self.object,
            more_recent,
            less_recent,
            size: self.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyValue {
        value: u32,
        size: u64,
    }

    impl DummyValue {
        fn new(value: u32, size: u64) -> Self {
            DummyValue { value, size }
        }
    }

    impl Cacheable for DummyValue {
        fn size(&self) -> u64 {
            self.size
        }
    }

    fn collect_linked_list(recent: &Entries<u32, DummyValue>) -> Vec<u32> {
        // From front to back
        let mut frontwise: Vec<u32> = vec![];
        let mut current = &recent.most_recent;
        loop {
            let next = match *current {
                None => break,
                Some(key) => {
                    let node = recent.map.get(&key).expect("Missing key {key:?}");
                    frontwise.push(node.object.value);
                    &node.less_recent
                }
            };
            current = next;
        }

        // From back to front
        let mut backwise: Vec<u32> = vec![];
        let mut current = &recent.least_recent;
        loop {
            let next = match *current {
                None => break,
                Some(key) => {
                    let node = recent.map.get(&key).expect("Missing key {key:?}");
                    backwise.push(node.object.value);
                    &node.more_recent
                }
            };
            current = next;
        }
        backwise.reverse();

        assert_eq!(frontwise, backwise);

        frontwise
    }

    #[test]
    fn test_common_use() -> Result<()> {
        let cache: Cache<u32, DummyValue> = Cache::new(100);
        let load = |key: u32| move || Ok(DummyValue::new(key, 25));

        assert_eq!(cache.get_or_load(1, load(1))?.value, 1);
        {
            let recent = cache.recent.lock();
            assert_eq!(recent.size, 25);
            assert_eq!(recent.map.len(), 1);
            assert_eq!(collect_linked_list(&recent), vec![1]);
        }

        let never = || -> Result<DummyValue> { panic!("I shouldn't get called") };
        assert_eq!(cache.get_or_load(1, never)?.value, 1);

        assert_eq!(cache.get_or_load(2, load(2))?.value, 2);
        {
            let recent = cache.recent.lock();
            assert_eq!(recent.size, 50);
            assert_eq!(recent.map.len(), 2);
            assert_eq!(collect_linked_list(&recent), vec![2, 1]);
        }

        assert_eq!(cache.get_or_load(3, load(3))?.value, 3);
        assert_eq!(cache.get_or_load(4, load(4))?.value, 4);
        {
            let recent = cache.recent.lock();
            assert_eq!(recent.size, 100);
            assert_eq!(recent.map.len(), 4);
            assert_eq!(collect_linked_list(&recent), vec![4, 3, 2, 1]);
        }

        assert_eq!(cache.get_or_load(3, never)?.value, 3);
        {
            let recent = cache.recent.lock();
            assert_eq!(collect_linked_list(&recent), vec![3, 4, 2, 1]);
        }

        assert_eq!(cache.get_or_load(1, never)?.value, 1);
        {
            let recent = cache.recent.lock();
            assert_eq!(collect_linked_list(&recent), vec![1, 3, 4, 2]);
        }

        // Cache is now full, next load should push 4 and 2 out
        assert_eq!(cache.get_or_load(5, || Ok(DummyValue::new(5, 50)))?.value, 5);
        {
            let recent = cache.recent.lock();
            assert_eq!(recent.size, 100);
            assert_eq!(recent.map.len(), 3);
            assert_eq!(collect_linked_list(&recent), vec![5, 1, 3]);
        }

        // This will obliterate the cache
        assert_eq!(cache.get_or_load(7, || Ok(DummyValue::new(7, 101)))?.value, 7);
        {
            let recent = cache.recent.lock();
            assert_eq!(recent.size, 0);
            assert_eq!(recent.map.len(), 0);
            assert!(recent.most_recent.is_none());
            assert!(recent.least_recent.is_none());
        }

        Ok(())
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let cache: Cache<u32, DummyValue> = Cache::new(100);
        let result = cache.get_or_load(1, || Err(crate::errors::Error::BadName("nope".into())));
        assert!(result.is_err());

        assert!(cache.get(&1).is_none());
        assert_eq!(
            cache.get_or_load(1, || Ok(DummyValue::new(1, 10))).unwrap().value,
            1
        );
    }
}
