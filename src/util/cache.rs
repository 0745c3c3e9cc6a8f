use crate::obj::slice::Slice;
use crate::util::hash::hash;
use ahash::AHashMap;
use crossbeam::utils::CachePadded;
use lru::LruCache;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

/// entry 既已移出 cache、又没有任何 handle 引用时调用，每个 entry 恰好一次
pub type Deleter<V> = Box<dyn FnOnce(&Slice, &V) + Send>;

pub struct CacheEntry<V> {
    key: Slice,
    value: V,
    charge: usize,
    deleter: Mutex<Option<Deleter<V>>>,
}

impl<V> Drop for CacheEntry<V> {
    fn drop(&mut self) {
        let deleter = match self.deleter.get_mut() {
            Ok(deleter) => deleter.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(deleter) = deleter {
            deleter(&self.key, &self.value);
        }
    }
}

// 分片内部记录：refs 是外部 handle 数，refs == 0 的 entry 挂在 lru 上，可被淘汰
struct LRUHandle<V> {
    entry: Arc<CacheEntry<V>>,
    refs: usize,
}

struct LRUCacheInner<V> {
    capacity: usize,
    usage: usize,
    map: AHashMap<Slice, LRUHandle<V>>,
    // 只放未被引用的 key，最久未使用的在尾部
    lru: LruCache<Slice, ()>,
}

impl<V> LRUCacheInner<V> {
    fn unpin(&mut self, key: &Slice) {
        if self.map.contains_key(key) {
            self.lru.push(key.clone(), ());
        }
    }

    fn pin(&mut self, key: &Slice) -> Option<Arc<CacheEntry<V>>> {
        let handle = self.map.get_mut(key)?;
        self.lru.pop(key);
        handle.refs += 1;
        Some(Arc::clone(&handle.entry))
    }

    fn remove(&mut self, key: &Slice) -> Option<Arc<CacheEntry<V>>> {
        let handle = self.map.remove(key)?;
        self.lru.pop(key);
        self.usage -= handle.entry.charge;
        Some(handle.entry)
    }

    fn remove_lru(&mut self, garbage: &mut Vec<Arc<CacheEntry<V>>>) -> bool {
        let Some((key, ())) = self.lru.pop_lru() else {
            return false;
        };
        if let Some(handle) = self.map.remove(&key) {
            self.usage -= handle.entry.charge;
            garbage.push(handle.entry);
        }
        true
    }

    // 只淘汰未被引用的 entry；被钉住的 entry 可以让 usage 暂时超过 capacity
    fn evict(&mut self, garbage: &mut Vec<Arc<CacheEntry<V>>>) {
        while self.usage > self.capacity && self.remove_lru(garbage) {}
    }

    fn install(
        &mut self,
        key: &Slice,
        entry: Arc<CacheEntry<V>>,
        garbage: &mut Vec<Arc<CacheEntry<V>>>,
    ) {
        self.usage += entry.charge;
        self.map.insert(key.clone(), LRUHandle { entry, refs: 1 });
        self.evict(garbage);
    }
}

/// 单个分片
pub struct LRUCache<V> {
    inner: CachePadded<Mutex<LRUCacheInner<V>>>,
}

pub enum InsertResult<V>
where
    V: Send + Sync + 'static,
{
    /// 新 entry 已插入
    Inserted(CacheHandle<V>),
    /// 已有同 key 的 entry；返回它的 handle，以及没有用上的 value
    Existing(CacheHandle<V>, V),
}

impl<V> LRUCache<V>
where
    V: Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        LRUCache {
            inner: CachePadded::new(Mutex::new(LRUCacheInner {
                capacity,
                usage: 0,
                map: AHashMap::new(),
                lru: LruCache::unbounded(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LRUCacheInner<V>> {
        // 锁内只做簿记，不会在持锁时 panic；中毒时沿用内部状态
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn lookup(self: &Arc<Self>, key: &Slice) -> Option<CacheHandle<V>> {
        let entry = self.lock().pin(key)?;
        Some(CacheHandle {
            entry,
            shard: Arc::clone(self),
        })
    }

    pub fn insert(
        self: &Arc<Self>,
        key: &Slice,
        value: V,
        charge: usize,
        deleter: Option<Deleter<V>>,
    ) -> CacheHandle<V> {
        let entry = Arc::new(CacheEntry {
            key: key.clone(),
            value,
            charge,
            deleter: Mutex::new(deleter),
        });
        let mut garbage = Vec::new();
        {
            let mut cache = self.lock();
            if let Some(old) = cache.remove(key) {
                garbage.push(old);
            }
            cache.install(key, Arc::clone(&entry), &mut garbage);
        }
        // 在锁外析构，deleter 可能做 I/O
        drop(garbage);
        CacheHandle {
            entry,
            shard: Arc::clone(self),
        }
    }

    pub fn insert_if_absent(
        self: &Arc<Self>,
        key: &Slice,
        value: V,
        charge: usize,
        deleter: Option<Deleter<V>>,
    ) -> InsertResult<V> {
        let mut garbage = Vec::new();
        let entry = {
            let mut cache = self.lock();
            if let Some(existing) = cache.pin(key) {
                drop(cache);
                let handle = CacheHandle {
                    entry: existing,
                    shard: Arc::clone(self),
                };
                return InsertResult::Existing(handle, value);
            }
            let entry = Arc::new(CacheEntry {
                key: key.clone(),
                value,
                charge,
                deleter: Mutex::new(deleter),
            });
            cache.install(key, Arc::clone(&entry), &mut garbage);
            entry
        };
        drop(garbage);
        InsertResult::Inserted(CacheHandle {
            entry,
            shard: Arc::clone(self),
        })
    }

    pub fn erase(&self, key: &Slice) {
        let removed = self.lock().remove(key);
        drop(removed);
    }

    /// 丢弃所有未被引用的 entry
    pub fn prune(&self) {
        let mut garbage = Vec::new();
        {
            let mut cache = self.lock();
            while cache.remove_lru(&mut garbage) {}
        }
        drop(garbage);
    }

    pub fn total_charge(&self) -> usize {
        self.lock().usage
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    // 给已被引用的 entry 再加一次引用；已移出 cache 的 entry 只靠 Arc 保活
    fn retain(&self, entry: &Arc<CacheEntry<V>>) {
        let mut cache = self.lock();
        if let Some(handle) = cache.map.get_mut(&entry.key) {
            if Arc::ptr_eq(&handle.entry, entry) {
                handle.refs += 1;
            }
        }
    }

    fn release(&self, entry: &Arc<CacheEntry<V>>) {
        let mut garbage = Vec::new();
        {
            let mut cache = self.lock();
            let still_cached = match cache.map.get_mut(&entry.key) {
                Some(handle) if Arc::ptr_eq(&handle.entry, entry) => {
                    debug_assert!(handle.refs > 0);
                    handle.refs -= 1;
                    handle.refs == 0
                }
                // 已被 erase 或替换，旧 entry 随最后一个 Arc 释放
                _ => false,
            };
            if still_cached {
                cache.unpin(&entry.key);
                cache.evict(&mut garbage);
            }
        }
        drop(garbage);
    }
}

/// 对一个 cache entry 的一次引用（pin）。持有期间 entry 不会被淘汰，value 不会析构；
/// drop 时释放这次引用。
pub struct CacheHandle<V>
where
    V: Send + Sync + 'static,
{
    entry: Arc<CacheEntry<V>>,
    shard: Arc<LRUCache<V>>,
}

impl<V> CacheHandle<V>
where
    V: Send + Sync + 'static,
{
    pub fn value(&self) -> &V {
        &self.entry.value
    }

    pub fn key(&self) -> &Slice {
        &self.entry.key
    }

    pub fn charge(&self) -> usize {
        self.entry.charge
    }
}

impl<V> Deref for CacheHandle<V>
where
    V: Send + Sync + 'static,
{
    type Target = V;
    fn deref(&self) -> &Self::Target {
        self.value()
    }
}

/// 再 pin 一次同一个 entry，两个 handle 各自释放
impl<V> Clone for CacheHandle<V>
where
    V: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        self.shard.retain(&self.entry);
        CacheHandle {
            entry: Arc::clone(&self.entry),
            shard: Arc::clone(&self.shard),
        }
    }
}

impl<V> Drop for CacheHandle<V>
where
    V: Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shard.release(&self.entry);
    }
}

impl<V> fmt::Debug for CacheHandle<V>
where
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle")
            .field("key", &self.entry.key)
            .field("charge", &self.entry.charge)
            .finish()
    }
}

const K_NUM_SHARD_BITS: u32 = 4;

/// 按 key 的哈希分片的 LRU cache，整个引擎实例共享
pub struct ShardedLRUCache<V> {
    shards: Vec<Arc<LRUCache<V>>>,
    num_shard_bits: u32,
    capacity: usize,
}

impl<V> ShardedLRUCache<V>
where
    V: Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self::with_shard_bits(capacity, K_NUM_SHARD_BITS)
    }

    /// 容量按分片精确分配，总和等于 capacity。容量不够每个分片至少 1 时减少分片数。
    pub fn with_shard_bits(capacity: usize, num_shard_bits: u32) -> Self {
        let mut num_shard_bits = num_shard_bits.min(19);
        while num_shard_bits > 0 && capacity >> num_shard_bits == 0 {
            num_shard_bits -= 1;
        }
        let num_shards = 1usize << num_shard_bits;
        let per_shard = capacity / num_shards;
        let remainder = capacity % num_shards;
        ShardedLRUCache {
            shards: (0..num_shards)
                .map(|i| Arc::new(LRUCache::new(per_shard + usize::from(i < remainder))))
                .collect(),
            num_shard_bits,
            capacity,
        }
    }

    fn shard(&self, key: &Slice) -> &Arc<LRUCache<V>> {
        if self.num_shard_bits == 0 {
            return &self.shards[0];
        }
        let hash = hash(key.data(), 0);
        &self.shards[(hash >> (32 - self.num_shard_bits)) as usize]
    }

    pub fn lookup(&self, key: &Slice) -> Option<CacheHandle<V>> {
        self.shard(key).lookup(key)
    }

    /// 插入并替换同 key 的旧 entry，返回新 entry 的 handle
    pub fn insert(
        &self,
        key: &Slice,
        value: V,
        charge: usize,
        deleter: Option<Deleter<V>>,
    ) -> CacheHandle<V> {
        self.shard(key).insert(key, value, charge, deleter)
    }

    /// key 不存在时插入；查找和插入在同一把分片锁下完成
    pub fn insert_if_absent(
        &self,
        key: &Slice,
        value: V,
        charge: usize,
        deleter: Option<Deleter<V>>,
    ) -> InsertResult<V> {
        self.shard(key).insert_if_absent(key, value, charge, deleter)
    }

    pub fn erase(&self, key: &Slice) {
        self.shard(key).erase(key)
    }

    pub fn prune(&self) {
        for shard in self.shards.iter() {
            shard.prune();
        }
    }

    pub fn total_charge(&self) -> usize {
        self.shards.iter().map(|s| s.total_charge()).sum()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::coding::encode_fixed32;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const K_CACHE_SIZE: usize = 1000;

    struct CacheTest {
        cache: ShardedLRUCache<i32>,
        deleted: Arc<Mutex<Vec<(i32, i32)>>>,
    }

    fn encode_key(k: i32) -> Slice {
        let mut buf = [0u8; 4];
        encode_fixed32(&mut buf, k as u32);
        Slice::new_from_array(&buf)
    }

    fn decode_key(s: &Slice) -> i32 {
        crate::util::coding::decode_fixed32(s.data()) as i32
    }

    impl CacheTest {
        fn new() -> Self {
            CacheTest {
                cache: ShardedLRUCache::new(K_CACHE_SIZE),
                deleted: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn deleter(&self) -> Deleter<i32> {
            let deleted = self.deleted.clone();
            Box::new(move |key, value| deleted.lock().unwrap().push((decode_key(key), *value)))
        }

        fn lookup(&self, key: i32) -> i32 {
            match self.cache.lookup(&encode_key(key)) {
                Some(handle) => *handle.value(),
                None => -1,
            }
        }

        fn insert(&self, key: i32, value: i32) {
            self.insert_charge(key, value, 1);
        }

        fn insert_charge(&self, key: i32, value: i32, charge: usize) {
            let _ = self
                .cache
                .insert(&encode_key(key), value, charge, Some(self.deleter()));
        }

        fn insert_and_return_handle(&self, key: i32, value: i32) -> CacheHandle<i32> {
            self.cache
                .insert(&encode_key(key), value, 1, Some(self.deleter()))
        }

        fn erase(&self, key: i32) {
            self.cache.erase(&encode_key(key))
        }

        fn deleted(&self) -> Vec<(i32, i32)> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_hit_and_miss() {
        let test = CacheTest::new();
        assert_eq!(-1, test.lookup(100));
        test.insert(100, 101);
        assert_eq!(101, test.lookup(100));
        assert_eq!(-1, test.lookup(200));
        assert_eq!(-1, test.lookup(300));
        test.insert(200, 201);
        assert_eq!(101, test.lookup(100));
        assert_eq!(201, test.lookup(200));
        assert_eq!(-1, test.lookup(300));
        test.insert(100, 102);
        assert_eq!(102, test.lookup(100));
        assert_eq!(201, test.lookup(200));
        assert_eq!(-1, test.lookup(300));
        assert_eq!(vec![(100, 101)], test.deleted());
    }

    #[test]
    fn test_erase() {
        let test = CacheTest::new();
        test.erase(200);
        assert!(test.deleted().is_empty());
        test.insert(100, 101);
        test.insert(200, 201);
        test.erase(100);
        assert_eq!(-1, test.lookup(100));
        assert_eq!(201, test.lookup(200));
        assert_eq!(vec![(100, 101)], test.deleted());
        test.erase(100);
        assert_eq!(-1, test.lookup(100));
        assert_eq!(201, test.lookup(200));
        assert_eq!(1, test.deleted().len());
    }

    #[test]
    fn test_entries_are_pinned() {
        let test = CacheTest::new();
        test.insert(100, 101);
        let h1 = test.cache.lookup(&encode_key(100)).unwrap();
        assert_eq!(101, *h1);

        test.insert(100, 102);
        let h2 = test.cache.lookup(&encode_key(100)).unwrap();
        assert_eq!(102, *h2);
        assert!(test.deleted().is_empty());

        drop(h1);
        assert_eq!(vec![(100, 101)], test.deleted());

        test.erase(100);
        assert_eq!(-1, test.lookup(100));
        assert_eq!(1, test.deleted().len());

        drop(h2);
        assert_eq!(vec![(100, 101), (100, 102)], test.deleted());
    }

    #[test]
    fn test_eviction_policy() {
        let test = CacheTest::new();
        test.insert(100, 101);
        test.insert(200, 201);
        test.insert(300, 301);
        let h = test.cache.lookup(&encode_key(300)).unwrap();

        // 频繁访问的 100 留下，200 被淘汰，被钉住的 300 不会被淘汰
        for i in 0..(K_CACHE_SIZE + 100) as i32 {
            test.insert(1000 + i, 2000 + i);
            assert_eq!(2000 + i, test.lookup(1000 + i));
            assert_eq!(101, test.lookup(100));
        }
        assert_eq!(101, test.lookup(100));
        assert_eq!(-1, test.lookup(200));
        assert_eq!(301, test.lookup(300));
        drop(h);
    }

    #[test]
    fn test_use_exceeds_cache_size() {
        let test = CacheTest::new();
        let mut handles = Vec::new();
        for i in 0..(K_CACHE_SIZE + 100) as i32 {
            handles.push(test.insert_and_return_handle(1000 + i, 2000 + i));
        }
        // 全部被引用，一个都不能淘汰
        for i in 0..handles.len() as i32 {
            assert_eq!(2000 + i, test.lookup(1000 + i));
        }
        assert!(test.cache.total_charge() > test.cache.capacity());
        drop(handles);
        assert!(test.cache.total_charge() <= K_CACHE_SIZE);
    }

    #[test]
    fn test_heavy_entries() {
        let test = CacheTest::new();
        const K_LIGHT: usize = 1;
        const K_HEAVY: usize = 10;
        let mut added = 0;
        let mut index = 0;
        while added < 2 * K_CACHE_SIZE {
            let weight = if index & 1 == 1 { K_LIGHT } else { K_HEAVY };
            test.insert_charge(index, 1000 + index, weight);
            added += weight;
            index += 1;
        }
        let mut cached_weight = 0;
        for i in 0..index {
            let weight = if i & 1 == 1 { K_LIGHT } else { K_HEAVY };
            let r = test.lookup(i);
            if r >= 0 {
                cached_weight += weight;
                assert_eq!(1000 + i, r);
            }
        }
        assert!(cached_weight <= K_CACHE_SIZE + K_CACHE_SIZE / 10);
    }

    #[test]
    fn test_insert_if_absent_keeps_first() {
        let test = CacheTest::new();
        let first = match test
            .cache
            .insert_if_absent(&encode_key(7), 70, 1, Some(test.deleter()))
        {
            InsertResult::Inserted(h) => h,
            InsertResult::Existing(..) => panic!("empty cache reported an existing entry"),
        };
        match test
            .cache
            .insert_if_absent(&encode_key(7), 71, 1, Some(test.deleter()))
        {
            InsertResult::Existing(h, rejected) => {
                assert_eq!(70, *h);
                assert_eq!(71, rejected);
            }
            InsertResult::Inserted(_) => panic!("second insert must not replace"),
        }
        drop(first);
        assert_eq!(70, test.lookup(7));
        // 未插入的 value 不会触发 deleter
        assert!(test.deleted().is_empty());
    }

    #[test]
    fn test_cloned_handle_pins_again() {
        let test = CacheTest::new();
        let h1 = test.insert_and_return_handle(5, 50);
        let h2 = h1.clone();
        drop(h1);
        test.cache.prune();
        assert_eq!(50, *h2);
        assert_eq!(50, test.lookup(5));
        drop(h2);
        test.cache.prune();
        assert_eq!(-1, test.lookup(5));
        assert_eq!(vec![(5, 50)], test.deleted());

        // 已被 erase 的 entry，clone 只延长 value 的生命周期
        let h1 = test.insert_and_return_handle(6, 60);
        test.erase(6);
        let h2 = h1.clone();
        drop(h1);
        assert_eq!(1, test.deleted().len());
        drop(h2);
        assert_eq!(vec![(5, 50), (6, 60)], test.deleted());
    }

    #[test]
    fn test_prune() {
        let test = CacheTest::new();
        test.insert(1, 100);
        test.insert(2, 200);
        let handle = test.cache.lookup(&encode_key(1)).unwrap();
        test.cache.prune();
        drop(handle);
        assert_eq!(100, test.lookup(1));
        assert_eq!(-1, test.lookup(2));
    }

    #[test]
    fn test_capacity_split_exactly() {
        for capacity in [1usize, 3, 15, 16, 17, 1000] {
            let cache: ShardedLRUCache<usize> = ShardedLRUCache::new(capacity);
            for k in 0..(capacity as i32 * 8 + 2000) {
                let _ = cache.insert(&encode_key(k), k as usize, 1, None);
            }
            assert_eq!(capacity, cache.len(), "capacity {}", capacity);
            assert_eq!(capacity, cache.total_charge());
        }
    }

    #[test]
    fn test_least_recently_used_goes_first() {
        let cache: ShardedLRUCache<i32> = ShardedLRUCache::with_shard_bits(3, 0);
        for k in 1..=3 {
            let _ = cache.insert(&encode_key(k), k, 1, None);
        }
        // 访问 1 之后，2 成为最久未使用
        drop(cache.lookup(&encode_key(1)));
        let _ = cache.insert(&encode_key(4), 4, 1, None);
        assert!(cache.lookup(&encode_key(2)).is_none());
        for k in [1, 3, 4] {
            assert_eq!(k, *cache.lookup(&encode_key(k)).unwrap());
        }
    }

    #[test]
    fn test_concurrent_insert_if_absent() {
        let cache: ShardedLRUCache<usize> = ShardedLRUCache::new(64);
        let inserted = AtomicUsize::new(0);
        let key = encode_key(42);
        crossbeam::thread::scope(|s| {
            for t in 0..8usize {
                let cache = &cache;
                let inserted = &inserted;
                let key = key.clone();
                s.spawn(move |_| {
                    let handle = match cache.insert_if_absent(&key, t, 1, None) {
                        InsertResult::Inserted(h) => {
                            inserted.fetch_add(1, Ordering::SeqCst);
                            h
                        }
                        InsertResult::Existing(h, _) => h,
                    };
                    assert!(*handle < 8);
                });
            }
        })
        .unwrap();
        assert_eq!(1, inserted.load(Ordering::SeqCst));
        assert_eq!(1, cache.len());
    }
}
