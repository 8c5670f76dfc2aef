//! The base read/write engine: bucket resolution, the opaque scan, the
//! public operation surface, and the three swap/decay/compaction
//! algorithms that run under a bucket's lock. Generic over [`KeyMode`] and
//! [`CapacityPolicy`] so the four Packed/Sparse × with-keys/without-keys
//! variants collapse into one monomorphized type per instantiation.

use alloc::sync::Arc;

use crate::bucket::{compact_from, BucketInner, KeyMode, Table};
use crate::capacity::CapacityPolicy;

/// What a bucket scan for `key` found.
enum ScanResult<S> {
    /// A matching slot at this index, with its current contents.
    Hit(usize, Arc<S>),
    /// No match, but an empty slot at this index (scan stopped early).
    Null(usize),
    /// No match and no empty slot anywhere in the bucket.
    Full,
}

enum LockFreeInsertOutcome<V> {
    Installed,
    AlreadyPresent(V),
    Full,
}

/// A concurrent, bounded, approximate-LFU cache.
///
/// `M` selects whether slots store `(K, V)` entries or bare `V` values
/// matched by predicate; `C` selects whether the cache tracks a logical
/// `size`/`capacity` (Sparse) or relies on bucket fill alone (Packed). Build
/// one with [`crate::builder::CollisionCacheBuilder`].
pub struct Cache<K, V, M, C>
where
    M: KeyMode<K, V>,
    C: CapacityPolicy,
{
    table: Table<M::Stored>,
    mode: M,
    capacity: C,
    hash_key: Arc<dyn Fn(&K) -> u64 + Send + Sync>,
    loader: Option<Arc<dyn Fn(&K) -> Option<V> + Send + Sync>>,
    mapper: Option<Arc<dyn Fn(V) -> V + Send + Sync>>,
}

impl<K, V, M, C> Cache<K, V, M, C>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    M: KeyMode<K, V>,
    C: CapacityPolicy,
{
    pub(crate) fn new(
        table: Table<M::Stored>,
        mode: M,
        capacity: C,
        hash_key: Arc<dyn Fn(&K) -> u64 + Send + Sync>,
        loader: Option<Arc<dyn Fn(&K) -> Option<V> + Send + Sync>>,
        mapper: Option<Arc<dyn Fn(V) -> V + Send + Sync>>,
    ) -> Self {
        Self {
            table,
            mode,
            capacity,
            hash_key,
            loader,
            mapper,
        }
    }

    fn bucket_index(&self, key: &K) -> usize {
        (self.hash_key)(key) as usize & self.table.mask()
    }

    fn offset_of(&self, bucket_index: usize) -> usize {
        bucket_index * self.table.bucket_width()
    }

    fn scan(&self, bucket: &BucketInner<M::Stored>, key: &K) -> ScanResult<M::Stored> {
        let width = bucket.width();
        for i in 0..width {
            match bucket.load_full(i) {
                Some(stored) => {
                    if self.mode.matches(key, &stored) {
                        return ScanResult::Hit(i, stored);
                    }
                }
                None => return ScanResult::Null(i),
            }
        }
        ScanResult::Full
    }

    /// Attempts a lock-free install at the first empty slot found, or
    /// reports the winner if another thread's value is already there.
    /// Never displaces a live slot — used by the `getAggressive`/
    /// `putIfSpace*` family, which explicitly promise no eviction outside
    /// the bucket lock.
    fn attempt_lockfree_insert(
        &self,
        bucket: &BucketInner<M::Stored>,
        offset: usize,
        key: &K,
        stored: Arc<M::Stored>,
    ) -> LockFreeInsertOutcome<V> {
        let width = bucket.width();
        let mut i = 0;
        while i < width {
            let current = bucket.load(i);
            match current.as_ref() {
                Some(existing) => {
                    if self.mode.matches(key, existing) {
                        return LockFreeInsertOutcome::AlreadyPresent(M::value(existing).clone());
                    }
                    i += 1;
                }
                None => match bucket.try_publish(i, &current, Some(stored.clone())) {
                    Ok(()) => {
                        self.table.counters().initialize(offset + i);
                        self.capacity.on_insert();
                        return LockFreeInsertOutcome::Installed;
                    }
                    Err(witness) => {
                        if let Some(w) = &witness {
                            if self.mode.matches(key, w) {
                                return LockFreeInsertOutcome::AlreadyPresent(
                                    M::value(w).clone(),
                                );
                            }
                        }
                        // Lost the race to an unrelated key (or the slot
                        // reverted to empty); try this same index again.
                    }
                },
            }
        }
        LockFreeInsertOutcome::Full
    }

    /// Install into a full bucket by evicting the least-frequently-used
    /// slot, for a plain locked `get`-miss. Returns the evicted entry. Must
    /// be called under the bucket lock. Packed always runs the full-scan
    /// swap here; Sparse always runs the min-tracking probabilistic swap
    /// here, regardless of capacity headroom — see
    /// `CapacityPolicy::uses_probabilistic_full_swap`.
    fn swap_full(
        &self,
        bucket: &BucketInner<M::Stored>,
        offset: usize,
        stored: Arc<M::Stored>,
    ) -> Arc<M::Stored> {
        if self.capacity.uses_probabilistic_full_swap() {
            self.check_decay_and_prob_swap(bucket, offset, stored)
        } else {
            self.decay_and_swap(bucket, offset, stored)
        }
    }

    /// Install into a full bucket after losing a lock-free CAS race for an
    /// empty slot (`get_aggressive`/`put_if_absent`'s full-bucket branch).
    /// Always the min-tracking probabilistic swap, for both Packed and
    /// Sparse — unlike `swap_full`, this call site is never policy-gated.
    fn swap_full_after_race(
        &self,
        bucket: &BucketInner<M::Stored>,
        offset: usize,
        stored: Arc<M::Stored>,
    ) -> Arc<M::Stored> {
        self.check_decay_and_prob_swap(bucket, offset, stored)
    }

    /// Full-scan decay-and-swap: install at the first zero-counter slot
    /// found, halving the counters of everything scanned afterward; if no
    /// zero is found, install at the minimum-counter slot seen during the
    /// scan and halve every other counter in the bucket.
    fn decay_and_swap(
        &self,
        bucket: &BucketInner<M::Stored>,
        offset: usize,
        stored: Arc<M::Stored>,
    ) -> Arc<M::Stored> {
        let width = bucket.width();
        let counters = self.table.counters();
        let mut zero_idx = None;
        let mut min_idx = 0usize;
        let mut min_val = u8::MAX;
        for i in 0..width {
            let c = counters.get(offset + i);
            if c == 0 {
                zero_idx = Some(i);
                break;
            }
            if c < min_val {
                min_val = c;
                min_idx = i;
            }
        }
        match zero_idx {
            Some(i) => {
                let evicted = bucket.load_full(i).expect("full bucket slot must be occupied");
                bucket.store(i, Some(stored));
                counters.initialize(offset + i);
                counters.decay(offset + i + 1, offset + width);
                evicted
            }
            None => {
                let evicted = bucket
                    .load_full(min_idx)
                    .expect("full bucket slot must be occupied");
                bucket.store(min_idx, Some(stored));
                counters.initialize(offset + min_idx);
                counters.decay_skip(offset, offset + width, offset + min_idx);
                evicted
            }
        }
    }

    /// Min-tracking probabilistic swap: walk the bucket once tracking the
    /// minimum counter seen; if a null slot turns up mid-scan
    /// (over-capacity Sparse with a hole), install at the best minimum seen
    /// so far and let `decay_and_drop` handle the remainder (and any
    /// resulting compaction); otherwise install at the minimum found over
    /// the whole bucket and halve everything else.
    fn check_decay_and_prob_swap(
        &self,
        bucket: &BucketInner<M::Stored>,
        offset: usize,
        stored: Arc<M::Stored>,
    ) -> Arc<M::Stored> {
        let width = bucket.width();
        let counters = self.table.counters();
        let mut min_idx = 0usize;
        let mut min_val = u8::MAX;
        for i in 0..width {
            match bucket.load_full(i) {
                Some(_) => {
                    let c = counters.get(offset + i);
                    if c < min_val {
                        min_val = c;
                        min_idx = i;
                    }
                }
                None => {
                    let evicted = bucket
                        .load_full(min_idx)
                        .expect("min-tracked slot must be occupied");
                    bucket.store(min_idx, Some(stored));
                    counters.initialize(offset + min_idx);
                    self.decay_and_drop(bucket, offset, min_idx, i);
                    return evicted;
                }
            }
        }
        let evicted = bucket
            .load_full(min_idx)
            .expect("full bucket slot must be occupied");
        bucket.store(min_idx, Some(stored));
        counters.initialize(offset + min_idx);
        counters.decay_skip(offset, offset + width, offset + min_idx);
        evicted
    }

    /// Halve counters in `[offset, offset+scan_end)` skipping `skip_idx`;
    /// whenever a halve lands on zero past `skip_idx` and the cache is over
    /// capacity, compact the bucket from that slot onward.
    fn decay_and_drop(
        &self,
        bucket: &BucketInner<M::Stored>,
        offset: usize,
        skip_idx: usize,
        scan_end: usize,
    ) {
        let counters = self.table.counters();
        for i in 0..scan_end {
            if i == skip_idx {
                continue;
            }
            let halved = counters.decay_one(offset + i);
            if halved == 0 && i > skip_idx && self.capacity.over_capacity() {
                compact_from(bucket, counters, offset, i);
                self.capacity.on_remove();
                // A single compaction per call: `compact_from` already
                // shifted/halved everything past `i`, so continuing this
                // loop would decay already-shifted slots again and could
                // trigger a second compaction off a now-stale index.
                return;
            }
        }
    }

    /// Bump the hit counter and return the matching value, if present,
    /// without invoking any loader.
    pub fn get_if_present(&self, key: &K) -> Option<V> {
        let idx = self.bucket_index(key);
        let bucket = self.table.resolve(idx);
        let offset = self.offset_of(idx);
        match self.scan(&bucket, key) {
            ScanResult::Hit(i, stored) => {
                self.table.counters().increment(offset + i);
                Some(M::value(&stored).clone())
            }
            ScanResult::Null(_) | ScanResult::Full => None,
        }
    }

    /// On hit, bump the counter and return the value. On miss, run this
    /// cache's configured loader under the bucket lock and install the
    /// result via a swap if needed. Returns `None` untouched if no loader
    /// is configured or the loader itself returns `None`.
    pub fn get(&self, key: &K) -> Option<V> {
        match self.loader.clone() {
            Some(loader) => self.get_with(key, |k| loader(k)),
            None => self.get_if_present(key),
        }
    }

    /// As [`Cache::get`], but with an explicit one-off loader overriding
    /// any configured default.
    pub fn get_with<F>(&self, key: &K, loader: F) -> Option<V>
    where
        F: FnOnce(&K) -> Option<V>,
    {
        let idx = self.bucket_index(key);
        let bucket = self.table.resolve(idx);
        let offset = self.offset_of(idx);
        if let ScanResult::Hit(i, stored) = self.scan(&bucket, key) {
            self.table.counters().increment(offset + i);
            return Some(M::value(&stored).clone());
        }
        let _guard = bucket.lock();
        match self.scan(&bucket, key) {
            ScanResult::Hit(i, stored) => {
                self.table.counters().increment(offset + i);
                Some(M::value(&stored).clone())
            }
            ScanResult::Null(i) => {
                let value = loader(key)?;
                if i == 0 && self.capacity.strict() && self.capacity.over_capacity() {
                    return Some(value);
                }
                let stored = Arc::new(self.mode.wrap(key.clone(), value));
                if i > 0 && self.capacity.over_capacity() {
                    // Over capacity already: don't grow this bucket's live
                    // population further, run the probabilistic swap
                    // instead, which knows how to install into a bucket
                    // that still has a hole without just appending to it.
                    self.check_decay_and_prob_swap(&bucket, offset, stored.clone());
                    return Some(M::value(&stored).clone());
                }
                bucket.store(i, Some(stored.clone()));
                self.table.counters().initialize(offset + i);
                self.capacity.on_insert();
                Some(M::value(&stored).clone())
            }
            ScanResult::Full => {
                let value = loader(key)?;
                let stored = Arc::new(self.mode.wrap(key.clone(), value));
                let _evicted = self.swap_full(&bucket, offset, stored.clone());
                Some(M::value(&stored).clone())
            }
        }
    }

    /// Like [`Cache::get`] but never blocks on the bucket lock for the
    /// load: the loader runs outside any lock and the result is installed
    /// via lock-free CAS, falling back to a locked swap only if the bucket
    /// turns out to be full. Concurrent callers may race and recompute;
    /// the loser simply adopts the winner's value.
    pub fn get_aggressive(&self, key: &K) -> Option<V> {
        match (self.loader.clone(), self.mapper.clone()) {
            (Some(loader), Some(mapper)) => {
                self.get_aggressive_with_mapper(key, |k| loader(k), move |v| mapper(v))
            }
            (Some(loader), None) => self.get_aggressive_with(key, |k| loader(k)),
            (None, _) => self.get_if_present(key),
        }
    }

    /// As [`Cache::get_aggressive`], with an explicit one-off loader.
    pub fn get_aggressive_with<F>(&self, key: &K, loader: F) -> Option<V>
    where
        F: FnOnce(&K) -> Option<V>,
    {
        let idx = self.bucket_index(key);
        let bucket = self.table.resolve(idx);
        let offset = self.offset_of(idx);
        if let ScanResult::Hit(i, stored) = self.scan(&bucket, key) {
            self.table.counters().increment(offset + i);
            return Some(M::value(&stored).clone());
        }
        let value = loader(key)?;
        let stored = Arc::new(self.mode.wrap(key.clone(), value));
        match self.attempt_lockfree_insert(&bucket, offset, key, stored.clone()) {
            LockFreeInsertOutcome::Installed => Some(M::value(&stored).clone()),
            LockFreeInsertOutcome::AlreadyPresent(existing) => Some(existing),
            LockFreeInsertOutcome::Full => {
                let _guard = bucket.lock();
                let _evicted = self.swap_full_after_race(&bucket, offset, stored.clone());
                Some(M::value(&stored).clone())
            }
        }
    }

    /// As [`Cache::get_aggressive_with`], additionally passing a loaded
    /// value through `mapper` before it is installed or returned.
    pub fn get_aggressive_with_mapper<F, Fm>(&self, key: &K, loader: F, mapper: Fm) -> Option<V>
    where
        F: FnOnce(&K) -> Option<V>,
        Fm: FnOnce(V) -> V,
    {
        self.get_aggressive_with(key, |k| loader(k).map(mapper))
    }

    /// Install `value` for `key`, evicting the least-frequently-used entry
    /// if the bucket is full. Returns the value that was replaced, if any
    /// (`None` means this was a fresh install into an empty slot).
    pub fn put_replace(&self, key: K, value: V) -> Option<V> {
        let idx = self.bucket_index(&key);
        let bucket = self.table.resolve(idx);
        let offset = self.offset_of(idx);
        let stored = Arc::new(self.mode.wrap(key.clone(), value));
        loop {
            match self.scan(&bucket, &key) {
                ScanResult::Hit(i, existing) => {
                    let guard = bucket.load(i);
                    match bucket.try_publish(i, &guard, Some(stored.clone())) {
                        Ok(()) => return Some(M::value(&existing).clone()),
                        Err(_) => continue,
                    }
                }
                ScanResult::Null(i) => {
                    let guard = bucket.load(i);
                    if guard.is_some() {
                        continue;
                    }
                    match bucket.try_publish(i, &guard, Some(stored.clone())) {
                        Ok(()) => {
                            self.table.counters().initialize(offset + i);
                            self.capacity.on_insert();
                            return None;
                        }
                        Err(_) => continue,
                    }
                }
                ScanResult::Full => {
                    let _guard = bucket.lock();
                    match self.scan(&bucket, &key) {
                        ScanResult::Hit(i, existing) => {
                            bucket.store(i, Some(stored));
                            return Some(M::value(&existing).clone());
                        }
                        ScanResult::Null(i) => {
                            bucket.store(i, Some(stored));
                            self.table.counters().initialize(offset + i);
                            self.capacity.on_insert();
                            return None;
                        }
                        ScanResult::Full => {
                            if self.capacity.strict() && self.capacity.over_capacity() {
                                return Some(M::value(&stored).clone());
                            }
                            let evicted = self.swap_full(&bucket, offset, stored.clone());
                            return Some(M::value(&evicted).clone());
                        }
                    }
                }
            }
        }
    }

    /// Replace the value for `key` only if it already exists; never
    /// installs a new entry. Returns the previous value on success.
    pub fn replace(&self, key: K, value: V) -> Option<V> {
        let idx = self.bucket_index(&key);
        let bucket = self.table.resolve(idx);
        let stored = Arc::new(self.mode.wrap(key.clone(), value));
        loop {
            match self.scan(&bucket, &key) {
                ScanResult::Hit(i, existing) => {
                    let guard = bucket.load(i);
                    match bucket.try_publish(i, &guard, Some(stored.clone())) {
                        Ok(()) => return Some(M::value(&existing).clone()),
                        Err(_) => continue,
                    }
                }
                ScanResult::Null(_) | ScanResult::Full => return None,
            }
        }
    }

    /// Install `value` for `key` only if it is absent. Returns the
    /// existing value on a hit; `None` means the new value was installed
    /// (evicting an LFU victim if the bucket was full).
    pub fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        let idx = self.bucket_index(&key);
        let bucket = self.table.resolve(idx);
        let offset = self.offset_of(idx);
        let stored = Arc::new(self.mode.wrap(key.clone(), value));
        match self.attempt_lockfree_insert(&bucket, offset, &key, stored.clone()) {
            LockFreeInsertOutcome::Installed => None,
            LockFreeInsertOutcome::AlreadyPresent(existing) => Some(existing),
            LockFreeInsertOutcome::Full => {
                let _guard = bucket.lock();
                match self.scan(&bucket, &key) {
                    ScanResult::Hit(_, existing) => Some(M::value(&existing).clone()),
                    _ => {
                        self.swap_full_after_race(&bucket, offset, stored);
                        None
                    }
                }
            }
        }
    }

    /// Install `value` for `key` only if a free slot is available, without
    /// ever displacing a live entry. Returns the existing value on a hit;
    /// `None` otherwise (whether newly installed or silently dropped for
    /// lack of space).
    pub fn put_if_space_absent(&self, key: K, value: V) -> Option<V> {
        let idx = self.bucket_index(&key);
        let bucket = self.table.resolve(idx);
        let offset = self.offset_of(idx);
        let stored = Arc::new(self.mode.wrap(key.clone(), value));
        match self.attempt_lockfree_insert(&bucket, offset, &key, stored) {
            LockFreeInsertOutcome::AlreadyPresent(existing) => Some(existing),
            LockFreeInsertOutcome::Installed | LockFreeInsertOutcome::Full => None,
        }
    }

    /// Replace a matching entry in place, or install into a free slot;
    /// never evicts. Returns the previous value if one was replaced.
    pub fn put_if_space_replace(&self, key: K, value: V) -> Option<V> {
        let idx = self.bucket_index(&key);
        let bucket = self.table.resolve(idx);
        let offset = self.offset_of(idx);
        let stored = Arc::new(self.mode.wrap(key.clone(), value));
        loop {
            match self.scan(&bucket, &key) {
                ScanResult::Hit(i, existing) => {
                    let guard = bucket.load(i);
                    match bucket.try_publish(i, &guard, Some(stored.clone())) {
                        Ok(()) => return Some(M::value(&existing).clone()),
                        Err(_) => continue,
                    }
                }
                ScanResult::Null(i) => {
                    let guard = bucket.load(i);
                    if guard.is_some() {
                        continue;
                    }
                    match bucket.try_publish(i, &guard, Some(stored)) {
                        Ok(()) => {
                            self.table.counters().initialize(offset + i);
                            self.capacity.on_insert();
                            return None;
                        }
                        Err(_) => continue,
                    }
                }
                ScanResult::Full => return None,
            }
        }
    }

    /// Remove the entry for `key`, compacting the bucket's live prefix.
    /// Returns `true` if a matching entry was found and removed.
    pub fn remove(&self, key: &K) -> bool {
        let idx = self.bucket_index(key);
        let bucket = self.table.resolve(idx);
        let offset = self.offset_of(idx);
        let _guard = bucket.lock();
        let width = bucket.width();
        for i in 0..width {
            match bucket.load_full(i) {
                Some(stored) => {
                    if self.mode.matches(key, &stored) {
                        compact_from(&bucket, self.table.counters(), offset, i);
                        self.capacity.on_remove();
                        return true;
                    }
                }
                None => return false,
            }
        }
        false
    }

    /// Empty every bucket and, for Sparse variants, reset the tracked size
    /// to zero. Walks buckets sequentially, taking and releasing each
    /// bucket's lock in turn; concurrent readers see no ordering guarantee
    /// beyond "eventually empty".
    pub fn clear(&self) {
        for bucket in self.table.iter_allocated() {
            let _guard = bucket.lock();
            for i in 0..bucket.width() {
                bucket.store(i, None);
            }
        }
        let total = self.table.bucket_count() * self.table.bucket_width();
        for i in 0..total {
            self.table.counters().set(i, 0);
        }
        self.capacity.reset();
    }

    /// Approximate occupied-entry count, if this variant tracks one.
    pub fn len(&self) -> Option<usize> {
        self.capacity.size()
    }

    /// `true` if this variant tracks a size and it is currently zero.
    pub fn is_empty(&self) -> Option<bool> {
        self.len().map(|n| n == 0)
    }

    /// The configured logical capacity, if this variant tracks one.
    pub fn capacity_hint(&self) -> Option<usize> {
        self.capacity.capacity()
    }

    /// Number of top-level buckets.
    pub fn bucket_count(&self) -> usize {
        self.table.bucket_count()
    }

    /// Slots per bucket.
    pub fn bucket_width(&self) -> usize {
        self.table.bucket_width()
    }
}
