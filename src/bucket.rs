//! Bucket/slot storage layout: the [`KeyMode`] capability trait (with-keys
//! entries vs. without-keys bare values), the lazy/eager top-level bucket
//! array, and the `compact_from` prefix-compaction routine shared by
//! `remove` and `decay_and_drop`. Each slot is an atomically-swappable
//! `Option<Arc<Stored>>`, so publishing a new value is a single pointer
//! swap regardless of how large `Stored` is.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use arc_swap::{ArcSwapOption, Guard};

use crate::counters::AtomicLogCounters;

/// The capability distinguishing with-keys entries from without-keys bare
/// values. `Stored` is what actually lives behind a slot's pointer.
pub trait KeyMode<K, V>: Send + Sync {
    /// What a slot stores: `Entry<K, V>` for with-keys mode, bare `V` for
    /// without-keys mode.
    type Stored: Send + Sync;

    /// Build the value to publish for a new install.
    fn wrap(&self, key: K, value: V) -> Self::Stored;

    /// Borrow the value half of whatever is stored.
    fn value(stored: &Self::Stored) -> &V;

    /// Does `stored` represent `key`?
    fn matches(&self, key: &K, stored: &Self::Stored) -> bool;
}

/// A stored (key, value) pair, used by the with-keys engine variants.
pub struct Entry<K, V> {
    pub key: K,
    pub value: V,
}

/// With-keys mode: equality by key, via a user-suppliable comparator
/// (defaulting to `==`, see `CollisionCacheBuilder::key_eq`).
pub struct WithKeys<K, V> {
    eq: Arc<dyn Fn(&K, &K) -> bool + Send + Sync>,
    _value: core::marker::PhantomData<fn() -> V>,
}

impl<K, V> WithKeys<K, V> {
    pub(crate) fn new(eq: Arc<dyn Fn(&K, &K) -> bool + Send + Sync>) -> Self {
        Self {
            eq,
            _value: core::marker::PhantomData,
        }
    }
}

impl<K, V> KeyMode<K, V> for WithKeys<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    type Stored = Entry<K, V>;

    fn wrap(&self, key: K, value: V) -> Entry<K, V> {
        Entry { key, value }
    }

    fn value(stored: &Entry<K, V>) -> &V {
        &stored.value
    }

    fn matches(&self, key: &K, stored: &Entry<K, V>) -> bool {
        (self.eq)(key, &stored.key)
    }
}

/// Without-keys mode: equality via a user-supplied predicate over the value
/// alone. Keys are never stored.
pub struct WithoutKeys<K, V> {
    is_val_for_key: Arc<dyn Fn(&K, &V) -> bool + Send + Sync>,
    _key: core::marker::PhantomData<fn() -> K>,
}

impl<K, V> WithoutKeys<K, V> {
    pub(crate) fn new(is_val_for_key: Arc<dyn Fn(&K, &V) -> bool + Send + Sync>) -> Self {
        Self {
            is_val_for_key,
            _key: core::marker::PhantomData,
        }
    }
}

impl<K, V> KeyMode<K, V> for WithoutKeys<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    type Stored = V;

    fn wrap(&self, _key: K, value: V) -> V {
        value
    }

    fn value(stored: &V) -> &V {
        stored
    }

    fn matches(&self, key: &K, stored: &V) -> bool {
        (self.is_val_for_key)(key, stored)
    }
}

/// One bucket: `B` atomically-swappable, optional, reference-counted slot
/// pointers, plus the lock that serializes swap/decay/remove for this
/// bucket only — the bucket itself is the monitor, so contention on one
/// bucket never blocks operations on any other.
pub(crate) struct BucketInner<S> {
    slots: Box<[ArcSwapOption<S>]>,
    lock: spin::Mutex<()>,
}

impl<S> BucketInner<S> {
    fn new(width: usize) -> Self {
        let mut slots = Vec::with_capacity(width);
        slots.resize_with(width, || ArcSwapOption::from(None));
        Self {
            slots: slots.into_boxed_slice(),
            lock: spin::Mutex::new(()),
        }
    }

    pub(crate) fn width(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn load(&self, i: usize) -> Guard<Option<Arc<S>>> {
        self.slots[i].load()
    }

    pub(crate) fn load_full(&self, i: usize) -> Option<Arc<S>> {
        self.slots[i].load_full()
    }

    pub(crate) fn store(&self, i: usize, value: Option<Arc<S>>) {
        self.slots[i].store(value);
    }

    /// Attempt to publish `new` at `i`, expecting the slot to still hold
    /// whatever `expected` held when it was loaded. Returns `Ok(())` on
    /// success, `Err(actual)` with the value actually found there otherwise —
    /// a CAS-loss witness a caller can still check for equality against its
    /// own key before giving up and retrying.
    pub(crate) fn try_publish(
        &self,
        i: usize,
        expected: &Guard<Option<Arc<S>>>,
        new: Option<Arc<S>>,
    ) -> Result<(), Option<Arc<S>>> {
        let witness = self.slots[i].compare_and_swap(expected, new);
        if option_arc_ptr_eq(&witness, expected) {
            Ok(())
        } else {
            Err(Guard::into_inner(witness))
        }
    }

    /// Locks this bucket for the duration of the guard, serializing
    /// swap/decay/remove against other writers to this bucket only.
    pub(crate) fn lock(&self) -> spin::MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

fn option_arc_ptr_eq<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

/// The top-level bucket array. Eager construction pre-fills every entry;
/// lazy construction leaves every entry empty until first touch.
pub(crate) struct Table<S> {
    buckets: Box<[ArcSwapOption<BucketInner<S>>]>,
    bucket_width: usize,
    mask: usize,
    counters: AtomicLogCounters,
}

impl<S> Table<S> {
    pub(crate) fn new(
        bucket_count: usize,
        bucket_width: usize,
        lazy: bool,
        initial_count: u8,
        max_counter_val: u32,
    ) -> crate::error::Result<Self> {
        debug_assert!(bucket_count.is_power_of_two());
        debug_assert!(bucket_width.is_power_of_two());
        let mut buckets = Vec::with_capacity(bucket_count);
        if lazy {
            buckets.resize_with(bucket_count, || ArcSwapOption::from(None));
        } else {
            buckets.resize_with(bucket_count, || {
                ArcSwapOption::from(Some(Arc::new(BucketInner::new(bucket_width))))
            });
        }
        let counters =
            AtomicLogCounters::new(bucket_count * bucket_width, initial_count, max_counter_val)?;
        Ok(Self {
            buckets: buckets.into_boxed_slice(),
            bucket_width,
            mask: bucket_count - 1,
            counters,
        })
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn bucket_width(&self) -> usize {
        self.bucket_width
    }

    pub(crate) fn mask(&self) -> usize {
        self.mask
    }

    pub(crate) fn counters(&self) -> &AtomicLogCounters {
        &self.counters
    }

    /// Resolve bucket `i`, allocating it on first touch if this table is
    /// lazy. Concurrent first-touchers race to publish; the loser simply
    /// adopts the winner's bucket rather than retrying.
    pub(crate) fn resolve(&self, i: usize) -> Arc<BucketInner<S>> {
        let slot = &self.buckets[i];
        if let Some(existing) = slot.load_full() {
            return existing;
        }
        slot.rcu(|current| match current {
            Some(bucket) => bucket.clone(),
            None => Arc::new(BucketInner::new(self.bucket_width)),
        });
        slot.load_full()
            .expect("bucket slot published by rcu must be Some")
    }

    /// `true` if bucket `i` has been allocated (always true for eager
    /// tables; only true after first touch for lazy ones).
    pub(crate) fn is_allocated(&self, i: usize) -> bool {
        self.buckets[i].load().is_some()
    }

    pub(crate) fn iter_allocated(&self) -> impl Iterator<Item = Arc<BucketInner<S>>> + '_ {
        self.buckets.iter().filter_map(ArcSwapOption::load_full)
    }
}

/// Shifts slots `[start, width)` down by one, halving the counter at every
/// index touched, until a null successor is observed, then publishes null
/// at the final index. Shared by `remove` and `decay_and_drop`'s tail.
///
/// The counter does *not* travel with the value it shifts down — every
/// index the shift touches gets its own counter halved in place, staying
/// tied to its bucket position rather than to whatever value passes through
/// it.
pub(crate) fn compact_from<S>(
    bucket: &BucketInner<S>,
    counters: &AtomicLogCounters,
    offset: usize,
    start: usize,
) {
    let width = bucket.width();
    let mut i = start;
    loop {
        if i + 1 >= width {
            bucket.store(i, None);
            counters.decay_one(offset + i);
            return;
        }
        match bucket.load_full(i + 1) {
            Some(next) => {
                bucket.store(i, Some(next));
                counters.decay_one(offset + i);
                i += 1;
            }
            None => {
                bucket.store(i, None);
                counters.decay_one(offset + i);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc as StdArc;

    #[test]
    fn with_keys_matches_by_key() {
        let mode: WithKeys<i32, &'static str> = WithKeys::new(StdArc::new(|a: &i32, b: &i32| a == b));
        let stored = mode.wrap(1, "one");
        assert!(mode.matches(&1, &stored));
        assert!(!mode.matches(&2, &stored));
        assert_eq!(WithKeys::<i32, &'static str>::value(&stored), &"one");
    }

    #[test]
    fn without_keys_matches_by_predicate() {
        let mode: WithoutKeys<i32, i32> = WithoutKeys::new(StdArc::new(|k: &i32, v: &i32| k == v));
        let stored = mode.wrap(5, 5);
        assert!(mode.matches(&5, &stored));
        assert!(!mode.matches(&6, &stored));
    }

    #[test]
    fn lazy_table_allocates_on_first_resolve() {
        let table: Table<i32> = Table::new(4, 4, true, 4, 256).unwrap();
        assert!(!table.is_allocated(0));
        let bucket = table.resolve(0);
        assert_eq!(bucket.width(), 4);
        assert!(table.is_allocated(0));
    }

    #[test]
    fn eager_table_is_allocated_immediately() {
        let table: Table<i32> = Table::new(4, 4, false, 4, 256).unwrap();
        for i in 0..table.bucket_count() {
            assert!(table.is_allocated(i));
        }
    }

    #[test]
    fn compact_from_shifts_and_nulls_tail() {
        let table: Table<&'static str> = Table::new(1, 4, false, 5, 256).unwrap();
        let bucket = table.resolve(0);
        let counters = table.counters();
        for (i, v) in ["a", "b", "c", "d"].into_iter().enumerate() {
            bucket.store(i, Some(StdArc::new(v)));
            counters.set(i, 10);
        }
        compact_from(&bucket, counters, 0, 1);
        assert_eq!(*bucket.load_full(1).unwrap(), "c");
        assert_eq!(*bucket.load_full(2).unwrap(), "d");
        assert!(bucket.load_full(3).is_none());
    }
}
