//! The fluent, validating builder: `with_capacity(capacity)` → setters →
//! `build_sparse`/`build_packed`, using the `fn setter(mut self, ...) ->
//! Self` idiom.

use alloc::sync::Arc;
use core::hash::{Hash, Hasher};

use siphasher::sip::SipHasher13;

use crate::bucket::{KeyMode, Table, WithKeys, WithoutKeys};
use crate::capacity::{Packed, Sparse};
use crate::engine::Cache;
use crate::error::{Error, Result};
use crate::pow2_ceil;

const DEFAULT_PACKED_BUCKET_SIZE: usize = 8;
const DEFAULT_SPARSE_BUCKET_SIZE: usize = 4;
const DEFAULT_INIT_COUNT: u8 = 4;
const DEFAULT_MAX_COUNTER_VAL: u32 = 1 << 14;
const DEFAULT_SPARSE_FACTOR: f64 = 2.0;

/// Constructs a [`Cache`] from a validated set of parameters. A single
/// untyped builder holds every possible setting; the with-keys/without-keys
/// choice is made at the very end, as the type argument to
/// [`CollisionCacheBuilder::build_sparse`] /
/// [`CollisionCacheBuilder::build_packed`].
pub struct CollisionCacheBuilder<K, V> {
    capacity: usize,
    bucket_size: Option<usize>,
    init_count: u8,
    max_counter_val: u32,
    strict_capacity: bool,
    lazy_init_buckets: bool,
    sparse_factor: f64,
    hasher: Option<Arc<dyn Fn(&K) -> u64 + Send + Sync>>,
    key_eq: Option<Arc<dyn Fn(&K, &K) -> bool + Send + Sync>>,
    is_val_for_key: Option<Arc<dyn Fn(&K, &V) -> bool + Send + Sync>>,
    loader: Option<Arc<dyn Fn(&K) -> Option<V> + Send + Sync>>,
    mapper: Option<Arc<dyn Fn(V) -> V + Send + Sync>>,
}

impl<K, V> CollisionCacheBuilder<K, V> {
    /// Starts a new builder targeting a logical `capacity`. `capacity`
    /// means "total slots" for `build_packed` and "entry budget" for
    /// `build_sparse`; both are validated to be non-zero at the terminal
    /// call, not here (so setters can run in any order).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            bucket_size: None,
            init_count: DEFAULT_INIT_COUNT,
            max_counter_val: DEFAULT_MAX_COUNTER_VAL,
            strict_capacity: false,
            lazy_init_buckets: false,
            sparse_factor: DEFAULT_SPARSE_FACTOR,
            hasher: None,
            key_eq: None,
            is_val_for_key: None,
            loader: None,
            mapper: None,
        }
    }

    #[must_use]
    pub fn bucket_size(mut self, n: usize) -> Self {
        self.bucket_size = Some(n);
        self
    }

    #[must_use]
    pub fn init_count(mut self, n: u8) -> Self {
        self.init_count = n;
        self
    }

    #[must_use]
    pub fn max_counter_val(mut self, n: u32) -> Self {
        self.max_counter_val = n;
        self
    }

    #[must_use]
    pub fn strict_capacity(mut self, strict: bool) -> Self {
        self.strict_capacity = strict;
        self
    }

    #[must_use]
    pub fn lazy_init_buckets(mut self, lazy: bool) -> Self {
        self.lazy_init_buckets = lazy;
        self
    }

    #[must_use]
    pub fn sparse_factor(mut self, factor: f64) -> Self {
        self.sparse_factor = factor;
        self
    }

    #[must_use]
    pub fn hasher<F>(mut self, f: F) -> Self
    where
        F: Fn(&K) -> u64 + Send + Sync + 'static,
    {
        self.hasher = Some(Arc::new(f));
        self
    }

    /// Only consulted by `build_sparse`/`build_packed` when instantiated
    /// with [`WithKeys`]; defaults to `K: PartialEq`'s `==` if never called.
    #[must_use]
    pub fn key_eq<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, &K) -> bool + Send + Sync + 'static,
    {
        self.key_eq = Some(Arc::new(f));
        self
    }

    /// Required when instantiating `build_sparse`/`build_packed` with
    /// [`WithoutKeys`] — building without calling this returns
    /// `Error::InvalidArgument("is_val_for_key")`.
    #[must_use]
    pub fn is_val_for_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        self.is_val_for_key = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn loader<F>(mut self, f: F) -> Self
    where
        F: Fn(&K) -> Option<V> + Send + Sync + 'static,
    {
        self.loader = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn loader_and_mapper<F, Fm>(mut self, loader: F, mapper: Fm) -> Self
    where
        F: Fn(&K) -> Option<V> + Send + Sync + 'static,
        Fm: Fn(V) -> V + Send + Sync + 'static,
    {
        self.loader = Some(Arc::new(loader));
        self.mapper = Some(Arc::new(mapper));
        self
    }

    fn resolve_bucket_width(&self, default_if_unset: usize) -> Result<usize> {
        let raw = self.bucket_size.unwrap_or(default_if_unset);
        if raw == 0 || raw > 256 {
            return Err(Error::InvalidArgument("bucket_size"));
        }
        Ok(pow2_ceil(raw))
    }

    fn resolve_hasher(&self) -> Arc<dyn Fn(&K) -> u64 + Send + Sync>
    where
        K: Hash + 'static,
    {
        self.hasher.clone().unwrap_or_else(|| {
            Arc::new(|key: &K| {
                let mut hasher = SipHasher13::new();
                key.hash(&mut hasher);
                hasher.finish()
            })
        })
    }

    /// Builds a Packed cache: no size tracking, no strict mode, bucket fill
    /// is the only limit (logical capacity `bucket_count * bucket_width`).
    pub fn build_packed<M>(self) -> Result<Cache<K, V, M, Packed>>
    where
        K: Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        M: FromBuilder<K, V>,
    {
        if self.capacity == 0 {
            return Err(Error::InvalidArgument("capacity"));
        }
        let width = self.resolve_bucket_width(DEFAULT_PACKED_BUCKET_SIZE)?;
        let total_slots = pow2_ceil(self.capacity);
        let bucket_count = (total_slots / width).max(1);
        let table = Table::new(
            bucket_count,
            width,
            self.lazy_init_buckets,
            self.init_count,
            self.max_counter_val,
        )?;
        let mode = M::from_builder(&self)?;
        let hasher = self.resolve_hasher();
        Ok(Cache::new(table, mode, Packed, hasher, self.loader, self.mapper))
    }

    /// Builds a Sparse cache: tracks `size` atomically over a backing
    /// table provisioned by `sparse_factor` (set via
    /// [`CollisionCacheBuilder::sparse_factor`], default `2.0`).
    pub fn build_sparse<M>(self) -> Result<Cache<K, V, M, Sparse>>
    where
        K: Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        M: FromBuilder<K, V>,
    {
        if self.capacity == 0 {
            return Err(Error::InvalidArgument("capacity"));
        }
        if !(self.sparse_factor >= 1.0) {
            return Err(Error::InvalidArgument("sparse_factor"));
        }
        let width = self.resolve_bucket_width(DEFAULT_SPARSE_BUCKET_SIZE)?;
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let total_slots = pow2_ceil((self.capacity as f64 * self.sparse_factor).ceil() as usize);
        let bucket_count = (total_slots / width).max(1);
        let table = Table::new(
            bucket_count,
            width,
            self.lazy_init_buckets,
            self.init_count,
            self.max_counter_val,
        )?;
        let capacity_policy = Sparse::new(self.capacity, self.strict_capacity);
        let mode = M::from_builder(&self)?;
        let hasher = self.resolve_hasher();
        Ok(Cache::new(
            table,
            mode,
            capacity_policy,
            hasher,
            self.loader,
            self.mapper,
        ))
    }
}

/// Builds a concrete [`KeyMode`] implementation from whatever the builder
/// was configured with. Implemented for [`WithKeys`] (default `==`,
/// overridable via `key_eq`) and [`WithoutKeys`] (mandatory
/// `is_val_for_key`).
pub trait FromBuilder<K, V>: KeyMode<K, V> + Sized {
    fn from_builder(builder: &CollisionCacheBuilder<K, V>) -> Result<Self>;
}

impl<K, V> FromBuilder<K, V> for WithKeys<K, V>
where
    K: PartialEq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn from_builder(builder: &CollisionCacheBuilder<K, V>) -> Result<Self> {
        let eq = builder
            .key_eq
            .clone()
            .unwrap_or_else(|| Arc::new(|a: &K, b: &K| a == b));
        Ok(WithKeys::new(eq))
    }
}

impl<K, V> FromBuilder<K, V> for WithoutKeys<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn from_builder(builder: &CollisionCacheBuilder<K, V>) -> Result<Self> {
        let predicate = builder
            .is_val_for_key
            .clone()
            .ok_or(Error::InvalidArgument("is_val_for_key"))?;
        Ok(WithoutKeys::new(predicate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::WithKeys;

    #[test]
    fn rejects_zero_capacity() {
        let result = CollisionCacheBuilder::<i32, i32>::with_capacity(0).build_packed::<WithKeys<i32, i32>>();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_sub_unity_sparse_factor() {
        let result = CollisionCacheBuilder::<i32, i32>::with_capacity(16)
            .sparse_factor(0.5)
            .build_sparse::<WithKeys<i32, i32>>();
        assert!(result.is_err());
    }

    #[test]
    fn without_keys_requires_predicate() {
        let result = CollisionCacheBuilder::<i32, i32>::with_capacity(16)
            .build_packed::<WithoutKeys<i32, i32>>();
        assert!(result.is_err());
    }

    #[test]
    fn builds_with_defaults() {
        let cache = CollisionCacheBuilder::<i32, i32>::with_capacity(16)
            .build_packed::<WithKeys<i32, i32>>()
            .unwrap();
        assert_eq!(cache.bucket_width(), 8);
    }
}
