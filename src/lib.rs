#![no_std]

//! A concurrent, bounded, in-memory associative cache with fixed-width
//! collision buckets and a probabilistic 8-bit logarithmic-frequency
//! approximate-LFU eviction policy.
//!
//! The hash table is open-addressed but the unit of eviction is a whole
//! *bucket* (a small fixed-width array of slots) rather than the table as a
//! whole: reads and speculative inserts are lock-free, and only the
//! swap/decay/remove path for a given bucket takes that bucket's lock.
//! Build a cache with [`CollisionCacheBuilder`]; pick [`bucket::WithKeys`]
//! or [`bucket::WithoutKeys`] for the key-storage mode and [`Packed`] or
//! [`Sparse`] for the capacity policy.
//!
//! ```ignore
//! use collision_cache::{CollisionCacheBuilder, Packed};
//! use collision_cache::bucket::WithKeys;
//!
//! let cache = CollisionCacheBuilder::<u64, String>::with_capacity(1024)
//!     .build_packed::<WithKeys<u64, String>>()?;
//! cache.put_if_absent(1, "one".to_string());
//! assert_eq!(cache.get_if_present(&1), Some("one".to_string()));
//! # Ok::<(), collision_cache::Error>(())
//! ```

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod bucket;
pub mod builder;
pub mod capacity;
pub mod engine;
pub mod error;
mod counters;
mod rng;

pub use builder::CollisionCacheBuilder;
pub use capacity::{CapacityPolicy, Packed, Sparse};
pub use engine::Cache;
pub use error::{Error, Result};

/// Rounds `n` up to the next power of two, treating `0` as `1` (there is no
/// meaningful zero-width bucket or zero-bucket table).
pub(crate) fn pow2_ceil(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{WithKeys, WithoutKeys};

    #[test]
    fn packed_with_keys_put_get_remove() {
        let cache = CollisionCacheBuilder::<u32, &'static str>::with_capacity(16)
            .bucket_size(4)
            .build_packed::<WithKeys<u32, &'static str>>()
            .unwrap();
        assert_eq!(cache.put_if_absent(1, "one"), None);
        assert_eq!(cache.get_if_present(&1), Some("one"));
        assert_eq!(cache.put_if_absent(1, "uno"), Some("one"));
        assert!(cache.remove(&1));
        assert_eq!(cache.get_if_present(&1), None);
        assert!(!cache.remove(&1));
    }

    #[test]
    fn sparse_without_keys_tracks_size() {
        let cache = CollisionCacheBuilder::<u32, u32>::with_capacity(4)
            .bucket_size(4)
            .sparse_factor(2.0)
            .is_val_for_key(|k: &u32, v: &u32| k == v)
            .build_sparse::<WithoutKeys<u32, u32>>()
            .unwrap();
        for k in 0..4u32 {
            assert_eq!(cache.put_if_absent(k, k), None);
        }
        assert_eq!(cache.len(), Some(4));
        assert!(cache.remove(&0));
        assert_eq!(cache.len(), Some(3));
    }

    #[test]
    fn get_with_loader_installs_on_miss() {
        let cache = CollisionCacheBuilder::<u32, u32>::with_capacity(16)
            .bucket_size(4)
            .build_packed::<WithKeys<u32, u32>>()
            .unwrap();
        let loaded = cache.get_with(&7, |k| Some(k * 10));
        assert_eq!(loaded, Some(70));
        assert_eq!(cache.get_if_present(&7), Some(70));
    }

    #[test]
    fn get_with_loader_returning_none_does_not_install() {
        let cache = CollisionCacheBuilder::<u32, u32>::with_capacity(16)
            .bucket_size(4)
            .build_packed::<WithKeys<u32, u32>>()
            .unwrap();
        assert_eq!(cache.get_with(&7, |_| None), None);
        assert_eq!(cache.get_if_present(&7), None);
    }

    #[test]
    fn clear_empties_every_bucket() {
        let cache = CollisionCacheBuilder::<u32, u32>::with_capacity(8)
            .bucket_size(4)
            .sparse_factor(2.0)
            .build_sparse::<WithKeys<u32, u32>>()
            .unwrap();
        for k in 0..8u32 {
            cache.put_if_absent(k, k);
        }
        cache.clear();
        assert_eq!(cache.len(), Some(0));
        for k in 0..8u32 {
            assert_eq!(cache.get_if_present(&k), None);
        }
    }

    #[test]
    fn full_packed_bucket_evicts_least_frequently_used() {
        let cache = CollisionCacheBuilder::<u32, u32>::with_capacity(4)
            .bucket_size(4)
            .init_count(0)
            .build_packed::<WithKeys<u32, u32>>()
            .unwrap();
        for k in 0..4u32 {
            cache.put_if_absent(k, k);
        }
        for _ in 0..50 {
            cache.get_if_present(&0);
        }
        cache.put_if_absent(4, 4);
        assert_eq!(cache.get_if_present(&0), Some(0));
    }
}
