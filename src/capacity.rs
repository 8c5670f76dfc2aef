//! The capacity-policy capability: `Packed` (no size tracking, no strict
//! mode) vs. `Sparse` (atomic `size`, optional strict mode).

use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};

/// What a capacity policy needs to answer on the miss path.
pub trait CapacityPolicy: Send + Sync {
    /// `Some(capacity)` for Sparse, `None` for Packed (no capacity guard).
    fn capacity(&self) -> Option<usize>;

    /// Refuse strict inserts once `size > capacity`. Always `false` for
    /// Packed (no strict mode).
    fn strict(&self) -> bool;

    /// Current observed size, or `None` if this policy doesn't track one.
    fn size(&self) -> Option<usize>;

    /// `true` once `size() > capacity()`. Always `false` for Packed.
    fn over_capacity(&self) -> bool {
        match (self.size(), self.capacity()) {
            (Some(size), Some(cap)) => size > cap,
            _ => false,
        }
    }

    /// Record a successful install. No-op for Packed.
    fn on_insert(&self);

    /// Record a successful remove/compaction. No-op for Packed.
    fn on_remove(&self);

    /// Reset any tracked size to zero, e.g. after `clear()`. No-op for Packed.
    fn reset(&self);

    /// Whether a *locked `get`-miss* full-bucket swap uses the min-tracking
    /// probabilistic path (`check_decay_and_prob_swap`) rather than the
    /// plain full-scan `decay_and_swap`. Packed always uses the full-scan
    /// swap here; Sparse always uses the min-tracking swap here,
    /// unconditionally — capacity headroom only changes what the
    /// min-tracking swap does internally (drop-and-compact vs. plain
    /// decay), not whether it runs. The lock-free-insert-then-CAS-race
    /// entry points (`get_aggressive`, `put_if_absent`) always use the
    /// min-tracking swap regardless of this policy; see `Cache::swap_full`
    /// vs. `Cache::swap_full_after_race`.
    fn uses_probabilistic_full_swap(&self) -> bool {
        false
    }
}

/// No size tracking, no strict mode, no capacity check: bucket fill is the
/// only limit (logical capacity is `N * B`).
#[derive(Debug, Default, Clone, Copy)]
pub struct Packed;

impl CapacityPolicy for Packed {
    fn capacity(&self) -> Option<usize> {
        None
    }
    fn strict(&self) -> bool {
        false
    }
    fn size(&self) -> Option<usize> {
        None
    }
    fn on_insert(&self) {}
    fn on_remove(&self) {}
    fn reset(&self) {}
}

/// Tracks `size` atomically; `strict` refuses inserts at slot 0 once `size >
/// capacity`.
pub struct Sparse {
    capacity: usize,
    strict: bool,
    size: AtomicUsize,
}

impl Sparse {
    pub(crate) fn new(capacity: usize, strict: bool) -> Self {
        Self {
            capacity,
            strict,
            size: AtomicUsize::new(0),
        }
    }
}

impl CapacityPolicy for Sparse {
    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }
    fn strict(&self) -> bool {
        self.strict
    }
    fn size(&self) -> Option<usize> {
        Some(self.size.load(Relaxed))
    }
    fn on_insert(&self) {
        self.size.fetch_add(1, Relaxed);
    }
    fn on_remove(&self) {
        self.size.fetch_sub(1, Relaxed);
    }
    fn reset(&self) {
        self.size.store(0, Relaxed);
    }
    fn uses_probabilistic_full_swap(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_never_reports_over_capacity() {
        let p = Packed;
        assert!(!p.over_capacity());
        p.on_insert();
        assert!(!p.over_capacity());
    }

    #[test]
    fn sparse_tracks_size_and_over_capacity() {
        let s = Sparse::new(2, true);
        assert!(!s.over_capacity());
        s.on_insert();
        s.on_insert();
        assert!(!s.over_capacity());
        s.on_insert();
        assert!(s.over_capacity());
        s.on_remove();
        assert!(!s.over_capacity());
        s.reset();
        assert_eq!(s.size(), Some(0));
    }
}
