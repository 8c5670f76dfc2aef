//! The per-slot approximate-log frequency counter array.
//!
//! One byte per (bucket × slot-within-bucket), accessed with relaxed atomics
//! (same-location atomicity, no cross-variable ordering — callers never need
//! a counter write to happen-before anything else). The threshold curve
//! below is computed in floating point rather than as an integer bit-shift,
//! which keeps it well-defined even when `maxCounterVal < 32768` (the
//! default), where the shift amount would otherwise be negative.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU8, Ordering::Relaxed};

use crate::error::{Error, Result};
use crate::rng;

/// Lowest allowed `initCount`.
pub const MIN_INITIAL_COUNT: u8 = 0;
/// Highest allowed `initCount`.
pub const MAX_INITIAL_COUNT: u8 = 32;
/// Lowest allowed `maxCounterVal`.
pub const MIN_MAX_COUNTER_VAL: u32 = 256;

const SATURATED: u8 = u8::MAX;

pub(crate) struct AtomicLogCounters {
    counters: Box<[AtomicU8]>,
    /// `thresholds[c]` is the probability that an `increment` on a counter
    /// currently holding `c` (with `c > initial_count`) actually applies.
    /// Index `0` is unused by the probabilistic branch (counts `<=
    /// initial_count` always take the unconditional branch) but is filled in
    /// for completeness.
    thresholds: Box<[f64; 255]>,
    initial_count: u8,
}

impl AtomicLogCounters {
    /// Builds a counter array of `len` bytes, all initialized to zero
    /// (an uninitialized/empty slot has no counter to speak of until
    /// [`AtomicLogCounters::initialize`] is called for it).
    pub(crate) fn new(len: usize, initial_count: u8, max_counter_val: u32) -> Result<Self> {
        if initial_count > MAX_INITIAL_COUNT {
            return Err(Error::InvalidArgument("init_count"));
        }
        if max_counter_val < MIN_MAX_COUNTER_VAL {
            return Err(Error::InvalidArgument("max_counter_val"));
        }
        let mut counters = alloc::vec::Vec::with_capacity(len);
        counters.resize_with(len, || AtomicU8::new(0));
        Ok(Self {
            counters: counters.into_boxed_slice(),
            thresholds: Box::new(threshold_curve(max_counter_val)),
            initial_count,
        })
    }

    pub(crate) fn initial_count(&self) -> u8 {
        self.initial_count
    }

    /// Publish `initial_count` at `i` with an opaque store.
    pub(crate) fn initialize(&self, i: usize) {
        self.counters[i].store(self.initial_count, Relaxed);
    }

    pub(crate) fn get(&self, i: usize) -> u8 {
        self.counters[i].load(Relaxed)
    }

    pub(crate) fn set(&self, i: usize, v: u8) {
        self.counters[i].store(v, Relaxed);
    }

    /// Probabilistic saturating +1 at `i`. Below `initial_count` every call
    /// bumps unconditionally; above it, a weighted coin flip decides whether
    /// this call takes effect, so the counter approaches saturation roughly
    /// logarithmically in the number of hits rather than linearly.
    pub(crate) fn increment(&self, i: usize) {
        let cell = &self.counters[i];
        loop {
            let current = cell.load(Relaxed);
            if current == SATURATED {
                return;
            }
            if current <= self.initial_count {
                // Unconditional bump. A lost CAS just re-enters this same
                // loop, which re-derives whichever branch is now correct
                // (still <= initial_count: try again; crossed it: fall to
                // the probabilistic branch below; saturated: return above) —
                // there is no separate retry sub-loop for this branch.
                if cell
                    .compare_exchange_weak(current, current + 1, Relaxed, Relaxed)
                    .is_ok()
                {
                    return;
                }
                continue;
            }
            let r = rng::next_f64();
            if self.thresholds[current as usize] < r {
                return;
            }
            if cell
                .compare_exchange_weak(current, current + 1, Relaxed, Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Halve the counter at `i`, skipping counters already at zero.
    /// Load-then-store, not a CAS: a concurrent `increment` racing this call
    /// may have its bump silently lost, which is acceptable for an already
    /// approximate statistic.
    pub(crate) fn decay_one(&self, i: usize) -> u8 {
        let cell = &self.counters[i];
        let v = cell.load(Relaxed);
        if v == 0 {
            return 0;
        }
        let halved = v >> 1;
        cell.store(halved, Relaxed);
        halved
    }

    /// Halve every counter in `[from, to)`.
    pub(crate) fn decay(&self, from: usize, to: usize) {
        for i in from..to {
            self.decay_one(i);
        }
    }

    /// Halve every counter in `[from, to)` except `skip`.
    pub(crate) fn decay_skip(&self, from: usize, to: usize, skip: usize) {
        for i in from..to {
            if i == skip {
                continue;
            }
            self.decay_one(i);
        }
    }
}

/// Builds the 255-entry threshold table: `thresholds[i] = 1 / (i * 2^F)` for
/// `i in 1..=254`, `thresholds[0] = 1.0`, where
/// `F = log2(next_power_of_two(max_counter_val - 1) / 32768)`.
///
/// `F` is frequently negative (whenever `max_counter_val < 32768`, which is
/// the common case — the default is `2^14`), so the scaling is computed in
/// floating point rather than as an integer shift, which would have no
/// defined meaning for a negative shift amount.
fn threshold_curve(max_counter_val: u32) -> [f64; 255] {
    let p = (max_counter_val.saturating_sub(1)).next_power_of_two();
    let f = (p as f64 / 32768.0).log2();
    let scale = 2f64.powf(f);
    let mut table = [0f64; 255];
    table[0] = 1.0;
    for (i, slot) in table.iter_mut().enumerate().skip(1) {
        *slot = 1.0 / (i as f64 * scale);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_initial_count() {
        assert!(AtomicLogCounters::new(16, 33, 256).is_err());
        assert!(AtomicLogCounters::new(16, 32, 256).is_ok());
    }

    #[test]
    fn rejects_small_max_counter_val() {
        assert!(AtomicLogCounters::new(16, 5, 255).is_err());
        assert!(AtomicLogCounters::new(16, 5, 256).is_ok());
    }

    #[test]
    fn increment_never_decreases_and_saturates() {
        let counters = AtomicLogCounters::new(1, 0, 256).unwrap();
        counters.initialize(0);
        let mut last = counters.get(0);
        for _ in 0..100_000 {
            counters.increment(0);
            let now = counters.get(0);
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, SATURATED);
    }

    #[test]
    fn decay_halves_and_skips_zero() {
        let counters = AtomicLogCounters::new(4, 5, 256).unwrap();
        counters.set(0, 8);
        counters.set(1, 1);
        counters.set(2, 0);
        counters.set(3, 5);
        counters.decay(0, 4);
        assert_eq!(counters.get(0), 4);
        assert_eq!(counters.get(1), 0);
        assert_eq!(counters.get(2), 0);
        assert_eq!(counters.get(3), 2);
    }

    #[test]
    fn decay_skip_leaves_skipped_index_untouched() {
        let counters = AtomicLogCounters::new(4, 5, 256).unwrap();
        counters.set(0, 8);
        counters.set(1, 8);
        counters.decay_skip(0, 2, 1);
        assert_eq!(counters.get(0), 4);
        assert_eq!(counters.get(1), 8);
    }

    #[test]
    fn reaches_saturation_within_tolerance_of_max_counter_val() {
        let max_counter_val = 1000u32;
        let counters = AtomicLogCounters::new(1, 0, max_counter_val).unwrap();
        counters.initialize(0);
        let mut hits = 0u32;
        while counters.get(0) != SATURATED {
            counters.increment(0);
            hits += 1;
            if hits > max_counter_val * 10 {
                panic!("counter failed to saturate within a generous bound");
            }
        }
        let lower = (max_counter_val as f64 * 0.5) as u32;
        let upper = (max_counter_val as f64 * 3.0) as u32;
        assert!(
            (lower..=upper).contains(&hits),
            "saturated after {hits} hits, expected roughly {max_counter_val}"
        );
    }
}
