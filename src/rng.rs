//! A tiny, lock-free PRNG used only to draw the uniform sample
//! [`crate::counters::AtomicLogCounters::increment`] needs. Not suitable for
//! anything where unpredictability matters; it's a coin-flip generator for an
//! approximate frequency counter, not a security primitive.

use core::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Global xorshift64* state, seeded with a fixed odd constant so the sequence
/// is deterministic across runs (this cache's LFU behaviour is already only
/// statistically correct; a seeded-at-startup generator would just trade one
/// kind of nondeterminism for another without buying anything).
static STATE: AtomicU64 = AtomicU64::new(0x9E37_79B9_7F4A_7C15);

/// Draw a sample in `[0, 1)`.
///
/// Every call advances the shared generator via a `fetch_update` loop, so
/// concurrent callers each get a distinct sample with no lock and no torn
/// state, at the cost of occasional CAS retries under contention — the same
/// trade-off this crate already accepts for slot publication.
pub(crate) fn next_f64() -> f64 {
    let next = STATE
        .fetch_update(Relaxed, Relaxed, |state| Some(xorshift64star(state)))
        .unwrap_or(0);
    // Top 53 bits as the mantissa of a value in [0, 1), the standard trick
    // for turning a 64-bit generator into a uniform float.
    (next >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

#[inline]
const fn xorshift64star(mut x: u64) -> u64 {
    if x == 0 {
        x = 0x9E37_79B9_7F4A_7C15;
    }
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    x.wrapping_mul(0x2545_F491_4F6C_DD1D)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_in_unit_interval() {
        for _ in 0..10_000 {
            let r = next_f64();
            assert!((0.0..1.0).contains(&r), "sample out of range: {r}");
        }
    }

    #[test]
    fn xorshift_never_gets_stuck_at_zero() {
        let mut x = 0u64;
        for _ in 0..100 {
            x = xorshift64star(x);
            assert_ne!(x, 0);
        }
    }
}
