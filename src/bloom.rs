//! Negative-existence filter: a fast, probabilistic record of paths a fresh
//! `stat` has already confirmed absent, so a repeated lookup for the same
//! missing path can be counted as a filter hit instead of a fresh surprise.
//! The filter never denies access on its own — membership only changes how a
//! confirmed-absent result is accounted for, never whether it's confirmed.

use bloomfilter::Bloom;
use parking_lot::Mutex;
use std::path::Path;

const TARGET_FALSE_POSITIVE_RATE: f64 = 0.001;

/// Wraps a `Bloom<String>` behind a mutex; inserts are the only mutation, so
/// contention is expected to be low even under concurrent access.
pub struct NegativeExistenceFilter {
    bloom: Mutex<Bloom<String>>,
}

impl NegativeExistenceFilter {
    pub fn new(expected_items: usize) -> Self {
        Self {
            bloom: Mutex::new(Bloom::new_for_fp_rate(expected_items.max(1), TARGET_FALSE_POSITIVE_RATE)),
        }
    }

    /// Record that a fresh `stat(path)` confirmed the path absent.
    pub fn insert(&self, path: &Path) {
        self.bloom.lock().set(&path.to_string_lossy().to_string());
    }

    /// `false` means "never recorded as absent"; `true` means "maybe already
    /// known absent", which the caller still confirms with a fresh `stat`
    /// before counting it as a filter hit.
    pub fn maybe_contains(&self, path: &Path) -> bool {
        self.bloom.lock().check(&path.to_string_lossy().to_string())
    }

    pub fn clear(&self, expected_items: usize) {
        *self.bloom.lock() = Bloom::new_for_fp_rate(expected_items.max(1), TARGET_FALSE_POSITIVE_RATE);
    }
}
