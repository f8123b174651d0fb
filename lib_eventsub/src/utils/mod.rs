//! # Utilities Module
//!
//! Small helpers shared by the pool, store and dispatch layers: random
//! identifiers for pools and persisted records, and a poison-tolerant lock
//! accessor for the short synchronous critical sections around shared maps.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::distr::Alphanumeric;
use rand::Rng;

/// Length of generated pool identifiers.
pub const POOL_ID_LEN: usize = 12;
/// Length of generated persisted record identifiers.
pub const RECORD_ID_LEN: usize = 15;

/// Returns a random lowercase alphanumeric string of `len` characters.
pub fn random_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Locks `mutex`, recovering the data if a previous holder panicked.
///
/// None of the guarded structures can be left half-updated by a panic, so the
/// inner value is always safe to keep using.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
