//! Shared test helpers for this crate's `#[cfg(test)]` modules.

use std::sync::{Mutex, MutexGuard, OnceLock};

/// Serialize tests that mutate process environment variables, since
/// `cargo test` runs them concurrently in the same process.
pub fn lock_env() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
