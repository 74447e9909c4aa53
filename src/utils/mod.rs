pub mod config;
pub mod logger;
pub mod massindex_toml;

pub use config::*;
pub use logger::setup_logging;
pub use massindex_toml::{apply_file_to_config, load_massindex_toml};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, taking the data even if a panicking thread poisoned it.
/// Shared state here is counters and first-error slots, which stay valid across a panic.
pub(crate) fn lock_or_recover<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
