//! Shared test helpers.

use std::path::Path;
use std::sync::Mutex;

// Registration takes relative paths, so tests that touch real files run
// from inside a temporary directory. The working directory is process-wide
// state, hence the lock.
static CWD: Mutex<()> = Mutex::new(());

/// Runs `f` with the working directory switched to `dir`, restoring the
/// previous directory afterwards.
pub fn in_dir<T>(dir: &Path, f: impl FnOnce() -> T) -> T {
    let guard = CWD.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let previous = std::env::current_dir().expect("current dir");
    std::env::set_current_dir(dir).expect("enter test dir");
    let result = f();
    std::env::set_current_dir(previous).expect("restore dir");
    drop(guard);
    result
}
