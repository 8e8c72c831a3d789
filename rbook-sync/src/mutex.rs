/// Process-wide exclusion gate for sync passes
///
/// `run` never waits: a caller that finds the gate held is told it was
/// skipped. The gate is released by a drop guard, so an error, a panic or a
/// cancelled future inside the body still frees it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct SyncMutex {
    held: AtomicBool,
}

/// Releases the gate when dropped
#[derive(Debug)]
pub struct SyncGuard<'a> {
    mutex: &'a SyncMutex,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.mutex.held.store(false, Ordering::Release);
    }
}

impl SyncMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Take the gate if it is free.
    pub fn try_acquire(&self) -> Option<SyncGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard { mutex: self })
    }

    /// Run `f` while holding the gate. Returns `None` without running `f`
    /// when another pass already holds it.
    pub async fn run<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = match self.try_acquire() {
            Some(guard) => guard,
            None => {
                tracing::debug!("Sync already running, skipping");
                return None;
            }
        };
        Some(f().await)
    }
}
