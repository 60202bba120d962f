//! Per-subtree serialization of model writes.
//!
//! Writers to the same subtree mutually exclude; writers to unrelated
//! subtrees proceed concurrently. "Related" means one address is a prefix
//! of the other, so a write at `/host=a` blocks a concurrent write at
//! `/host=a/server=x` and vice versa, while `/host=b` is unaffected.
//! Waits are bounded: a contended acquisition gives up after a deadline
//! instead of blocking forever.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tiller_model::PathAddress;
use tracing::trace;

/// Hierarchical write lock over model addresses.
#[derive(Debug, Default)]
pub struct ModelLock {
    held: Mutex<Vec<PathAddress>>,
    released: Condvar,
}

impl ModelLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until no related address is held by another owner, then
    /// records `address` as held. The returned guard releases on drop.
    ///
    /// Addresses in `own` are guards the caller already holds; they never
    /// block, so a context can widen from a child address to an ancestor.
    /// Returns `None` if the wait exceeds `timeout`, which keeps two
    /// contexts acquiring overlapping sets in opposite order from hanging
    /// each other forever.
    #[must_use]
    pub fn acquire(
        self: &Arc<Self>,
        address: PathAddress,
        own: &[PathAddress],
        timeout: Duration,
    ) -> Option<WriteGuard> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held
            .iter()
            .any(|h| h.is_related(&address) && !own.contains(h))
        {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                trace!(address = %address, "gave up waiting for related model write");
                return None;
            }
            trace!(address = %address, "waiting for related model write");
            let (guard, _) = self
                .released
                .wait_timeout(held, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
        }
        held.push(address.clone());
        Some(WriteGuard {
            lock: Arc::clone(self),
            address,
        })
    }
}

/// Ownership token for one held write address.
#[derive(Debug)]
pub struct WriteGuard {
    lock: Arc<ModelLock>,
    address: PathAddress,
}

impl WriteGuard {
    #[must_use]
    pub fn address(&self) -> &PathAddress {
        &self.address
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let mut held = self
            .lock
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = held.iter().position(|h| *h == self.address) {
            held.remove(index);
        }
        self.lock.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    const LONG: Duration = Duration::from_secs(5);

    fn addr(s: &str) -> PathAddress {
        PathAddress::parse(s).unwrap()
    }

    #[test]
    fn test_unrelated_addresses_do_not_block() {
        let lock = Arc::new(ModelLock::new());
        let _a = lock.acquire(addr("/host=a"), &[], LONG).unwrap();
        let _b = lock.acquire(addr("/host=b"), &[], LONG).unwrap();
    }

    #[test]
    fn test_related_addresses_serialize() {
        let lock = Arc::new(ModelLock::new());
        let guard = lock.acquire(addr("/host=a"), &[], LONG).unwrap();
        let (tx, rx) = mpsc::channel();
        let contender = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            let _g = contender.acquire(addr("/host=a/server=x"), &[], LONG).unwrap();
            tx.send(()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(guard);
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_guard_drop_releases() {
        let lock = Arc::new(ModelLock::new());
        drop(lock.acquire(addr("/host=a"), &[], LONG).unwrap());
        let _again = lock.acquire(addr("/host=a"), &[], LONG).unwrap();
    }

    #[test]
    fn test_widening_past_own_guard_does_not_self_block() {
        let lock = Arc::new(ModelLock::new());
        let child = lock.acquire(addr("/host=a/server=x"), &[], LONG).unwrap();
        // The same owner widens to the ancestor without waiting on itself.
        let parent = lock
            .acquire(addr("/host=a"), &[child.address().clone()], Duration::from_millis(200))
            .unwrap();
        // A different owner's related write still excludes.
        let contender = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            contender
                .acquire(addr("/host=a/server=y"), &[], Duration::from_millis(50))
                .is_none()
        });
        assert!(handle.join().unwrap());
        drop(child);
        drop(parent);
    }

    #[test]
    fn test_contended_acquire_times_out() {
        let lock = Arc::new(ModelLock::new());
        let _held = lock.acquire(addr("/host=a"), &[], LONG).unwrap();
        assert!(
            lock.acquire(addr("/host=a"), &[], Duration::from_millis(50))
                .is_none()
        );
    }
}
