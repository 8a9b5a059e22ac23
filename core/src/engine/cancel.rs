//! Cancellation registry
//!
//! Asynchronous operations started on behalf of a context (message waits,
//! external calls) hold a [`CancelHandle`]. The context registers the handle
//! so that killing the context interrupts the operation.
//!
//! Completion is explicit: finishing (or dropping) a handle marks its
//! registry entry dead. Dead entries are pruned from the front of the queue.
//! Completions are not FIFO, but live entries concentrate toward the tail,
//! so front pruning keeps the queue short in practice.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

#[derive(Debug, Default)]
struct HandleState {
    /// Set once the operation completed or was cancelled
    finished: AtomicBool,
}

impl HandleState {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Mark finished, returning true for the caller that flipped the flag
    fn finish(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }
}

/// Owned by the asynchronous operation; dropping it marks the operation done.
#[derive(Debug)]
pub struct CancelHandle {
    token: CancellationToken,
    state: Arc<HandleState>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            state: Arc::new(HandleState::default()),
        }
    }

    /// Resolves once the handle is cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Cancel the operation. Returns false if it had already finished.
    pub fn cancel(&self) -> bool {
        cancel_once(&self.state, &self.token)
    }

    /// Mark the operation as completed
    pub fn complete(self) {
        self.state.finish();
    }

    fn registration(&self) -> Registration {
        Registration {
            token: self.token.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.state.finish();
    }
}

fn cancel_once(state: &HandleState, token: &CancellationToken) -> bool {
    if state.finish() {
        token.cancel();
        true
    } else {
        false
    }
}

/// Registry side of a handle
#[derive(Debug)]
struct Registration {
    token: CancellationToken,
    state: Arc<HandleState>,
}

impl Registration {
    fn is_live(&self) -> bool {
        !self.state.is_finished()
    }

    fn cancel(&self) -> bool {
        cancel_once(&self.state, &self.token)
    }
}

#[derive(Debug, Default)]
pub struct CancellationRegistry {
    entries: VecDeque<Registration>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop finished entries from the front, stopping at the first live one.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&mut self) -> usize {
        let mut removed = 0;
        while self.entries.front().is_some_and(|e| !e.is_live()) {
            self.entries.pop_front();
            removed += 1;
        }
        removed
    }

    pub fn register(&mut self, handle: &CancelHandle) {
        self.entries.push_back(handle.registration());
    }

    /// Cancel every still-live entry and empty the registry.
    ///
    /// Returns the number of operations actually interrupted.
    pub fn cancel_all(&mut self) -> usize {
        self.entries.drain(..).filter(|e| e.cancel()).count()
    }

    /// Entries held, including finished ones not yet pruned
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_live()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_handles_are_pruned() {
        let mut registry = CancellationRegistry::new();

        for _ in 0..1000 {
            registry.prune();
            let handle = CancelHandle::new();
            registry.register(&handle);
            handle.complete();
        }

        // Only the last (finished, not yet pruned) entry remains
        assert!(registry.len() <= 1);
        assert_eq!(registry.live_count(), 0);
        registry.prune();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_prune_stops_at_first_live_entry() {
        let mut registry = CancellationRegistry::new();
        let live = CancelHandle::new();
        registry.register(&live);

        let finished = CancelHandle::new();
        registry.register(&finished);
        drop(finished);

        assert_eq!(registry.prune(), 0);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.live_count(), 1);

        drop(live);
        assert_eq!(registry.prune(), 2);
    }

    #[test]
    fn test_cancel_all_skips_finished_handles() {
        let mut registry = CancellationRegistry::new();
        let a = CancelHandle::new();
        let b = CancelHandle::new();
        registry.register(&a);
        registry.register(&b);
        b.complete();

        assert_eq!(registry.cancel_all(), 1);
        assert!(a.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handle_is_cancelled_at_most_once() {
        let handle = CancelHandle::new();
        assert!(handle.cancel());
        assert!(!handle.cancel());

        // Registering a cancelled handle does not make it cancellable again
        let mut registry = CancellationRegistry::new();
        registry.register(&handle);
        assert_eq!(registry.cancel_all(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves_on_cancel() {
        let handle = CancelHandle::new();
        let mut registry = CancellationRegistry::new();
        registry.register(&handle);

        let mut wait = tokio_test::task::spawn(handle.cancelled());
        tokio_test::assert_pending!(wait.poll());

        registry.cancel_all();
        assert!(wait.is_woken());
        tokio_test::assert_ready!(wait.poll());
    }
}
