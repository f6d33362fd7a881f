//! Ordered shutdown of the engine
//!
//! `Active → TearingDown → Destroyed`. The transition out of `Active` is a
//! single atomic compare-exchange and is the first thing teardown does, so
//! every worker, eviction hook and scan step that re-checks the flag sees it
//! before any resource goes away.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use log::{debug, info};

use super::shared::Shared;
use super::worker::WorkerPool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Active = 0,
    TearingDown = 1,
    Destroyed = 2,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::TearingDown,
            _ => Self::Destroyed,
        }
    }
}

#[derive(Debug)]
pub struct LifecycleGuard {
    state: AtomicU8,
}

impl Default for LifecycleGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleGuard {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Active as u8),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True once teardown has begun
    pub fn is_destroyed(&self) -> bool {
        self.state() != LifecycleState::Active
    }

    /// Set the destroyed flag. Returns false if teardown already started.
    pub(crate) fn begin_teardown(&self) -> bool {
        self.state
            .compare_exchange(
                LifecycleState::Active as u8,
                LifecycleState::TearingDown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn finish_teardown(&self) {
        self.state
            .store(LifecycleState::Destroyed as u8, Ordering::Release);
    }
}

/// The only code path that releases the document handle.
///
/// 1. destroyed flag
/// 2. detach the view target (eviction hooks then no-op)
/// 3. bump the generation (everything in flight becomes stale)
/// 4. stop the pool, waiting at most `grace`
/// 5. clear the cache
/// 6. close the document
pub(crate) fn teardown(shared: &Shared, pool: Option<WorkerPool>, grace: Duration) {
    if !shared.guard.begin_teardown() {
        debug!("Teardown already in progress");
        return;
    }

    shared.target.detach();
    let generation = shared.invalidate();

    let stragglers = match pool {
        Some(mut pool) => pool.shutdown(grace),
        None => 0,
    };
    if stragglers > 0 {
        debug!("{stragglers} worker(s) still busy after {grace:?}; abandoning them");
    }

    shared.clear_cache();
    shared.document.release();
    shared.guard.finish_teardown();

    info!("Viewport engine torn down at generation {generation}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_active() {
        let guard = LifecycleGuard::new();
        assert_eq!(guard.state(), LifecycleState::Active);
        assert!(!guard.is_destroyed());
    }

    #[test]
    fn teardown_transition_happens_once() {
        let guard = LifecycleGuard::new();
        assert!(guard.begin_teardown());
        assert_eq!(guard.state(), LifecycleState::TearingDown);
        assert!(guard.is_destroyed());

        assert!(!guard.begin_teardown());

        guard.finish_teardown();
        assert_eq!(guard.state(), LifecycleState::Destroyed);
        assert!(guard.is_destroyed());
    }
}
