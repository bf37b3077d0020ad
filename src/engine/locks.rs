//! Per step-group mutual exclusion with staleness recovery.
//!
//! Navigation completion and script callbacks are uncorrelated; both can
//! try to trigger the same logical step. The lock on the step's group is
//! the sole arbiter: acquisition fails while the lock is held and fresh.
//! A lock held past the safety window is stale; staleness is checked
//! opportunistically when the next trigger for that group arrives and
//! causes a forced release plus a logged recovery action, never silent
//! continuation.

use std::collections::HashMap;

use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::domain::session::StepGroup;

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquire {
    /// The caller now holds the lock and may act.
    Acquired,
    /// Held and fresh; the trigger is silently ignored (expected under
    /// dual-signal racing, not an error).
    Contended,
    /// Held past the safety window. The lock has been force-released;
    /// the caller must treat the in-flight candidate as failed and
    /// advance the loop. The lock is NOT re-acquired.
    StaleReleased,
}

/// Lock table for all step groups of one session.
#[derive(Debug)]
pub struct StepLocks {
    stale_after: Duration,
    held_since: HashMap<StepGroup, Instant>,
}

impl StepLocks {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            stale_after,
            held_since: HashMap::new(),
        }
    }

    /// Attempt to acquire the lock for `group` at `now`.
    pub fn try_acquire(&mut self, group: StepGroup, now: Instant) -> LockAcquire {
        match self.held_since.get(&group) {
            None => {
                self.held_since.insert(group, now);
                debug!(?group, "lock acquired");
                LockAcquire::Acquired
            }
            Some(&since) if now.duration_since(since) >= self.stale_after => {
                self.held_since.remove(&group);
                warn!(
                    ?group,
                    held_for_ms = now.duration_since(since).as_millis() as u64,
                    "stale lock force-released"
                );
                LockAcquire::StaleReleased
            }
            Some(_) => {
                debug!(?group, "lock contended, trigger ignored");
                LockAcquire::Contended
            }
        }
    }

    /// Release the lock for `group`. Releasing an unheld lock is a no-op
    /// (a late unlock message may race a staleness recovery).
    pub fn release(&mut self, group: StepGroup) -> bool {
        self.held_since.remove(&group).is_some()
    }

    /// Release every held lock (cancellation path).
    pub fn release_all(&mut self) {
        self.held_since.clear();
    }

    pub fn is_held(&self, group: StepGroup) -> bool {
        self.held_since.contains_key(&group)
    }

    pub fn is_stale(&self, group: StepGroup, now: Instant) -> bool {
        self.held_since
            .get(&group)
            .is_some_and(|&since| now.duration_since(since) >= self.stale_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WINDOW: Duration = Duration::from_secs(12);

    #[test]
    fn second_acquire_within_window_is_contended() {
        let mut locks = StepLocks::new(WINDOW);
        let t0 = Instant::now();
        assert_eq!(locks.try_acquire(StepGroup::Submit, t0), LockAcquire::Acquired);
        assert_eq!(
            locks.try_acquire(StepGroup::Submit, t0 + Duration::from_secs(2)),
            LockAcquire::Contended
        );
        assert!(locks.is_held(StepGroup::Submit));
    }

    #[test]
    fn stale_lock_is_force_released_not_reacquired() {
        let mut locks = StepLocks::new(WINDOW);
        let t0 = Instant::now();
        assert_eq!(locks.try_acquire(StepGroup::Submit, t0), LockAcquire::Acquired);
        let late = t0 + Duration::from_secs(16);
        assert!(locks.is_stale(StepGroup::Submit, late));
        assert_eq!(
            locks.try_acquire(StepGroup::Submit, late),
            LockAcquire::StaleReleased
        );
        // The group is free again after the forced release.
        assert!(!locks.is_held(StepGroup::Submit));
        assert_eq!(locks.try_acquire(StepGroup::Submit, late), LockAcquire::Acquired);
    }

    #[test]
    fn groups_are_independent() {
        let mut locks = StepLocks::new(WINDOW);
        let t0 = Instant::now();
        assert_eq!(locks.try_acquire(StepGroup::Submit, t0), LockAcquire::Acquired);
        assert_eq!(locks.try_acquire(StepGroup::Extract, t0), LockAcquire::Acquired);
        locks.release(StepGroup::Submit);
        assert!(!locks.is_held(StepGroup::Submit));
        assert!(locks.is_held(StepGroup::Extract));
    }

    #[test]
    fn release_of_unheld_lock_is_noop() {
        let mut locks = StepLocks::new(WINDOW);
        assert!(!locks.release(StepGroup::Lookup));
    }

    proptest! {
        /// Single-owner invariant: interleaving acquire attempts from two
        /// simulated signal sources, at most one acquisition succeeds per
        /// held window; a second owner appears only after a release or a
        /// staleness-triggered forced release.
        #[test]
        fn single_owner_per_window(steps in proptest::collection::vec((0u8..2, 0u64..6_000), 1..60)) {
            let mut locks = StepLocks::new(WINDOW);
            let base = Instant::now();
            let mut now = base;
            let mut owner: Option<(u8, Instant)> = None;

            for (source, advance_ms) in steps {
                now += Duration::from_millis(advance_ms);
                match locks.try_acquire(StepGroup::Submit, now) {
                    LockAcquire::Acquired => {
                        // Nobody may already own a fresh lock.
                        if let Some((_, since)) = owner {
                            prop_assert!(now.duration_since(since) >= WINDOW);
                        }
                        owner = Some((source, now));
                    }
                    LockAcquire::Contended => {
                        let (_, since) = owner.expect("contended without owner");
                        prop_assert!(now.duration_since(since) < WINDOW);
                    }
                    LockAcquire::StaleReleased => {
                        let (_, since) = owner.take().expect("stale without owner");
                        prop_assert!(now.duration_since(since) >= WINDOW);
                        prop_assert!(!locks.is_held(StepGroup::Submit));
                    }
                }
            }
        }
    }
}
