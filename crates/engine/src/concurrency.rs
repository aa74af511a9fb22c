//! Concurrency controller: a dynamically resizable admission gate.
//!
//! The controller is the single synchronization point for the "how many jobs
//! run at once" invariant. Workers block in `acquire` until a slot is free;
//! the level can be raised and lowered at runtime, and lowering is realized
//! lazily: running jobs are never evicted, slots are simply not refilled
//! until the active count drops below the new level again. Killing an
//! in-flight external encode would corrupt its output, so contraction waits.

use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug)]
struct GateState {
    /// Currently permitted level (1 ..= max).
    level: u32,
    /// Number of slots currently held.
    active: u32,
    /// Once set, `acquire` refuses all callers.
    shutdown: bool,
}

/// Admission gate bounding the number of simultaneously running jobs.
pub struct ConcurrencyController {
    state: Mutex<GateState>,
    notify: Notify,
    max: u32,
}

/// Derive the initial concurrency level when the configuration does not pin
/// one: half the logical cores, clamped into `[1, max]`.
pub fn derive_initial_level(requested: Option<u32>, max: u32) -> u32 {
    let level = requested.unwrap_or_else(|| (num_cpus::get() as u32 / 2).max(1));
    level.clamp(1, max.max(1))
}

impl ConcurrencyController {
    /// Create a controller with the given initial level and hard ceiling.
    ///
    /// The initial level is clamped into `[1, max]`.
    pub fn new(initial: u32, max: u32) -> Self {
        let max = max.max(1);
        Self {
            state: Mutex::new(GateState {
                level: initial.clamp(1, max),
                active: 0,
                shutdown: false,
            }),
            notify: Notify::new(),
            max,
        }
    }

    /// Acquire a slot, waiting until the active count is below the current
    /// level. Returns `false` without taking a slot once shutdown has been
    /// requested.
    ///
    /// Waiters re-check against the level in effect when they wake, so a
    /// level lowered while they were blocked is honored.
    pub async fn acquire(&self) -> bool {
        loop {
            // Register for notification before checking state, otherwise a
            // release between the check and the await would be missed.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().expect("gate state poisoned");
                if state.shutdown {
                    return false;
                }
                if state.active < state.level {
                    state.active += 1;
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Release a held slot and wake waiters.
    pub fn release(&self) {
        {
            let mut state = self.state.lock().expect("gate state poisoned");
            state.active = state.active.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    /// Set the level, clamped into `[1, max]`. Returns the effective level.
    ///
    /// Raising wakes all waiters so the new headroom is admitted through
    /// their re-checks; lowering never evicts active holders.
    pub fn set_level(&self, new_level: u32) -> u32 {
        let (effective, raised) = {
            let mut state = self.state.lock().expect("gate state poisoned");
            let clamped = new_level.clamp(1, self.max);
            let raised = clamped > state.level;
            state.level = clamped;
            (clamped, raised)
        };
        if raised {
            self.notify.notify_waiters();
        }
        effective
    }

    /// Raise the level by one. Returns `true` if the level changed.
    ///
    /// Refused after shutdown: there is no point admitting more work while
    /// draining.
    pub fn increase(&self) -> bool {
        let raised = {
            let mut state = self.state.lock().expect("gate state poisoned");
            if state.shutdown || state.level >= self.max {
                false
            } else {
                state.level += 1;
                true
            }
        };
        if raised {
            self.notify.notify_waiters();
        }
        raised
    }

    /// Lower the level by one (floor 1). Returns `true` if the level changed.
    pub fn decrease(&self) -> bool {
        let mut state = self.state.lock().expect("gate state poisoned");
        if state.level > 1 {
            state.level -= 1;
            true
        } else {
            false
        }
    }

    /// Hardware-capability backoff: halve the level (floor 1) and return the
    /// new value.
    pub fn halve_level(&self) -> u32 {
        let mut state = self.state.lock().expect("gate state poisoned");
        state.level = (state.level / 2).max(1);
        state.level
    }

    /// Request shutdown: no further slots are granted. Blocked `acquire`
    /// calls wake and return `false`. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock().expect("gate state poisoned");
            state.shutdown = true;
        }
        self.notify.notify_waiters();
    }

    /// Current permitted level.
    pub fn level(&self) -> u32 {
        self.state.lock().expect("gate state poisoned").level
    }

    /// Number of slots currently held.
    pub fn active(&self) -> u32 {
        self.state.lock().expect("gate state poisoned").active
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().expect("gate state poisoned").shutdown
    }

    /// Hard ceiling the level is clamped to.
    pub fn max_level(&self) -> u32 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_up_to_level() {
        let gate = ConcurrencyController::new(2, 8);

        assert!(gate.acquire().await);
        assert!(gate.acquire().await);
        assert_eq!(gate.active(), 2);
    }

    #[tokio::test]
    async fn test_acquire_blocks_at_level_until_release() {
        let gate = Arc::new(ConcurrencyController::new(1, 8));
        assert!(gate.acquire().await);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };

        // The waiter cannot get a slot yet.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.release();
        assert!(waiter.await.unwrap());
        assert_eq!(gate.active(), 1);
    }

    #[tokio::test]
    async fn test_lowering_level_is_lazy() {
        let gate = Arc::new(ConcurrencyController::new(3, 8));
        assert!(gate.acquire().await);
        assert!(gate.acquire().await);
        assert!(gate.acquire().await);

        // Contracting below the active count must not evict anyone.
        gate.set_level(1);
        assert_eq!(gate.level(), 1);
        assert_eq!(gate.active(), 3);

        // A new acquire waits until active drops below the new level.
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.release();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // active is 2, still >= level 1
        assert!(!waiter.is_finished());

        gate.release();
        gate.release();
        // active is 0 < 1, waiter admitted
        assert!(waiter.await.unwrap());
        assert_eq!(gate.active(), 1);
    }

    #[tokio::test]
    async fn test_raising_level_admits_waiters() {
        let gate = Arc::new(ConcurrencyController::new(1, 8));
        assert!(gate.acquire().await);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.set_level(2);
        assert!(waiter.await.unwrap());
        assert_eq!(gate.active(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters_with_false() {
        let gate = Arc::new(ConcurrencyController::new(1, 8));
        assert!(gate.acquire().await);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        gate.shutdown();
        assert!(!waiter.await.unwrap());
        // The running holder was not evicted.
        assert_eq!(gate.active(), 1);

        // New acquires are refused outright.
        assert!(!gate.acquire().await);
    }

    #[tokio::test]
    async fn test_increase_refused_after_shutdown() {
        let gate = ConcurrencyController::new(2, 8);
        gate.shutdown();
        assert!(!gate.increase());
        assert_eq!(gate.level(), 2);
    }

    #[test]
    fn test_increase_decrease_bounds() {
        let gate = ConcurrencyController::new(1, 2);

        assert!(gate.increase());
        assert_eq!(gate.level(), 2);
        // At the ceiling
        assert!(!gate.increase());

        assert!(gate.decrease());
        assert_eq!(gate.level(), 1);
        // At the floor
        assert!(!gate.decrease());
    }

    #[test]
    fn test_halve_level_floors_at_one() {
        let gate = ConcurrencyController::new(8, 8);
        assert_eq!(gate.halve_level(), 4);
        assert_eq!(gate.halve_level(), 2);
        assert_eq!(gate.halve_level(), 1);
        assert_eq!(gate.halve_level(), 1);
    }

    #[test]
    fn test_initial_level_clamped() {
        let gate = ConcurrencyController::new(100, 8);
        assert_eq!(gate.level(), 8);

        let gate = ConcurrencyController::new(0, 8);
        assert_eq!(gate.level(), 1);
    }

    // Property: for any interleaving of acquire/release/set_level, granted
    // permits never exceed the level in effect at grant time nor the
    // configured maximum, and active only decreases via release.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_grants_never_exceed_level(
            initial in 1u32..8,
            max in 1u32..8,
            ops in prop::collection::vec(0u8..4, 1..64),
            levels in prop::collection::vec(1u32..12, 1..64),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            rt.block_on(async move {
                let gate = ConcurrencyController::new(initial, max);
                let mut held = 0u32;

                for (op, lvl) in ops.iter().zip(levels.iter().cycle()) {
                    match op {
                        // try to acquire only when it cannot block forever
                        0 => {
                            if held < gate.level() {
                                prop_assert!(gate.acquire().await);
                                held += 1;
                                // grant respected the level in effect at grant time
                                prop_assert!(gate.active() <= gate.level());
                                prop_assert!(gate.active() <= gate.max_level());
                            }
                        }
                        1 => {
                            if held > 0 {
                                gate.release();
                                held -= 1;
                            }
                        }
                        2 => {
                            let effective = gate.set_level(*lvl);
                            prop_assert!((1..=max.max(1)).contains(&effective));
                            // lowering never evicts active holders
                            prop_assert_eq!(gate.active(), held);
                        }
                        _ => {
                            gate.increase();
                            gate.decrease();
                        }
                    }
                    prop_assert_eq!(gate.active(), held);
                    prop_assert!(gate.level() >= 1);
                    prop_assert!(gate.level() <= gate.max_level());
                }
                Ok(())
            })?;
        }
    }

    #[test]
    fn test_derive_initial_level() {
        // Explicit request wins, clamped to max.
        assert_eq!(derive_initial_level(Some(4), 8), 4);
        assert_eq!(derive_initial_level(Some(100), 8), 8);
        assert_eq!(derive_initial_level(Some(1), 8), 1);

        // Derived value is always within bounds.
        let derived = derive_initial_level(None, 8);
        assert!((1..=8).contains(&derived));
    }
}
