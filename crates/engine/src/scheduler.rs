//! Debounce and gating decisions for full refetches.
//!
//! The scheduler is a pure state machine: callers pass the current instant
//! and whether the pending-write registry is empty, and act on the returned
//! [`Decision`]. The async driver lives in `reconciler`.

use std::time::Duration;

use tokio::time::Instant;

use dealsync_core::Table;

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Signals arrived; waiting for a quiet window.
    Debouncing { fire_at: Instant },
    /// A refetch is owed but local writes are still pending.
    Deferred { fire_at: Instant, attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing is due yet.
    Wait,
    /// Pending writes block the refetch; re-check at `retry_at`.
    Defer { attempt: u32, retry_at: Instant },
    /// Run a full refetch now. `forced` means the retry ceiling was reached
    /// while writes were still pending.
    Refetch { forced: bool, tables: Vec<Table> },
}

pub struct ReconcileScheduler {
    phase: Phase,
    dirty: Vec<Table>,
    debounce: Duration,
    retry_delay: Duration,
    max_retries: u32,
}

impl ReconcileScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_timing(config.debounce(), config.deferred_retry(), config.max_deferred_retries)
    }

    pub fn with_timing(debounce: Duration, retry_delay: Duration, max_retries: u32) -> Self {
        Self {
            phase: Phase::Idle,
            dirty: Vec::new(),
            debounce,
            retry_delay,
            max_retries,
        }
    }

    /// Record a change signal. Restarts the debounce window unless a
    /// deferred refetch is already owed.
    pub fn on_signal(&mut self, table: Table, now: Instant) {
        if !self.dirty.contains(&table) {
            self.dirty.push(table);
        }
        match self.phase {
            Phase::Idle | Phase::Debouncing { .. } => {
                self.phase = Phase::Debouncing {
                    fire_at: now + self.debounce,
                };
            }
            Phase::Deferred { .. } => {}
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Idle => None,
            Phase::Debouncing { fire_at } | Phase::Deferred { fire_at, .. } => Some(fire_at),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    pub fn poll(&mut self, now: Instant, registry_empty: bool) -> Decision {
        let attempts = match self.phase {
            Phase::Idle => return Decision::Wait,
            Phase::Debouncing { fire_at } | Phase::Deferred { fire_at, .. } if now < fire_at => {
                return Decision::Wait;
            }
            Phase::Debouncing { .. } => 0,
            Phase::Deferred { attempts, .. } => attempts,
        };

        if registry_empty {
            return self.fire(false);
        }
        if attempts >= self.max_retries {
            return self.fire(true);
        }

        let attempt = attempts + 1;
        let retry_at = now + self.retry_delay;
        self.phase = Phase::Deferred {
            fire_at: retry_at,
            attempts: attempt,
        };
        Decision::Defer { attempt, retry_at }
    }

    fn fire(&mut self, forced: bool) -> Decision {
        self.phase = Phase::Idle;
        Decision::Refetch {
            forced,
            tables: std::mem::take(&mut self.dirty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    fn scheduler() -> ReconcileScheduler {
        ReconcileScheduler::with_timing(300 * MS, 2_500 * MS, 3)
    }

    #[test]
    fn idle_scheduler_waits() {
        let mut s = scheduler();
        let base = Instant::now();
        assert_eq!(s.next_deadline(), None);
        assert_eq!(s.poll(base, true), Decision::Wait);
    }

    #[test]
    fn burst_coalesces_into_one_refetch() {
        let mut s = scheduler();
        let base = Instant::now();

        s.on_signal(Table::DealLenders, base);
        s.on_signal(Table::DealLenders, base + 100 * MS);
        assert_eq!(s.next_deadline(), Some(base + 400 * MS));

        assert_eq!(s.poll(base + 300 * MS, true), Decision::Wait);
        assert_eq!(
            s.poll(base + 400 * MS, true),
            Decision::Refetch {
                forced: false,
                tables: vec![Table::DealLenders]
            }
        );
        assert!(s.is_idle());
        assert_eq!(s.poll(base + 800 * MS, true), Decision::Wait);
    }

    #[test]
    fn dirty_tables_are_reported_once_each() {
        let mut s = scheduler();
        let base = Instant::now();
        s.on_signal(Table::Deals, base);
        s.on_signal(Table::DealLenders, base);
        s.on_signal(Table::Deals, base);
        let Decision::Refetch { tables, .. } = s.poll(base + 300 * MS, true) else {
            panic!("expected refetch");
        };
        assert_eq!(tables, vec![Table::Deals, Table::DealLenders]);
    }

    #[test]
    fn pending_writes_defer_until_clear() {
        let mut s = scheduler();
        let base = Instant::now();
        s.on_signal(Table::Deals, base);

        assert_eq!(
            s.poll(base + 300 * MS, false),
            Decision::Defer {
                attempt: 1,
                retry_at: base + 2_800 * MS
            }
        );
        // Signals while deferred do not push the retry out.
        s.on_signal(Table::Deals, base + 1_000 * MS);
        assert_eq!(s.next_deadline(), Some(base + 2_800 * MS));

        assert!(matches!(
            s.poll(base + 2_800 * MS, true),
            Decision::Refetch { forced: false, .. }
        ));
    }

    #[test]
    fn retry_ceiling_forces_refetch() {
        let mut s = scheduler();
        let base = Instant::now();
        s.on_signal(Table::Deals, base);

        let mut now = base + 300 * MS;
        for expected in 1..=3 {
            match s.poll(now, false) {
                Decision::Defer { attempt, retry_at } => {
                    assert_eq!(attempt, expected);
                    now = retry_at;
                }
                other => panic!("expected defer, got {other:?}"),
            }
        }
        assert!(matches!(s.poll(now, false), Decision::Refetch { forced: true, .. }));
        assert!(s.is_idle());
    }
}
