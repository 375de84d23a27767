pub mod config;
pub mod error;
pub mod executor;
pub mod listener;
pub mod notify;
pub mod reconciler;
pub mod refetch;
pub mod registry;
pub mod replica;
pub mod scheduler;
pub mod side_effects;

pub use config::EngineConfig;
pub use error::{ConfigError, EngineError, SinkError};
pub use executor::MutationReceipt;
pub use notify::{Action, LogNotifier, Notice, NoticeKind, UserNotifier};
pub use reconciler::ReconcilerHandle;
pub use refetch::RefetchOutcome;
pub use registry::PendingWrites;
pub use replica::{EntitySnapshot, Replica, ReplicaSnapshot};
pub use side_effects::{ActivityLog, AutomationSink, SideEffect, SideEffectDispatcher, WebhookRelay};

use std::sync::Arc;

use parking_lot::Mutex;

use dealsync_core::{
    Actor, Deal, DealId, EntityRef, Lender, LenderId, MonotonicClock, ReplicaFingerprint, Timestamp,
};
use dealsync_storage::RemoteStore;

/// Client-side deal replica with optimistic mutations and push-driven
/// reconciliation.
///
/// Cloning is cheap; all clones share one replica, one pending-write
/// registry and one clock.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

struct Shared {
    // Lock order: replica, then pending, then clock. No guard is held across
    // an `.await`.
    replica: Mutex<Replica>,
    pending: Mutex<PendingWrites>,
    clock: Mutex<MonotonicClock>,
    remote: Arc<dyn RemoteStore>,
    effects: SideEffectDispatcher,
    notifier: Arc<dyn UserNotifier>,
    config: EngineConfig,
    actor: Actor,
}

impl Engine {
    /// Build an engine with an empty replica. Call [`Engine::full_refetch`]
    /// to load it.
    pub fn new(
        config: EngineConfig,
        actor: Actor,
        remote: Arc<dyn RemoteStore>,
        effects: SideEffectDispatcher,
        notifier: Arc<dyn UserNotifier>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                replica: Mutex::new(Replica::new()),
                pending: Mutex::new(PendingWrites::new()),
                clock: Mutex::new(MonotonicClock::new()),
                remote,
                effects,
                notifier,
                config,
                actor,
            }),
        })
    }

    pub fn actor(&self) -> &Actor {
        &self.shared.actor
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn snapshot(&self) -> ReplicaSnapshot {
        self.shared.replica.lock().snapshot()
    }

    pub fn deals(&self) -> Vec<Deal> {
        self.shared.replica.lock().deals().cloned().collect()
    }

    pub fn deal(&self, deal_id: DealId) -> Option<Deal> {
        self.shared.replica.lock().deal(deal_id).cloned()
    }

    pub fn lender(&self, lender_id: LenderId) -> Option<Lender> {
        self.shared.replica.lock().lender(lender_id).cloned()
    }

    pub fn fingerprint(&self) -> Result<ReplicaFingerprint, EngineError> {
        Ok(self.shared.replica.lock().fingerprint()?)
    }

    /// Number of distinct entities with an unconfirmed or recently confirmed write.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn is_pending(&self, entity: EntityRef) -> bool {
        self.shared.pending.lock().contains(entity)
    }

    fn tick(&self) -> Result<Timestamp, EngineError> {
        Ok(self.shared.clock.lock().tick()?)
    }
}
