use dealsync_core::EntityRef;

use crate::error::EngineError;
use crate::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchOutcome {
    /// The replica was swapped for the fetched state.
    Replaced { deals: usize },
    /// The fetched state matched the replica; nothing was written.
    Unchanged,
}

impl Engine {
    /// Reload every deal from the remote and replace the replica wholesale.
    ///
    /// Entities still in the pending-write registry keep their local state.
    pub async fn full_refetch(&self) -> Result<RefetchOutcome, EngineError> {
        let fetched = self
            .durable("fetch_all", || self.shared.remote.fetch_all())
            .await?;
        let latest = fetched
            .iter()
            .flat_map(|deal| std::iter::once(deal.updated_at).chain(deal.lenders.iter().map(|l| l.updated_at)))
            .max();

        let (outcome, preserved) = {
            let mut replica = self.shared.replica.lock();
            let pending: Vec<EntityRef> = self.shared.pending.lock().entities();
            let next = replica.rebuilt_from(fetched, &pending);
            if next.fingerprint()? == replica.fingerprint()? {
                (RefetchOutcome::Unchanged, pending.len())
            } else {
                let deals = next.len();
                *replica = next;
                (RefetchOutcome::Replaced { deals }, pending.len())
            }
        };

        if let Some(latest) = latest {
            self.shared.clock.lock().observe(latest);
        }

        match outcome {
            RefetchOutcome::Replaced { deals } => {
                tracing::info!(target: "dealsync::reconcile", deals, preserved, "replica replaced from remote");
            }
            RefetchOutcome::Unchanged => {
                tracing::debug!(target: "dealsync::reconcile", preserved, "refetch matched replica");
            }
        }
        Ok(outcome)
    }
}
