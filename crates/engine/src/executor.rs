//! Optimistic mutations: apply locally, write durably, then confirm or roll back.

use std::fmt;
use std::future::Future;

use dealsync_core::{
    Deal, DealId, DealPatch, EntityRef, HistoryEntryId, Lender, LenderId, LenderPatch, MutationId,
    NewDeal, NewLender, NotesHistoryEntry, Timestamp,
};
use dealsync_storage::StorageError;

use crate::error::EngineError;
use crate::notify::{Action, Notice};
use crate::replica::EntitySnapshot;
use crate::side_effects::{
    plan_deal_created, plan_deal_deleted, plan_deal_update, plan_history_deleted, plan_lender_created,
    plan_lender_deleted, plan_lender_update,
};
use crate::Engine;

/// Confirmation of a durable write that the replica now reflects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationReceipt {
    pub mutation_id: MutationId,
    pub entity: EntityRef,
    /// Timestamp stamped on the optimistic apply.
    pub applied_at: Timestamp,
}

/// How a durable write ended, before side effects run.
enum Outcome {
    Confirmed,
    Denied,
    Failed(EngineError),
}

impl Engine {
    // ========================================================================
    // Deals
    // ========================================================================

    /// Insert a new deal remotely, then add it to the replica.
    ///
    /// Deals are never materialized before the remote accepts them.
    pub async fn create_deal(&self, new: NewDeal) -> Result<Deal, EngineError> {
        let now = self.tick()?;
        let deal = Deal::from_new(DealId::new(), new, self.shared.actor.id, now);
        let entity = EntityRef::Deal(deal.id);
        let mutation_id = MutationId::new();

        let written = self.durable(mutation_id, || self.shared.remote.insert_deal(&deal)).await;
        if let Err(err) = written {
            tracing::warn!(
                target: "dealsync::executor",
                mutation_id = %mutation_id,
                deal_id = %deal.id,
                error = %err,
                "deal insert failed"
            );
            let denied = matches!(err, StorageError::PermissionDenied(_));
            self.notify_failure(Action::CreateDeal, entity, &deal.name, denied);
            return Err(self.failure_error(Action::CreateDeal, entity, err));
        }

        self.shared.replica.lock().insert_deal(deal.clone());
        self.shared
            .notifier
            .notify(Notice::success(Action::CreateDeal, entity, &deal.name));
        self.shared
            .effects
            .dispatch(plan_deal_created(&deal, &self.shared.actor, now));
        Ok(deal)
    }

    pub async fn update_deal(&self, deal_id: DealId, patch: DealPatch) -> Result<MutationReceipt, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::EmptyPatch);
        }
        let now = self.tick()?;
        let entity = EntityRef::Deal(deal_id);

        let (snapshot, before, after, changes) = {
            let mut replica = self.shared.replica.lock();
            let snapshot = replica
                .capture_fields(deal_id)
                .ok_or(EngineError::DealNotFound(deal_id))?;
            let deal = replica.deal_mut(deal_id).ok_or(EngineError::DealNotFound(deal_id))?;
            let before = deal.clone();
            let changes = patch.apply(deal, now);
            let after = deal.clone();
            self.shared.pending.lock().acquire(entity);
            (snapshot, before, after, changes)
        };
        let mutation_id = self.applied(Action::UpdateDeal, entity);

        let written = self.durable(mutation_id, || self.shared.remote.update_deal(&after, &patch)).await;
        match self.settle_update(mutation_id, snapshot, Action::UpdateDeal, &before.name, written) {
            Outcome::Confirmed => {
                self.shared
                    .effects
                    .dispatch(plan_deal_update(&before, &after, &changes, &self.shared.actor, now));
                Ok(receipt(mutation_id, entity, now))
            }
            Outcome::Denied => Err(permission_denied(Action::UpdateDeal, entity)),
            Outcome::Failed(err) => Err(err),
        }
    }

    /// Remove a deal and its lenders. A delete the remote silently ignored is
    /// detected by probing for the row afterwards.
    pub async fn delete_deal(&self, deal_id: DealId) -> Result<MutationReceipt, EngineError> {
        let now = self.tick()?;
        let entity = EntityRef::Deal(deal_id);

        let (snapshot, removed) = {
            let mut replica = self.shared.replica.lock();
            let snapshot = replica.capture(entity);
            let removed = replica.remove_deal(deal_id).ok_or(EngineError::DealNotFound(deal_id))?;
            self.shared.pending.lock().acquire(entity);
            (snapshot, removed)
        };
        let mutation_id = self.applied(Action::DeleteDeal, entity);

        let written = self.durable(mutation_id, || self.shared.remote.delete_deal(deal_id)).await;
        let outcome = match written {
            Ok(rows) => {
                let probe = self.durable(mutation_id, || self.shared.remote.deal_exists(deal_id)).await;
                match probe {
                    Ok(false) => Outcome::Confirmed,
                    Ok(true) => {
                        tracing::warn!(
                            target: "dealsync::executor",
                            mutation_id = %mutation_id,
                            deal_id = %deal_id,
                            rows,
                            "deal still present after delete"
                        );
                        Outcome::Denied
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "dealsync::executor",
                            mutation_id = %mutation_id,
                            deal_id = %deal_id,
                            error = %err,
                            "existence probe failed"
                        );
                        Outcome::Failed(err.into())
                    }
                }
            }
            Err(err) => self.classify(mutation_id, err, Action::DeleteDeal, entity),
        };

        match self.settle(mutation_id, snapshot, Action::DeleteDeal, &removed.name, outcome) {
            Outcome::Confirmed => {
                self.shared
                    .notifier
                    .notify(Notice::success(Action::DeleteDeal, entity, &removed.name));
                self.shared
                    .effects
                    .dispatch(plan_deal_deleted(&removed, &self.shared.actor, now));
                Ok(receipt(mutation_id, entity, now))
            }
            Outcome::Denied => Err(permission_denied(Action::DeleteDeal, entity)),
            Outcome::Failed(err) => Err(err),
        }
    }

    // ========================================================================
    // Lenders
    // ========================================================================

    /// Add a lender to a deal optimistically.
    pub async fn create_lender(&self, deal_id: DealId, new: NewLender) -> Result<Lender, EngineError> {
        let now = self.tick()?;
        let lender = Lender::from_new(LenderId::new(), deal_id, new, now);
        let entity = EntityRef::Lender(lender.id);

        let snapshot = {
            let mut replica = self.shared.replica.lock();
            let snapshot = replica.capture(entity);
            replica.insert_lender(lender.clone())?;
            self.shared.pending.lock().acquire(entity);
            snapshot
        };
        let mutation_id = self.applied(Action::CreateLender, entity);

        let written = self.durable(mutation_id, || self.shared.remote.insert_lender(&lender)).await;
        let outcome = match written {
            Ok(()) => Outcome::Confirmed,
            Err(err) => self.classify(mutation_id, err, Action::CreateLender, entity),
        };

        match self.settle(mutation_id, snapshot, Action::CreateLender, &lender.name, outcome) {
            Outcome::Confirmed => {
                self.shared
                    .notifier
                    .notify(Notice::success(Action::CreateLender, entity, &lender.name));
                self.shared
                    .effects
                    .dispatch(plan_lender_created(&lender, &self.shared.actor, now));
                Ok(lender)
            }
            Outcome::Denied => Err(permission_denied(Action::CreateLender, entity)),
            Outcome::Failed(err) => Err(err),
        }
    }

    /// Patch a lender. Replacing non-empty notes archives the previous text
    /// into the notes history, both locally and remotely.
    pub async fn update_lender(
        &self,
        lender_id: LenderId,
        patch: LenderPatch,
    ) -> Result<MutationReceipt, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::EmptyPatch);
        }
        let now = self.tick()?;
        let entity = EntityRef::Lender(lender_id);

        let (snapshot, owner, before, after, changes) = {
            let mut replica = self.shared.replica.lock();
            let before = replica
                .lender(lender_id)
                .cloned()
                .ok_or(EngineError::LenderNotFound(lender_id))?;
            let owner = replica
                .deal(before.deal_id)
                .cloned()
                .ok_or(EngineError::OrphanLender(before.deal_id))?;
            let snapshot = replica.capture(entity);
            let lender = replica
                .lender_mut(lender_id)
                .ok_or(EngineError::LenderNotFound(lender_id))?;
            let changes = patch.apply(lender, now);
            let after = lender.clone();
            self.shared.pending.lock().acquire(entity);
            (snapshot, owner, before, after, changes)
        };
        let mutation_id = self.applied(Action::UpdateLender, entity);

        let written = self.durable(mutation_id, || self.shared.remote.update_lender(&after, &patch)).await;
        match self.settle_update(mutation_id, snapshot, Action::UpdateLender, &before.name, written) {
            Outcome::Confirmed => {
                if let Some(entry) = &changes.archived {
                    self.archive_notes(mutation_id, lender_id, entry).await;
                }
                self.shared.effects.dispatch(plan_lender_update(
                    &owner,
                    &before,
                    &after,
                    &changes,
                    &self.shared.actor,
                    now,
                ));
                Ok(receipt(mutation_id, entity, now))
            }
            Outcome::Denied => Err(permission_denied(Action::UpdateLender, entity)),
            Outcome::Failed(err) => Err(err),
        }
    }

    /// Remove a lender. A delete that touched no rows means the row is
    /// already gone and counts as success.
    pub async fn delete_lender(&self, lender_id: LenderId) -> Result<MutationReceipt, EngineError> {
        let now = self.tick()?;
        let entity = EntityRef::Lender(lender_id);

        let (snapshot, removed) = {
            let mut replica = self.shared.replica.lock();
            let snapshot = replica.capture(entity);
            let removed = replica
                .remove_lender(lender_id)
                .ok_or(EngineError::LenderNotFound(lender_id))?;
            self.shared.pending.lock().acquire(entity);
            (snapshot, removed)
        };
        let mutation_id = self.applied(Action::DeleteLender, entity);

        let written = self.durable(mutation_id, || self.shared.remote.delete_lender(lender_id)).await;
        let outcome = match written {
            Ok(rows) => {
                if rows == 0 {
                    tracing::debug!(
                        target: "dealsync::executor",
                        mutation_id = %mutation_id,
                        lender_id = %lender_id,
                        "lender already absent remotely"
                    );
                }
                Outcome::Confirmed
            }
            Err(err) => self.classify(mutation_id, err, Action::DeleteLender, entity),
        };

        match self.settle(mutation_id, snapshot, Action::DeleteLender, &removed.name, outcome) {
            Outcome::Confirmed => {
                self.shared
                    .notifier
                    .notify(Notice::success(Action::DeleteLender, entity, &removed.name));
                self.shared
                    .effects
                    .dispatch(plan_lender_deleted(&removed, &self.shared.actor, now));
                Ok(receipt(mutation_id, entity, now))
            }
            Outcome::Denied => Err(permission_denied(Action::DeleteLender, entity)),
            Outcome::Failed(err) => Err(err),
        }
    }

    // ========================================================================
    // Notes history
    // ========================================================================

    /// Drop one archived notes entry from a lender.
    pub async fn delete_history_entry(
        &self,
        lender_id: LenderId,
        entry_id: HistoryEntryId,
    ) -> Result<MutationReceipt, EngineError> {
        let now = self.tick()?;
        let entity = EntityRef::Lender(lender_id);

        let (snapshot, subject, entry) = {
            let mut replica = self.shared.replica.lock();
            let snapshot = replica.capture(entity);
            let lender = replica
                .lender_mut(lender_id)
                .ok_or(EngineError::LenderNotFound(lender_id))?;
            let index = lender
                .notes_history
                .iter()
                .position(|e| e.id == entry_id)
                .ok_or(EngineError::HistoryEntryNotFound(entry_id))?;
            let entry = lender.notes_history.remove(index);
            let subject = lender.name.clone();
            self.shared.pending.lock().acquire(entity);
            (snapshot, subject, entry)
        };
        let mutation_id = self.applied(Action::DeleteHistoryEntry, entity);

        let written = self
            .durable(mutation_id, || self.shared.remote.delete_history_entry(entry_id))
            .await;
        let outcome = match written {
            Ok(_) => Outcome::Confirmed,
            Err(err) => self.classify(mutation_id, err, Action::DeleteHistoryEntry, entity),
        };

        match self.settle(mutation_id, snapshot, Action::DeleteHistoryEntry, &subject, outcome) {
            Outcome::Confirmed => {
                self.shared
                    .notifier
                    .notify(Notice::success(Action::DeleteHistoryEntry, entity, &subject));
                self.shared
                    .effects
                    .dispatch(plan_history_deleted(lender_id, &entry, &self.shared.actor, now));
                Ok(receipt(mutation_id, entity, now))
            }
            Outcome::Denied => Err(permission_denied(Action::DeleteHistoryEntry, entity)),
            Outcome::Failed(err) => Err(err),
        }
    }

    async fn archive_notes(&self, mutation_id: MutationId, lender_id: LenderId, entry: &NotesHistoryEntry) {
        let result = self
            .durable(mutation_id, || self.shared.remote.insert_history_entry(lender_id, entry))
            .await;
        if let Err(err) = result {
            tracing::warn!(
                target: "dealsync::executor",
                mutation_id = %mutation_id,
                lender_id = %lender_id,
                entry_id = %entry.id,
                error = %err,
                "failed to persist archived notes"
            );
        }
    }

    // ========================================================================
    // Write plumbing
    // ========================================================================

    /// Name the optimistic change just made to the replica. The id tags every
    /// log line of the write that follows.
    fn applied(&self, action: Action, entity: EntityRef) -> MutationId {
        let mutation_id = MutationId::new();
        tracing::debug!(
            target: "dealsync::executor",
            mutation_id = %mutation_id,
            action = %action,
            entity = %entity,
            "applied optimistically"
        );
        mutation_id
    }

    /// Run a remote call, retrying transient failures with linear backoff.
    pub(crate) async fn durable<T, F, Fut>(
        &self,
        subject: impl fmt::Display,
        mut call: F,
    ) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let attempts = self.shared.config.write_retry_attempts;
        let backoff = self.shared.config.write_retry_backoff();
        let mut attempt = 0;
        loop {
            match call().await {
                Err(err) if err.is_transient() && attempt < attempts => {
                    attempt += 1;
                    tracing::warn!(
                        target: "dealsync::executor",
                        subject = %subject,
                        attempt,
                        error = %err,
                        "transient remote failure; retrying"
                    );
                    tokio::time::sleep(backoff * attempt).await;
                }
                result => return result,
            }
        }
    }

    /// Map an update's row count to an outcome. Zero rows means the remote
    /// filtered the row out for this actor.
    fn settle_update(
        &self,
        mutation_id: MutationId,
        snapshot: EntitySnapshot,
        action: Action,
        subject: &str,
        written: Result<u64, StorageError>,
    ) -> Outcome {
        let entity = snapshot.entity();
        let outcome = match written {
            Ok(0) => {
                tracing::warn!(
                    target: "dealsync::executor",
                    mutation_id = %mutation_id,
                    entity = %entity,
                    "update affected zero rows"
                );
                Outcome::Denied
            }
            Ok(_) => Outcome::Confirmed,
            Err(err) => self.classify(mutation_id, err, action, entity),
        };
        self.settle(mutation_id, snapshot, action, subject, outcome)
    }

    fn classify(&self, mutation_id: MutationId, err: StorageError, action: Action, entity: EntityRef) -> Outcome {
        match err {
            StorageError::PermissionDenied(_) => Outcome::Denied,
            err => {
                tracing::warn!(
                    target: "dealsync::executor",
                    mutation_id = %mutation_id,
                    entity = %entity,
                    action = %action,
                    error = %err,
                    "remote write failed"
                );
                Outcome::Failed(err.into())
            }
        }
    }

    /// Roll back unless confirmed, notify once on failure, and schedule the
    /// registry release.
    fn settle(
        &self,
        mutation_id: MutationId,
        snapshot: EntitySnapshot,
        action: Action,
        subject: &str,
        outcome: Outcome,
    ) -> Outcome {
        let entity = snapshot.entity();
        match &outcome {
            Outcome::Confirmed => {
                tracing::debug!(target: "dealsync::executor", mutation_id = %mutation_id, "write confirmed");
            }
            Outcome::Denied => {
                tracing::debug!(target: "dealsync::executor", mutation_id = %mutation_id, "rolled back after denial");
                self.shared.replica.lock().restore(snapshot);
                self.notify_failure(action, entity, subject, true);
            }
            Outcome::Failed(_) => {
                tracing::debug!(target: "dealsync::executor", mutation_id = %mutation_id, "rolled back");
                self.shared.replica.lock().restore(snapshot);
                self.notify_failure(action, entity, subject, false);
            }
        }
        self.release_after_grace(entity);
        outcome
    }

    fn notify_failure(&self, action: Action, entity: EntityRef, subject: &str, denied: bool) {
        let notice = if denied {
            Notice::permission_denied(action, entity, subject)
        } else {
            Notice::failure(action, entity, subject)
        };
        self.shared.notifier.notify(notice);
    }

    fn failure_error(&self, action: Action, entity: EntityRef, err: StorageError) -> EngineError {
        match err {
            StorageError::PermissionDenied(_) => permission_denied(action, entity),
            err => err.into(),
        }
    }

    fn release_after_grace(&self, entity: EntityRef) {
        let shared = self.shared.clone();
        let grace = self.shared.config.pending_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            shared.pending.lock().release(entity);
        });
    }
}

fn receipt(mutation_id: MutationId, entity: EntityRef, applied_at: Timestamp) -> MutationReceipt {
    MutationReceipt {
        mutation_id,
        entity,
        applied_at,
    }
}

fn permission_denied(action: Action, entity: EntityRef) -> EngineError {
    EngineError::PermissionDenied {
        action: action.verb(),
        entity,
    }
}
