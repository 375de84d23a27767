use std::collections::HashMap;

use dealsync_core::{
    fingerprint, CoreError, Deal, DealId, EntityRef, Lender, LenderId, ReplicaFingerprint,
};

use crate::error::EngineError;

/// Pre-mutation state of one entity subtree, captured before an optimistic
/// apply and restored on rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitySnapshot {
    Deal {
        id: DealId,
        position: usize,
        /// None = the deal was not in the replica.
        prior: Option<Deal>,
    },
    /// A deal's own fields. Its lender list is not part of the snapshot.
    DealFields {
        id: DealId,
        prior: Deal,
    },
    Lender {
        id: LenderId,
        position: usize,
        prior: Option<Lender>,
    },
}

impl EntitySnapshot {
    pub fn entity(&self) -> EntityRef {
        match self {
            Self::Deal { id, .. } | Self::DealFields { id, .. } => EntityRef::Deal(*id),
            Self::Lender { id, .. } => EntityRef::Lender(*id),
        }
    }
}

/// Immutable copy of the whole replica, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSnapshot {
    pub deals: Vec<Deal>,
}

impl ReplicaSnapshot {
    pub fn deal(&self, deal_id: DealId) -> Option<&Deal> {
        self.deals.iter().find(|d| d.id == deal_id)
    }

    pub fn lender(&self, lender_id: LenderId) -> Option<&Lender> {
        self.deals.iter().find_map(|d| d.lender(lender_id))
    }

    pub fn fingerprint(&self) -> Result<ReplicaFingerprint, CoreError> {
        fingerprint(&self.deals)
    }
}

/// The client-held copy of the deal collection.
///
/// Deals are stored by id with a separate display order; lenders live inside
/// their owning deal and are located through `lender_owner`.
#[derive(Debug, Default)]
pub struct Replica {
    order: Vec<DealId>,
    deals: HashMap<DealId, Deal>,
    lender_owner: HashMap<LenderId, DealId>,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a fetched deal list. Lenders whose `deal_id` disagrees with
    /// the deal that carries them are dropped.
    pub fn from_deals(deals: Vec<Deal>) -> Self {
        let mut replica = Self::new();
        for mut deal in deals {
            let deal_id = deal.id;
            deal.lenders.retain(|lender| {
                let owned = lender.deal_id == deal_id;
                if !owned {
                    tracing::warn!(
                        target: "dealsync::replica",
                        lender_id = %lender.id,
                        deal_id = %lender.deal_id,
                        carried_by = %deal_id,
                        "dropping orphaned lender"
                    );
                }
                owned
            });
            replica.insert_deal(deal);
        }
        replica
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn deals(&self) -> impl Iterator<Item = &Deal> {
        self.order.iter().filter_map(|id| self.deals.get(id))
    }

    pub fn snapshot(&self) -> ReplicaSnapshot {
        ReplicaSnapshot {
            deals: self.deals().cloned().collect(),
        }
    }

    pub fn fingerprint(&self) -> Result<ReplicaFingerprint, CoreError> {
        self.snapshot().fingerprint()
    }

    pub fn deal(&self, deal_id: DealId) -> Option<&Deal> {
        self.deals.get(&deal_id)
    }

    pub fn deal_mut(&mut self, deal_id: DealId) -> Option<&mut Deal> {
        self.deals.get_mut(&deal_id)
    }

    pub fn lender(&self, lender_id: LenderId) -> Option<&Lender> {
        let deal_id = self.lender_owner.get(&lender_id)?;
        self.deals.get(deal_id)?.lender(lender_id)
    }

    pub fn lender_mut(&mut self, lender_id: LenderId) -> Option<&mut Lender> {
        let deal_id = self.lender_owner.get(&lender_id)?;
        self.deals
            .get_mut(deal_id)?
            .lenders
            .iter_mut()
            .find(|l| l.id == lender_id)
    }

    /// Insert at the end, or replace in place when the id is already present.
    pub fn insert_deal(&mut self, deal: Deal) {
        let position = self.order.len();
        self.insert_deal_at(deal, position);
    }

    fn insert_deal_at(&mut self, deal: Deal, position: usize) {
        let deal_id = deal.id;
        if let Some(existing) = self.deals.remove(&deal_id) {
            for lender in &existing.lenders {
                self.lender_owner.remove(&lender.id);
            }
        } else {
            let position = position.min(self.order.len());
            self.order.insert(position, deal_id);
        }
        for lender in &deal.lenders {
            self.lender_owner.insert(lender.id, deal_id);
        }
        self.deals.insert(deal_id, deal);
    }

    pub fn insert_lender(&mut self, lender: Lender) -> Result<(), EngineError> {
        let position = self
            .deal(lender.deal_id)
            .map(|d| d.lenders.len())
            .ok_or(EngineError::OrphanLender(lender.deal_id))?;
        self.insert_lender_at(lender, position)
    }

    fn insert_lender_at(&mut self, lender: Lender, position: usize) -> Result<(), EngineError> {
        let deal_id = lender.deal_id;
        let deal = self
            .deals
            .get_mut(&deal_id)
            .ok_or(EngineError::OrphanLender(deal_id))?;
        if let Some(slot) = deal.lenders.iter_mut().find(|l| l.id == lender.id) {
            *slot = lender;
            return Ok(());
        }
        let position = position.min(deal.lenders.len());
        self.lender_owner.insert(lender.id, deal_id);
        deal.lenders.insert(position, lender);
        Ok(())
    }

    pub fn remove_deal(&mut self, deal_id: DealId) -> Option<Deal> {
        let deal = self.deals.remove(&deal_id)?;
        self.order.retain(|id| *id != deal_id);
        for lender in &deal.lenders {
            self.lender_owner.remove(&lender.id);
        }
        Some(deal)
    }

    pub fn remove_lender(&mut self, lender_id: LenderId) -> Option<Lender> {
        let deal_id = self.lender_owner.remove(&lender_id)?;
        let deal = self.deals.get_mut(&deal_id)?;
        let index = deal.lenders.iter().position(|l| l.id == lender_id)?;
        Some(deal.lenders.remove(index))
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Capture the current state of one entity subtree. For a deal this
    /// includes its lenders.
    pub fn capture(&self, entity: EntityRef) -> EntitySnapshot {
        match entity {
            EntityRef::Deal(id) => EntitySnapshot::Deal {
                id,
                position: self.order.iter().position(|d| *d == id).unwrap_or(self.order.len()),
                prior: self.deals.get(&id).cloned(),
            },
            EntityRef::Lender(id) => {
                let (position, prior) = self
                    .lender_owner
                    .get(&id)
                    .and_then(|deal_id| self.deals.get(deal_id))
                    .and_then(|deal| {
                        let index = deal.lenders.iter().position(|l| l.id == id)?;
                        Some((index, Some(deal.lenders[index].clone())))
                    })
                    .unwrap_or((usize::MAX, None));
                EntitySnapshot::Lender { id, position, prior }
            }
        }
    }

    /// Capture a deal's fields without its lenders, for mutations that leave
    /// the lender list alone.
    pub fn capture_fields(&self, deal_id: DealId) -> Option<EntitySnapshot> {
        let mut prior = self.deals.get(&deal_id)?.clone();
        prior.lenders.clear();
        Some(EntitySnapshot::DealFields { id: deal_id, prior })
    }

    /// Put one entity subtree back exactly as captured. Other entities are
    /// left alone.
    pub fn restore(&mut self, snapshot: EntitySnapshot) {
        match snapshot {
            EntitySnapshot::DealFields { id, mut prior } => match self.deals.get_mut(&id) {
                Some(current) => {
                    prior.lenders = std::mem::take(&mut current.lenders);
                    *current = prior;
                }
                None => {
                    tracing::debug!(target: "dealsync::replica", deal_id = %id, "deal gone; nothing to restore");
                }
            },
            EntitySnapshot::Deal { id, position, prior } => {
                self.remove_deal(id);
                if let Some(deal) = prior {
                    self.insert_deal_at(deal, position);
                }
            }
            EntitySnapshot::Lender { id, position, prior } => {
                self.remove_lender(id);
                if let Some(lender) = prior {
                    let deal_id = lender.deal_id;
                    if let Err(err) = self.insert_lender_at(lender, position) {
                        tracing::warn!(
                            target: "dealsync::replica",
                            lender_id = %id,
                            deal_id = %deal_id,
                            error = %err,
                            "cannot restore lender; owning deal is gone"
                        );
                    }
                }
            }
        }
    }

    /// Build the replacement replica for a full refetch, carrying over the
    /// local state of every entity in `pending`.
    ///
    /// A pending deal keeps its local scalar fields but takes the fetched
    /// lender list; a pending deal that is locally absent (optimistic delete)
    /// stays absent. Pending lenders keep their local row.
    pub fn rebuilt_from(&self, fetched: Vec<Deal>, pending: &[EntityRef]) -> Replica {
        let mut next = Replica::from_deals(fetched);

        for entity in pending {
            let EntityRef::Deal(deal_id) = *entity else {
                continue;
            };
            match self.deals.get(&deal_id) {
                Some(local) => {
                    let mut merged = local.clone();
                    match next.deal(deal_id) {
                        Some(remote) => {
                            merged.lenders = remote.lenders.clone();
                            next.insert_deal(merged);
                        }
                        None => {
                            let position = self.order.iter().position(|d| *d == deal_id).unwrap_or(usize::MAX);
                            next.insert_deal_at(merged, position);
                        }
                    }
                }
                None => {
                    next.remove_deal(deal_id);
                }
            }
        }

        for entity in pending {
            if let EntityRef::Lender(_) = entity {
                next.restore(self.capture(*entity));
            }
        }

        next
    }
}
