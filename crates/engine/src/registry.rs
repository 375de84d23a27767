use std::collections::HashMap;

use dealsync_core::EntityRef;

/// Entities with an optimistic write that has not yet settled.
///
/// Reference-counted so overlapping mutations of the same entity keep it
/// registered until the last one is released. This is a cooperative hint
/// read by the reconciliation scheduler, not a lock.
#[derive(Debug, Default)]
pub struct PendingWrites {
    counts: HashMap<EntityRef, usize>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of in-flight writes for `entity` after this one.
    pub fn acquire(&mut self, entity: EntityRef) -> usize {
        let count = self.counts.entry(entity).or_insert(0);
        *count += 1;
        *count
    }

    /// Returns true when the last in-flight write for `entity` is released.
    pub fn release(&mut self, entity: EntityRef) -> bool {
        match self.counts.get_mut(&entity) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.counts.remove(&entity);
                true
            }
            None => {
                tracing::warn!(target: "dealsync::registry", entity = %entity, "release without matching acquire");
                false
            }
        }
    }

    pub fn contains(&self, entity: EntityRef) -> bool {
        self.counts.contains_key(&entity)
    }

    pub fn in_flight(&self, entity: EntityRef) -> usize {
        self.counts.get(&entity).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn entities(&self) -> Vec<EntityRef> {
        self.counts.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealsync_core::{DealId, LenderId};

    #[test]
    fn overlapping_writes_hold_the_entry() {
        let mut pending = PendingWrites::new();
        let lender = EntityRef::Lender(LenderId::new());

        assert_eq!(pending.acquire(lender), 1);
        assert_eq!(pending.acquire(lender), 2);
        assert!(!pending.release(lender));
        assert!(pending.contains(lender));
        assert!(pending.release(lender));
        assert!(pending.is_empty());
    }

    #[test]
    fn entries_are_tracked_per_entity() {
        let mut pending = PendingWrites::new();
        let deal = EntityRef::Deal(DealId::new());
        let lender = EntityRef::Lender(LenderId::new());
        pending.acquire(deal);
        pending.acquire(lender);
        pending.release(deal);
        assert_eq!(pending.entities(), vec![lender]);
        assert_eq!(pending.in_flight(deal), 0);
    }

    #[test]
    fn stray_release_is_ignored() {
        let mut pending = PendingWrites::new();
        assert!(!pending.release(EntityRef::Deal(DealId::new())));
        assert!(pending.is_empty());
    }
}
