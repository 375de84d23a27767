use crate::clock::Timestamp;
use crate::ids::HistoryEntryId;
use crate::model::*;

/// Partial update of a deal. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DealPatch {
    pub name: Option<String>,
    pub value: Option<i64>,
    pub status: Option<DealStatus>,
    pub stage: Option<DealStage>,
    pub is_priority: Option<bool>,
    pub is_archived: Option<bool>,
    pub notes: Option<String>,
}

/// Value transitions produced by merging a [`DealPatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DealChanges {
    pub stage: Option<(DealStage, DealStage)>,
}

impl DealPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merge into `deal` in place and refresh `updated_at`.
    pub fn apply(&self, deal: &mut Deal, now: Timestamp) -> DealChanges {
        let mut changes = DealChanges::default();

        if let Some(name) = &self.name {
            deal.name.clone_from(name);
        }
        if let Some(value) = self.value {
            deal.value = value;
        }
        if let Some(status) = self.status {
            deal.status = status;
        }
        if let Some(stage) = self.stage {
            if stage != deal.stage {
                changes.stage = Some((deal.stage, stage));
            }
            deal.stage = stage;
        }
        if let Some(flag) = self.is_priority {
            deal.is_priority = flag;
        }
        if let Some(flag) = self.is_archived {
            deal.is_archived = flag;
        }
        if let Some(notes) = &self.notes {
            if *notes != deal.notes {
                deal.notes.clone_from(notes);
                deal.notes_updated_at = Some(now);
            }
        }

        deal.updated_at = now;
        changes
    }
}

/// Partial update of a lender. `substage: Some(None)` clears the substage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LenderPatch {
    pub name: Option<String>,
    pub stage: Option<LenderStage>,
    pub substage: Option<Option<LenderSubstage>>,
    pub tracking_status: Option<TrackingStatus>,
    pub notes: Option<String>,
}

/// Value transitions produced by merging a [`LenderPatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LenderChanges {
    pub stage: Option<(LenderStage, LenderStage)>,
    pub substage: Option<(Option<LenderSubstage>, Option<LenderSubstage>)>,
    /// Prior notes value pushed onto the history by this merge.
    pub archived: Option<NotesHistoryEntry>,
}

impl LenderPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merge into `lender` in place and refresh `updated_at`.
    ///
    /// Overwriting non-empty notes with a different value archives the old
    /// text at the head of `notes_history`.
    pub fn apply(&self, lender: &mut Lender, now: Timestamp) -> LenderChanges {
        let mut changes = LenderChanges::default();

        if let Some(name) = &self.name {
            lender.name.clone_from(name);
        }
        if let Some(stage) = self.stage {
            if stage != lender.stage {
                changes.stage = Some((lender.stage, stage));
            }
            lender.stage = stage;
        }
        if let Some(substage) = self.substage {
            if substage != lender.substage {
                changes.substage = Some((lender.substage, substage));
            }
            lender.substage = substage;
        }
        if let Some(status) = self.tracking_status {
            lender.tracking_status = status;
        }
        if let Some(notes) = &self.notes {
            if *notes != lender.notes {
                if !lender.notes.is_empty() {
                    let entry = NotesHistoryEntry {
                        id: HistoryEntryId::new(),
                        text: std::mem::take(&mut lender.notes),
                        updated_at: now,
                    };
                    lender.notes_history.insert(0, entry.clone());
                    changes.archived = Some(entry);
                }
                lender.notes.clone_from(notes);
                lender.notes_updated_at = Some(now);
            }
        }

        lender.updated_at = now;
        changes
    }
}
