use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::error::CoreError;
use crate::ids::*;

string_enum! {
    pub enum DealStatus {
        Active => "active",
        OnHold => "on-hold",
        Won => "won",
        Lost => "lost",
    }
}

string_enum! {
    pub enum DealStage {
        Lead => "lead",
        Qualifying => "qualifying",
        Underwriting => "underwriting",
        TermSheet => "term-sheet",
        Diligence => "diligence",
        Closing => "closing",
        Closed => "closed",
        Dead => "dead",
    }
}

impl DealStage {
    /// `closed` is the only stage that fires the `deal_closed` trigger.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

string_enum! {
    pub enum LenderStage {
        InitialContact => "initial-contact",
        ReviewingDrl => "reviewing-drl",
        Underwriting => "underwriting",
        TermSheet => "term-sheet",
        Committed => "committed",
        Closed => "closed",
        Declined => "declined",
    }
}

string_enum! {
    pub enum LenderSubstage {
        AwaitingResponse => "awaiting-response",
        InProgress => "in-progress",
        FollowUp => "follow-up",
        Blocked => "blocked",
    }
}

string_enum! {
    pub enum TrackingStatus {
        Active => "active",
        OnHold => "on-hold",
        OnDeck => "on-deck",
        Passed => "passed",
    }
}

/// One archived value of a lender's `notes` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesHistoryEntry {
    pub id: HistoryEntryId,
    pub text: String,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lender {
    pub id: LenderId,
    pub deal_id: DealId,
    pub name: String,
    pub stage: LenderStage,
    pub substage: Option<LenderSubstage>,
    pub tracking_status: TrackingStatus,
    pub notes: String,
    pub notes_updated_at: Option<Timestamp>,
    /// Newest first.
    pub notes_history: Vec<NotesHistoryEntry>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Lender {
    pub fn from_new(id: LenderId, deal_id: DealId, new: NewLender, now: Timestamp) -> Self {
        let notes_updated_at = (!new.notes.is_empty()).then_some(now);
        Self {
            id,
            deal_id,
            name: new.name,
            stage: new.stage,
            substage: new.substage,
            tracking_status: new.tracking_status,
            notes: new.notes,
            notes_updated_at,
            notes_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Row image without the history sub-collection, as sent to webhooks.
    pub fn to_record(&self) -> Result<serde_json::Value, CoreError> {
        let mut row = serde_json::to_value(self).map_err(|e| CoreError::Serialization(e.to_string()))?;
        if let Some(obj) = row.as_object_mut() {
            obj.remove("notes_history");
        }
        Ok(row)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub name: String,
    /// Minor currency units.
    pub value: i64,
    pub status: DealStatus,
    pub stage: DealStage,
    pub is_priority: bool,
    pub is_archived: bool,
    pub notes: String,
    pub notes_updated_at: Option<Timestamp>,
    pub created_by: ActorId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub lenders: Vec<Lender>,
}

impl Deal {
    pub fn from_new(id: DealId, new: NewDeal, created_by: ActorId, now: Timestamp) -> Self {
        let notes_updated_at = (!new.notes.is_empty()).then_some(now);
        Self {
            id,
            name: new.name,
            value: new.value,
            status: new.status,
            stage: new.stage,
            is_priority: new.is_priority,
            is_archived: false,
            notes: new.notes,
            notes_updated_at,
            created_by,
            created_at: now,
            updated_at: now,
            lenders: Vec::new(),
        }
    }

    pub fn lender(&self, lender_id: LenderId) -> Option<&Lender> {
        self.lenders.iter().find(|l| l.id == lender_id)
    }

    /// Row image without the owned lenders, as sent to webhooks.
    pub fn to_record(&self) -> Result<serde_json::Value, CoreError> {
        let mut row = serde_json::to_value(self).map_err(|e| CoreError::Serialization(e.to_string()))?;
        if let Some(obj) = row.as_object_mut() {
            obj.remove("lenders");
        }
        Ok(row)
    }
}

/// Fields supplied by the user when creating a deal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeal {
    pub name: String,
    pub value: i64,
    pub status: DealStatus,
    pub stage: DealStage,
    pub is_priority: bool,
    pub notes: String,
}

impl NewDeal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: 0,
            status: DealStatus::Active,
            stage: DealStage::Lead,
            is_priority: false,
            notes: String::new(),
        }
    }
}

/// Fields supplied by the user when attaching a lender to a deal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLender {
    pub name: String,
    pub stage: LenderStage,
    pub substage: Option<LenderSubstage>,
    pub tracking_status: TrackingStatus,
    pub notes: String,
}

impl NewLender {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: LenderStage::InitialContact,
            substage: None,
            tracking_status: TrackingStatus::Active,
            notes: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_strings_round_trip() {
        for stage in LenderStage::ALL {
            assert_eq!(LenderStage::parse(stage.as_str()).unwrap(), *stage);
        }
        assert_eq!(LenderStage::ReviewingDrl.as_str(), "reviewing-drl");
        assert_eq!(TrackingStatus::OnDeck.to_string(), "on-deck");
    }

    #[test]
    fn unknown_variant_names_the_enum() {
        let err = DealStage::parse("won").unwrap_err();
        assert_eq!(err.to_string(), "unknown DealStage: won");
    }

    #[test]
    fn deal_record_omits_lenders() {
        let now = Timestamp::from_millis(1_700_000_000_000);
        let mut deal = Deal::from_new(DealId::new(), NewDeal::new("Harbor Point"), ActorId::new(), now);
        deal.lenders.push(Lender::from_new(LenderId::new(), deal.id, NewLender::new("First Federal"), now));

        let record = deal.to_record().unwrap();
        assert_eq!(record["name"], "Harbor Point");
        assert_eq!(record["stage"], "lead");
        assert!(record.get("lenders").is_none());
    }

    #[test]
    fn new_lender_notes_stamp_only_when_present() {
        let now = Timestamp::from_millis(10);
        let deal_id = DealId::new();
        let blank = Lender::from_new(LenderId::new(), deal_id, NewLender::new("A"), now);
        assert_eq!(blank.notes_updated_at, None);

        let mut new = NewLender::new("B");
        new.notes = "called Tuesday".into();
        let noted = Lender::from_new(LenderId::new(), deal_id, new, now);
        assert_eq!(noted.notes_updated_at, Some(now));
    }
}
