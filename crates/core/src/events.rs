use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::ids::*;

string_enum! {
    /// Remote tables the replica is built from.
    pub enum Table {
        Deals => "deals",
        DealLenders => "deal_lenders",
        LenderNotesHistory => "lender_notes_history",
    }
}

string_enum! {
    pub enum ChangeKind {
        Insert => "INSERT",
        Update => "UPDATE",
        Delete => "DELETE",
    }
}

/// Content-free push notification: "something changed in `table`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeSignal {
    pub table: Table,
    pub kind: ChangeKind,
}

impl ChangeSignal {
    pub fn new(table: Table, kind: ChangeKind) -> Self {
        Self { table, kind }
    }
}

string_enum! {
    pub enum TriggerType {
        DealStageChange => "deal_stage_change",
        LenderStageChange => "lender_stage_change",
        DealClosed => "deal_closed",
        NewDeal => "new_deal",
    }
}

/// State transition handed to the external automation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub trigger_type: TriggerType,
    pub deal_id: DealId,
    pub lender_id: Option<LenderId>,
    pub from_stage: Option<String>,
    pub to_stage: Option<String>,
    pub deal_name: String,
    pub lender_name: Option<String>,
    pub actor_id: ActorId,
    pub occurred_at: Timestamp,
}

string_enum! {
    pub enum ActivityField {
        Stage => "stage",
        Substage => "substage",
    }
}

/// Immutable activity-log line describing one lender field transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub deal_id: DealId,
    pub lender_id: LenderId,
    pub field: ActivityField,
    pub from: Option<String>,
    pub to: Option<String>,
    pub description: String,
    pub actor_id: ActorId,
    pub actor_name: String,
    pub recorded_at: Timestamp,
}

/// Row change forwarded to the webhook relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub table: Table,
    pub record: Option<serde_json::Value>,
    pub old_record: Option<serde_json::Value>,
    pub actor: ActorId,
    pub timestamp: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_event_wire_shape() {
        let event = WebhookEvent {
            kind: ChangeKind::Delete,
            table: Table::DealLenders,
            record: None,
            old_record: Some(serde_json::json!({ "name": "Summit Bank" })),
            actor: ActorId::new(),
            timestamp: Timestamp::from_millis(7),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "DELETE");
        assert_eq!(json["table"], "deal_lenders");
        assert_eq!(json["timestamp"], 7);
        assert!(json["record"].is_null());
    }

    #[test]
    fn trigger_type_wire_names() {
        assert_eq!(TriggerType::LenderStageChange.as_str(), "lender_stage_change");
        assert_eq!(TriggerType::parse("deal_closed").unwrap(), TriggerType::DealClosed);
    }
}
