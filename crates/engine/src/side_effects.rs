use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use dealsync_core::{
    ActivityField, ActivityRecord, Actor, ChangeKind, CoreError, Deal, DealChanges, Lender,
    LenderChanges, LenderId, NotesHistoryEntry, Table, Timestamp, TriggerEvent, TriggerType,
    WebhookEvent,
};

use crate::error::SinkError;

/// Immutable audit trail of lender transitions.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn append(&self, record: ActivityRecord) -> Result<(), SinkError>;
}

/// External rule engine that matches trigger events against configured automations.
#[async_trait]
pub trait AutomationSink: Send + Sync {
    async fn fire(&self, event: TriggerEvent) -> Result<(), SinkError>;
}

/// Relay forwarding row changes to outbound webhooks.
#[async_trait]
pub trait WebhookRelay: Send + Sync {
    async fn relay(&self, event: WebhookEvent) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    Activity(ActivityRecord),
    Trigger(TriggerEvent),
    Webhook(WebhookEvent),
}

/// Fire-and-forget fan-out of confirmed-mutation side effects.
///
/// Each effect runs on its own task; a failing sink is logged and never
/// reaches the caller of the mutation. Sinks left unset are skipped.
#[derive(Clone, Default)]
pub struct SideEffectDispatcher {
    activity_log: Option<Arc<dyn ActivityLog>>,
    automation: Option<Arc<dyn AutomationSink>>,
    webhook: Option<Arc<dyn WebhookRelay>>,
}

impl SideEffectDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_activity_log(mut self, log: Arc<dyn ActivityLog>) -> Self {
        self.activity_log = Some(log);
        self
    }

    pub fn with_automation(mut self, sink: Arc<dyn AutomationSink>) -> Self {
        self.automation = Some(sink);
        self
    }

    pub fn with_webhook_relay(mut self, relay: Arc<dyn WebhookRelay>) -> Self {
        self.webhook = Some(relay);
        self
    }

    pub fn dispatch(&self, effects: Vec<SideEffect>) {
        for effect in effects {
            match effect {
                SideEffect::Activity(record) => {
                    let Some(log) = self.activity_log.clone() else { continue };
                    tokio::spawn(async move {
                        let lender_id = record.lender_id;
                        if let Err(err) = log.append(record).await {
                            tracing::warn!(
                                target: "dealsync::side_effects",
                                lender_id = %lender_id,
                                error = %err,
                                "activity log write failed"
                            );
                        }
                    });
                }
                SideEffect::Trigger(event) => {
                    let Some(sink) = self.automation.clone() else { continue };
                    tokio::spawn(async move {
                        let trigger = event.trigger_type;
                        let deal_id = event.deal_id;
                        if let Err(err) = sink.fire(event).await {
                            tracing::warn!(
                                target: "dealsync::side_effects",
                                trigger = %trigger,
                                deal_id = %deal_id,
                                error = %err,
                                "automation trigger dispatch failed"
                            );
                        }
                    });
                }
                SideEffect::Webhook(event) => {
                    let Some(relay) = self.webhook.clone() else { continue };
                    tokio::spawn(async move {
                        let table = event.table;
                        let kind = event.kind;
                        if let Err(err) = relay.relay(event).await {
                            tracing::warn!(
                                target: "dealsync::side_effects",
                                table = %table,
                                kind = %kind,
                                error = %err,
                                "webhook relay failed"
                            );
                        }
                    });
                }
            }
        }
    }
}

// ============================================================================
// Planning: which effects a confirmed transition produces
// ============================================================================

fn webhook(
    kind: ChangeKind,
    table: Table,
    record: Option<Result<serde_json::Value, CoreError>>,
    old_record: Option<Result<serde_json::Value, CoreError>>,
    actor: &Actor,
    now: Timestamp,
) -> Option<SideEffect> {
    let record = record.transpose();
    let old_record = old_record.transpose();
    match (record, old_record) {
        (Ok(record), Ok(old_record)) => Some(SideEffect::Webhook(WebhookEvent {
            kind,
            table,
            record,
            old_record,
            actor: actor.id,
            timestamp: now,
        })),
        (Err(err), _) | (_, Err(err)) => {
            tracing::warn!(target: "dealsync::side_effects", table = %table, error = %err, "cannot encode webhook row");
            None
        }
    }
}

fn stage_trigger(
    trigger_type: TriggerType,
    deal: &Deal,
    lender: Option<&Lender>,
    from: Option<&str>,
    to: Option<&str>,
    actor: &Actor,
    now: Timestamp,
) -> SideEffect {
    SideEffect::Trigger(TriggerEvent {
        trigger_type,
        deal_id: deal.id,
        lender_id: lender.map(|l| l.id),
        from_stage: from.map(str::to_string),
        to_stage: to.map(str::to_string),
        deal_name: deal.name.clone(),
        lender_name: lender.map(|l| l.name.clone()),
        actor_id: actor.id,
        occurred_at: now,
    })
}

fn activity(lender: &Lender, field: ActivityField, from: Option<&str>, to: Option<&str>, actor: &Actor, now: Timestamp) -> SideEffect {
    let description = format!(
        "{} {} changed from {} to {}",
        lender.name,
        field,
        from.unwrap_or("none"),
        to.unwrap_or("none")
    );
    SideEffect::Activity(ActivityRecord {
        deal_id: lender.deal_id,
        lender_id: lender.id,
        field,
        from: from.map(str::to_string),
        to: to.map(str::to_string),
        description,
        actor_id: actor.id,
        actor_name: actor.name.clone(),
        recorded_at: now,
    })
}

/// `deal` is the owning deal as seen at apply time; only its id and name are read.
pub fn plan_lender_update(
    deal: &Deal,
    before: &Lender,
    after: &Lender,
    changes: &LenderChanges,
    actor: &Actor,
    now: Timestamp,
) -> Vec<SideEffect> {
    let mut effects = Vec::new();

    if let Some((from, to)) = changes.stage {
        effects.push(activity(after, ActivityField::Stage, Some(from.as_str()), Some(to.as_str()), actor, now));
        effects.push(stage_trigger(
            TriggerType::LenderStageChange,
            deal,
            Some(after),
            Some(from.as_str()),
            Some(to.as_str()),
            actor,
            now,
        ));
    }
    if let Some((from, to)) = changes.substage {
        effects.push(activity(
            after,
            ActivityField::Substage,
            from.map(|s| s.as_str()),
            to.map(|s| s.as_str()),
            actor,
            now,
        ));
    }

    effects.extend(webhook(
        ChangeKind::Update,
        Table::DealLenders,
        Some(after.to_record()),
        Some(before.to_record()),
        actor,
        now,
    ));
    effects
}

pub fn plan_deal_update(before: &Deal, after: &Deal, changes: &DealChanges, actor: &Actor, now: Timestamp) -> Vec<SideEffect> {
    let mut effects = Vec::new();

    if let Some((from, to)) = changes.stage {
        effects.push(stage_trigger(
            TriggerType::DealStageChange,
            after,
            None,
            Some(from.as_str()),
            Some(to.as_str()),
            actor,
            now,
        ));
        if to.is_closed() {
            effects.push(stage_trigger(
                TriggerType::DealClosed,
                after,
                None,
                Some(from.as_str()),
                Some(to.as_str()),
                actor,
                now,
            ));
        }
    }

    effects.extend(webhook(
        ChangeKind::Update,
        Table::Deals,
        Some(after.to_record()),
        Some(before.to_record()),
        actor,
        now,
    ));
    effects
}

pub fn plan_deal_created(deal: &Deal, actor: &Actor, now: Timestamp) -> Vec<SideEffect> {
    let mut effects = vec![stage_trigger(
        TriggerType::NewDeal,
        deal,
        None,
        None,
        Some(deal.stage.as_str()),
        actor,
        now,
    )];
    effects.extend(webhook(ChangeKind::Insert, Table::Deals, Some(deal.to_record()), None, actor, now));
    effects
}

pub fn plan_deal_deleted(deal: &Deal, actor: &Actor, now: Timestamp) -> Vec<SideEffect> {
    webhook(ChangeKind::Delete, Table::Deals, None, Some(deal.to_record()), actor, now)
        .into_iter()
        .collect()
}

pub fn plan_lender_created(lender: &Lender, actor: &Actor, now: Timestamp) -> Vec<SideEffect> {
    webhook(ChangeKind::Insert, Table::DealLenders, Some(lender.to_record()), None, actor, now)
        .into_iter()
        .collect()
}

pub fn plan_lender_deleted(lender: &Lender, actor: &Actor, now: Timestamp) -> Vec<SideEffect> {
    webhook(ChangeKind::Delete, Table::DealLenders, None, Some(lender.to_record()), actor, now)
        .into_iter()
        .collect()
}

pub fn plan_history_deleted(
    lender_id: LenderId,
    entry: &NotesHistoryEntry,
    actor: &Actor,
    now: Timestamp,
) -> Vec<SideEffect> {
    let old = json!({
        "id": entry.id,
        "lender_id": lender_id,
        "text": entry.text,
        "updated_at": entry.updated_at,
    });
    webhook(ChangeKind::Delete, Table::LenderNotesHistory, None, Some(Ok(old)), actor, now)
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealsync_core::{
        DealId, DealPatch, DealStage, LenderPatch, LenderStage, LenderSubstage, NewDeal, NewLender,
        Role,
    };

    fn fixture() -> (Actor, Deal, Lender) {
        let actor = Actor::new("dana", Role::Member);
        let deal = Deal::from_new(DealId::new(), NewDeal::new("Harbor Point"), actor.id, Timestamp::from_millis(1));
        let mut new = NewLender::new("Summit Bank");
        new.stage = LenderStage::ReviewingDrl;
        let lender = Lender::from_new(LenderId::new(), deal.id, new, Timestamp::from_millis(1));
        (actor, deal, lender)
    }

    fn count(effects: &[SideEffect]) -> (usize, usize, usize) {
        effects.iter().fold((0, 0, 0), |(a, t, w), e| match e {
            SideEffect::Activity(_) => (a + 1, t, w),
            SideEffect::Trigger(_) => (a, t + 1, w),
            SideEffect::Webhook(_) => (a, t, w + 1),
        })
    }

    #[test]
    fn lender_stage_change_plans_one_log_and_one_trigger() {
        let (actor, deal, before) = fixture();
        let mut after = before.clone();
        let patch = LenderPatch {
            stage: Some(LenderStage::TermSheet),
            ..Default::default()
        };
        let changes = patch.apply(&mut after, Timestamp::from_millis(2));

        let effects = plan_lender_update(&deal, &before, &after, &changes, &actor, Timestamp::from_millis(3));
        assert_eq!(count(&effects), (1, 1, 1));

        let SideEffect::Activity(record) = &effects[0] else { panic!("expected activity first") };
        assert_eq!(record.description, "Summit Bank stage changed from reviewing-drl to term-sheet");
        let SideEffect::Trigger(event) = &effects[1] else { panic!("expected trigger second") };
        assert_eq!(event.trigger_type, TriggerType::LenderStageChange);
        assert_eq!(event.from_stage.as_deref(), Some("reviewing-drl"));
        assert_eq!(event.to_stage.as_deref(), Some("term-sheet"));
        assert_eq!(event.lender_name.as_deref(), Some("Summit Bank"));
        assert_eq!(event.deal_name, "Harbor Point");
    }

    #[test]
    fn substage_change_logs_without_trigger() {
        let (actor, deal, before) = fixture();
        let mut after = before.clone();
        let patch = LenderPatch {
            substage: Some(Some(LenderSubstage::FollowUp)),
            ..Default::default()
        };
        let changes = patch.apply(&mut after, Timestamp::from_millis(2));

        let effects = plan_lender_update(&deal, &before, &after, &changes, &actor, Timestamp::from_millis(3));
        assert_eq!(count(&effects), (1, 0, 1));
        let SideEffect::Activity(record) = &effects[0] else { panic!("expected activity") };
        assert_eq!(record.description, "Summit Bank substage changed from none to follow-up");
    }

    #[test]
    fn notes_only_update_plans_webhook_only() {
        let (actor, deal, before) = fixture();
        let mut after = before.clone();
        let patch = LenderPatch {
            notes: Some("sent DRL".into()),
            ..Default::default()
        };
        let changes = patch.apply(&mut after, Timestamp::from_millis(2));
        let effects = plan_lender_update(&deal, &before, &after, &changes, &actor, Timestamp::from_millis(3));
        assert_eq!(count(&effects), (0, 0, 1));
    }

    #[test]
    fn closing_a_deal_adds_deal_closed() {
        let (actor, before, _) = fixture();
        let mut after = before.clone();
        let patch = DealPatch {
            stage: Some(DealStage::Closed),
            ..Default::default()
        };
        let changes = patch.apply(&mut after, Timestamp::from_millis(2));

        let effects = plan_deal_update(&before, &after, &changes, &actor, Timestamp::from_millis(3));
        let triggers: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                SideEffect::Trigger(t) => Some(t.trigger_type),
                _ => None,
            })
            .collect();
        assert_eq!(triggers, vec![TriggerType::DealStageChange, TriggerType::DealClosed]);
    }

    #[test]
    fn new_deal_trigger_carries_initial_stage() {
        let (actor, deal, _) = fixture();
        let effects = plan_deal_created(&deal, &actor, Timestamp::from_millis(3));
        let SideEffect::Trigger(event) = &effects[0] else { panic!("expected trigger") };
        assert_eq!(event.trigger_type, TriggerType::NewDeal);
        assert_eq!(event.from_stage, None);
        assert_eq!(event.to_stage.as_deref(), Some("lead"));
        let SideEffect::Webhook(hook) = &effects[1] else { panic!("expected webhook") };
        assert_eq!(hook.kind, ChangeKind::Insert);
        assert!(hook.old_record.is_none());
    }
}
