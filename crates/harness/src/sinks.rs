use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use dealsync_core::{ActivityRecord, TriggerEvent, TriggerType, WebhookEvent};
use dealsync_engine::{
    ActivityLog, AutomationSink, Notice, NoticeKind, SideEffectDispatcher, SinkError, UserNotifier,
    WebhookRelay,
};

/// Captures every side effect the engine dispatches.
#[derive(Default)]
pub struct RecordingSinks {
    activity: Mutex<Vec<ActivityRecord>>,
    triggers: Mutex<Vec<TriggerEvent>>,
    webhooks: Mutex<Vec<WebhookEvent>>,
}

impl RecordingSinks {
    pub fn dispatcher(this: &Arc<Self>) -> SideEffectDispatcher {
        SideEffectDispatcher::new()
            .with_activity_log(this.clone())
            .with_automation(this.clone())
            .with_webhook_relay(this.clone())
    }

    pub fn activity(&self) -> Vec<ActivityRecord> {
        self.activity.lock().clone()
    }

    pub fn triggers(&self) -> Vec<TriggerEvent> {
        self.triggers.lock().clone()
    }

    pub fn triggers_of(&self, trigger_type: TriggerType) -> Vec<TriggerEvent> {
        self.triggers
            .lock()
            .iter()
            .filter(|t| t.trigger_type == trigger_type)
            .cloned()
            .collect()
    }

    pub fn webhooks(&self) -> Vec<WebhookEvent> {
        self.webhooks.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.activity.lock().is_empty() && self.triggers.lock().is_empty() && self.webhooks.lock().is_empty()
    }
}

#[async_trait]
impl ActivityLog for RecordingSinks {
    async fn append(&self, record: ActivityRecord) -> Result<(), SinkError> {
        self.activity.lock().push(record);
        Ok(())
    }
}

#[async_trait]
impl AutomationSink for RecordingSinks {
    async fn fire(&self, event: TriggerEvent) -> Result<(), SinkError> {
        self.triggers.lock().push(event);
        Ok(())
    }
}

#[async_trait]
impl WebhookRelay for RecordingSinks {
    async fn relay(&self, event: WebhookEvent) -> Result<(), SinkError> {
        self.webhooks.lock().push(event);
        Ok(())
    }
}

/// Sinks that reject everything, for checking failures stay isolated.
#[derive(Debug, Default)]
pub struct FailingSinks;

impl FailingSinks {
    pub fn dispatcher() -> SideEffectDispatcher {
        let sinks = Arc::new(Self);
        SideEffectDispatcher::new()
            .with_activity_log(sinks.clone())
            .with_automation(sinks.clone())
            .with_webhook_relay(sinks)
    }
}

#[async_trait]
impl ActivityLog for FailingSinks {
    async fn append(&self, _record: ActivityRecord) -> Result<(), SinkError> {
        Err(SinkError::Unavailable("activity log offline".into()))
    }
}

#[async_trait]
impl AutomationSink for FailingSinks {
    async fn fire(&self, _event: TriggerEvent) -> Result<(), SinkError> {
        Err(SinkError::Rejected("automation disabled".into()))
    }
}

#[async_trait]
impl WebhookRelay for FailingSinks {
    async fn relay(&self, _event: WebhookEvent) -> Result<(), SinkError> {
        Err(SinkError::Unavailable("relay offline".into()))
    }
}

/// Captures user notices.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn of_kind(&self, kind: NoticeKind) -> Vec<Notice> {
        self.notices.lock().iter().filter(|n| n.kind == kind).cloned().collect()
    }
}

impl UserNotifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}
