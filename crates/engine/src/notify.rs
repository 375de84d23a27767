use std::fmt;

use dealsync_core::EntityRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Failure,
    PermissionDenied,
}

/// User-initiated operation a notice refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateDeal,
    UpdateDeal,
    DeleteDeal,
    CreateLender,
    UpdateLender,
    DeleteLender,
    DeleteHistoryEntry,
}

impl Action {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::CreateDeal | Self::CreateLender => "create",
            Self::UpdateDeal | Self::UpdateLender => "update",
            Self::DeleteDeal | Self::DeleteLender | Self::DeleteHistoryEntry => "delete",
        }
    }

    pub fn noun(&self) -> &'static str {
        match self {
            Self::CreateDeal | Self::UpdateDeal | Self::DeleteDeal => "deal",
            Self::CreateLender | Self::UpdateLender | Self::DeleteLender => "lender",
            Self::DeleteHistoryEntry => "notes history entry",
        }
    }

    fn past_tense(&self) -> &'static str {
        match self.verb() {
            "create" => "created",
            "update" => "updated",
            _ => "deleted",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verb(), self.noun())
    }
}

/// A message for the user about the operation they just performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub action: Action,
    pub entity: EntityRef,
    /// Display name of the affected record.
    pub subject: String,
    pub message: String,
}

impl Notice {
    pub fn success(action: Action, entity: EntityRef, subject: &str) -> Self {
        let noun = action.noun();
        let mut capitalized = noun[..1].to_uppercase();
        capitalized.push_str(&noun[1..]);
        Self {
            kind: NoticeKind::Success,
            action,
            entity,
            subject: subject.to_string(),
            message: format!("{capitalized} \"{subject}\" {}", action.past_tense()),
        }
    }

    pub fn failure(action: Action, entity: EntityRef, subject: &str) -> Self {
        Self {
            kind: NoticeKind::Failure,
            action,
            entity,
            subject: subject.to_string(),
            message: format!("Failed to {} {} \"{subject}\"", action.verb(), action.noun()),
        }
    }

    pub fn permission_denied(action: Action, entity: EntityRef, subject: &str) -> Self {
        Self {
            kind: NoticeKind::PermissionDenied,
            action,
            entity,
            subject: subject.to_string(),
            message: format!(
                "Could not {} {} \"{subject}\": insufficient permission",
                action.verb(),
                action.noun()
            ),
        }
    }
}

/// User-visible notification channel (toasts, banners).
pub trait UserNotifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Notifier that only writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl UserNotifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice.kind {
            NoticeKind::Success => {
                tracing::info!(target: "dealsync::notify", entity = %notice.entity, "{}", notice.message)
            }
            NoticeKind::Failure | NoticeKind::PermissionDenied => {
                tracing::warn!(target: "dealsync::notify", entity = %notice.entity, "{}", notice.message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealsync_core::DealId;

    #[test]
    fn permission_message_names_action_and_subject() {
        let notice = Notice::permission_denied(Action::DeleteDeal, EntityRef::Deal(DealId::new()), "Harbor Point");
        assert_eq!(notice.message, "Could not delete deal \"Harbor Point\": insufficient permission");
    }

    #[test]
    fn success_and_failure_messages() {
        let entity = EntityRef::Deal(DealId::new());
        assert_eq!(Notice::success(Action::CreateDeal, entity, "Lakeside").message, "Deal \"Lakeside\" created");
        assert_eq!(
            Notice::failure(Action::UpdateLender, entity, "Summit Bank").message,
            "Failed to update lender \"Summit Bank\""
        );
    }
}
