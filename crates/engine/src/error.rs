use dealsync_core::{CoreError, DealId, EntityRef, HistoryEntryId, LenderId};
use dealsync_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("deal not found: {0}")]
    DealNotFound(DealId),

    #[error("lender not found: {0}")]
    LenderNotFound(LenderId),

    #[error("notes history entry not found: {0}")]
    HistoryEntryNotFound(HistoryEntryId),

    #[error("lender would be orphaned: deal {0} is not in the replica")]
    OrphanLender(DealId),

    #[error("patch changes no fields")]
    EmptyPatch,

    #[error("insufficient permission to {action} {entity}")]
    PermissionDenied {
        action: &'static str,
        entity: EntityRef,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Failure reported by an activity log, automation engine or webhook relay.
/// Never propagated to the mutation caller.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink rejected event: {0}")]
    Rejected(String),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}
