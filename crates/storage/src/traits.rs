use async_trait::async_trait;
use tokio::sync::broadcast;

use dealsync_core::{
    ChangeSignal, Deal, DealId, DealPatch, HistoryEntryId, Lender, LenderId, LenderPatch,
    NotesHistoryEntry, Table,
};

use crate::error::StorageError;

/// Row-level CRUD against the remote persistence service.
///
/// Update and delete calls return the number of rows the remote actually
/// touched. Row-level authorization may turn a request into a silent no-op,
/// so zero is a meaningful answer and not an error.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Load every deal with its lenders and their notes history.
    async fn fetch_all(&self) -> Result<Vec<Deal>, StorageError>;

    async fn insert_deal(&self, deal: &Deal) -> Result<(), StorageError>;

    /// Persist the columns named by `patch`, reading their values from `deal`.
    async fn update_deal(&self, deal: &Deal, patch: &DealPatch) -> Result<u64, StorageError>;

    async fn delete_deal(&self, deal_id: DealId) -> Result<u64, StorageError>;

    async fn deal_exists(&self, deal_id: DealId) -> Result<bool, StorageError>;

    async fn insert_lender(&self, lender: &Lender) -> Result<(), StorageError>;

    /// Persist the columns named by `patch`, reading their values from `lender`.
    async fn update_lender(&self, lender: &Lender, patch: &LenderPatch) -> Result<u64, StorageError>;

    async fn delete_lender(&self, lender_id: LenderId) -> Result<u64, StorageError>;

    async fn insert_history_entry(
        &self,
        lender_id: LenderId,
        entry: &NotesHistoryEntry,
    ) -> Result<(), StorageError>;

    async fn delete_history_entry(&self, entry_id: HistoryEntryId) -> Result<u64, StorageError>;
}

/// Push invalidation channel keyed by table name.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self, table: Table) -> broadcast::Receiver<ChangeSignal>;
    fn publish(&self, signal: ChangeSignal);
}
