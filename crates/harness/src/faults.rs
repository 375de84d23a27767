use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use dealsync_core::{Deal, DealId, DealPatch, HistoryEntryId, Lender, LenderId, LenderPatch, NotesHistoryEntry};
use dealsync_storage::{RemoteStore, StorageError};

/// A failure to inject in place of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Retryable transport failure.
    Unavailable,
    /// Hard rejection; never retried.
    Rejected,
}

impl Fault {
    fn error(self) -> StorageError {
        match self {
            Self::Unavailable => StorageError::Unavailable("injected outage".into()),
            Self::Rejected => StorageError::ConstraintViolation("injected rejection".into()),
        }
    }
}

#[derive(Default)]
struct Plan {
    // None lets that write through.
    writes: VecDeque<Option<Fault>>,
    probes: VecDeque<Fault>,
    fetches: VecDeque<Fault>,
    write_delay: Option<Duration>,
}

/// Wraps a [`RemoteStore`], failing or delaying calls on demand and counting
/// what reached it.
pub struct FaultyRemote {
    inner: Arc<dyn RemoteStore>,
    plan: Mutex<Plan>,
    fetches: AtomicUsize,
    writes: AtomicUsize,
}

impl FaultyRemote {
    pub fn new(inner: Arc<dyn RemoteStore>) -> Self {
        Self {
            inner,
            plan: Mutex::new(Plan::default()),
            fetches: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` write calls with `fault`, after any writes
    /// already queued.
    pub fn fail_writes(&self, count: usize, fault: Fault) {
        self.plan.lock().writes.extend(std::iter::repeat_n(Some(fault), count));
    }

    /// Let `count` writes through before any fault queued after this call.
    pub fn pass_writes(&self, count: usize) {
        self.plan.lock().writes.extend(std::iter::repeat_n(None, count));
    }

    /// Fail the next `count` existence probes with `fault`.
    pub fn fail_probes(&self, count: usize, fault: Fault) {
        self.plan.lock().probes.extend(std::iter::repeat_n(fault, count));
    }

    pub fn fail_fetches(&self, count: usize, fault: Fault) {
        self.plan.lock().fetches.extend(std::iter::repeat_n(fault, count));
    }

    /// Hold every write for `delay` before it reaches the inner store.
    pub fn delay_writes(&self, delay: Duration) {
        self.plan.lock().write_delay = Some(delay);
    }

    pub fn clear_write_delay(&self) {
        self.plan.lock().write_delay = None;
    }

    /// Full fetches that reached the inner store.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Write attempts, including injected failures.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        self.fetches.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }

    async fn before_write(&self) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let (fault, delay) = {
            let mut plan = self.plan.lock();
            (plan.writes.pop_front().flatten(), plan.write_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match fault {
            Some(fault) => Err(fault.error()),
            None => Ok(()),
        }
    }

    fn before_probe(&self) -> Result<(), StorageError> {
        match self.plan.lock().probes.pop_front() {
            Some(fault) => Err(fault.error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for FaultyRemote {
    async fn fetch_all(&self) -> Result<Vec<Deal>, StorageError> {
        let fault = self.plan.lock().fetches.pop_front();
        if let Some(fault) = fault {
            return Err(fault.error());
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_all().await
    }

    async fn insert_deal(&self, deal: &Deal) -> Result<(), StorageError> {
        self.before_write().await?;
        self.inner.insert_deal(deal).await
    }

    async fn update_deal(&self, deal: &Deal, patch: &DealPatch) -> Result<u64, StorageError> {
        self.before_write().await?;
        self.inner.update_deal(deal, patch).await
    }

    async fn delete_deal(&self, deal_id: DealId) -> Result<u64, StorageError> {
        self.before_write().await?;
        self.inner.delete_deal(deal_id).await
    }

    async fn deal_exists(&self, deal_id: DealId) -> Result<bool, StorageError> {
        self.before_probe()?;
        self.inner.deal_exists(deal_id).await
    }

    async fn insert_lender(&self, lender: &Lender) -> Result<(), StorageError> {
        self.before_write().await?;
        self.inner.insert_lender(lender).await
    }

    async fn update_lender(&self, lender: &Lender, patch: &LenderPatch) -> Result<u64, StorageError> {
        self.before_write().await?;
        self.inner.update_lender(lender, patch).await
    }

    async fn delete_lender(&self, lender_id: LenderId) -> Result<u64, StorageError> {
        self.before_write().await?;
        self.inner.delete_lender(lender_id).await
    }

    async fn insert_history_entry(
        &self,
        lender_id: LenderId,
        entry: &NotesHistoryEntry,
    ) -> Result<(), StorageError> {
        self.before_write().await?;
        self.inner.insert_history_entry(lender_id, entry).await
    }

    async fn delete_history_entry(&self, entry_id: HistoryEntryId) -> Result<u64, StorageError> {
        self.before_write().await?;
        self.inner.delete_history_entry(entry_id).await
    }
}
