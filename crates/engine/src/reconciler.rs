use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use dealsync_core::ChangeSignal;
use dealsync_storage::ChangeFeed;

use crate::listener::ChangeListener;
use crate::scheduler::{Decision, ReconcileScheduler};
use crate::Engine;

/// Running listener and reconciliation loop. Dropping the handle stops both.
pub struct ReconcilerHandle {
    listener: ChangeListener,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    pub fn shutdown(&self) {
        self.listener.shutdown();
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Engine {
    /// Subscribe to the configured tables and keep the replica reconciled
    /// with the remote until the returned handle is dropped.
    pub fn start(&self, feed: &dyn ChangeFeed) -> ReconcilerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = ChangeListener::spawn(feed, &self.shared.config.tracked_tables, tx);
        let engine = self.clone();
        let task = tokio::spawn(async move { engine.reconcile(rx).await });
        ReconcilerHandle { listener, task }
    }

    async fn reconcile(self, mut signals: mpsc::UnboundedReceiver<ChangeSignal>) {
        let mut scheduler = ReconcileScheduler::new(&self.shared.config);
        loop {
            let deadline = scheduler.next_deadline();
            tokio::select! {
                received = signals.recv() => match received {
                    Some(signal) => {
                        tracing::trace!(target: "dealsync::reconcile", table = %signal.table, kind = %signal.kind, "change signal");
                        scheduler.on_signal(signal.table, Instant::now());
                    }
                    None => {
                        tracing::debug!(target: "dealsync::reconcile", "signal channel closed; stopping");
                        return;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let registry_empty = self.shared.pending.lock().is_empty();
                    match scheduler.poll(Instant::now(), registry_empty) {
                        Decision::Wait => {}
                        Decision::Defer { attempt, .. } => {
                            tracing::debug!(
                                target: "dealsync::reconcile",
                                attempt,
                                pending = self.pending_count(),
                                "refetch deferred behind pending writes"
                            );
                        }
                        Decision::Refetch { forced, tables } => {
                            if forced {
                                tracing::warn!(
                                    target: "dealsync::reconcile",
                                    pending = self.pending_count(),
                                    "retry ceiling reached; forcing refetch"
                                );
                            }
                            if let Err(err) = self.full_refetch().await {
                                tracing::warn!(target: "dealsync::reconcile", error = %err, "refetch failed; rescheduling");
                                let now = Instant::now();
                                for table in tables {
                                    scheduler.on_signal(table, now);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
