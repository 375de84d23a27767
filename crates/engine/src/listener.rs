use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use dealsync_core::{ChangeKind, ChangeSignal, Table};
use dealsync_storage::ChangeFeed;

/// Forwards push signals for the tracked tables into one channel.
///
/// Subscriptions are taken synchronously in [`ChangeListener::spawn`], so a
/// signal published right after it returns is not lost. Dropping the
/// listener stops the forwarding tasks.
pub struct ChangeListener {
    tasks: Vec<JoinHandle<()>>,
}

impl ChangeListener {
    pub fn spawn(
        feed: &dyn ChangeFeed,
        tables: &[Table],
        sink: mpsc::UnboundedSender<ChangeSignal>,
    ) -> Self {
        let mut tasks = Vec::with_capacity(tables.len());
        for &table in tables {
            let mut rx = feed.subscribe(table);
            let sink = sink.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    let signal = match rx.recv().await {
                        Ok(signal) => signal,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                target: "dealsync::listener",
                                table = %table,
                                skipped,
                                "change subscription lagged; treating as a change"
                            );
                            ChangeSignal::new(table, ChangeKind::Update)
                        }
                        Err(RecvError::Closed) => {
                            tracing::debug!(target: "dealsync::listener", table = %table, "change feed closed");
                            break;
                        }
                    };
                    if sink.send(signal).is_err() {
                        break;
                    }
                }
            }));
        }
        Self { tasks }
    }

    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for ChangeListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealsync_storage::LocalChangeFeed;

    #[tokio::test]
    async fn forwards_only_tracked_tables() {
        let feed = LocalChangeFeed::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _listener = ChangeListener::spawn(&feed, &[Table::DealLenders], tx);

        feed.publish(ChangeSignal::new(Table::LenderNotesHistory, ChangeKind::Insert));
        feed.publish(ChangeSignal::new(Table::DealLenders, ChangeKind::Delete));

        let got = rx.recv().await.expect("forwarded");
        assert_eq!(got, ChangeSignal::new(Table::DealLenders, ChangeKind::Delete));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_closes_the_channel() {
        let feed = LocalChangeFeed::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = ChangeListener::spawn(&feed, &[Table::Deals], tx);
        drop(listener);
        assert!(rx.recv().await.is_none());
    }
}
