use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use dealsync_core::{ChangeSignal, Table};

use crate::traits::ChangeFeed;

const CHANNEL_CAPACITY: usize = 64;

/// In-process change feed: one broadcast channel per table.
#[derive(Debug, Default)]
pub struct LocalChangeFeed {
    topics: RwLock<HashMap<Table, broadcast::Sender<ChangeSignal>>>,
}

impl LocalChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, table: Table) -> broadcast::Sender<ChangeSignal> {
        if let Some(sender) = self.topics.read().get(&table) {
            return sender.clone();
        }
        let mut guard = self.topics.write();
        guard
            .entry(table)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub fn subscriber_count(&self, table: Table) -> usize {
        self.topics
            .read()
            .get(&table)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl ChangeFeed for LocalChangeFeed {
    fn subscribe(&self, table: Table) -> broadcast::Receiver<ChangeSignal> {
        self.sender_for(table).subscribe()
    }

    fn publish(&self, signal: ChangeSignal) {
        // No subscribers is not an error for a push channel.
        let _ = self.sender_for(signal.table).send(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealsync_core::ChangeKind;

    #[tokio::test]
    async fn signals_are_routed_by_table() {
        let feed = LocalChangeFeed::new();
        let mut deals = feed.subscribe(Table::Deals);
        let mut lenders = feed.subscribe(Table::DealLenders);

        feed.publish(ChangeSignal::new(Table::DealLenders, ChangeKind::Update));

        let got = lenders.recv().await.expect("receive ok");
        assert_eq!(got, ChangeSignal::new(Table::DealLenders, ChangeKind::Update));
        assert!(deals.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let feed = LocalChangeFeed::new();
        feed.publish(ChangeSignal::new(Table::Deals, ChangeKind::Insert));
        assert_eq!(feed.subscriber_count(Table::Deals), 0);
    }
}
