use std::sync::Arc;

use dealsync_core::{Actor, Role};
use dealsync_engine::EngineConfig;
use dealsync_storage::{ChangeFeed, LocalChangeFeed, RemoteSession, SqliteRemote, StorageError};

use crate::client::TestClient;

/// One shared remote database and push feed that several clients talk to.
pub struct TestBackend {
    remote: SqliteRemote,
    feed: Arc<LocalChangeFeed>,
}

impl TestBackend {
    pub fn new() -> Result<Self, StorageError> {
        let feed = Arc::new(LocalChangeFeed::new());
        let remote = SqliteRemote::open_in_memory(feed.clone())?;
        Ok(Self { remote, feed })
    }

    pub fn remote(&self) -> &SqliteRemote {
        &self.remote
    }

    pub fn feed(&self) -> &dyn ChangeFeed {
        self.feed.as_ref()
    }

    pub fn local_feed(&self) -> &LocalChangeFeed {
        &self.feed
    }

    /// A raw remote session, bypassing any client replica.
    pub fn session(&self, name: &str, role: Role) -> RemoteSession {
        self.remote.session(Actor::new(name, role))
    }

    pub fn client(&self, name: &str, role: Role) -> Result<TestClient, Box<dyn std::error::Error>> {
        self.client_with(EngineConfig::default(), Actor::new(name, role))
    }

    pub fn client_with(
        &self,
        config: EngineConfig,
        actor: Actor,
    ) -> Result<TestClient, Box<dyn std::error::Error>> {
        TestClient::new(config, self.remote.session(actor.clone()), actor)
    }
}
