use std::sync::Arc;

use dealsync_core::{Actor, Deal, DealId, Lender, LenderId, NewDeal, NewLender};
use dealsync_engine::{Engine, EngineConfig, ReconcilerHandle, SideEffectDispatcher};
use dealsync_storage::{ChangeFeed, RemoteSession};

use crate::faults::FaultyRemote;
use crate::sinks::{RecordingNotifier, RecordingSinks};

/// An engine wired to recording sinks and a fault-injecting remote session.
pub struct TestClient {
    pub engine: Engine,
    pub remote: Arc<FaultyRemote>,
    pub sinks: Arc<RecordingSinks>,
    pub notices: Arc<RecordingNotifier>,
}

impl TestClient {
    pub fn new(
        config: EngineConfig,
        session: RemoteSession,
        actor: Actor,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let sinks = Arc::new(RecordingSinks::default());
        Self::with_dispatcher(config, session, actor, sinks.clone(), RecordingSinks::dispatcher(&sinks))
    }

    /// Like [`TestClient::new`] but with a caller-supplied dispatcher. `sinks`
    /// is kept for assertions and may be unused by `effects`.
    pub fn with_dispatcher(
        config: EngineConfig,
        session: RemoteSession,
        actor: Actor,
        sinks: Arc<RecordingSinks>,
        effects: SideEffectDispatcher,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let remote = Arc::new(FaultyRemote::new(Arc::new(session)));
        let notices = Arc::new(RecordingNotifier::default());
        let engine = Engine::new(config, actor, remote.clone(), effects, notices.clone())?;
        Ok(Self {
            engine,
            remote,
            sinks,
            notices,
        })
    }

    pub fn start(&self, feed: &dyn ChangeFeed) -> ReconcilerHandle {
        self.engine.start(feed)
    }

    /// Initial load; not counted by [`FaultyRemote::fetch_count`].
    pub async fn load(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.engine.full_refetch().await?;
        self.remote.reset_counts();
        Ok(())
    }

    pub async fn create_deal(&self, name: &str) -> Result<Deal, Box<dyn std::error::Error>> {
        Ok(self.engine.create_deal(NewDeal::new(name)).await?)
    }

    pub async fn create_lender(&self, deal_id: DealId, new: NewLender) -> Result<Lender, Box<dyn std::error::Error>> {
        Ok(self.engine.create_lender(deal_id, new).await?)
    }

    pub fn lender(&self, lender_id: LenderId) -> Result<Lender, Box<dyn std::error::Error>> {
        Ok(self.engine.lender(lender_id).ok_or("lender not in replica")?)
    }

    pub fn deal(&self, deal_id: DealId) -> Result<Deal, Box<dyn std::error::Error>> {
        Ok(self.engine.deal(deal_id).ok_or("deal not in replica")?)
    }
}
