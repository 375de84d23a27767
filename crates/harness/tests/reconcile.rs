use std::error::Error;
use std::time::Duration;

use dealsync_core::{
    Actor, ChangeKind, ChangeSignal, Deal, DealId, DealPatch, Lender, LenderId, LenderPatch, LenderStage,
    NewDeal, NewLender, Role, Table, Timestamp, TrackingStatus,
};
use dealsync_engine::{EngineConfig, RefetchOutcome};
use dealsync_harness::{advance, init_tracing, Fault, TestBackend};
use dealsync_storage::{ChangeFeed, RemoteSession, RemoteStore};

type TestResult = Result<(), Box<dyn Error>>;

async fn seed(owner: &RemoteSession) -> Result<(Deal, Lender), Box<dyn Error>> {
    let deal = Deal::from_new(DealId::new(), NewDeal::new("Harbor Point"), owner.actor().id, Timestamp::from_millis(1_000));
    owner.insert_deal(&deal).await?;
    let mut new = NewLender::new("Summit Bank");
    new.stage = LenderStage::ReviewingDrl;
    let lender = Lender::from_new(LenderId::new(), deal.id, new, Timestamp::from_millis(2_000));
    owner.insert_lender(&lender).await?;
    Ok((deal, lender))
}

/// Rename a lender through a raw session, as another user would.
async fn rename_remotely(session: &RemoteSession, lender: &Lender, name: &str) -> Result<(), Box<dyn Error>> {
    let mut changed = lender.clone();
    changed.name = name.to_string();
    let patch = LenderPatch {
        name: Some(name.to_string()),
        ..Default::default()
    };
    session.update_lender(&changed, &patch).await?;
    Ok(())
}

fn publish(backend: &TestBackend, table: Table) {
    backend.local_feed().publish(ChangeSignal::new(table, ChangeKind::Update));
}

// ============================================================================
// Debounce
// ============================================================================

#[tokio::test(start_paused = true)]
async fn two_lender_signals_100ms_apart_refetch_once() -> TestResult {
    init_tracing();
    let backend = TestBackend::new()?;
    let owner = backend.session("olga", Role::Admin);
    let (_deal, lender) = seed(&owner).await?;
    let client = backend.client("mia", Role::Member)?;
    client.load().await?;
    let _reconciler = client.start(backend.feed());

    rename_remotely(&owner, &lender, "Summit Bank NA").await?;
    advance(100).await;
    rename_remotely(&owner, &lender, "Summit Bank North America").await?;

    advance(250).await;
    assert_eq!(client.remote.fetch_count(), 0);
    advance(100).await;
    assert_eq!(client.remote.fetch_count(), 1);
    assert_eq!(client.lender(lender.id)?.name, "Summit Bank North America");

    advance(5_000).await;
    assert_eq!(client.remote.fetch_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn signal_burst_across_tables_coalesces() -> TestResult {
    let backend = TestBackend::new()?;
    let client = backend.client("mia", Role::Member)?;
    client.load().await?;
    let _reconciler = client.start(backend.feed());

    for i in 0..10 {
        let table = if i % 2 == 0 { Table::Deals } else { Table::DealLenders };
        publish(&backend, table);
        advance(50).await;
    }
    assert_eq!(client.remote.fetch_count(), 0);

    advance(400).await;
    assert_eq!(client.remote.fetch_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn untracked_tables_are_ignored() -> TestResult {
    let backend = TestBackend::new()?;
    let client = backend.client("mia", Role::Member)?;
    client.load().await?;
    let _reconciler = client.start(backend.feed());

    publish(&backend, Table::LenderNotesHistory);
    advance(1_000).await;
    assert_eq!(client.remote.fetch_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn lagged_subscription_still_refetches() -> TestResult {
    init_tracing();
    let backend = TestBackend::new()?;
    let client = backend.client("mia", Role::Member)?;
    client.load().await?;
    let _reconciler = client.start(backend.feed());

    // Overflow the per-table buffer before the listener gets to run.
    for _ in 0..500 {
        publish(&backend, Table::Deals);
    }
    advance(1_000).await;
    assert_eq!(client.remote.fetch_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn remote_insert_reaches_other_client() -> TestResult {
    let backend = TestBackend::new()?;
    let watcher = backend.client("mia", Role::Member)?;
    watcher.load().await?;
    let _reconciler = watcher.start(backend.feed());
    let author = backend.client("noah", Role::Member)?;

    let deal = author.create_deal("Lakeside Commons").await?;
    advance(400).await;

    assert_eq!(watcher.deal(deal.id)?.name, "Lakeside Commons");
    assert_eq!(watcher.engine.fingerprint()?, author.engine.fingerprint()?);
    Ok(())
}

// ============================================================================
// Pending-write gating
// ============================================================================

#[tokio::test(start_paused = true)]
async fn pending_write_defers_refetch_until_released() -> TestResult {
    let backend = TestBackend::new()?;
    let owner = backend.session("olga", Role::Admin);
    let (_deal, lender) = seed(&owner).await?;
    let client = backend.client("mia", Role::Member)?;
    client.load().await?;
    let _reconciler = client.start(backend.feed());

    let rename = LenderPatch {
        name: Some("Summit Bank NA".into()),
        ..Default::default()
    };
    client.engine.update_lender(lender.id, rename).await?;

    let mut parked = lender.clone();
    parked.tracking_status = TrackingStatus::OnDeck;
    let patch = LenderPatch {
        tracking_status: Some(TrackingStatus::OnDeck),
        ..Default::default()
    };
    owner.update_lender(&parked, &patch).await?;

    // Debounce fires at 300 ms with the entry still held; retry at 2800 ms.
    advance(1_000).await;
    assert_eq!(client.remote.fetch_count(), 0);
    assert_eq!(client.lender(lender.id)?.tracking_status, TrackingStatus::Active);

    advance(2_000).await;
    assert!(!client.engine.is_pending(lender.id.into()));
    assert_eq!(client.remote.fetch_count(), 1);
    let refreshed = client.lender(lender.id)?;
    assert_eq!(refreshed.tracking_status, TrackingStatus::OnDeck);
    assert_eq!(refreshed.name, "Summit Bank NA");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn forced_refetch_keeps_in_flight_state() -> TestResult {
    init_tracing();
    let backend = TestBackend::new()?;
    let owner = backend.session("olga", Role::Admin);
    let (deal, lender) = seed(&owner).await?;
    let config = EngineConfig {
        deferred_retry_ms: 500,
        max_deferred_retries: 1,
        ..EngineConfig::default()
    };
    let client = backend.client_with(config, Actor::new("mia", Role::Member))?;
    client.load().await?;
    let _reconciler = client.start(backend.feed());

    client.remote.delay_writes(Duration::from_secs(5));
    let engine = client.engine.clone();
    let lender_id = lender.id;
    let in_flight = tokio::spawn(async move {
        let patch = LenderPatch {
            stage: Some(LenderStage::TermSheet),
            ..Default::default()
        };
        engine.update_lender(lender_id, patch).await
    });
    advance(10).await;

    let mut renamed = deal.clone();
    renamed.name = "Harbor Point II".into();
    let patch = DealPatch {
        name: Some(renamed.name.clone()),
        ..Default::default()
    };
    owner.update_deal(&renamed, &patch).await?;

    // Debounce at 310 ms defers once; the retry at 810 ms is forced.
    advance(1_000).await;
    assert_eq!(client.remote.fetch_count(), 1);
    assert!(client.engine.is_pending(lender.id.into()));
    assert_eq!(client.deal(deal.id)?.name, "Harbor Point II");
    assert_eq!(client.lender(lender.id)?.stage, LenderStage::TermSheet);

    in_flight.await??;
    assert_eq!(backend.remote().load_all()?[0].lenders[0].stage, LenderStage::TermSheet);
    Ok(())
}

// ============================================================================
// Refetch
// ============================================================================

#[tokio::test(start_paused = true)]
async fn refetch_reports_unchanged_state() -> TestResult {
    let backend = TestBackend::new()?;
    let owner = backend.session("olga", Role::Admin);
    let (_deal, lender) = seed(&owner).await?;
    let client = backend.client("mia", Role::Member)?;

    assert_eq!(client.engine.full_refetch().await?, RefetchOutcome::Replaced { deals: 1 });
    assert_eq!(client.engine.full_refetch().await?, RefetchOutcome::Unchanged);

    rename_remotely(&owner, &lender, "Summit Bank NA").await?;
    assert_eq!(client.engine.full_refetch().await?, RefetchOutcome::Replaced { deals: 1 });
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_refetch_is_rescheduled() -> TestResult {
    init_tracing();
    let backend = TestBackend::new()?;
    let owner = backend.session("olga", Role::Admin);
    let (_deal, lender) = seed(&owner).await?;
    let client = backend.client("mia", Role::Member)?;
    client.load().await?;
    let _reconciler = client.start(backend.feed());

    // One refetch exhausts its retries; the next one succeeds.
    client.remote.fail_fetches(3, Fault::Unavailable);
    rename_remotely(&owner, &lender, "Summit Bank NA").await?;
    advance(700).await;
    assert_eq!(client.remote.fetch_count(), 0);

    advance(800).await;
    assert_eq!(client.remote.fetch_count(), 1);
    assert_eq!(client.lender(lender.id)?.name, "Summit Bank NA");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dropped_handle_stops_reconciliation() -> TestResult {
    let backend = TestBackend::new()?;
    let client = backend.client("mia", Role::Member)?;
    client.load().await?;
    let reconciler = client.start(backend.feed());
    advance(1).await;
    drop(reconciler);
    advance(1).await;

    publish(&backend, Table::Deals);
    advance(1_000).await;
    assert_eq!(client.remote.fetch_count(), 0);
    assert_eq!(backend.local_feed().subscriber_count(Table::Deals), 0);
    Ok(())
}
