mod backend;
mod client;
mod faults;
mod sinks;

pub use backend::TestBackend;
pub use client::TestClient;
pub use faults::{Fault, FaultyRemote};
pub use sinks::{FailingSinks, RecordingNotifier, RecordingSinks};

use std::time::Duration;

use tracing_subscriber::EnvFilter;

/// Install a test subscriber honouring `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Let spawned tasks and timers run for `ms` of (possibly paused) tokio time.
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
