pub mod builders;
pub mod fake_requester;
pub mod observer;
pub mod resolvers;
pub mod scripted_host;

use std::sync::{Arc, Once};
use tracing_subscriber::{EnvFilter, fmt};

use runwright::collection::Collection;
use runwright::engine::{Collaborators, Observer, RunController, RunOptions, RunReport};
use runwright::exec::{HostHandle, Requester, ScriptHost};

pub use builders::{BASE_URL, CollectionBuilder, GroupBuilder, ItemBuilder, url_for};
pub use fake_requester::{FakeRequester, Reply};
pub use observer::{Event, RecordingObserver};
pub use resolvers::{StaticRequestResolver, StaticSecretResolver};
pub use scripted_host::{Invocation, NestedCall, ScriptedHost};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Fakes wired into one run.
pub struct Harness {
    pub requester: Arc<FakeRequester>,
    pub host: Arc<ScriptedHost>,
    pub observer: Arc<RecordingObserver>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_requester(FakeRequester::new())
    }

    pub fn with_requester(requester: FakeRequester) -> Self {
        Self {
            requester: Arc::new(requester),
            host: Arc::new(ScriptedHost::new()),
            observer: Arc::new(RecordingObserver::new()),
        }
    }

    /// Collaborators over the fakes; the run owns the host.
    pub fn collaborators(&self) -> Collaborators {
        let requester: Arc<dyn Requester> = self.requester.clone();
        let host: Arc<dyn ScriptHost> = self.host.clone();
        Collaborators::new(requester, HostHandle::owned(host))
    }

    pub fn controller(&self, collection: Collection, options: RunOptions) -> RunController {
        RunController::new(collection, options, self.collaborators())
    }

    /// Build and run to completion, with the 5-second cap.
    pub async fn run(&self, collection: Collection, options: RunOptions) -> RunReport {
        let controller = self.controller(collection, options);
        let observer: Arc<dyn Observer> = self.observer.clone();
        with_timeout(controller.run(observer)).await
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
