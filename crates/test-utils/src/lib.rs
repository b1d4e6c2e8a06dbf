//! Shared helpers for the tractflow integration tests.
//!
//! Steps never run real neuroimaging tools here: [`fake_invoker`] stands in
//! for the process layer and writes placeholder outputs, while
//! [`fake_executor`] replaces the whole executor backend for runtime tests.

pub mod builders;
/// Executor backend that completes every dispatched step immediately.
pub mod fake_executor;
/// Scriptable [`tractflow::exec::ToolInvoker`] that records each invocation.
pub mod fake_invoker;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

/// Upper bound for any single engine run in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Install a test-captured tracing subscriber once per test binary.
///
/// Output only shows for failing tests unless `--nocapture` is passed.
/// `RUST_LOG=tractflow=debug` turns on scheduler and staging detail.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("tractflow=info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, panicking if it takes longer than [`TEST_TIMEOUT`].
///
/// A hung scheduler shows up as a failed test instead of a stuck run.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .unwrap_or_else(|_| panic!("run did not finish within {TEST_TIMEOUT:?}"))
}
