//! Shared harness for staleflow's integration tests.
//!
//! - [`builders`] assembles validated projects without TOML, including the
//!   `hmis -> m1 -> m2 -> m3` chain most scheduling tests run against.
//! - [`fake_executor`] stands in for the interpreter: `FakeExecutor`
//!   completes runs immediately with a chosen outcome, `HangingExecutor`
//!   never completes and records terminations.

pub mod builders;
pub mod fake_executor;

use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Upper bound for anything a test awaits on the runtime.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Route staleflow's tracing output into the test harness.
///
/// Defaults to `staleflow=debug` so admissions and transitions show up in
/// the captured output of a failing test; `RUST_LOG` overrides it.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,staleflow=debug"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, failing the test once [`TEST_TIMEOUT`] has passed.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .expect("test timed out waiting on the runtime")
}
