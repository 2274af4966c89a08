//! Logging setup.
//!
//! Fixtures log through `tracing`; this installs a subscriber so the output
//! shows up in test runs.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_TEST_FILTER: &str = "storage_fixture=debug,sqlx=warn,info";

/// Install a subscriber that writes through the test harness' captured output.
///
/// `RUST_LOG` overrides [`DEFAULT_TEST_FILTER`]. Safe to call from every test:
/// only the first call installs anything.
pub fn init_test_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER));

    let _ = Registry::default()
        .with(env_filter)
        .with(fmt::layer().with_test_writer().with_target(true))
        .try_init();
}
