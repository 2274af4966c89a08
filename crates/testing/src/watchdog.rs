//! Expiry watchdog.
//!
//! A test that never reaches its teardown (hung runtime, leaked fixture) would
//! otherwise leave a database container running indefinitely. The watchdog is
//! a timer task that stops the container once the expiry window has passed; it
//! is aborted on normal teardown.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::runtime::{stop_container, ContainerId, ContainerRuntime, StopOutcome};

/// Handle to a running expiry timer
#[derive(Debug)]
pub struct Watchdog {
    handle: JoinHandle<()>,
}

impl Watchdog {
    /// Spawn a timer that stops `id` after `expiry`.
    ///
    /// The timer runs on the caller's tokio runtime and is aborted when that
    /// runtime shuts down. A fixture leaked past the end of its test (for
    /// example with `mem::forget`) is then no longer expired; the container is
    /// left to the runtime's own cleanup.
    pub fn spawn(
        runtime: Arc<dyn ContainerRuntime>,
        id: ContainerId,
        expiry: Duration,
        stop_timeout: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(expiry).await;

            match stop_container(runtime.as_ref(), &id, stop_timeout).await {
                Ok(StopOutcome::Stopped) => {
                    warn!(
                        container_id = %id,
                        expiry_secs = expiry.as_secs(),
                        "Expired container stopped by watchdog"
                    );
                }
                Ok(StopOutcome::AlreadyGone) => {}
                Err(e) => {
                    error!(container_id = %id, error = %e, "Failed to expire container");
                }
            }
        });

        Self { handle }
    }

    /// Abort the timer. A no-op once it has fired.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the timer has fired (or been cancelled)
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
