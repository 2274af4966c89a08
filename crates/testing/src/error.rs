//! Fixture errors.
//!
//! Every variant is fatal to the test that hit it; the only place the fixture
//! retries is the initial connection poll.

use sqlx::mysql::MySqlDatabaseError;
use std::time::Duration;

/// Server error numbers that waiting for the server cannot fix
const ER_DBACCESS_DENIED_ERROR: u16 = 1044;
const ER_ACCESS_DENIED_ERROR: u16 = 1045;
const ER_BAD_DB_ERROR: u16 = 1049;

/// Result alias for fixture operations
pub type Result<T> = std::result::Result<T, FixtureError>;

/// Errors raised while provisioning or tearing down a test datastore
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    /// Pulling the image failed
    #[error("Failed to pull image {image}: {reason}")]
    ImagePull { image: String, reason: String },

    /// Creating or starting the container failed
    #[error("Failed to start container {name}: {reason}")]
    ContainerStart { name: String, reason: String },

    /// The running container did not publish the expected port
    #[error("No host port mapping for container port {container_port} on {container_id}")]
    PortBinding {
        container_id: String,
        container_port: u16,
    },

    /// The database never accepted a connection within the retry budget
    #[error("Database not reachable at {endpoint} after {elapsed:?}: {source}")]
    ConnectTimeout {
        endpoint: String,
        elapsed: Duration,
        #[source]
        source: sqlx::Error,
    },

    /// Applying schema migrations failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Database errors from sqlx
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stopping or removing the container failed
    #[error("Failed to stop container {container_id}: {reason}")]
    ContainerStop { container_id: String, reason: String },

    /// The runtime does not know the container (already stopped and removed)
    #[error("Container not found: {0}")]
    NotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl FixtureError {
    /// Whether the error can clear up on its own while the container boots.
    ///
    /// Refused or reset connections and timeouts are retried; rejected
    /// credentials, an unknown database and bad driver options are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FixtureError::Database(err) => is_transient(err),
            _ => false,
        }
    }

    /// Whether the error means the container is already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, FixtureError::NotFound(_))
    }
}

/// Whether a driver error may go away once the server finishes starting
pub(crate) fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => match db_err.try_downcast_ref::<MySqlDatabaseError>() {
            Some(mysql) => !matches!(
                mysql.number(),
                ER_DBACCESS_DENIED_ERROR | ER_ACCESS_DENIED_ERROR | ER_BAD_DB_ERROR
            ),
            None => true,
        },
        sqlx::Error::Configuration(_) => false,
        _ => true,
    }
}

impl From<anyhow::Error> for FixtureError {
    fn from(err: anyhow::Error) -> Self {
        FixtureError::Configuration(format!("{:#}", err))
    }
}
