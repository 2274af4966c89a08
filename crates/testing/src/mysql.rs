//! MySQL test container.
//!
//! Provisions a throwaway MySQL server for a single test:
//!
//! 1. pull the image and start a container with the configured database,
//!    credentials and port binding
//! 2. resolve the host port the server is published on
//! 3. poll until the server accepts connections, within a fixed budget
//! 4. apply the embedded schema migrations
//!
//! Any failure along the way stops the container and returns an error. The
//! returned [`ReadyDatastore`] stops its container on [`ReadyDatastore::teardown`]
//! or when dropped, and a [`Watchdog`] stops it after the expiry window in case
//! neither happens.

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::migrate::Migrator;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlPool, MySqlPoolOptions};
use sqlx::Connection;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage_fixture_common::{retry_with_predicate, ContainerConfig, RetryConfig};
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::connection::{ConnectionInfo, Credentials};
use crate::datastore::DatastoreTestContainer;
use crate::docker::DockerRuntime;
use crate::error::{is_transient, FixtureError, Result};
use crate::migrations::{self, MYSQL_MIGRATOR};
use crate::runtime::{
    stop_container, ContainerId, ContainerRuntime, ContainerSpec, Endpoint, StopOutcome,
};
use crate::watchdog::Watchdog;

const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(250);
const MAX_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for a MySQL-backed test datastore
pub struct MySqlTestContainer {
    config: ContainerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    migrator: &'static Migrator,
}

impl MySqlTestContainer {
    /// Default configuration on the local Docker daemon
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    /// Configuration from `config/testfixtures.toml` and `TESTFIXTURES_*` variables
    pub fn from_env() -> Result<Self> {
        Ok(Self::with_config(ContainerConfig::load()?))
    }

    pub fn with_config(config: ContainerConfig) -> Self {
        Self {
            config,
            runtime: Arc::new(DockerRuntime::new()),
            migrator: &MYSQL_MIGRATOR,
        }
    }

    /// Use a different container runtime
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Apply a different migration set instead of the embedded MySQL schema
    pub fn with_migrator(mut self, migrator: &'static Migrator) -> Self {
        self.migrator = migrator;
        self
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Container descriptor for this configuration
    pub fn container_spec(&self, name: impl Into<String>) -> ContainerSpec {
        let config = &self.config;

        let mut spec = ContainerSpec::new(
            &config.image,
            &config.image_tag,
            name,
            config.container_port,
        )
        .with_env("MYSQL_DATABASE", &config.database)
        .with_host_port(config.host_port);

        spec = if config.password.is_empty() {
            spec.with_env("MYSQL_ALLOW_EMPTY_PASSWORD", "yes")
        } else {
            spec.with_env("MYSQL_ROOT_PASSWORD", &config.password)
        };

        if config.username != "root" {
            spec = spec
                .with_env("MYSQL_USER", &config.username)
                .with_env("MYSQL_PASSWORD", &config.password);
        }

        spec
    }

    /// Provision the container and return a connected, migrated datastore.
    #[instrument(skip(self), fields(image = %self.config.image_ref()))]
    pub async fn run(self) -> Result<ReadyDatastore> {
        let result = self.provision().await;
        if let Err(e) = &result {
            error!(error = %e, "Failed to provision MySQL test container");
        }
        result
    }

    async fn provision(&self) -> Result<ReadyDatastore> {
        self.config.validate()?;

        let name = format!("{}-{}", self.config.name_prefix, Uuid::now_v7().simple());
        let spec = self.container_spec(name);

        self.runtime.pull_image(&spec).await?;
        let id = self.runtime.start(&spec).await?;

        match self.bootstrap(&id).await {
            Ok(datastore) => Ok(datastore),
            Err(e) => {
                let stopped =
                    stop_container(self.runtime.as_ref(), &id, self.config.stop_timeout()).await;
                if let Err(stop_err) = stopped {
                    warn!(
                        container_id = %id,
                        error = %stop_err,
                        "Failed to stop container after setup failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn bootstrap(&self, id: &ContainerId) -> Result<ReadyDatastore> {
        let published = self
            .runtime
            .endpoint(id, self.config.container_port)
            .await?;
        let endpoint = match &self.config.host {
            Some(host) => Endpoint::new(host.clone(), published.port),
            None => published,
        };

        let watchdog = Watchdog::spawn(
            self.runtime.clone(),
            id.clone(),
            self.config.expire_timeout(),
            self.config.stop_timeout(),
        );

        let info = ConnectionInfo::new(
            endpoint,
            Credentials::new(&self.config.username, &self.config.password),
            &self.config.database,
        );

        info!(container_id = %id, endpoint = %info.endpoint, "Waiting for MySQL to accept connections");
        let pool = connect_with_backoff(
            &info,
            self.config.connect_timeout(),
            self.config.max_connections,
        )
        .await?;

        if let Err(e) = migrations::run_migrator(self.migrator, &pool).await {
            pool.close().await;
            return Err(e);
        }

        info!(container_id = %id, endpoint = %info.endpoint, "MySQL test container ready");

        Ok(ReadyDatastore::new(
            self.runtime.clone(),
            id.clone(),
            info,
            pool,
            self.migrator,
            Some(watchdog),
            self.config.stop_timeout(),
        ))
    }
}

impl Default for MySqlTestContainer {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll until the server answers a ping, then hand back a pool to it.
///
/// Only errors that can clear up while the server boots are retried; rejected
/// credentials or an unknown database fail straight away.
async fn connect_with_backoff(
    info: &ConnectionInfo,
    budget: Duration,
    max_connections: u32,
) -> Result<MySqlPool> {
    let started = Instant::now();
    let attempt_timeout = (budget / 10).clamp(MIN_ATTEMPT_TIMEOUT, MAX_ATTEMPT_TIMEOUT);
    let options = info.connect_options();

    let result = retry_with_predicate(
        RetryConfig::connect_budget(budget),
        || {
            let options = options.clone();
            async move {
                match tokio::time::timeout(attempt_timeout, probe(options, max_connections)).await
                {
                    Ok(result) => result.map_err(FixtureError::Database),
                    Err(_) => Err(FixtureError::Database(sqlx::Error::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connection attempt timed out",
                    )))),
                }
            }
        },
        FixtureError::is_retryable,
    )
    .await;

    match result {
        Ok(pool) => Ok(pool),
        Err(FixtureError::Database(source)) if is_transient(&source) => {
            Err(FixtureError::ConnectTimeout {
                endpoint: info.endpoint.to_string(),
                elapsed: started.elapsed(),
                source,
            })
        }
        Err(e) => Err(e),
    }
}

async fn probe(
    options: MySqlConnectOptions,
    max_connections: u32,
) -> std::result::Result<MySqlPool, sqlx::Error> {
    let mut conn = MySqlConnection::connect_with(&options).await?;
    conn.ping().await?;
    conn.close().await?;

    MySqlPoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

/// A connected, migrated MySQL datastore owned by one test
pub struct ReadyDatastore {
    runtime: Arc<dyn ContainerRuntime>,
    container_id: ContainerId,
    info: ConnectionInfo,
    pool: MySqlPool,
    migrator: &'static Migrator,
    watchdog: Mutex<Option<Watchdog>>,
    stop_timeout: Duration,
    torn_down: AtomicBool,
}

impl ReadyDatastore {
    pub(crate) fn new(
        runtime: Arc<dyn ContainerRuntime>,
        container_id: ContainerId,
        info: ConnectionInfo,
        pool: MySqlPool,
        migrator: &'static Migrator,
        watchdog: Option<Watchdog>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            container_id,
            info,
            pool,
            migrator,
            watchdog: Mutex::new(watchdog),
            stop_timeout,
            torn_down: AtomicBool::new(false),
        }
    }

    /// DSN in `root:secret@tcp(host:port)/defaultdb?parseTime=true` form
    pub fn connection_uri(&self) -> String {
        self.info.connection_uri()
    }

    /// URL in the `mysql://` form sqlx accepts
    pub fn database_url(&self) -> String {
        self.info.database_url()
    }

    /// The verified connection handle
    #[inline]
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.info.endpoint
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    /// Re-run the migration set; versions already applied are skipped.
    pub async fn apply_migrations(&self) -> Result<()> {
        migrations::run_migrator(self.migrator, &self.pool).await
    }

    /// Close the pool and stop the container.
    ///
    /// Safe to call more than once: a container that is already gone reports
    /// [`StopOutcome::AlreadyGone`].
    #[instrument(skip(self), fields(container_id = %self.container_id))]
    pub async fn teardown(&self) -> Result<StopOutcome> {
        if let Some(watchdog) = self.watchdog.lock().take() {
            watchdog.cancel();
        }

        self.pool.close().await;

        let outcome = stop_container(self.runtime.as_ref(), &self.container_id, self.stop_timeout)
            .await?;
        self.torn_down.store(true, Ordering::SeqCst);
        Ok(outcome)
    }
}

impl std::fmt::Debug for ReadyDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyDatastore")
            .field("container_id", &self.container_id)
            .field("endpoint", &self.info.endpoint)
            .field("database", &self.info.database)
            .finish()
    }
}

impl Drop for ReadyDatastore {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog.get_mut().take() {
            watchdog.cancel();
        }

        if !*self.torn_down.get_mut() {
            self.runtime.release(&self.container_id);
        }
    }
}

#[async_trait]
impl DatastoreTestContainer for ReadyDatastore {
    fn connection_uri(&self) -> String {
        self.info.connection_uri()
    }

    fn redacted_connection_uri(&self) -> String {
        self.info.redacted_connection_uri()
    }

    fn username(&self) -> &str {
        &self.info.credentials.username
    }

    fn password(&self) -> &str {
        &self.info.credentials.password
    }

    async fn database_schema_version(&self) -> Result<i64> {
        migrations::database_schema_version(&self.pool).await
    }
}

/// Provision a MySQL datastore with the default configuration.
///
/// # Panics
///
/// Panics if any provisioning step fails, failing the calling test.
pub async fn run_mysql_test_container() -> ReadyDatastore {
    run_mysql_test_container_with(ContainerConfig::default()).await
}

/// Provision a MySQL datastore with `config`.
///
/// # Panics
///
/// Panics if any provisioning step fails, failing the calling test.
pub async fn run_mysql_test_container_with(config: ContainerConfig) -> ReadyDatastore {
    match MySqlTestContainer::with_config(config).run().await {
        Ok(datastore) => datastore,
        Err(e) => panic!("failed to provision MySQL test container: {}", e),
    }
}
