//! Container runtime abstraction.
//!
//! The provisioner only needs a handful of lifecycle calls from the container
//! engine, so they live behind [`ContainerRuntime`]. [`crate::docker::DockerRuntime`]
//! talks to Docker through testcontainers; [`crate::mocks::MockContainerRuntime`]
//! lets lifecycle logic be tested without a daemon.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::Result;

/// Opaque identifier of a container owned by a runtime
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network address a published container port is reachable on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    /// `host:port`, with IPv6 hosts in brackets (`[::1]:3306`)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Everything needed to create and start a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image repository, e.g. `mysql`
    pub image: String,
    /// Image tag, e.g. `latest`
    pub tag: String,
    /// Container name
    pub name: String,
    /// Environment variables, in insertion order
    pub env: Vec<(String, String)>,
    /// TCP port exposed by the container
    pub container_port: u16,
    /// Fixed host port binding; `None` publishes on a runtime-chosen port
    pub host_port: Option<u16>,
}

impl ContainerSpec {
    pub fn new(
        image: impl Into<String>,
        tag: impl Into<String>,
        name: impl Into<String>,
        container_port: u16,
    ) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
            name: name.into(),
            env: Vec::new(),
            container_port,
            host_port: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_host_port(mut self, host_port: Option<u16>) -> Self {
        self.host_port = host_port;
        self
    }

    /// Full image reference, e.g. `mysql:latest`
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    /// Look up an environment variable
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// What a stop request found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The container was running and has been stopped
    Stopped,
    /// The runtime no longer knew the container
    AlreadyGone,
}

/// Lifecycle operations the provisioner needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Pull the image, waiting until the download has finished
    async fn pull_image(&self, spec: &ContainerSpec) -> Result<()>;

    /// Create and start a container, returning its identifier
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerId>;

    /// Resolve the host address a container port is published on
    async fn endpoint(&self, id: &ContainerId, container_port: u16) -> Result<Endpoint>;

    /// Stop (and remove) a container, waiting at most `timeout` for a graceful shutdown.
    ///
    /// Returns [`crate::error::FixtureError::NotFound`] when the container is already gone.
    async fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<()>;

    /// Give up the runtime's handle without waiting for shutdown.
    ///
    /// Called from `Drop`, where nothing can be awaited. Runtimes that remove
    /// containers when their handle is dropped do so here.
    fn release(&self, id: &ContainerId);
}

/// Stop a container, treating "already gone" as success.
pub async fn stop_container(
    runtime: &dyn ContainerRuntime,
    id: &ContainerId,
    timeout: Duration,
) -> Result<StopOutcome> {
    match runtime.stop(id, timeout).await {
        Ok(()) => {
            info!(container_id = %id, "Container stopped");
            Ok(StopOutcome::Stopped)
        }
        Err(e) if e.is_not_found() => {
            debug!(container_id = %id, "Container already gone");
            Ok(StopOutcome::AlreadyGone)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FixtureError;
    use crate::mocks::MockContainerRuntime;

    #[test]
    fn test_endpoint_display() {
        let endpoint = Endpoint::new("localhost", 3306);
        assert_eq!(endpoint.to_string(), "localhost:3306");
    }

    #[test]
    fn test_ipv6_endpoint_display_is_bracketed() {
        assert_eq!(Endpoint::new("::1", 3306).to_string(), "[::1]:3306");
        assert_eq!(Endpoint::new("[::1]", 3306).to_string(), "[::1]:3306");
        assert_eq!(Endpoint::new("127.0.0.1", 13306).to_string(), "127.0.0.1:13306");
    }

    #[test]
    fn test_container_spec_env_lookup() {
        let spec = ContainerSpec::new("mysql", "latest", "mysql-test", 3306)
            .with_env("MYSQL_DATABASE", "defaultdb")
            .with_host_port(Some(3306));

        assert_eq!(spec.image_ref(), "mysql:latest");
        assert_eq!(spec.env_var("MYSQL_DATABASE"), Some("defaultdb"));
        assert_eq!(spec.env_var("MYSQL_USER"), None);
        assert_eq!(spec.host_port, Some(3306));
    }

    #[tokio::test]
    async fn test_stop_container_tolerates_missing_container() {
        let runtime = MockContainerRuntime::new();
        let spec = ContainerSpec::new("mysql", "latest", "mysql-test", 3306);
        let id = runtime.start(&spec).await.unwrap();

        let first = stop_container(&runtime, &id, Duration::from_secs(5))
            .await
            .unwrap();
        let second = stop_container(&runtime, &id, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(first, StopOutcome::Stopped);
        assert_eq!(second, StopOutcome::AlreadyGone);
    }

    #[tokio::test]
    async fn test_stop_container_propagates_other_errors() {
        let runtime = MockContainerRuntime::new();
        let spec = ContainerSpec::new("mysql", "latest", "mysql-test", 3306);
        let id = runtime.start(&spec).await.unwrap();
        runtime.fail_stop_with("daemon unavailable");

        let err = stop_container(&runtime, &id, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FixtureError::ContainerStop { .. }));
    }
}
