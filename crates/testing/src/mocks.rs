//! Mock container runtime.
//!
//! Records every lifecycle call and keeps container state in memory so the
//! provisioner, watchdog and teardown paths can be tested without Docker.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FixtureError, Result};
use crate::runtime::{ContainerId, ContainerRuntime, ContainerSpec, Endpoint};

/// A lifecycle call observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Pull(String),
    Start(String),
    Endpoint(ContainerId),
    Stop(ContainerId),
    Release(ContainerId),
}

/// How the mock answers port queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortMapping {
    /// Report the container spec's fixed host port, or an ephemeral one when there is none
    FromSpec,
    /// Always report this port
    Fixed(u16),
    /// Report no mapping at all
    Missing,
}

/// In-memory stand-in for a container engine
pub struct MockContainerRuntime {
    containers: Arc<RwLock<HashMap<ContainerId, ContainerSpec>>>,
    calls: Arc<RwLock<Vec<RuntimeCall>>>,
    host: RwLock<String>,
    port_mapping: RwLock<PortMapping>,
    pull_error: RwLock<Option<String>>,
    start_error: RwLock<Option<String>>,
    stop_error: RwLock<Option<String>>,
    next_id: AtomicU64,
}

impl MockContainerRuntime {
    pub fn new() -> Self {
        Self {
            containers: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            host: RwLock::new("127.0.0.1".to_string()),
            port_mapping: RwLock::new(PortMapping::FromSpec),
            pull_error: RwLock::new(None),
            start_error: RwLock::new(None),
            stop_error: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_host(self, host: impl Into<String>) -> Self {
        *self.host.write() = host.into();
        self
    }

    pub fn with_port_mapping(self, mapping: PortMapping) -> Self {
        *self.port_mapping.write() = mapping;
        self
    }

    pub fn fail_pull_with(&self, reason: impl Into<String>) {
        *self.pull_error.write() = Some(reason.into());
    }

    pub fn fail_start_with(&self, reason: impl Into<String>) {
        *self.start_error.write() = Some(reason.into());
    }

    pub fn fail_stop_with(&self, reason: impl Into<String>) {
        *self.stop_error.write() = Some(reason.into());
    }

    pub fn get_calls(&self) -> Vec<RuntimeCall> {
        self.calls.read().clone()
    }

    pub fn is_running(&self, id: &ContainerId) -> bool {
        self.containers.read().contains_key(id)
    }

    pub fn running_count(&self) -> usize {
        self.containers.read().len()
    }

    /// The container spec a running container was started from
    pub fn spec_of(&self, id: &ContainerId) -> Option<ContainerSpec> {
        self.containers.read().get(id).cloned()
    }

    /// Every container started so far, in start order
    pub fn started_names(&self) -> Vec<String> {
        self.calls
            .read()
            .iter()
            .filter_map(|call| match call {
                RuntimeCall::Start(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn stop_calls(&self, id: &ContainerId) -> usize {
        self.calls
            .read()
            .iter()
            .filter(|call| matches!(call, RuntimeCall::Stop(stopped) if stopped == id))
            .count()
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.write().push(call);
    }
}

impl Default for MockContainerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockContainerRuntime {
    async fn pull_image(&self, spec: &ContainerSpec) -> Result<()> {
        self.record(RuntimeCall::Pull(spec.image_ref()));

        if let Some(reason) = self.pull_error.read().clone() {
            return Err(FixtureError::ImagePull {
                image: spec.image_ref(),
                reason,
            });
        }
        Ok(())
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        self.record(RuntimeCall::Start(spec.name.clone()));

        if let Some(reason) = self.start_error.read().clone() {
            return Err(FixtureError::ContainerStart {
                name: spec.name.clone(),
                reason,
            });
        }

        let id = ContainerId::new(format!(
            "mock-{:012x}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ));
        self.containers.write().insert(id.clone(), spec.clone());
        Ok(id)
    }

    async fn endpoint(&self, id: &ContainerId, container_port: u16) -> Result<Endpoint> {
        self.record(RuntimeCall::Endpoint(id.clone()));

        let spec = self
            .spec_of(id)
            .ok_or_else(|| FixtureError::NotFound(id.to_string()))?;

        let missing = || FixtureError::PortBinding {
            container_id: id.to_string(),
            container_port,
        };

        if spec.container_port != container_port {
            return Err(missing());
        }

        let port = match *self.port_mapping.read() {
            PortMapping::FromSpec => spec.host_port.unwrap_or(49153),
            PortMapping::Fixed(port) => port,
            PortMapping::Missing => return Err(missing()),
        };

        Ok(Endpoint::new(self.host.read().clone(), port))
    }

    async fn stop(&self, id: &ContainerId, _timeout: Duration) -> Result<()> {
        self.record(RuntimeCall::Stop(id.clone()));

        if let Some(reason) = self.stop_error.read().clone() {
            return Err(FixtureError::ContainerStop {
                container_id: id.to_string(),
                reason,
            });
        }

        // Stopped containers are auto-removed, so a second stop finds nothing.
        match self.containers.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(FixtureError::NotFound(id.to_string())),
        }
    }

    fn release(&self, id: &ContainerId) {
        self.record(RuntimeCall::Release(id.clone()));
        self.containers.write().remove(id);
    }
}
