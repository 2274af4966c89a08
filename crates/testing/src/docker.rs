//! Docker-backed container runtime.
//!
//! Uses testcontainers for the Docker API calls. Container handles are kept
//! here so the provisioner only ever deals in [`ContainerId`]s; dropping a
//! handle removes its container.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{
    core::ContainerPort, runners::AsyncRunner, ContainerAsync, GenericImage, ImageExt,
};
use tracing::{debug, info, instrument, warn};

use crate::error::{FixtureError, Result};
use crate::runtime::{ContainerId, ContainerRuntime, ContainerSpec, Endpoint};

type Handle = Arc<ContainerAsync<GenericImage>>;

/// Container runtime talking to the local Docker daemon
#[derive(Default)]
pub struct DockerRuntime {
    containers: Mutex<HashMap<ContainerId, Handle>>,
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, id: &ContainerId) -> Result<Handle> {
        self.containers
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| FixtureError::NotFound(id.to_string()))
    }
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerRuntime")
            .field("containers", &self.containers.lock().len())
            .finish()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[instrument(skip(self, spec), fields(image = %spec.image_ref()))]
    async fn pull_image(&self, spec: &ContainerSpec) -> Result<()> {
        debug!("Pulling image");

        // Resolves once the pull stream has been drained.
        GenericImage::new(spec.image.clone(), spec.tag.clone())
            .pull_image()
            .await
            .map_err(|e| FixtureError::ImagePull {
                image: spec.image_ref(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, host_port = ?spec.host_port))]
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        let container_port = ContainerPort::Tcp(spec.container_port);

        let mut request = GenericImage::new(spec.image.clone(), spec.tag.clone())
            .with_exposed_port(container_port)
            .with_container_name(spec.name.clone());

        for (key, value) in &spec.env {
            request = request.with_env_var(key.clone(), value.clone());
        }

        if let Some(host_port) = spec.host_port {
            request = request.with_mapped_port(host_port, container_port);
        }

        let container = request
            .start()
            .await
            .map_err(|e| FixtureError::ContainerStart {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?;

        let id = ContainerId::new(container.id());
        info!(container_id = %id, "Container started");

        self.containers.lock().insert(id.clone(), Arc::new(container));
        Ok(id)
    }

    async fn endpoint(&self, id: &ContainerId, container_port: u16) -> Result<Endpoint> {
        let container = self.handle(id)?;

        let port = container
            .get_host_port_ipv4(ContainerPort::Tcp(container_port))
            .await
            .map_err(|e| {
                warn!(container_id = %id, error = %e, "No host port mapping");
                FixtureError::PortBinding {
                    container_id: id.to_string(),
                    container_port,
                }
            })?;

        let host = container
            .get_host()
            .await
            .map_err(|e| {
                warn!(container_id = %id, error = %e, "Container host not resolvable");
                FixtureError::PortBinding {
                    container_id: id.to_string(),
                    container_port,
                }
            })?;

        Ok(Endpoint::new(host.to_string(), port))
    }

    #[instrument(skip(self), fields(container_id = %id))]
    async fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<()> {
        let container = self
            .containers
            .lock()
            .remove(id)
            .ok_or_else(|| FixtureError::NotFound(id.to_string()))?;

        match tokio::time::timeout(timeout, container.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(FixtureError::ContainerStop {
                    container_id: id.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Graceful stop timed out, removing");
            }
        }

        // Removal is forced, so it also covers a stop that timed out.
        match Arc::try_unwrap(container) {
            Ok(container) => container.rm().await.map_err(|e| FixtureError::ContainerStop {
                container_id: id.to_string(),
                reason: e.to_string(),
            }),
            // Another task still holds the handle; it is removed when that clone drops.
            Err(_) => Ok(()),
        }
    }

    fn release(&self, id: &ContainerId) {
        let handle = self.containers.lock().remove(id);
        if handle.is_some() {
            debug!(container_id = %id, "Releasing container handle");
        }
        drop(handle);
    }
}
