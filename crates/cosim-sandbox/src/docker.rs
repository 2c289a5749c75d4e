//! Docker Engine implementation of [`Runtime`] using bollard.

use crate::error::{Result, SandboxError};
use crate::image::ImageRef;
use crate::runtime::{LaunchSpec, PortBinding, RunStatus, Runtime, UnitState};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerStateStatusEnum, HostConfig};
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use futures::TryStreamExt;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Runtime backed by a Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the local defaults (`DOCKER_HOST` or the local socket).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::Runtime(format!("failed to connect to Docker daemon: {e}")))?;
        tracing::debug!("Connected to Docker daemon");
        Ok(Self { docker })
    }

    /// Wrap an existing client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn pull(&self, image: &ImageRef) -> Result<()> {
        let start = Instant::now();
        tracing::info!(image = %image, "Image not found locally, pulling");

        let options = CreateImageOptions {
            from_image: image.repository().to_string(),
            tag: image.pull_reference().to_string(),
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .try_for_each(|info| async move {
                if let Some(status) = info.status {
                    tracing::trace!(status = %status, "Pull progress");
                }
                Ok(())
            })
            .await
            .map_err(|e| SandboxError::ImageResolution {
                image: image.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            image = %image,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Image pulled"
        );
        Ok(())
    }
}

/// Status codes the daemon uses for "already in the requested state".
fn is_not_modified(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError { status_code: 304 | 409, .. }
    )
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError { status_code: 404, .. }
    )
}

fn runtime_error(action: &str, err: DockerError) -> SandboxError {
    SandboxError::Runtime(format!("{action}: {err}"))
}

fn run_status(status: Option<ContainerStateStatusEnum>) -> RunStatus {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => RunStatus::Created,
        Some(ContainerStateStatusEnum::RUNNING) => RunStatus::Running,
        Some(ContainerStateStatusEnum::PAUSED) => RunStatus::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => RunStatus::Restarting,
        Some(ContainerStateStatusEnum::REMOVING) => RunStatus::Removing,
        Some(ContainerStateStatusEnum::EXITED) => RunStatus::Exited,
        Some(ContainerStateStatusEnum::DEAD) => RunStatus::Dead,
        _ => RunStatus::Unknown,
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    async fn ensure_image(&self, image: &ImageRef) -> Result<()> {
        let reference = image.to_string();
        match self.docker.inspect_image(&reference).await {
            Ok(_) => {
                tracing::debug!(image = %reference, "Image found");
                Ok(())
            }
            Err(e) if is_not_found(&e) => self.pull(image).await,
            Err(e) => Err(SandboxError::ImageResolution {
                image: reference,
                reason: e.to_string(),
            }),
        }
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<String> {
        // A unit joining another unit's namespace cannot publish ports; the
        // namespace owner publishes them instead.
        let publish = !spec.network.is_shared_namespace() && !spec.ports.is_empty();
        let exposed_ports = publish.then(|| {
            spec.ports
                .iter()
                .map(|(port, protocol)| (protocol.port_key(*port), HashMap::new()))
                .collect::<HashMap<_, _>>()
        });

        let host_config = HostConfig {
            network_mode: spec.network.mode(),
            publish_all_ports: Some(publish),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.to_string()),
            cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
            exposed_ports,
            host_config: Some(host_config),
            tty: Some(true),
            open_stdin: Some(true),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| runtime_error("failed to create container", e))?;

        for warning in &created.warnings {
            tracing::warn!(container = %created.id, warning = %warning, "Container created with warning");
        }

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| runtime_error("failed to start container", e))?;

        Ok(created.id)
    }

    async fn inspect(&self, id: &str) -> Result<UnitState> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    SandboxError::NotFound(id.to_string())
                } else {
                    runtime_error("failed to inspect container", e)
                }
            })?;

        let (status, exit_code) = response
            .state
            .map(|s| (run_status(s.status), s.exit_code))
            .unwrap_or((RunStatus::Unknown, None));

        let ports = response
            .network_settings
            .and_then(|n| n.ports)
            .unwrap_or_default()
            .into_iter()
            .map(|(key, bindings)| {
                let bindings = bindings
                    .unwrap_or_default()
                    .into_iter()
                    .map(|b| PortBinding {
                        host_ip: b.host_ip,
                        host_port: b.host_port,
                    })
                    .collect();
                (key, bindings)
            })
            .collect();

        Ok(UnitState {
            name: response.name,
            status,
            exit_code,
            ports,
        })
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(runtime_error("failed to stop container", e)),
        }
    }

    async fn kill(&self, id: &str) -> Result<()> {
        match self
            .docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(runtime_error("failed to kill container", e)),
        }
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(id, Some(RemoveContainerOptions::default()))
            .await
            .map_err(|e| runtime_error("failed to remove container", e))
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            check_duplicate: true,
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map_err(|e| runtime_error("failed to create network", e))?;
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.docker
            .remove_network(name)
            .await
            .map_err(|e| runtime_error("failed to remove network", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(run_status(Some(ContainerStateStatusEnum::CREATED)), RunStatus::Created);
        assert_eq!(run_status(Some(ContainerStateStatusEnum::RUNNING)), RunStatus::Running);
        assert_eq!(run_status(Some(ContainerStateStatusEnum::EXITED)), RunStatus::Exited);
        assert_eq!(run_status(Some(ContainerStateStatusEnum::DEAD)), RunStatus::Dead);
        assert_eq!(run_status(None), RunStatus::Unknown);
    }

    #[test]
    fn test_error_classes() {
        let not_found = DockerError::DockerResponseServerError {
            status_code: 404,
            message: "No such image".into(),
        };
        assert!(is_not_found(&not_found));
        assert!(!is_not_modified(&not_found));

        let not_modified = DockerError::DockerResponseServerError {
            status_code: 304,
            message: String::new(),
        };
        assert!(is_not_modified(&not_modified));
    }
}
