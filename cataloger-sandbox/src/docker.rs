//! Docker Engine implementation of the [`Sandbox`] protocol.
//!
//! File transport goes through `sh -c` execs with base64 on the wire, so
//! arbitrary payload bytes survive the shell. The kernel process is started
//! as a detached exec; health and teardown use the container API directly.

use crate::error::SandboxError;
use crate::sandbox::{Sandbox, SandboxFactory, SandboxSpec};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bollard::Docker;
use bollard::container::{
    Config, LogOutput, RemoveContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::HostConfig;
use futures_util::StreamExt;
use std::sync::Arc;

/// User the sandbox image runs agent workloads as.
const SANDBOX_USER: &str = "agent";

/// One Docker container implementing [`Sandbox`].
pub struct DockerSandbox {
    docker: Docker,
    id: String,
}

impl DockerSandbox {
    /// Wrap an existing container.
    pub fn new(docker: Docker, id: impl Into<String>) -> Self {
        Self {
            docker,
            id: id.into(),
        }
    }

    /// Run a shell command inside the container and capture combined output.
    async fn exec_capture(&self, command: &str) -> Result<String, SandboxError> {
        let exec = self
            .docker
            .create_exec(
                &self.id,
                CreateExecOptions {
                    cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    user: Some(SANDBOX_USER.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| self.map_docker_error(e))?;

        let mut collected = String::new();
        match self
            .docker
            .start_exec(&exec.id, None::<StartExecOptions>)
            .await
            .map_err(|e| self.map_docker_error(e))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                            collected.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => return Err(self.map_docker_error(e)),
                    }
                }
            }
            StartExecResults::Detached => {}
        }
        Ok(collected)
    }

    /// Map a bollard error, distinguishing "the container is gone" from
    /// transport failures.
    fn map_docker_error(&self, err: bollard::errors::Error) -> SandboxError {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404 | 409,
                message,
            } => SandboxError::SandboxLost(format!("{}: {message}", self.id)),
            other => SandboxError::Backend(other.to_string()),
        }
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn is_running(&self) -> Result<bool, SandboxError> {
        let inspect = self
            .docker
            .inspect_container(&self.id, None)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => SandboxError::SandboxLost(self.id.clone()),
                other => SandboxError::Backend(other.to_string()),
            })?;
        Ok(inspect
            .state
            .and_then(|s| s.running)
            .unwrap_or(false))
    }

    async fn restart(&self) -> Result<(), SandboxError> {
        self.docker
            .restart_container(&self.id, None)
            .await
            .map_err(|e| self.map_docker_error(e))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError> {
        let encoded = BASE64.encode(contents.as_bytes());
        self.exec_capture(&format!("echo {encoded} | base64 -d > {path}"))
            .await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>, SandboxError> {
        let exists = self
            .exec_capture(&format!("test -f {path} && echo exists"))
            .await?;
        if exists.trim() != "exists" {
            return Ok(None);
        }
        Ok(Some(self.exec_capture(&format!("cat {path}")).await?))
    }

    async fn remove_file(&self, path: &str) -> Result<(), SandboxError> {
        self.exec_capture(&format!("rm -f {path}")).await?;
        Ok(())
    }

    async fn spawn(&self, command: &str) -> Result<(), SandboxError> {
        let exec = self
            .docker
            .create_exec(
                &self.id,
                CreateExecOptions {
                    cmd: Some(vec![
                        "sh".to_string(),
                        "-c".to_string(),
                        format!("{command} &"),
                    ]),
                    user: Some(SANDBOX_USER.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| self.map_docker_error(e))?;
        self.docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| self.map_docker_error(e))?;
        Ok(())
    }

    async fn terminate(&self, pattern: &str) -> Result<(), SandboxError> {
        // pkill exits non-zero when nothing matches; that is not an error.
        self.exec_capture(&format!("pkill -f '{pattern}' || true"))
            .await?;
        Ok(())
    }

    async fn remove(&self) -> Result<(), SandboxError> {
        if let Err(e) = self
            .docker
            .stop_container(&self.id, Some(StopContainerOptions { t: 5 }))
            .await
        {
            tracing::debug!(sandbox = %self.id, error = %e, "stop before remove failed");
        }
        match self
            .docker
            .remove_container(
                &self.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            // Already gone is the outcome we wanted.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(SandboxError::Backend(e.to_string())),
        }
    }
}

/// Creates [`DockerSandbox`]es from a [`SandboxSpec`].
pub struct DockerSandboxFactory {
    docker: Docker,
    spec: SandboxSpec,
}

impl DockerSandboxFactory {
    /// Connect to the local Docker daemon and verify the image is present.
    ///
    /// Fails fast with [`SandboxError::Provision`] when the image has not
    /// been built locally.
    pub async fn new(spec: SandboxSpec) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::Provision(format!("docker connect failed: {e}")))?;
        docker.inspect_image(&spec.image).await.map_err(|_| {
            SandboxError::Provision(format!(
                "sandbox image '{}' not found; build it first",
                spec.image
            ))
        })?;
        Ok(Self { docker, spec })
    }
}

#[async_trait]
impl SandboxFactory for DockerSandboxFactory {
    async fn create(&self) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let binds = self
            .spec
            .data_dir
            .as_ref()
            .map(|dir| vec![format!("{dir}:/data:ro")]);

        let config = Config {
            image: Some(self.spec.image.clone()),
            env: Some(self.spec.env.clone()),
            host_config: Some(HostConfig {
                memory: Some(self.spec.memory_bytes),
                cpu_quota: Some(self.spec.cpu_quota),
                network_mode: self.spec.network_mode.clone(),
                binds,
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container::<String, String>(None, config)
            .await
            .map_err(|e| SandboxError::Provision(format!("create container failed: {e}")))?;

        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| SandboxError::Provision(format!("start container failed: {e}")))?;

        let sandbox = DockerSandbox::new(self.docker.clone(), created.id.clone());
        if !sandbox.is_running().await? {
            return Err(SandboxError::Provision(format!(
                "container {} failed to start",
                created.id
            )));
        }

        tracing::info!(sandbox = %created.id, image = %self.spec.image, "sandbox created");
        Ok(Arc::new(sandbox))
    }
}
