//! Docker implementation of the sandbox primitive.
//!
//! Each sandbox is a long-lived container created from the configured
//! image, parked on `sleep infinity` and driven through exec sessions.
//! Containers carry a pool label so orphans can be found after a crash.
//!
//! File transfer goes through `sh -c` with base64 payloads: it is
//! binary-safe, needs no tar plumbing, and the files involved (sources,
//! metric files, bounded output) are small by construction.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use tracing::debug;

use super::{ExecOutput, SandboxDriver, SCRATCH_DIR};

/// Label attached to every container this driver creates.
const POOL_LABEL: &str = "grader.pool";

/// Hard memory cap on the container itself, independent of per-run limits.
const CONTAINER_MEMORY_BYTES: i64 = 512 * 1024 * 1024;

/// Docker-backed sandbox driver.
pub struct DockerDriver {
    docker: Docker,
}

impl DockerDriver {
    /// Connect to the local Docker daemon.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl SandboxDriver for DockerDriver {
    async fn create(&self, image: &str) -> Result<String> {
        let mut labels = HashMap::new();
        labels.insert(POOL_LABEL.to_string(), "1".to_string());

        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            labels: Some(labels),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(CONTAINER_MEMORY_BYTES),
                pids_limit: Some(128),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .context("Failed to create sandbox container")?;

        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = self
                .docker
                .remove_container(
                    &container.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(anyhow!("Failed to start sandbox container: {}", e));
        }

        // Make sure the scratch directory exists and is writable for the
        // unprivileged user the image runs commands as.
        self.exec(
            &container.id,
            &[
                "sh".to_string(),
                "-c".to_string(),
                format!("mkdir -p {dir} && chmod 777 {dir}", dir = SCRATCH_DIR),
            ],
            "/",
        )
        .await?;

        debug!("Created sandbox container {}", &container.id[..12]);
        Ok(container.id)
    }

    async fn exec(
        &self,
        sandbox_id: &str,
        argv: &[String],
        working_dir: &str,
    ) -> Result<ExecOutput> {
        let exec = self
            .docker
            .create_exec(
                sandbox_id,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    working_dir: Some(working_dir.to_string()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .context("Failed to create exec in sandbox")?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .context("Failed to start exec in sandbox")?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(bollard::container::LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(bollard::container::LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => return Err(anyhow!("Exec stream error: {}", e)),
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .context("Failed to inspect exec")?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    async fn copy_file_into(&self, sandbox_id: &str, path: &str, contents: &[u8]) -> Result<()> {
        let encoded = BASE64.encode(contents);
        let cmd = format!("echo '{}' | base64 -d > {}", encoded, path);
        let output = self
            .exec(
                sandbox_id,
                &["sh".to_string(), "-c".to_string(), cmd],
                SCRATCH_DIR,
            )
            .await?;
        if !output.is_success() {
            return Err(anyhow!(
                "Failed to write {} into sandbox: {}",
                path,
                output.stderr.trim()
            ));
        }
        Ok(())
    }

    async fn copy_file_out_of(&self, sandbox_id: &str, path: &str) -> Result<Vec<u8>> {
        let cmd = format!("base64 {}", path);
        let output = self
            .exec(
                sandbox_id,
                &["sh".to_string(), "-c".to_string(), cmd],
                SCRATCH_DIR,
            )
            .await?;
        if !output.is_success() {
            return Err(anyhow!(
                "Failed to read {} from sandbox: {}",
                path,
                output.stderr.trim()
            ));
        }
        let stripped: String = output
            .stdout
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        BASE64
            .decode(stripped)
            .with_context(|| format!("Invalid base64 reading {} from sandbox", path))
    }

    async fn inspect_running(&self, sandbox_id: &str) -> Result<bool> {
        let inspect = self
            .docker
            .inspect_container(sandbox_id, None)
            .await
            .context("Failed to inspect sandbox container")?;
        Ok(inspect
            .state
            .and_then(|s| s.running)
            .unwrap_or(false))
    }

    async fn destroy(&self, sandbox_id: &str) -> Result<()> {
        self.docker
            .remove_container(
                sandbox_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .context("Failed to remove sandbox container")?;
        debug!("Destroyed sandbox container {}", &sandbox_id[..12.min(sandbox_id.len())]);
        Ok(())
    }

    async fn list_labeled(&self) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=1", POOL_LABEL)]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .context("Failed to list pool containers")?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }
}
