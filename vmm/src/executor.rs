//! The per-request pipeline: validate → stage → provision channel → boot →
//! wait → clean up. One `Executor` is shared by all requests; everything a
//! request creates is keyed by its execution ID and removed before the
//! response leaves.

use crate::channel::AgentChannel;
use crate::error::VmmError;
use crate::hypervisor::{boot_args, BootConfig, Hypervisor};
use crate::stage;
use ember_core::{ExecutionId, RunResponse, RunSpec};
use ember_guest::ExitRecord;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Boot allowance folded into the effective deadline: the guest gets this
/// long to reach user space before the caller's budget starts mattering.
const BOOT_ALLOWANCE: Duration = Duration::from_secs(5);

/// Host-side inputs shared by all executions.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Firecracker binary to spawn (name or path).
    pub firecracker_bin: PathBuf,
    /// Canonical kernel image, read-only input.
    pub kernel_image: PathBuf,
    /// Canonical rootfs image, copied per execution.
    pub rootfs_image: PathBuf,
    /// Parent of all per-execution scratch directories.
    pub data_dir: PathBuf,
}

/// Per-execution artifact locations, all inside one removable directory.
struct ExecutionPaths {
    dir: PathBuf,
    rootfs: PathBuf,
    agent_image: PathBuf,
    api_socket: PathBuf,
    log: PathBuf,
}

impl ExecutionPaths {
    fn new(data_dir: &Path, id: &ExecutionId) -> Self {
        let dir = data_dir.join(id.as_str());
        Self {
            rootfs: dir.join("rootfs.ext4"),
            agent_image: dir.join("agent.img"),
            api_socket: dir.join("fc.sock"),
            log: dir.join("fc.log"),
            dir,
        }
    }
}

/// Removes the per-execution directory on every exit path. The explicit
/// [`ScratchGuard::remove`] reports failures; the `Drop` arm is the backstop
/// for panics.
struct ScratchGuard {
    dir: PathBuf,
    armed: bool,
}

impl ScratchGuard {
    fn new(dir: PathBuf) -> Self {
        Self { dir, armed: true }
    }

    async fn remove(mut self) {
        self.armed = false;
        if let Err(e) = fs::remove_dir_all(&self.dir).await {
            tracing::warn!("Failed to remove scratch dir {:?}: {}", self.dir, e);
        }
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }
}

pub struct Executor {
    config: VmConfig,
}

impl Executor {
    pub fn new(config: VmConfig) -> Self {
        Self { config }
    }

    /// Run one validated request in a fresh microVM.
    ///
    /// Timeouts are not errors: the deadline path returns a normal response
    /// with the 124 sentinel. Errors are staging or hypervisor failures that
    /// surface to the caller as internal errors.
    pub async fn execute(&self, spec: &RunSpec) -> Result<RunResponse, VmmError> {
        let id = ExecutionId::new();
        tracing::info!(execution = %id, cmd = %spec.cmd, timeout = ?spec.timeout, "Starting execution");

        let paths = ExecutionPaths::new(&self.config.data_dir, &id);
        fs::create_dir_all(&paths.dir).await?;
        let scratch = ScratchGuard::new(paths.dir.clone());

        let outcome = self.run_vm(spec, &paths).await;
        scratch.remove().await;

        match &outcome {
            Ok(response) => {
                tracing::info!(execution = %id, exit_code = response.exit_code, "Execution finished")
            }
            Err(e) => tracing::error!(execution = %id, error = %e, "Execution failed"),
        }
        outcome
    }

    async fn run_vm(&self, spec: &RunSpec, paths: &ExecutionPaths) -> Result<RunResponse, VmmError> {
        stage::snapshot_rootfs(&self.config.rootfs_image, &paths.rootfs).await?;
        stage::stage_rootfs(&paths.rootfs, &spec.files).await?;
        let channel = AgentChannel::provision(&paths.agent_image).await?;

        let mut hypervisor =
            Hypervisor::spawn(&self.config.firecracker_bin, &paths.api_socket, &paths.log).await?;

        let outcome = self.drive(&mut hypervisor, spec, channel, paths).await;
        // Force-kill and reap on every path; the guest gets no say.
        hypervisor.shutdown().await;

        let record = outcome?;
        Ok(RunResponse {
            stdout: record.stdout,
            stderr: record.stderr,
            exit_code: record.exit_code,
        })
    }

    async fn drive(
        &self,
        hypervisor: &mut Hypervisor,
        spec: &RunSpec,
        channel: AgentChannel,
        paths: &ExecutionPaths,
    ) -> Result<ExitRecord, VmmError> {
        hypervisor.wait_for_api_socket().await?;
        hypervisor
            .configure(&BootConfig {
                kernel_image: self.config.kernel_image.clone(),
                rootfs_image: paths.rootfs.clone(),
                agent_image: paths.agent_image.clone(),
                boot_args: boot_args(&spec.cmd, spec.has_files()),
            })
            .await?;
        hypervisor.start_instance().await?;

        Ok(channel.wait(spec.timeout + BOOT_ALLOWANCE).await)
    }
}
