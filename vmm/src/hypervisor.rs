//! Firecracker child process lifecycle.
//!
//! One `Hypervisor` owns one Firecracker child for one request. The child is
//! driven through the control protocol in strict order (machine config, boot
//! source, drives, start) and is force-killed at the end of the request on
//! every path.

use crate::api::ApiClient;
use crate::error::VmmError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;

/// Cadence for polling the control socket into existence.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Upper bound on waiting for the control socket.
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
/// How much of the Firecracker log to attach to start failures.
const LOG_TAIL_LINES: usize = 50;

/// Fixed VM shape: one vCPU, 256 MiB, SMT off.
const VCPU_COUNT: u32 = 1;
const MEM_SIZE_MIB: u32 = 256;

pub const ROOTFS_DRIVE_ID: &str = "rootfs";
pub const AGENT_DRIVE_ID: &str = "agent";

/// Observable lifecycle of the hypervisor child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Spawned,
    SocketReady,
    Configured,
    Running,
    Terminated,
}

/// Everything the guest boots with.
pub struct BootConfig {
    pub kernel_image: PathBuf,
    pub rootfs_image: PathBuf,
    pub agent_image: PathBuf,
    pub boot_args: String,
}

/// Assemble the kernel boot arguments carrying the guest command.
///
/// The command is handed to the guest init through the `CMD` kernel argument,
/// wrapped in double quotes without further escaping; commands containing
/// embedded double quotes are a documented hazard of this transport. When the
/// request staged files, the command first changes into the work directory.
pub fn boot_args(cmd: &str, from_work_dir: bool) -> String {
    let guest_cmd = if from_work_dir {
        format!("cd /work && {cmd}")
    } else {
        cmd.to_string()
    };
    format!(
        "console=ttyS0 quiet loglevel=0 reboot=k panic=1 pci=off init=/sbin/init CMD=\"{guest_cmd}\""
    )
}

pub struct Hypervisor {
    child: Child,
    api: ApiClient,
    log_path: PathBuf,
    state: VmState,
}

impl Hypervisor {
    /// Spawn the Firecracker child with its control socket and log file on
    /// the command line. The console is discarded; guest output travels over
    /// the agent channel instead.
    pub async fn spawn(
        binary: &Path,
        api_socket: &Path,
        log_path: &Path,
    ) -> Result<Self, VmmError> {
        // A stale socket from a crashed run would confuse the readiness poll.
        let _ = tokio::fs::remove_file(api_socket).await;
        tokio::fs::File::create(log_path).await?;

        let child = Command::new(binary)
            .arg("--api-sock")
            .arg(api_socket)
            .arg("--log-path")
            .arg(log_path)
            .arg("--level")
            .arg("Error")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VmmError::Start(format!("failed to spawn {}: {}", binary.display(), e)))?;

        tracing::debug!(
            pid = child.id(),
            socket = %api_socket.display(),
            "Spawned firecracker"
        );

        Ok(Self {
            child,
            api: ApiClient::new(api_socket.to_path_buf()),
            log_path: log_path.to_path_buf(),
            state: VmState::Spawned,
        })
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    /// Poll the control socket into existence (25 ms cadence, 10 s bound).
    pub async fn wait_for_api_socket(&mut self) -> Result<(), VmmError> {
        let deadline = Instant::now() + SOCKET_WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if self.api.socket_path().exists() {
                self.state = VmState::SocketReady;
                return Ok(());
            }
            tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
        }

        Err(VmmError::Start(format!(
            "timed out waiting for control socket {}{}",
            self.api.socket_path().display(),
            self.log_tail_suffix().await
        )))
    }

    /// Drive the ordered configuration protocol: machine config, boot source,
    /// root drive, agent drive. Each call must answer 204 within its budget.
    pub async fn configure(&mut self, config: &BootConfig) -> Result<(), VmmError> {
        debug_assert_eq!(self.state, VmState::SocketReady);

        self.api.machine_config(VCPU_COUNT, MEM_SIZE_MIB).await?;
        self.api
            .boot_source(&config.kernel_image, &config.boot_args)
            .await?;
        self.api
            .drive(ROOTFS_DRIVE_ID, &config.rootfs_image, true)
            .await?;
        self.api
            .drive(AGENT_DRIVE_ID, &config.agent_image, false)
            .await?;

        self.state = VmState::Configured;
        Ok(())
    }

    /// `InstanceStart`: the guest begins booting.
    pub async fn start_instance(&mut self) -> Result<(), VmmError> {
        debug_assert_eq!(self.state, VmState::Configured);

        self.api.instance_start().await?;
        self.state = VmState::Running;
        tracing::debug!(pid = self.child.id(), "Instance started");
        Ok(())
    }

    /// Force-kill the child and reap it. Called on every exit path; the
    /// guest gets no cooperative shutdown.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.start_kill() {
            // Already exited is fine; anything else is worth a line.
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill firecracker: {}", e);
            }
        }
        match self.child.wait().await {
            Ok(status) => tracing::debug!(%status, "Reaped firecracker"),
            Err(e) => tracing::warn!("Failed to reap firecracker: {}", e),
        }
        self.state = VmState::Terminated;
    }

    async fn log_tail_suffix(&self) -> String {
        match log_tail(&self.log_path, LOG_TAIL_LINES).await {
            Some(tail) if !tail.is_empty() => format!("; firecracker log tail:\n{tail}"),
            _ => String::new(),
        }
    }
}

/// Last `lines` lines of the hypervisor log, for start-failure diagnostics.
async fn log_tail(path: &Path, lines: usize) -> Option<String> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    Some(all[start..].join("\n"))
}
