//! The host/guest result channel (agent drive).
//!
//! A small ext4 image carries a single Unix stream socket. The host binds the
//! listener while the image is loop-mounted, then unmounts: the listener is a
//! kernel object held by our file descriptor and survives the unmount, while
//! the socket file stays visible inside the image for the guest to dial after
//! it mounts the drive. The image is never host-mounted while the guest owns
//! it.

use crate::error::VmmError;
use ember_guest::ExitRecord;
use ember_mount::{loop_mount, MountGuard};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::UnixListener;
use tokio::process::Command;

/// Socket file name inside the agent image.
const AGENT_SOCKET_NAME: &str = "agent.sock";
/// Size of the agent image.
const AGENT_IMAGE_BYTES: u64 = 1024 * 1024;

pub struct AgentChannel {
    listener: UnixListener,
}

impl AgentChannel {
    /// Create the agent image at `image`, bind the listener inside it, and
    /// detach the image for the guest.
    pub async fn provision(image: &Path) -> Result<Self, VmmError> {
        create_agent_image(image).await?;

        let mount_dir = tempfile::tempdir().map_err(VmmError::Io)?;
        loop_mount(image, mount_dir.path()).await?;
        let guard = MountGuard::new(mount_dir.path().to_path_buf());

        let bind_result = UnixListener::bind(mount_dir.path().join(AGENT_SOCKET_NAME));
        let unmount_result = guard.release();

        let listener = bind_result
            .map_err(|e| VmmError::Channel(format!("failed to bind agent socket: {e}")))?;
        unmount_result?;

        Ok(Self { listener })
    }

    /// Wait for the guest's single exit record, racing the deadline.
    ///
    /// Whatever goes wrong on the channel before the record arrives (accept
    /// failure, short read, undecodable record) is indistinguishable from an
    /// unreachable guest and maps to the timeout sentinel.
    pub async fn wait(self, deadline: Duration) -> ExitRecord {
        match tokio::time::timeout(deadline, self.recv()).await {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                tracing::warn!("Agent channel failed before completion: {}", e);
                ExitRecord::timed_out()
            }
            Err(_) => {
                tracing::debug!("Deadline expired before guest completion");
                ExitRecord::timed_out()
            }
        }
    }

    async fn recv(self) -> Result<ExitRecord, VmmError> {
        let (mut stream, _) = self.listener.accept().await?;
        let mut payload = Vec::new();
        stream.read_to_end(&mut payload).await?;
        Ok(serde_json::from_slice(&payload)?)
    }
}

/// A sparse file of the right size, formatted ext4.
async fn create_agent_image(image: &Path) -> Result<(), VmmError> {
    let file = tokio::fs::File::create(image).await?;
    file.set_len(AGENT_IMAGE_BYTES).await?;
    drop(file);

    let output = Command::new("mkfs.ext4")
        .arg("-q")
        .arg("-F")
        .arg(image)
        .output()
        .await?;
    if !output.status.success() {
        return Err(VmmError::Channel(format!(
            "mkfs.ext4 {}: {} ({})",
            image.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_guest::{EXIT_TIMED_OUT, TIMEOUT_STDERR};
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;

    // Bind directly in a scratch directory; image creation and mounting need
    // root and are covered by the e2e scenarios.
    fn bound_channel(dir: &Path) -> (AgentChannel, std::path::PathBuf) {
        let socket = dir.join(AGENT_SOCKET_NAME);
        let listener = UnixListener::bind(&socket).unwrap();
        (AgentChannel { listener }, socket)
    }

    #[tokio::test]
    async fn test_wait_decodes_single_record() {
        let dir = tempfile::tempdir().unwrap();
        let (channel, socket) = bound_channel(dir.path());

        let sender = tokio::spawn(async move {
            let mut stream = UnixStream::connect(&socket).await.unwrap();
            stream
                .write_all(br#"{"stdout":"hi\n","stderr":"","exit_code":7}"#)
                .await
                .unwrap();
        });

        let record = channel.wait(Duration::from_secs(2)).await;
        sender.await.unwrap();

        assert_eq!(record.stdout, "hi\n");
        assert_eq!(record.exit_code, 7);
    }

    #[tokio::test]
    async fn test_wait_times_out_without_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (channel, _socket) = bound_channel(dir.path());

        let record = channel.wait(Duration::from_millis(50)).await;
        assert_eq!(record.exit_code, EXIT_TIMED_OUT);
        assert_eq!(record.stderr, TIMEOUT_STDERR);
    }

    #[tokio::test]
    async fn test_wait_maps_garbage_record_to_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let (channel, socket) = bound_channel(dir.path());

        let sender = tokio::spawn(async move {
            let mut stream = UnixStream::connect(&socket).await.unwrap();
            stream.write_all(b"not json at all").await.unwrap();
        });

        let record = channel.wait(Duration::from_secs(2)).await;
        sender.await.unwrap();

        assert_eq!(record.exit_code, EXIT_TIMED_OUT);
    }
}
