use crate::error::MountError;
use nix::mount::umount;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Loopback-mount a filesystem image read-write at `target`.
///
/// Creates `target` if needed. Loop device setup is delegated to `mount(8)`,
/// which allocates and tears down the loop device for us.
pub async fn loop_mount(image: &Path, target: &Path) -> Result<(), MountError> {
    tokio::fs::create_dir_all(target).await?;

    tracing::debug!("Loop mounting {:?} at {:?}", image, target);

    let output = Command::new("mount")
        .arg("-o")
        .arg("loop")
        .arg(image)
        .arg(target)
        .output()
        .await?;

    if !output.status.success() {
        return Err(MountError::MountFailed(format!(
            "mount -o loop {} {}: {} ({})",
            image.display(),
            target.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    tracing::debug!("Mounted {:?} at {:?}", image, target);
    Ok(())
}

/// Unmount the filesystem at `target`.
///
/// This is a plain (non-lazy) unmount: when it returns Ok the image is fully
/// detached, so the caller may hand the backing file to the hypervisor.
pub fn unmount(target: &Path) -> Result<(), MountError> {
    tracing::debug!("Unmounting {:?}", target);

    umount(target)
        .map_err(|e| MountError::UnmountFailed(format!("{}: {}", target.display(), e)))?;

    Ok(())
}

/// Drop guard for a mounted image.
///
/// [`MountGuard::release`] unmounts and surfaces the error; dropping an armed
/// guard unmounts best-effort, so an early return never leaves the image
/// mounted.
pub struct MountGuard {
    target: PathBuf,
    armed: bool,
}

impl MountGuard {
    pub fn new(target: PathBuf) -> Self {
        Self {
            target,
            armed: true,
        }
    }

    /// Unmount now, reporting failure to the caller.
    pub fn release(mut self) -> Result<(), MountError> {
        self.armed = false;
        unmount(&self.target)
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = unmount(&self.target) {
                tracing::warn!("Leaked mount at {:?}: {}", self.target, e);
            }
        }
    }
}
