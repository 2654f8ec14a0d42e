//! Rootfs staging: give each request a private copy of the canonical rootfs
//! image with the caller's files placed under `/work`.

use crate::error::VmmError;
use ember_core::WorkFile;
use ember_mount::{loop_mount, MountGuard};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tokio::fs;

const WORK_DIR: &str = "work";
const SHEBANG: &[u8] = b"#!";

/// Copy the canonical rootfs image to the per-execution path.
///
/// Each request mutates only its own copy, so concurrent requests never race
/// the shared image, neither under the loop mount nor under the hypervisor's
/// drive open.
pub async fn snapshot_rootfs(canonical: &Path, private: &Path) -> Result<(), VmmError> {
    fs::copy(canonical, private).await.map_err(|e| {
        VmmError::Staging(format!(
            "failed to copy rootfs {} -> {}: {}",
            canonical.display(),
            private.display(),
            e
        ))
    })?;
    Ok(())
}

/// Populate `/work` inside the rootfs image with the caller's files.
///
/// The image is loop-mounted in a fresh temporary directory, written, and
/// unmounted again before the function returns; it is never mounted while the
/// hypervisor owns it. On a write failure the unmount still runs.
pub async fn stage_rootfs(image: &Path, files: &[WorkFile]) -> Result<(), VmmError> {
    let mount_dir = tempfile::tempdir().map_err(VmmError::Io)?;
    loop_mount(image, mount_dir.path()).await?;
    let guard = MountGuard::new(mount_dir.path().to_path_buf());

    let write_result = write_work_files(&mount_dir.path().join(WORK_DIR), files).await;
    let unmount_result = guard.release();

    write_result?;
    unmount_result?;
    Ok(())
}

/// Write the validated files into the work directory with correct modes:
/// 0644 by default, 0755 when the content opens with a shebang.
async fn write_work_files(work_dir: &Path, files: &[WorkFile]) -> Result<(), VmmError> {
    fs::create_dir_all(work_dir).await?;
    fs::set_permissions(work_dir, std::fs::Permissions::from_mode(0o755)).await?;

    for file in files {
        let target = work_dir.join(&file.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(&target, &file.contents).await?;

        let mode = if file.contents.as_bytes().starts_with(SHEBANG) {
            0o755
        } else {
            0o644
        };
        fs::set_permissions(&target, std::fs::Permissions::from_mode(mode)).await?;

        tracing::debug!(path = %target.display(), mode = %format!("{mode:o}"), "Staged file");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn work_file(path: &str, contents: &str) -> WorkFile {
        WorkFile {
            path: PathBuf::from(path),
            contents: contents.to_string(),
        }
    }

    #[tokio::test]
    async fn test_write_work_files_contents_and_modes() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");

        let files = vec![
            work_file("main.sh", "#!/bin/sh\necho file ok\n"),
            work_file("data.txt", "plain data"),
        ];
        write_work_files(&work, &files).await.unwrap();

        let script = work.join("main.sh");
        let data = work.join("data.txt");
        assert_eq!(
            fs::read_to_string(&script).await.unwrap(),
            "#!/bin/sh\necho file ok\n"
        );
        assert_eq!(fs::read_to_string(&data).await.unwrap(), "plain data");

        let script_mode = std::fs::metadata(&script).unwrap().permissions().mode() & 0o777;
        let data_mode = std::fs::metadata(&data).unwrap().permissions().mode() & 0o777;
        assert_eq!(script_mode, 0o755);
        assert_eq!(data_mode, 0o644);
    }

    #[tokio::test]
    async fn test_write_work_files_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");

        write_work_files(&work, &[work_file("a/b/c.txt", "nested")])
            .await
            .unwrap();

        assert_eq!(
            fs::read_to_string(work.join("a/b/c.txt")).await.unwrap(),
            "nested"
        );
    }

    #[tokio::test]
    async fn test_write_work_files_bare_shebang_marker() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");

        write_work_files(&work, &[work_file("x", "#!")]).await.unwrap();

        let mode = std::fs::metadata(work.join("x")).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[tokio::test]
    async fn test_snapshot_rootfs_copies_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().join("rootfs.ext4");
        let private = dir.path().join("copy.ext4");
        fs::write(&canonical, b"not really ext4").await.unwrap();

        snapshot_rootfs(&canonical, &private).await.unwrap();
        assert_eq!(fs::read(&private).await.unwrap(), b"not really ext4");
    }

    #[tokio::test]
    async fn test_snapshot_rootfs_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = snapshot_rootfs(&dir.path().join("absent"), &dir.path().join("copy"))
            .await
            .unwrap_err();
        assert!(matches!(err, VmmError::Staging(_)));
    }
}
