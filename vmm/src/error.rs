use ember_mount::MountError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VmmError {
    #[error("rootfs staging failed: {0}")]
    Staging(String),

    #[error("agent channel setup failed: {0}")]
    Channel(String),

    #[error("failed to start firecracker: {0}")]
    Start(String),

    #[error("firecracker {endpoint}: {message}")]
    Api { endpoint: String, message: String },

    #[error("mount error: {0}")]
    Mount(#[from] MountError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
