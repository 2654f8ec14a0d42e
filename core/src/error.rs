use thiserror::Error;

/// Rejections surfaced to the caller as bad input, before any resource is
/// acquired.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("cmd is required")]
    MissingCmd,

    #[error("file name is empty")]
    EmptyFileName,

    #[error("absolute paths are not allowed: {0}")]
    AbsolutePath(String),

    #[error("path traversal is not allowed: {0}")]
    PathTraversal(String),
}
