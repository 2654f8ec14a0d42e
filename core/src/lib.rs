mod error;
mod execution;
mod request;
mod validate;

pub use error::ValidationError;
pub use execution::ExecutionId;
pub use request::{RunRequest, RunResponse, RunSpec, WorkFile, DEFAULT_TIMEOUT_MS};
pub use validate::clean_relative;
