use crate::error::ValidationError;
use crate::validate::clean_relative;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Applied when `timeout_ms` is missing or non-positive.
pub const DEFAULT_TIMEOUT_MS: i64 = 5_000;

/// Wire form of `POST /run`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub files: HashMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<i64>,
}

/// Wire form of the `POST /run` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// One validated caller file, staged under the guest work directory.
#[derive(Debug, Clone)]
pub struct WorkFile {
    /// Cleaned path, strictly relative to the work-dir root.
    pub path: PathBuf,
    pub contents: String,
}

/// Normalized, validated request. Immutable for the rest of the pipeline.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub cmd: String,
    pub files: Vec<WorkFile>,
    pub timeout: Duration,
}

impl RunRequest {
    /// Validate and normalize into a [`RunSpec`].
    ///
    /// No side effects: every rejection here happens before any resource is
    /// acquired for the request.
    pub fn normalize(self) -> Result<RunSpec, ValidationError> {
        if self.cmd.is_empty() {
            return Err(ValidationError::MissingCmd);
        }

        let mut files = self
            .files
            .into_iter()
            .map(|(name, contents)| {
                Ok(WorkFile {
                    path: clean_relative(&name)?,
                    contents,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;
        // Insertion order of the map is irrelevant; stage deterministically.
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let timeout_ms = match self.timeout_ms {
            Some(ms) if ms > 0 => ms,
            _ => DEFAULT_TIMEOUT_MS,
        };

        Ok(RunSpec {
            cmd: self.cmd,
            files,
            timeout: Duration::from_millis(timeout_ms as u64),
        })
    }
}

impl RunSpec {
    /// Whether any caller files were staged; when true the guest command runs
    /// from the work directory.
    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }
}
