//! Wire protocol between the guest agent and the host waiter.
//!
//! The guest sends exactly one [`ExitRecord`] over the agent socket and
//! closes. The host decodes exactly one record per execution.

use serde::{Deserialize, Serialize};

/// Exit code reported when the host deadline fires before the guest does, and
/// when the guest never reaches the run state.
pub const EXIT_TIMED_OUT: i32 = 124;

/// Caller-visible stderr for a host-enforced timeout.
pub const TIMEOUT_STDERR: &str = "execution timed out";

/// Socket file the guest agent dials, as seen after the guest mounts the
/// agent drive.
pub const AGENT_SOCKET_PATH: &str = "/run/agent/agent.sock";

/// The guest's exit record for one command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRecord {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExitRecord {
    /// The sentinel record for a deadline that fired first.
    pub fn timed_out() -> Self {
        Self {
            stdout: String::new(),
            stderr: TIMEOUT_STDERR.to_string(),
            exit_code: EXIT_TIMED_OUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trips_as_json() {
        let record = ExitRecord {
            stdout: "hi\n".to_string(),
            stderr: String::new(),
            exit_code: 7,
        };

        let json = serde_json::to_string(&record).unwrap();
        let decoded: ExitRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.stdout, "hi\n");
        assert_eq!(decoded.exit_code, 7);
    }

    #[test]
    fn test_timed_out_sentinel() {
        let record = ExitRecord::timed_out();
        assert_eq!(record.exit_code, EXIT_TIMED_OUT);
        assert_eq!(record.stderr, TIMEOUT_STDERR);
        assert!(record.stdout.is_empty());
    }
}
