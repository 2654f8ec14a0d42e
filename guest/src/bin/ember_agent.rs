//! Ember agent - posts the guest's exit record to the host.
//!
//! This binary runs inside the VM after the workload finishes. The guest init
//! captures the command's streams and exit status into well-known files; the
//! agent packages them into one JSON record, sends it over the agent socket
//! and exits. The host side holds the listener.

use ember_guest::{ExitRecord, AGENT_SOCKET_PATH};
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::process::ExitCode;

const STDOUT_PATH: &str = "/tmp/stdout";
const STDERR_PATH: &str = "/tmp/stderr";
const EXITCODE_PATH: &str = "/tmp/exitcode";

fn read_or_empty(path: &str) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

fn read_exit_code(path: &str) -> i32 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

fn main() -> ExitCode {
    let record = ExitRecord {
        stdout: read_or_empty(STDOUT_PATH),
        stderr: read_or_empty(STDERR_PATH),
        exit_code: read_exit_code(EXITCODE_PATH),
    };

    let mut stream = match UnixStream::connect(AGENT_SOCKET_PATH) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ember-agent: failed to connect to {}: {}", AGENT_SOCKET_PATH, e);
            return ExitCode::from(1);
        }
    };

    let payload = match serde_json::to_vec(&record) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("ember-agent: failed to encode record: {}", e);
            return ExitCode::from(1);
        }
    };

    if let Err(e) = stream.write_all(&payload) {
        eprintln!("ember-agent: failed to send record: {}", e);
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
