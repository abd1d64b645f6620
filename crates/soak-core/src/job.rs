use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote script every phase and job is dispatched through.
pub const BOOTSTRAP_REMOTE_PATH: &str = "soak-addon.sh";

/// Phases run over the first session on each host, in this order.
pub const BOOTSTRAP_PHASES: [&str; 2] = ["install", "checkout"];

/// Command line for a phase or job name. The name is handed to the script
/// as a single argument.
pub fn job_command(name: &str) -> String {
    format!("bash ~/{} -j {}", BOOTSTRAP_REMOTE_PATH, shell_escape(name))
}

/// Shell-escape a string for safe use in remote commands.
pub fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Bootstrap,
    Job,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Bootstrap => write!(f, "bootstrap"),
            JobKind::Job => write!(f, "job"),
        }
    }
}

/// Captured output of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// Reported by the remote side when available. Informational only.
    pub exit_status: Option<i32>,
}

impl CommandOutput {
    /// Split raw stream contents into lines.
    pub fn from_streams(stdout: &str, stderr: &str, exit_status: Option<i32>) -> Self {
        Self {
            stdout: stdout.lines().map(|l| l.to_string()).collect(),
            stderr: stderr.lines().map(|l| l.to_string()).collect(),
            exit_status,
        }
    }
}

/// Result of running one phase or job on one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub host: String,
    pub name: String,
    pub kind: JobKind,
    pub command: String,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_status: Option<i32>,
    /// Set when the command could not be run to completion at all.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    pub fn completed(
        host: &str,
        name: &str,
        kind: JobKind,
        command: String,
        output: CommandOutput,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            host: host.to_string(),
            name: name.to_string(),
            kind,
            command,
            stdout: output.stdout,
            stderr: output.stderr,
            exit_status: output.exit_status,
            error: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        host: &str,
        name: &str,
        kind: JobKind,
        command: String,
        error: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            host: host.to_string(),
            name: name.to_string(),
            kind,
            command,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_status: None,
            error: Some(error),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Non-empty stderr is an advisory failure signal, not a verdict.
    pub fn has_warning(&self) -> bool {
        !self.stderr.is_empty()
    }
}
