use crate::job::JobResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of the phases run on one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostReport {
    pub hostname: String,
    pub jobs: Vec<JobResult>,
    /// Fatal error that stopped the remaining phases on this host.
    pub error: Option<String>,
}

impl HostReport {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            jobs: Vec::new(),
            error: None,
        }
    }

    pub fn warnings(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.has_warning() || j.error.is_some())
            .count()
    }
}

/// Summary of a whole soak run, written with `--report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub provider: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,
    pub instance_ids: Vec<String>,
    pub hostnames: Vec<String>,
    pub key_path: Option<PathBuf>,
    pub hosts: Vec<HostReport>,
    /// Termination was requested for the launched instances.
    pub terminated: bool,
    pub teardown_errors: Vec<String>,
    /// Set when the run stopped before all hosts were visited.
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(provider: &str) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            provider: provider.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            elapsed_secs: 0.0,
            instance_ids: Vec::new(),
            hostnames: Vec::new(),
            key_path: None,
            hosts: Vec::new(),
            terminated: false,
            teardown_errors: Vec::new(),
            error: None,
        }
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.finished_at = Some(Utc::now());
        self.elapsed_secs = elapsed.as_secs_f64();
    }

    pub fn elapsed_minutes(&self) -> f64 {
        self.elapsed_secs / 60.0
    }

    /// Advisory failures (stderr output, timed-out commands) do not count.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
            && self.teardown_errors.is_empty()
            && self.hosts.iter().all(|h| h.error.is_none())
    }

    pub fn warnings(&self) -> usize {
        self.hosts.iter().map(HostReport::warnings).sum()
    }

    /// Write the report as pretty JSON.
    pub fn write_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}
