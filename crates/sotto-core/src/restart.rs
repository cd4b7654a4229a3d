//! Restart signal — a consume-once file dropped before a deliberate
//! restart (e.g. after installing a new tool server) asking the engine to
//! schedule a verification message once it is back up.
//!
//! Absence of the file is a no-op. A malformed file is logged and removed;
//! startup never fails because of it.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// File name inside the data directory.
pub const RESTART_SIGNAL_FILE: &str = "restart-signal.json";

/// A verification job to schedule after restart.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyJob {
    pub name: String,
    pub message: String,
    #[serde(default)]
    pub deliver: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// RFC3339 timestamp at which to fire.
    pub at_time: String,
}

impl VerifyJob {
    /// Parse `at_time` into a UTC timestamp.
    pub fn at_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.at_time)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// The persisted restart signal.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartSignal {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_job: Option<VerifyJob>,
}

/// Read and remove the restart signal, if one was persisted.
///
/// Returns `None` when no signal exists or it cannot be parsed.
pub fn check_and_clear_restart_signal(data_dir: &Path) -> Option<RestartSignal> {
    let path = data_dir.join(RESTART_SIGNAL_FILE);
    if !path.exists() {
        return None;
    }

    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read restart signal");
            return None;
        }
    };

    // Consume-once: remove before acting so a crash can't loop on it.
    if let Err(e) = std::fs::remove_file(&path) {
        warn!(path = %path.display(), error = %e, "failed to clear restart signal");
    }

    match serde_json::from_str::<RestartSignal>(&content) {
        Ok(signal) => {
            info!(reason = %signal.reason, "restart signal detected");
            Some(signal)
        }
        Err(e) => {
            warn!(error = %e, "malformed restart signal, ignoring");
            None
        }
    }
}

/// Persist a restart signal (written by tools that trigger restarts).
pub fn write_restart_signal(data_dir: &Path, signal: &RestartSignal) -> std::io::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join(RESTART_SIGNAL_FILE);
    let json = serde_json::to_string_pretty(signal)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    std::fs::write(path, json)
}
