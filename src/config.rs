// SPDX-License-Identifier: Apache-2.0

//! Configuration for inputs and the agent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Immutable configuration for one declared input.
///
/// An input either names a glob-capable `path` or sets `docker_enabled`, in
/// which case log files are discovered through the container registry using
/// `log_type` as the key.
#[derive(Debug, Clone)]
pub struct InputConfig {
    /// Logical type of this input; also the container registry key.
    pub log_type: String,
    /// Glob-capable path to the files to follow.
    pub path: Option<String>,
    /// Discover files through the container registry instead of a path.
    pub docker_enabled: bool,
    /// Keep reading as the file grows; false means one-shot processing.
    pub tail: bool,
    /// Read the file line by line. When false the file is not parsed.
    pub process_file: bool,
    /// Hand matched files to the sinks verbatim (only when `process_file` is off).
    pub copy_file: bool,
    /// Minimum time between two durable checkpoints for a file.
    pub checkpoint_interval_ms: u64,
    /// Cadence of the detach sweep.
    pub detach_interval_sec: u64,
    /// How long a file must be absent before its tailer is retired.
    pub detach_time_sec: u64,
    /// Cadence of glob re-expansion and registry polling.
    pub path_update_interval_sec: u64,
    /// Skip files older than this many minutes at spawn time. 0 disables the gate.
    pub max_age_min: u64,
    /// Context fields merged into every record that does not already carry them.
    pub add_fields: HashMap<String, String>,
    /// Optional group name stamped on every record.
    pub group: Option<String>,
    /// Per-input override of the globally allowed log levels.
    pub default_log_levels: Option<Vec<String>>,
    /// Use the event digest as the record id.
    pub use_event_md5_as_id: bool,
    /// Store the event digest in `event_md5`.
    pub gen_event_md5: bool,
    /// Let filters initialize default fields on the records they produce.
    pub init_default_fields: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            log_type: String::new(),
            path: None,
            docker_enabled: false,
            tail: true,
            process_file: true,
            copy_file: false,
            checkpoint_interval_ms: 5_000,
            detach_interval_sec: 18_000,
            detach_time_sec: 120_000,
            path_update_interval_sec: 300,
            max_age_min: 0,
            add_fields: HashMap::new(),
            group: None,
            default_log_levels: None,
            use_event_md5_as_id: false,
            gen_event_md5: true,
            init_default_fields: false,
        }
    }
}

impl InputConfig {
    /// Validate the configuration. Contract violations fail fast at init.
    pub fn validate(&self) -> Result<()> {
        if self.log_type.is_empty() {
            return Err(Error::Config("input log_type must not be empty".into()));
        }
        if !self.docker_enabled && self.path.as_deref().map_or(true, |p| p.is_empty()) {
            return Err(Error::Config(format!(
                "input '{}' needs a path unless docker mode is enabled",
                self.log_type
            )));
        }
        if self.checkpoint_interval_ms == 0 {
            return Err(Error::Config(format!(
                "input '{}': checkpoint_interval_ms must be positive",
                self.log_type
            )));
        }
        if self.copy_file && self.process_file {
            return Err(Error::Config(format!(
                "input '{}': copy_file requires process_file=false",
                self.log_type
            )));
        }
        Ok(())
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    pub fn detach_interval(&self) -> Duration {
        Duration::from_secs(self.detach_interval_sec)
    }

    pub fn detach_time(&self) -> Duration {
        Duration::from_secs(self.detach_time_sec)
    }

    pub fn path_update_interval(&self) -> Duration {
        Duration::from_secs(self.path_update_interval_sec)
    }

    /// Age gate threshold, or None when the gate is disabled.
    pub fn max_age(&self) -> Option<Duration> {
        if self.max_age_min == 0 {
            None
        } else {
            Some(Duration::from_secs(self.max_age_min * 60))
        }
    }
}

/// Process-wide configuration shared by every input.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Directory holding one checkpoint document per file identity.
    pub checkpoint_dir: PathBuf,
    /// Extension of checkpoint files, including the leading dot.
    pub checkpoint_extension: String,
    /// Log levels forwarded when an input carries no override.
    pub default_log_levels: Vec<String>,
    /// How often inputs that are not yet ready are re-checked.
    pub ready_check_interval: Duration,
    /// How long to wait for sinks to drain at shutdown.
    pub sink_close_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("/var/lib/logship/checkpoints"),
            checkpoint_extension: ".cp".to_string(),
            default_log_levels: ["FATAL", "ERROR", "WARN", "INFO", "DEBUG", "TRACE", "UNKNOWN"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ready_check_interval: Duration::from_secs(3),
            sink_close_timeout_secs: 30,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_extension.is_empty() {
            return Err(Error::Config("checkpoint_extension must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = InputConfig::default();
        assert!(cfg.tail);
        assert!(cfg.process_file);
        assert!(!cfg.copy_file);
        assert_eq!(cfg.checkpoint_interval_ms, 5_000);
        assert_eq!(cfg.detach_interval_sec, 18_000);
        assert_eq!(cfg.detach_time_sec, 120_000);
        assert_eq!(cfg.path_update_interval_sec, 300);
        assert!(cfg.max_age().is_none());
        assert!(cfg.gen_event_md5);
        assert!(!cfg.use_event_md5_as_id);
    }

    #[test]
    fn path_required_without_docker() {
        let cfg = InputConfig {
            log_type: "service".into(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = InputConfig {
            log_type: "service".into(),
            path: Some("/var/log/service.log".into()),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());

        let cfg = InputConfig {
            log_type: "service".into(),
            docker_enabled: true,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn copy_file_excludes_process_file() {
        let cfg = InputConfig {
            log_type: "service".into(),
            path: Some("/var/log/service.log".into()),
            copy_file: true,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
