//! Configuration loading via `ortho-config`.
//!
//! Tunables cover the protocol and session deadlines plus the external
//! binaries the crate drives. Values merge defaults, configuration files
//! (`siteprov.toml`), and `SITEPROV_*` environment variables.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Provisioner tunables layered via `OrthoConfig`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SITEPROV",
    discovery(
        app_name = "siteprov",
        env_var = "SITEPROV_CONFIG_PATH",
        config_file_name = "siteprov.toml",
        dotfile_name = ".siteprov.toml",
        project_file_name = "siteprov.toml"
    )
)]
pub struct ProvisionerConfig {
    /// Deadline in seconds for each extractor HTTP call.
    #[ortho_config(default = 30)]
    pub http_timeout_secs: u64,
    /// Additional attempts for a continuation call that fails at the
    /// transport level.
    #[ortho_config(default = 3)]
    pub continuation_retry_limit: u32,
    /// Pause in seconds between continuation retries.
    #[ortho_config(default = 1)]
    pub continuation_retry_pause_secs: u64,
    /// Hard ceiling on continuation iterations.
    #[ortho_config(default = 1000)]
    pub iteration_ceiling: u32,
    /// Deadline in seconds for the shell session to become ready.
    #[ortho_config(default = 60)]
    pub session_ready_timeout_secs: u64,
    /// Budget in seconds for the whole shell session, connect to close.
    #[ortho_config(default = 300)]
    pub session_budget_secs: u64,
    /// Interval in seconds between session keepalive probes.
    #[ortho_config(default = 15)]
    pub keepalive_interval_secs: u64,
    /// Pause in seconds between extraction finishing and the session
    /// opening.
    #[ortho_config(default = 3)]
    pub settle_delay_secs: u64,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `sshpass` executable.
    #[ortho_config(default = "sshpass".to_owned())]
    pub sshpass_bin: String,
    /// Database client binary invoked by the generated script on the
    /// remote host.
    #[ortho_config(default = "mysql".to_owned())]
    pub mysql_bin: String,
}

impl ProvisionerConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    /// Values still merge defaults, configuration files, and environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("siteprov")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on the merged values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a deadline is zero or a binary
    /// path is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_nonzero(self.http_timeout_secs, "http_timeout_secs")?;
        Self::require_nonzero(u64::from(self.iteration_ceiling), "iteration_ceiling")?;
        Self::require_nonzero(self.session_ready_timeout_secs, "session_ready_timeout_secs")?;
        Self::require_nonzero(self.session_budget_secs, "session_budget_secs")?;
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.sshpass_bin, "sshpass_bin")?;
        Self::require_value(&self.mysql_bin, "mysql_bin")?;
        Ok(())
    }

    /// Per-call HTTP deadline as a [`Duration`].
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Continuation retry pause as a [`Duration`].
    #[must_use]
    pub const fn continuation_retry_pause(&self) -> Duration {
        Duration::from_secs(self.continuation_retry_pause_secs)
    }

    /// Session-ready deadline as a [`Duration`].
    #[must_use]
    pub const fn session_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.session_ready_timeout_secs)
    }

    /// Whole-session budget as a [`Duration`].
    #[must_use]
    pub const fn session_budget(&self) -> Duration {
        Duration::from_secs(self.session_budget_secs)
    }

    /// Keepalive probe interval as a [`Duration`].
    #[must_use]
    pub const fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    /// Settle delay as a [`Duration`].
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    fn require_nonzero(value: u64, field: &str) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid {
                field: field.to_owned(),
                reason: "must be greater than zero".to_owned(),
            });
        }
        Ok(())
    }

    fn require_value(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: field.to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Indicates a merged value fails semantic validation.
    #[error("invalid configuration field {field}: {reason}")]
    Invalid {
        /// Field that failed validation.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ProvisionerConfig {
        ProvisionerConfig {
            http_timeout_secs: 30,
            continuation_retry_limit: 3,
            continuation_retry_pause_secs: 1,
            iteration_ceiling: 1000,
            session_ready_timeout_secs: 60,
            session_budget_secs: 300,
            keepalive_interval_secs: 15,
            settle_delay_secs: 3,
            ssh_bin: "ssh".to_owned(),
            sshpass_bin: "sshpass".to_owned(),
            mysql_bin: "mysql".to_owned(),
        }
    }

    #[test]
    fn defaults_validate() {
        assert!(defaults().validate().is_ok());
    }

    #[test]
    fn zero_budget_is_rejected() {
        let mut config = defaults();
        config.session_budget_secs = 0;
        let err = config.validate().expect_err("zero budget must be rejected");
        assert!(matches!(err, ConfigError::Invalid { ref field, .. }
            if field == "session_budget_secs"));
    }

    #[test]
    fn blank_binary_is_rejected() {
        let mut config = defaults();
        config.mysql_bin = "  ".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn durations_convert_from_seconds() {
        let config = defaults();
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert_eq!(config.session_budget(), Duration::from_secs(300));
        assert_eq!(config.settle_delay(), Duration::from_secs(3));
    }
}
