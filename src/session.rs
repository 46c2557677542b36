//! Remote shell execution of a generated provisioning script.
//!
//! One authenticated SSH session is opened per script, the script runs as a
//! single command, and both output streams plus the exit code are captured.
//! Session establishment is bounded separately from the overall execution
//! budget, and keepalive probes run for the session's lifetime so that
//! idle-connection teardown by intermediate network equipment cannot abort
//! a long-running database import.
//!
//! Password authentication uses `sshpass` wrapping the system `ssh` client;
//! process execution sits behind the [`CommandRunner`] trait so tests
//! substitute scripted fakes.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::script::GeneratedScript;

/// Deadline for the session to become ready. Establishment beyond this is a
/// connection failure, not a script failure.
pub const SESSION_READY_TIMEOUT: Duration = Duration::from_secs(60);
/// Budget for the whole connect-to-close operation once a run begins.
pub const SESSION_BUDGET: Duration = Duration::from_secs(300);
/// Interval between keepalive probes while the script runs.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Exit code the ssh client reserves for its own connection-level failures.
const SSH_CLIENT_FAILURE_CODE: i32 = 255;
/// Exit code reported when the budget force-closed the session.
const TIMED_OUT_EXIT_CODE: i32 = -1;

/// Credentials for one remote shell session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionCredentials {
    /// Remote host name or address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user name.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl SessionCredentials {
    /// Validates the credentials before they reach the ssh command line.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidCredentials`] when the host or user
    /// name is empty, or when either contains control characters or a
    /// leading dash that could be misread as an option.
    pub fn validate(&self) -> Result<(), SessionError> {
        Self::require_plain(&self.host, "host")?;
        Self::require_plain(&self.username, "username")?;
        Ok(())
    }

    fn require_plain(value: &str, field: &str) -> Result<(), SessionError> {
        let hostile = value.trim().is_empty()
            || value.starts_with('-')
            || value
                .chars()
                .any(|ch| ch.is_ascii_control() || ch.is_whitespace());
        if hostile {
            return Err(SessionError::InvalidCredentials {
                field: field.to_owned(),
            });
        }
        Ok(())
    }
}

/// Captured result of one remote session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteSessionResult {
    /// Exit code of the remote script; negative when the session was
    /// force-closed by the budget.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Whether the overall budget expired before the streams closed.
    pub timed_out: bool,
}

impl RemoteSessionResult {
    /// Returns true when the script ran to completion and exited zero.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Errors surfaced while establishing or running a session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    /// Raised when credentials fail validation.
    #[error("invalid session credentials: {field}")]
    InvalidCredentials {
        /// Field that failed validation.
        field: String,
    },
    /// Raised when the local command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the session could not be established.
    #[error("remote shell session could not be established: {detail}")]
    Connect {
        /// Stderr captured from the ssh client.
        detail: String,
    },
    /// Raised when the session died without yielding an exit status.
    #[error("remote shell session died without an exit status")]
    Died,
}

/// Result of running a local process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Future returned by command runner operations.
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SessionError>> + Send + 'a>>;

/// Abstraction over process execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing both streams.
    ///
    /// Implementations must terminate the child when the returned future is
    /// dropped, so a budget expiry force-closes the session.
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> SessionFuture<'a, CommandOutput>;
}

/// Real runner backed by `tokio::process`.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> SessionFuture<'a, CommandOutput> {
        Box::pin(async move {
            let output = tokio::process::Command::new(program)
                .args(args)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|err| SessionError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

/// Executes exactly one generated script per call over one SSH session.
#[derive(Clone, Debug)]
pub struct RemoteShell<R: CommandRunner> {
    runner: R,
    ssh_bin: String,
    sshpass_bin: String,
    ready_timeout: Duration,
    session_budget: Duration,
    keepalive_interval: Duration,
}

impl RemoteShell<ProcessCommandRunner> {
    /// Convenience constructor wiring the real process runner.
    #[must_use]
    pub fn with_process_runner() -> Self {
        Self::new(ProcessCommandRunner)
    }
}

impl<R: CommandRunner> RemoteShell<R> {
    /// Creates a shell executor over the provided runner with defaults.
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            ssh_bin: "ssh".to_owned(),
            sshpass_bin: "sshpass".to_owned(),
            ready_timeout: SESSION_READY_TIMEOUT,
            session_budget: SESSION_BUDGET,
            keepalive_interval: KEEPALIVE_INTERVAL,
        }
    }

    /// Overrides the ssh and sshpass binaries.
    #[must_use]
    pub fn with_binaries(mut self, ssh_bin: impl Into<String>, sshpass_bin: impl Into<String>) -> Self {
        self.ssh_bin = ssh_bin.into();
        self.sshpass_bin = sshpass_bin.into();
        self
    }

    /// Overrides the session-ready deadline.
    #[must_use]
    pub const fn with_ready_timeout(mut self, value: Duration) -> Self {
        self.ready_timeout = value;
        self
    }

    /// Overrides the overall session budget.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_session_budget(mut self, value: Duration) -> Self {
        self.session_budget = value;
        self
    }

    /// Overrides the interval between keepalive probes.
    #[must_use]
    pub const fn with_keepalive_interval(mut self, value: Duration) -> Self {
        self.keepalive_interval = value;
        self
    }

    /// Borrows the underlying runner. Tests use this to inspect scripted
    /// doubles after a run.
    #[must_use]
    pub const fn runner_ref(&self) -> &R {
        &self.runner
    }

    /// Executes the script over one session and captures the result.
    ///
    /// A budget expiry force-closes the session and yields a result with
    /// `timed_out: true` rather than an error; the orchestrator decides how
    /// to classify it. A non-zero remote exit code is likewise reported in
    /// the result, not raised.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when credentials are invalid, the local
    /// command cannot start, the session cannot be established, or the
    /// session dies without an exit status.
    pub async fn run(
        &self,
        credentials: &SessionCredentials,
        script: &GeneratedScript,
    ) -> Result<RemoteSessionResult, SessionError> {
        credentials.validate()?;
        let args = self.build_args(credentials, script);
        debug!(host = %credentials.host, port = credentials.port, "opening remote shell session");

        let Ok(outcome) = timeout(self.session_budget, self.runner.run(&self.sshpass_bin, &args))
            .await
        else {
            // Dropping the runner future kills the child (kill_on_drop),
            // force-closing the session.
            warn!(
                budget_secs = self.session_budget.as_secs(),
                "session budget expired, force-closing"
            );
            return Ok(RemoteSessionResult {
                exit_code: TIMED_OUT_EXIT_CODE,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: true,
            });
        };

        let output = outcome?;
        let Some(code) = output.code else {
            return Err(SessionError::Died);
        };

        if code == SSH_CLIENT_FAILURE_CODE {
            return Err(SessionError::Connect {
                detail: output.stderr.trim().to_owned(),
            });
        }

        Ok(RemoteSessionResult {
            exit_code: code,
            stdout: output.stdout,
            stderr: output.stderr,
            timed_out: false,
        })
    }

    fn build_args(&self, credentials: &SessionCredentials, script: &GeneratedScript) -> Vec<OsString> {
        vec![
            OsString::from("-p"),
            OsString::from(&credentials.password),
            OsString::from(&self.ssh_bin),
            OsString::from("-p"),
            OsString::from(credentials.port.to_string()),
            OsString::from("-o"),
            OsString::from(format!("ConnectTimeout={}", self.ready_timeout.as_secs())),
            OsString::from("-o"),
            OsString::from(format!(
                "ServerAliveInterval={}",
                self.keepalive_interval.as_secs()
            )),
            OsString::from("-o"),
            OsString::from("ServerAliveCountMax=3"),
            OsString::from("-o"),
            OsString::from("StrictHostKeyChecking=no"),
            OsString::from("-o"),
            OsString::from("UserKnownHostsFile=/dev/null"),
            OsString::from("-o"),
            OsString::from("BatchMode=no"),
            OsString::from(format!("{}@{}", credentials.username, credentials.host)),
            OsString::from(script.as_str()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use camino::Utf8PathBuf;

    use crate::script::{ProvisioningParameters, ScriptGenerator};

    fn creds() -> SessionCredentials {
        SessionCredentials {
            host: "host.example".to_owned(),
            port: 22,
            username: "acme".to_owned(),
            password: "pw".to_owned(),
        }
    }

    fn script() -> GeneratedScript {
        ScriptGenerator::default().generate(&ProvisioningParameters {
            target_path: Utf8PathBuf::from("/var/www"),
            base_path: String::new(),
            owner_login_name: "acme".to_owned(),
            database_host: "localhost".to_owned(),
            database_name: "db".to_owned(),
            database_password: "pw".to_owned(),
            table_prefix_fallback: "wp_".to_owned(),
        })
    }

    /// Scripted runner double replaying queued outcomes.
    #[derive(Debug, Default)]
    struct ScriptedRunner {
        responses: Mutex<VecDeque<Result<CommandOutput, SessionError>>>,
    }

    impl ScriptedRunner {
        fn with_exit(code: i32, stdout: &str, stderr: &str) -> Self {
            let runner = Self::default();
            runner
                .responses
                .lock()
                .expect("lock scripted responses")
                .push_back(Ok(CommandOutput {
                    code: Some(code),
                    stdout: stdout.to_owned(),
                    stderr: stderr.to_owned(),
                }));
            runner
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run<'a>(
            &'a self,
            _program: &'a str,
            _args: &'a [OsString],
        ) -> SessionFuture<'a, CommandOutput> {
            Box::pin(async move {
                self.responses
                    .lock()
                    .expect("lock scripted responses")
                    .pop_front()
                    .unwrap_or(Err(SessionError::Died))
            })
        }
    }

    /// Runner that never finishes, for budget-expiry coverage.
    #[derive(Debug, Default)]
    struct HangingRunner;

    impl CommandRunner for HangingRunner {
        fn run<'a>(
            &'a self,
            _program: &'a str,
            _args: &'a [OsString],
        ) -> SessionFuture<'a, CommandOutput> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(SessionError::Died)
            })
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        let shell = RemoteShell::new(ScriptedRunner::with_exit(1, "DB_IMPORT_FAILED\n", ""));
        let result = shell
            .run(&creds(), &script())
            .await
            .expect("run should complete");

        assert_eq!(result.exit_code, 1);
        assert!(!result.timed_out);
        assert!(!result.is_clean());
        assert!(result.stdout.contains("DB_IMPORT_FAILED"));
    }

    #[tokio::test]
    async fn ssh_client_failure_code_maps_to_connect_error() {
        let shell = RemoteShell::new(ScriptedRunner::with_exit(
            255,
            "",
            "ssh: connect to host host.example port 22: Connection refused\n",
        ));
        let err = shell
            .run(&creds(), &script())
            .await
            .expect_err("255 should raise");

        assert!(matches!(err, SessionError::Connect { ref detail }
            if detail.contains("Connection refused")));
    }

    #[tokio::test]
    async fn missing_exit_status_is_a_dead_session() {
        let runner = ScriptedRunner::default();
        runner
            .responses
            .lock()
            .expect("lock scripted responses")
            .push_back(Ok(CommandOutput {
                code: None,
                stdout: String::new(),
                stderr: String::new(),
            }));
        let shell = RemoteShell::new(runner);

        let err = shell
            .run(&creds(), &script())
            .await
            .expect_err("missing code should raise");
        assert!(matches!(err, SessionError::Died));
    }

    #[tokio::test]
    async fn budget_expiry_force_closes_and_reports_timeout() {
        let shell =
            RemoteShell::new(HangingRunner).with_session_budget(Duration::from_millis(20));
        let result = shell
            .run(&creds(), &script())
            .await
            .expect("timeout yields a result, not an error");

        assert!(result.timed_out);
        assert!(!result.is_clean());
        assert!(result.exit_code != 0);
    }

    #[tokio::test]
    async fn hostile_credentials_are_rejected_before_spawning() {
        let mut bad = creds();
        bad.username = "-oProxyCommand=evil".to_owned();
        let shell = RemoteShell::new(ScriptedRunner::with_exit(0, "", ""));

        let err = shell
            .run(&bad, &script())
            .await
            .expect_err("option-shaped username must be rejected");
        assert!(matches!(err, SessionError::InvalidCredentials { ref field } if field == "username"));
    }

    #[test]
    fn build_args_carry_deadlines_keepalive_and_script() {
        let shell = RemoteShell::new(ScriptedRunner::default());
        let generated = script();
        let args = shell.build_args(&creds(), &generated);

        let rendered: Vec<String> = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert!(rendered.contains(&"ConnectTimeout=60".to_owned()));
        assert!(rendered.contains(&"ServerAliveInterval=15".to_owned()));
        assert!(rendered.contains(&"acme@host.example".to_owned()));
        assert_eq!(rendered.last().map(String::as_str), Some(generated.as_str()));
    }

    #[test]
    fn build_args_honour_a_configured_keepalive_interval() {
        let shell = RemoteShell::new(ScriptedRunner::default())
            .with_keepalive_interval(Duration::from_secs(45));
        let args = shell.build_args(&creds(), &script());

        let rendered: Vec<String> = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert!(rendered.contains(&"ServerAliveInterval=45".to_owned()));
        assert!(!rendered.contains(&"ServerAliveInterval=15".to_owned()));
    }
}
