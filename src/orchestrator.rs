//! Top-level coordination of extraction and remote provisioning.
//!
//! One provisioning run is a single logical sequence: drive the remote
//! extraction to completion, pause briefly so the remote tool's own
//! filesystem writes settle, then generate the provisioning script and
//! execute it over one shell session. The result always distinguishes
//! "nothing was extracted" from "extracted but provisioning incomplete"
//! from "everything succeeded".

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::extractor::{ExtractionClient, ExtractionOutcome, ExtractionRequest, ExtractorTransport};
use crate::script::{GeneratedScript, ProvisioningParameters, ScriptGenerator};
use crate::session::{CommandRunner, RemoteSessionResult, RemoteShell, SessionCredentials};

/// Pause between extraction completing and the shell session opening. A
/// pragmatic guard against racing the remote extractor's asynchronous
/// cleanup, not a correctness guarantee.
pub const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Overall classification of one provisioning run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisioningStatus {
    /// Extraction and provisioning both completed cleanly.
    Succeeded,
    /// The session completed but the script exited non-zero; partial
    /// provisioning that may need manual follow-up.
    Degraded,
    /// Extraction failed; no shell session was attempted.
    ExtractionFailed,
    /// Extraction succeeded but the session failed at the connection level
    /// or was force-closed by its budget.
    SessionFailed,
}

/// Raised for provisioning failures when callers want an error value.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// The archive was never extracted.
    #[error("extraction failed: {0}")]
    Extraction(String),
    /// Extraction succeeded but the shell session failed.
    #[error("remote provisioning session failed: {0}")]
    Session(String),
}

/// Final artifact of one provisioning run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningResult {
    /// Outcome of the extraction phase.
    pub extraction: ExtractionOutcome,
    /// Captured session result, when a session ran to stream close.
    pub session: Option<RemoteSessionResult>,
    /// Description of the session failure, when the session never produced
    /// a result.
    pub session_failure: Option<String>,
    /// Overall classification.
    pub status: ProvisioningStatus,
}

impl ProvisioningResult {
    /// Whether the run is usable: extraction succeeded and the session
    /// completed without a connection-level or timeout failure. A degraded
    /// run counts as successful; check [`Self::status`] for the distinction.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(
            self.status,
            ProvisioningStatus::Succeeded | ProvisioningStatus::Degraded
        )
    }

    /// Human-readable one-line summary for reporting.
    #[must_use]
    pub fn summary(&self) -> String {
        match self.status {
            ProvisioningStatus::Succeeded => format!(
                "provisioned: {} files, {} bytes extracted, script exited 0",
                self.extraction.files_processed, self.extraction.bytes_processed
            ),
            ProvisioningStatus::Degraded => {
                let code = self.session.as_ref().map_or(0, |session| session.exit_code);
                format!(
                    "partially provisioned: extraction complete, script exited {code}; \
                     manual follow-up may be needed"
                )
            }
            ProvisioningStatus::ExtractionFailed => format!(
                "nothing extracted: {}",
                self.extraction
                    .failure_message()
                    .unwrap_or_else(|| "unknown failure".to_owned())
            ),
            ProvisioningStatus::SessionFailed => format!(
                "extraction complete but provisioning session failed: {}",
                self.session_failure
                    .clone()
                    .unwrap_or_else(|| "session force-closed by its deadline".to_owned())
            ),
        }
    }

    /// Converts the result into an error for the failed statuses.
    #[must_use]
    pub fn as_error(&self) -> Option<ProvisionError> {
        match self.status {
            ProvisioningStatus::Succeeded | ProvisioningStatus::Degraded => None,
            ProvisioningStatus::ExtractionFailed => Some(ProvisionError::Extraction(
                self.extraction
                    .failure_message()
                    .unwrap_or_else(|| "unknown failure".to_owned()),
            )),
            ProvisioningStatus::SessionFailed => Some(ProvisionError::Session(
                self.session_failure
                    .clone()
                    .unwrap_or_else(|| "session force-closed by its deadline".to_owned()),
            )),
        }
    }
}

/// Sequences the extraction client, script generator, and remote shell.
#[derive(Clone, Debug)]
pub struct ProvisioningOrchestrator<T: ExtractorTransport, R: CommandRunner> {
    extractor: ExtractionClient<T>,
    generator: ScriptGenerator,
    shell: RemoteShell<R>,
    settle_delay: Duration,
}

impl<T: ExtractorTransport, R: CommandRunner> ProvisioningOrchestrator<T, R> {
    /// Creates an orchestrator over the provided collaborators.
    #[must_use]
    pub const fn new(
        extractor: ExtractionClient<T>,
        generator: ScriptGenerator,
        shell: RemoteShell<R>,
    ) -> Self {
        Self {
            extractor,
            generator,
            shell,
            settle_delay: SETTLE_DELAY,
        }
    }

    /// Overrides the settle delay.
    ///
    /// This is primarily used by tests to keep scenarios fast.
    #[must_use]
    pub const fn with_settle_delay(mut self, value: Duration) -> Self {
        self.settle_delay = value;
        self
    }

    /// Borrows the remote shell. Tests use this to inspect scripted
    /// doubles after a run.
    #[must_use]
    pub const fn shell_ref(&self) -> &RemoteShell<R> {
        &self.shell
    }

    /// Runs one provisioning attempt end to end.
    ///
    /// Extraction failure short-circuits: no shell session is attempted
    /// when there is nothing to provision. The generated script is built
    /// fresh for this request; the rewrite base path is taken from the
    /// extraction request's destination subdirectory.
    pub async fn provision(
        &self,
        request: &ExtractionRequest,
        params: &ProvisioningParameters,
        credentials: &SessionCredentials,
    ) -> ProvisioningResult {
        let extraction = self.extractor.extract(request).await;
        if !extraction.success {
            return ProvisioningResult {
                extraction,
                session: None,
                session_failure: None,
                status: ProvisioningStatus::ExtractionFailed,
            };
        }

        sleep(self.settle_delay).await;

        let script = self.build_script(request, params);
        match self.shell.run(credentials, &script).await {
            Err(err) => {
                error!(%err, "provisioning session failed");
                ProvisioningResult {
                    extraction,
                    session: None,
                    session_failure: Some(err.to_string()),
                    status: ProvisioningStatus::SessionFailed,
                }
            }
            Ok(session) if session.timed_out => {
                warn!("provisioning session force-closed by its budget");
                ProvisioningResult {
                    extraction,
                    session: Some(session),
                    session_failure: None,
                    status: ProvisioningStatus::SessionFailed,
                }
            }
            Ok(session) if session.exit_code == 0 => {
                info!("provisioning complete");
                ProvisioningResult {
                    extraction,
                    session: Some(session),
                    session_failure: None,
                    status: ProvisioningStatus::Succeeded,
                }
            }
            Ok(session) => {
                warn!(
                    exit_code = session.exit_code,
                    "provisioning script exited non-zero"
                );
                ProvisioningResult {
                    extraction,
                    session: Some(session),
                    session_failure: None,
                    status: ProvisioningStatus::Degraded,
                }
            }
        }
    }

    fn build_script(
        &self,
        request: &ExtractionRequest,
        params: &ProvisioningParameters,
    ) -> GeneratedScript {
        let mut effective = params.clone();
        effective.base_path = request.destination_subdir.clone();
        self.generator.generate(&effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ExtractError;

    fn extraction_ok() -> ExtractionOutcome {
        ExtractionOutcome::completed(20, 2000)
    }

    fn session(exit_code: i32, timed_out: bool) -> RemoteSessionResult {
        RemoteSessionResult {
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            timed_out,
        }
    }

    #[test]
    fn degraded_counts_as_success_with_distinct_status() {
        let result = ProvisioningResult {
            extraction: extraction_ok(),
            session: Some(session(1, false)),
            session_failure: None,
            status: ProvisioningStatus::Degraded,
        };

        assert!(result.success());
        assert!(result.as_error().is_none());
        assert!(result.summary().contains("script exited 1"));
    }

    #[test]
    fn extraction_failure_summary_says_nothing_extracted() {
        let result = ProvisioningResult {
            extraction: ExtractionOutcome::failed(ExtractError::Start {
                message: "bad archive".to_owned(),
            }),
            session: None,
            session_failure: None,
            status: ProvisioningStatus::ExtractionFailed,
        };

        assert!(!result.success());
        assert!(result.summary().starts_with("nothing extracted"));
        assert!(matches!(
            result.as_error(),
            Some(ProvisionError::Extraction(_))
        ));
    }

    #[test]
    fn session_failure_summary_mentions_the_session() {
        let result = ProvisioningResult {
            extraction: extraction_ok(),
            session: None,
            session_failure: Some("connection refused".to_owned()),
            status: ProvisioningStatus::SessionFailed,
        };

        assert!(!result.success());
        assert!(result.summary().contains("session failed"));
        assert!(matches!(
            result.as_error(),
            Some(ProvisionError::Session(_))
        ));
    }
}
