//! Client for the remote extractor's three-phase polling protocol.
//!
//! One extraction is driven start → continue* → cleanup against a single
//! endpoint URL. Every phase is a GET carrying a JSON-encoded query
//! parameter; replies are decoded by [`crate::codec`]. The continuation
//! token returned by the remote tool is opaque and echoed back verbatim.
//! Transport-level failures on continuation calls are retried a bounded
//! number of times; protocol-reported failures are terminal.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::codec::{self, DecodeError, DecodedReply};

/// Deadline applied independently to every HTTP call in all phases.
pub const HTTP_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Additional attempts allowed when a continuation call fails at the
/// transport level.
pub const CONTINUATION_RETRY_LIMIT: u32 = 3;
/// Pause between continuation retry attempts.
pub const CONTINUATION_RETRY_PAUSE: Duration = Duration::from_secs(1);
/// Hard ceiling on continuation iterations, guarding against a remote tool
/// that never reports completion.
pub const ITERATION_CEILING: u32 = 1000;

/// Protocol phase, sent as the `task` query parameter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Initial request that configures and begins the extraction.
    Start,
    /// Resumption request carrying the continuation token.
    Continue,
    /// Final advisory request releasing remote extraction state.
    Cleanup,
}

impl Phase {
    /// Wire name of the phase's `task` parameter.
    #[must_use]
    pub const fn task_name(self) -> &'static str {
        match self {
            Self::Start => "startExtracting",
            Self::Continue => "continueExtracting",
            Self::Cleanup => "cleanUp",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Continue => "continue",
            Self::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Parameters for one extraction attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtractionRequest {
    /// Base URL of the remote extractor endpoint.
    pub endpoint_base_url: String,
    /// File name of the archive already placed next to the extractor.
    pub archive_file_name: String,
    /// Subdirectory of the account web root receiving the site. May be
    /// empty when installing at the root.
    pub destination_subdir: String,
}

impl ExtractionRequest {
    /// Starts a builder for an [`ExtractionRequest`].
    #[must_use]
    pub fn builder() -> ExtractionRequestBuilder {
        ExtractionRequestBuilder::default()
    }

    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] when the endpoint or archive name is empty.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.endpoint_base_url.is_empty() {
            return Err(RequestError::Validation("endpoint_base_url".to_owned()));
        }
        if self.archive_file_name.is_empty() {
            return Err(RequestError::Validation("archive_file_name".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`ExtractionRequest`] that trims inputs and validates on
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExtractionRequestBuilder {
    endpoint_base_url: String,
    archive_file_name: String,
    destination_subdir: String,
}

impl ExtractionRequestBuilder {
    /// Sets the extractor endpoint base URL.
    #[must_use]
    pub fn endpoint_base_url(mut self, value: impl Into<String>) -> Self {
        self.endpoint_base_url = value.into();
        self
    }

    /// Sets the archive file name.
    #[must_use]
    pub fn archive_file_name(mut self, value: impl Into<String>) -> Self {
        self.archive_file_name = value.into();
        self
    }

    /// Sets the destination subdirectory.
    #[must_use]
    pub fn destination_subdir(mut self, value: impl Into<String>) -> Self {
        self.destination_subdir = value.into();
        self
    }

    /// Builds and validates the request, trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Validation`] when a required field is empty.
    pub fn build(self) -> Result<ExtractionRequest, RequestError> {
        let request = ExtractionRequest {
            endpoint_base_url: self.endpoint_base_url.trim().to_owned(),
            archive_file_name: self.archive_file_name.trim().to_owned(),
            destination_subdir: self.destination_subdir.trim().to_owned(),
        };
        request.validate()?;
        Ok(request)
    }
}

/// Errors raised while building an [`ExtractionRequest`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// Raised when a required field is missing or empty.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Transport-level failure: the endpoint could not be reached or the call
/// exceeded its deadline.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message}")]
pub struct TransportError {
    /// Description of the underlying network failure.
    pub message: String,
}

/// Future returned by transport operations.
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, TransportError>> + Send + 'a>>;

/// Seam over the HTTP layer so protocol logic is testable with fakes.
pub trait ExtractorTransport {
    /// Issues one GET against `endpoint` for the given phase, returning the
    /// raw reply body.
    fn fetch<'a>(&'a self, endpoint: &'a str, phase: Phase, payload: &'a str)
    -> TransportFuture<'a>;
}

/// Real transport backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport whose calls each carry the given deadline.
    #[must_use]
    pub fn new(call_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(HTTP_CALL_TIMEOUT)
    }
}

impl ExtractorTransport for HttpTransport {
    fn fetch<'a>(
        &'a self,
        endpoint: &'a str,
        phase: Phase,
        payload: &'a str,
    ) -> TransportFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .get(endpoint)
                .query(&[("task", phase.task_name()), ("json", payload)])
                .send()
                .await
                .map_err(|err| TransportError {
                    message: err.to_string(),
                })?;

            response.text().await.map_err(|err| TransportError {
                message: err.to_string(),
            })
        })
    }
}

/// Errors that terminate an extraction.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExtractError {
    /// Raised when the start phase is rejected by the remote tool.
    #[error("extraction could not start: {message}")]
    Start {
        /// Failure text reported by the remote tool.
        message: String,
    },
    /// Raised when a continuation reply carries `status: false`.
    #[error("remote extractor reported failure: {message}")]
    Protocol {
        /// Failure text reported by the remote tool.
        message: String,
    },
    /// Raised when the endpoint stays unreachable past the retry bound.
    #[error("extractor endpoint unreachable during {phase} after {attempts} attempt(s): {message}")]
    Connection {
        /// Phase during which the transport failed.
        phase: Phase,
        /// Total attempts made, retries included.
        attempts: u32,
        /// Description of the last transport failure.
        message: String,
    },
    /// Raised when a reply cannot be parsed. A reply that cannot be
    /// understood cannot be trusted to mean success.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Raised when a successful reply omits the continuation token while
    /// the extraction is not done.
    #[error("extractor reply omitted the continuation token")]
    MissingToken,
    /// Raised when the polling loop hits its hard ceiling. Classified as a
    /// timeout rather than a protocol failure.
    #[error("extraction did not finish within {iterations} continuation calls")]
    IterationCeiling {
        /// Number of continuation calls issued before giving up.
        iterations: u32,
    },
}

/// Terminal outcome of one extraction attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtractionOutcome {
    /// Whether the archive was fully extracted.
    pub success: bool,
    /// Files processed, as last reported by the remote tool.
    pub files_processed: u64,
    /// Bytes written, as last reported by the remote tool.
    pub bytes_processed: u64,
    /// Failure that terminated the extraction, when unsuccessful.
    pub failure: Option<ExtractError>,
}

impl ExtractionOutcome {
    /// Outcome for a normally completed extraction.
    #[must_use]
    pub const fn completed(files_processed: u64, bytes_processed: u64) -> Self {
        Self {
            success: true,
            files_processed,
            bytes_processed,
            failure: None,
        }
    }

    /// Outcome for a terminally failed extraction with no progress made.
    #[must_use]
    pub const fn failed(failure: ExtractError) -> Self {
        Self::failed_after(failure, 0, 0)
    }

    /// Outcome for a terminally failed extraction, carrying the counters
    /// as last reported before the failure.
    #[must_use]
    pub const fn failed_after(
        failure: ExtractError,
        files_processed: u64,
        bytes_processed: u64,
    ) -> Self {
        Self {
            success: false,
            files_processed,
            bytes_processed,
            failure: Some(failure),
        }
    }

    /// Human-readable failure text, when the extraction failed.
    #[must_use]
    pub fn failure_message(&self) -> Option<String> {
        self.failure.as_ref().map(std::string::ToString::to_string)
    }
}

/// Running state for one extraction, owned by the client and discarded once
/// the outcome is produced.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct ExtractionState {
    continuation_token: Option<String>,
    done: bool,
    files_processed: u64,
    bytes_processed: u64,
}

impl ExtractionState {
    /// Replaces state fields with the subset the reply carries. `done`
    /// defaults to false when absent, forcing another continuation.
    fn absorb(&mut self, reply: &DecodedReply) {
        if let Some(token) = &reply.factory {
            self.continuation_token = Some(token.clone());
        }
        if let Some(files) = reply.files {
            self.files_processed = files;
        }
        if let Some(bytes) = reply.bytes_out {
            self.bytes_processed = bytes;
        }
        self.done = reply.done.unwrap_or(false);
    }

    fn token(&self) -> Result<&str, ExtractError> {
        self.continuation_token
            .as_deref()
            .ok_or(ExtractError::MissingToken)
    }
}

/// Drives one archive extraction to completion or failure, hiding the
/// polling protocol from callers.
#[derive(Clone, Debug)]
pub struct ExtractionClient<T: ExtractorTransport> {
    transport: T,
    retry_limit: u32,
    retry_pause: Duration,
    iteration_ceiling: u32,
}

impl ExtractionClient<HttpTransport> {
    /// Convenience constructor wiring the real HTTP transport with the
    /// default per-call deadline.
    #[must_use]
    pub fn with_http_transport() -> Self {
        Self::new(HttpTransport::default())
    }
}

impl<T: ExtractorTransport> ExtractionClient<T> {
    /// Creates a client over the provided transport with default bounds.
    #[must_use]
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            retry_limit: CONTINUATION_RETRY_LIMIT,
            retry_pause: CONTINUATION_RETRY_PAUSE,
            iteration_ceiling: ITERATION_CEILING,
        }
    }

    /// Overrides the continuation retry bound.
    #[must_use]
    pub const fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Overrides the pause between continuation retries.
    ///
    /// This is primarily used by tests to keep retry scenarios fast.
    #[must_use]
    pub const fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Overrides the continuation iteration ceiling.
    #[must_use]
    pub const fn with_iteration_ceiling(mut self, ceiling: u32) -> Self {
        self.iteration_ceiling = ceiling;
        self
    }

    /// Borrows the underlying transport. Tests use this to inspect
    /// scripted doubles after a run.
    #[must_use]
    pub const fn transport_ref(&self) -> &T {
        &self.transport
    }

    /// Runs the extraction protocol to completion or terminal failure.
    ///
    /// Never returns an error: every failure path is folded into the
    /// outcome so callers receive the counters alongside the failure.
    pub async fn extract(&self, request: &ExtractionRequest) -> ExtractionOutcome {
        let mut state = ExtractionState::default();
        match self.run(request, &mut state).await {
            Ok(()) => {
                debug!(
                    files = state.files_processed,
                    bytes = state.bytes_processed,
                    "extraction complete"
                );
                ExtractionOutcome::completed(state.files_processed, state.bytes_processed)
            }
            Err(failure) => {
                error!(%failure, "extraction failed");
                ExtractionOutcome::failed_after(
                    failure,
                    state.files_processed,
                    state.bytes_processed,
                )
            }
        }
    }

    async fn run(
        &self,
        request: &ExtractionRequest,
        state: &mut ExtractionState,
    ) -> Result<(), ExtractError> {
        *state = self.start(request).await?;

        let mut iterations: u32 = 0;
        while !state.done {
            if iterations == self.iteration_ceiling {
                return Err(ExtractError::IterationCeiling { iterations });
            }
            iterations += 1;
            self.continue_once(request, state).await?;
        }

        self.cleanup(request, state).await;
        Ok(())
    }

    async fn start(&self, request: &ExtractionRequest) -> Result<ExtractionState, ExtractError> {
        let payload = json!({
            "sourcefile": request.archive_file_name,
            "destdir": "",
            "procengine": "direct",
            "restoreperms": "0",
            "dryrun": "0",
        })
        .to_string();

        let body = self
            .transport
            .fetch(&request.endpoint_base_url, Phase::Start, &payload)
            .await
            .map_err(|err| ExtractError::Connection {
                phase: Phase::Start,
                attempts: 1,
                message: err.message,
            })?;

        let reply = codec::decode(&body)?;
        if !reply.status {
            return Err(ExtractError::Start {
                message: reply.failure_text(),
            });
        }

        let mut state = ExtractionState::default();
        state.absorb(&reply);
        debug!(
            files = state.files_processed,
            bytes = state.bytes_processed,
            done = state.done,
            "extraction started"
        );
        Ok(state)
    }

    async fn continue_once(
        &self,
        request: &ExtractionRequest,
        state: &mut ExtractionState,
    ) -> Result<(), ExtractError> {
        let payload = json!({ "factory": state.token()? }).to_string();
        let body = self
            .fetch_with_retry(&request.endpoint_base_url, &payload)
            .await?;

        let reply = codec::decode(&body)?;
        if !reply.status {
            return Err(ExtractError::Protocol {
                message: reply.failure_text(),
            });
        }

        state.absorb(&reply);
        Ok(())
    }

    /// Issues one continuation call, retrying transport failures up to the
    /// configured bound. Protocol-level failures are never retried here;
    /// they surface from the decoded reply in [`Self::continue_once`].
    async fn fetch_with_retry(&self, endpoint: &str, payload: &str) -> Result<String, ExtractError> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self
                .transport
                .fetch(endpoint, Phase::Continue, payload)
                .await
            {
                Ok(body) => return Ok(body),
                Err(err) if attempts <= self.retry_limit => {
                    warn!(attempt = attempts, error = %err, "continuation call failed, retrying");
                    sleep(self.retry_pause).await;
                }
                Err(err) => {
                    return Err(ExtractError::Connection {
                        phase: Phase::Continue,
                        attempts,
                        message: err.message,
                    });
                }
            }
        }
    }

    /// Advisory cleanup: failure here never invalidates a completed
    /// extraction, but it is surfaced in the logs.
    async fn cleanup(&self, request: &ExtractionRequest, state: &ExtractionState) {
        let token = state.continuation_token.as_deref().unwrap_or_default();
        let payload = json!({ "factory": token }).to_string();

        match self
            .transport
            .fetch(&request.endpoint_base_url, Phase::Cleanup, &payload)
            .await
        {
            Ok(body) => match codec::decode(&body) {
                Ok(reply) if reply.status => debug!("extractor cleanup complete"),
                Ok(reply) => warn!(message = %reply.failure_text(), "extractor cleanup rejected"),
                Err(err) => warn!(error = %err, "extractor cleanup reply unparsable"),
            },
            Err(err) => warn!(error = %err, "extractor cleanup call failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_trims_and_validates() {
        let request = ExtractionRequest::builder()
            .endpoint_base_url(" https://host.example/extractor.php ")
            .archive_file_name(" site.daf ")
            .destination_subdir("blog")
            .build()
            .expect("request should build");

        assert_eq!(request.endpoint_base_url, "https://host.example/extractor.php");
        assert_eq!(request.archive_file_name, "site.daf");
        assert_eq!(request.destination_subdir, "blog");
    }

    #[test]
    fn builder_rejects_missing_archive() {
        let result = ExtractionRequest::builder()
            .endpoint_base_url("https://host.example/extractor.php")
            .build();

        assert!(matches!(result, Err(RequestError::Validation(field)) if field == "archive_file_name"));
    }

    #[test]
    fn state_absorb_replaces_reported_fields_only() {
        let mut state = ExtractionState {
            continuation_token: Some("f1".to_owned()),
            done: false,
            files_processed: 10,
            bytes_processed: 1000,
        };

        state.absorb(&DecodedReply {
            status: true,
            done: Some(true),
            ..DecodedReply::default()
        });

        // Token and counters survive a reply that omits them.
        assert_eq!(state.continuation_token.as_deref(), Some("f1"));
        assert_eq!(state.files_processed, 10);
        assert_eq!(state.bytes_processed, 1000);
        assert!(state.done);
    }

    #[test]
    fn state_without_token_yields_missing_token() {
        let state = ExtractionState::default();
        assert!(matches!(state.token(), Err(ExtractError::MissingToken)));
    }

    #[test]
    fn phase_task_names_match_wire_contract() {
        assert_eq!(Phase::Start.task_name(), "startExtracting");
        assert_eq!(Phase::Continue.task_name(), "continueExtracting");
        assert_eq!(Phase::Cleanup.task_name(), "cleanUp");
    }

    #[test]
    fn outcome_failure_message_renders_error() {
        let outcome = ExtractionOutcome::failed(ExtractError::Start {
            message: "bad archive".to_owned(),
        });

        assert!(!outcome.success);
        assert_eq!(
            outcome.failure_message().as_deref(),
            Some("extraction could not start: bad archive")
        );
    }
}
