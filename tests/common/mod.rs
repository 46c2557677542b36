//! Shared scripted doubles for behavioural tests.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use siteprov::{
    CommandOutput, CommandRunner, ExtractorTransport, Phase, ProvisioningParameters,
    SessionCredentials, SessionError, SessionFuture, TransportError, TransportFuture,
};

/// One recorded transport call: the phase and the JSON payload sent.
pub type RecordedCall = (Phase, String);

/// Transport double replaying queued reply bodies.
///
/// When the queue runs dry the optional fallback is replayed indefinitely,
/// which keeps long polling scenarios (the iteration ceiling) scriptable.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<String, TransportError>>>,
    fallback: Option<Result<String, TransportError>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_body(&self, body: &str) {
        self.lock_responses().push_back(Ok(body.to_owned()));
    }

    pub fn push_transport_error(&self, message: &str) {
        self.lock_responses().push_back(Err(TransportError {
            message: message.to_owned(),
        }));
    }

    #[must_use]
    pub fn with_fallback_body(mut self, body: &str) -> Self {
        self.fallback = Some(Ok(body.to_owned()));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn calls_for(&self, phase: Phase) -> usize {
        self.calls()
            .iter()
            .filter(|(called, _)| *called == phase)
            .count()
    }

    fn lock_responses(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<String, TransportError>>> {
        self.responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ExtractorTransport for ScriptedTransport {
    fn fetch<'a>(
        &'a self,
        _endpoint: &'a str,
        phase: Phase,
        payload: &'a str,
    ) -> TransportFuture<'a> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push((phase, payload.to_owned()));

            let next = self.lock_responses().pop_front();
            next.or_else(|| self.fallback.clone()).unwrap_or_else(|| {
                Err(TransportError {
                    message: "scripted transport exhausted".to_owned(),
                })
            })
        })
    }
}

/// Command-runner double replaying queued outcomes and recording argv.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Mutex<VecDeque<Result<CommandOutput, SessionError>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_exit(&self, code: i32, stdout: &str, stderr: &str) {
        self.responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(Ok(CommandOutput {
                code: Some(code),
                stdout: stdout.to_owned(),
                stderr: stderr.to_owned(),
            }));
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        _program: &'a str,
        args: &'a [OsString],
    ) -> SessionFuture<'a, CommandOutput> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(
                    args.iter()
                        .map(|arg| arg.to_string_lossy().into_owned())
                        .collect(),
                );

            self.responses
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front()
                .unwrap_or(Err(SessionError::Died))
        })
    }
}

/// Runner double that never completes, for deadline coverage.
#[derive(Debug, Default)]
pub struct HangingRunner;

impl CommandRunner for HangingRunner {
    fn run<'a>(
        &'a self,
        _program: &'a str,
        _args: &'a [OsString],
    ) -> SessionFuture<'a, CommandOutput> {
        Box::pin(async move {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Err(SessionError::Died)
        })
    }
}

pub fn provisioning_parameters() -> ProvisioningParameters {
    ProvisioningParameters {
        target_path: Utf8PathBuf::from("/home/acme/public_html/blog"),
        base_path: String::new(),
        owner_login_name: "acme".to_owned(),
        database_host: "localhost".to_owned(),
        database_name: "acme_site".to_owned(),
        database_password: "secret".to_owned(),
        table_prefix_fallback: "wp_".to_owned(),
    }
}

pub fn session_credentials() -> SessionCredentials {
    SessionCredentials {
        host: "host.example".to_owned(),
        port: 22,
        username: "acme".to_owned(),
        password: "pw".to_owned(),
    }
}
