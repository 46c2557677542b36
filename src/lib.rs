//! Core library for the `siteprov` remote provisioning tool.
//!
//! The crate turns a packaged website archive, already placed on a remote
//! hosting account, into a live configured installation: a stateful HTTP
//! client drives the remote extractor's polling protocol to completion,
//! then one SSH session runs a generated, injection-safe shell script that
//! rewrites configuration, imports the database dump, resets ownership,
//! and removes installer artifacts.

pub mod codec;
pub mod config;
pub mod extractor;
pub mod orchestrator;
pub mod script;
pub mod session;

pub use codec::{DecodeError, DecodedReply, decode};
pub use config::{ConfigError, ProvisionerConfig};
pub use extractor::{
    ExtractError, ExtractionClient, ExtractionOutcome, ExtractionRequest,
    ExtractionRequestBuilder, ExtractorTransport, HttpTransport, Phase, RequestError,
    TransportError, TransportFuture,
};
pub use orchestrator::{
    ProvisionError, ProvisioningOrchestrator, ProvisioningResult, ProvisioningStatus,
};
pub use script::{
    COMPLETION_MARKER, GeneratedScript, ProvisioningParameters, ScriptGenerator, sed_escape,
};
pub use session::{
    CommandOutput, CommandRunner, ProcessCommandRunner, RemoteSessionResult, RemoteShell,
    SessionCredentials, SessionError, SessionFuture,
};
