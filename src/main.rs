//! Binary entry point for the `siteprov` CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use siteprov::{
    ExtractionClient, ExtractionRequest, HttpTransport, ProvisionerConfig,
    ProvisioningOrchestrator, ProvisioningParameters, ProvisioningResult, ProvisioningStatus,
    RemoteShell, ScriptGenerator, SessionCredentials,
};

mod cli;

use cli::{Cli, ProvisionCommand};

/// Exit code reported for a degraded (partially provisioned) run.
const DEGRADED_EXIT_CODE: i32 = 2;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid request: {0}")]
    Request(String),
}

#[tokio::main]
async fn main() {
    init_tracing();

    let parsed = Cli::parse();
    let exit_code = match dispatch(parsed).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(parsed: Cli) -> Result<i32, CliError> {
    match parsed {
        Cli::Provision(command) => provision_command(&command).await,
    }
}

async fn provision_command(args: &ProvisionCommand) -> Result<i32, CliError> {
    let config =
        ProvisionerConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let request = ExtractionRequest::builder()
        .endpoint_base_url(&args.endpoint)
        .archive_file_name(&args.archive)
        .destination_subdir(&args.subdir)
        .build()
        .map_err(|err| CliError::Request(err.to_string()))?;

    let params = provisioning_parameters(args);
    let credentials = SessionCredentials {
        host: args.ssh_host.clone(),
        port: args.ssh_port,
        username: args.ssh_user.clone(),
        password: args.ssh_password.clone(),
    };
    credentials
        .validate()
        .map_err(|err| CliError::Request(err.to_string()))?;

    let orchestrator = build_orchestrator(&config);
    let result = orchestrator.provision(&request, &params, &credentials).await;

    report_result(&result);
    Ok(exit_code_for(&result))
}

fn build_orchestrator(
    config: &ProvisionerConfig,
) -> ProvisioningOrchestrator<HttpTransport, siteprov::ProcessCommandRunner> {
    let extractor = ExtractionClient::new(HttpTransport::new(config.http_timeout()))
        .with_retry_limit(config.continuation_retry_limit)
        .with_retry_pause(config.continuation_retry_pause())
        .with_iteration_ceiling(config.iteration_ceiling);
    let generator = ScriptGenerator::new(config.mysql_bin.clone());
    let shell = RemoteShell::with_process_runner()
        .with_binaries(config.ssh_bin.clone(), config.sshpass_bin.clone())
        .with_ready_timeout(config.session_ready_timeout())
        .with_session_budget(config.session_budget())
        .with_keepalive_interval(config.keepalive_interval());

    ProvisioningOrchestrator::new(extractor, generator, shell)
        .with_settle_delay(config.settle_delay())
}

fn provisioning_parameters(args: &ProvisionCommand) -> ProvisioningParameters {
    ProvisioningParameters {
        target_path: Utf8PathBuf::from(&args.target_path),
        // Overwritten by the orchestrator with the extraction request's
        // destination subdirectory.
        base_path: args.subdir.clone(),
        owner_login_name: args.owner.clone(),
        database_host: args.db_host.clone(),
        database_name: args.db_name.clone(),
        database_password: args.db_password.clone(),
        table_prefix_fallback: args.prefix_fallback.clone(),
    }
}

const fn exit_code_for(result: &ProvisioningResult) -> i32 {
    match result.status {
        ProvisioningStatus::Succeeded => 0,
        ProvisioningStatus::Degraded => DEGRADED_EXIT_CODE,
        ProvisioningStatus::ExtractionFailed | ProvisioningStatus::SessionFailed => 1,
    }
}

fn report_result(result: &ProvisioningResult) {
    write_line(io::stdout(), &result.summary());
    if let Some(session) = &result.session {
        if !session.stdout.is_empty() {
            write_line(io::stdout(), session.stdout.trim_end());
        }
        if !session.stderr.is_empty() {
            write_line(io::stderr(), session.stderr.trim_end());
        }
    }
}

fn report_error(err: &CliError) {
    write_line(io::stderr(), &err.to_string());
}

fn write_line(mut target: impl Write, line: &str) {
    writeln!(target, "{line}").ok();
}
