//! Command-line interface definitions for the `siteprov` binary.
//!
//! This module centralises the clap parser structures so both the main
//! binary and the build script can reuse them when generating the manual
//! page.

use clap::Parser;

/// Top-level CLI for the `siteprov` binary.
#[derive(Debug, Parser)]
#[command(
    name = "siteprov",
    about = "Extract a packaged website archive on a remote host and provision the installation",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run one extraction and provisioning attempt end to end.
    #[command(
        name = "provision",
        about = "Drive the remote extractor, then configure the installation over SSH"
    )]
    Provision(ProvisionCommand),
}

/// Arguments for the `siteprov provision` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ProvisionCommand {
    /// URL of the remote extractor endpoint placed next to the archive.
    #[arg(long, value_name = "URL")]
    pub(crate) endpoint: String,
    /// File name of the packaged site archive on the remote host.
    #[arg(long, value_name = "FILE")]
    pub(crate) archive: String,
    /// Destination subdirectory under the account web root; empty installs
    /// at the root.
    #[arg(long, value_name = "SUBDIR", default_value = "")]
    pub(crate) subdir: String,
    /// Absolute path of the extracted site on the remote host.
    #[arg(long, value_name = "PATH")]
    pub(crate) target_path: String,
    /// Operating-system user that must own the provisioned files.
    #[arg(long, value_name = "USER")]
    pub(crate) owner: String,
    /// Database server host; localhost selects socket semantics.
    #[arg(long, value_name = "HOST", default_value = "localhost")]
    pub(crate) db_host: String,
    /// Database name (the hosting panel provisions the user under the same
    /// name).
    #[arg(long, value_name = "NAME")]
    pub(crate) db_name: String,
    /// Database password.
    #[arg(long, value_name = "PASSWORD", env = "SITEPROV_DB_PASSWORD", hide_env_values = true)]
    pub(crate) db_password: String,
    /// Table prefix used when the package carries no prefix metadata.
    #[arg(long, value_name = "PREFIX", default_value = "wp_")]
    pub(crate) prefix_fallback: String,
    /// SSH host for the provisioning session.
    #[arg(long, value_name = "HOST")]
    pub(crate) ssh_host: String,
    /// SSH port for the provisioning session.
    #[arg(long, value_name = "PORT", default_value_t = 22)]
    pub(crate) ssh_port: u16,
    /// SSH login user for the provisioning session.
    #[arg(long, value_name = "USER")]
    pub(crate) ssh_user: String,
    /// SSH login password for the provisioning session.
    #[arg(long, value_name = "PASSWORD", env = "SITEPROV_SSH_PASSWORD", hide_env_values = true)]
    pub(crate) ssh_password: String,
}
