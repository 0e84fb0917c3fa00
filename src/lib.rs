// Library crate for cvpn - exposes modules for use by the binary and tests
pub mod commands;
pub mod config;
pub mod controller;
pub mod deployer;
pub mod error;
pub mod pipeline;
pub mod pki;
pub mod profile;
pub mod remote;
pub mod retry;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// CLI-specific types (used by both library and binary)
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Show whether the endpoint is associated with its subnet
    Status,
    /// Associate the subnet and route all traffic through it
    On {
        /// Block until the endpoint reports it is associated
        #[arg(long)]
        wait: bool,
        /// Seconds to wait with --wait
        #[arg(long, default_value_t = 900)]
        timeout: u64,
        /// Fail instead of succeeding when the endpoint is already on
        #[arg(long)]
        strict: bool,
    },
    /// Remove the subnet association
    Off {
        /// Block until the endpoint reports it is disassociated
        #[arg(long)]
        wait: bool,
        /// Seconds to wait with --wait
        #[arg(long, default_value_t = 900)]
        timeout: u64,
    },
    /// Turn the endpoint on when it is off, off when it is on
    Toggle,
}

/// Options for first-time setup (no subcommand)
#[derive(Args, Debug, Clone)]
pub struct SetupArgs {
    /// AWS region to deploy into (prompted when omitted)
    #[arg(long, value_name = "REGION")]
    pub region: Option<String>,
    /// Friendly name used for the stack and the generated files
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,
    /// Only route the VPC's traffic through the endpoint
    #[arg(long)]
    pub split_tunnel: bool,
    /// Use a CloudFormation template from disk instead of the bundled one
    #[arg(long, value_name = "PATH", conflicts_with = "template_url")]
    pub template_file: Option<PathBuf>,
    /// Download the CloudFormation template from this URL
    #[arg(long, value_name = "URL")]
    pub template_url: Option<String>,
    /// Path to the easyrsa executable (looked up on PATH by default)
    #[arg(long, value_name = "PATH")]
    pub easyrsa: Option<PathBuf>,
    /// Directory receiving the setup record, profile and pki (defaults to the working directory)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
    /// Seconds to wait for the stack to finish
    #[arg(long, default_value_t = 1800)]
    pub deploy_timeout: u64,
    /// Accept every default without prompting
    #[arg(long, short = 'y')]
    pub yes: bool,
}
