use anyhow::Result;
use clap::Parser;
use cvpn::commands::{self, GlobalOptions};
use cvpn::error::VpnError;
use cvpn::{Commands, SetupArgs};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "cvpn")]
#[command(about = "Provision an AWS Client VPN endpoint and switch it on and off", long_about = None)]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Setup record to read the endpoint from (defaults to the newest *.cvpn.toml here); goes after the subcommand
    #[arg(long, short = 'f', value_name = "FILE", global = true)]
    file: Option<PathBuf>,

    /// Client VPN endpoint id, overriding the setup record and ENDPOINT_ID
    #[arg(long, value_name = "ID", global = true)]
    endpoint_id: Option<String>,

    /// Subnet id, overriding the setup record and SUBNET_ID
    #[arg(long, value_name = "ID", global = true)]
    subnet_id: Option<String>,

    /// Log debug output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(flatten)]
    setup: SetupArgs,

    /// Runs first-time setup when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "cvpn=debug" } else { "cvpn=warn" };
    let filter = EnvFilter::try_from_env("CVPN_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let options = GlobalOptions {
        profile_file: cli.file,
        endpoint_id: cli.endpoint_id,
        subnet_id: cli.subnet_id,
    };
    commands::handle_command(options, cli.command, cli.setup)
}

/// Error kind of the first typed error in the chain, if any
fn kind_of(err: &anyhow::Error) -> Option<String> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<VpnError>())
        .map(|e| e.kind().to_string())
}

/// Context messages down to the first `VpnError`, whose message already
/// includes its own causes
fn render(err: &anyhow::Error) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        parts.push(cause.to_string());
        if cause.is::<VpnError>() {
            break;
        }
    }
    parts.join(": ")
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match kind_of(&err) {
                Some(kind) => eprintln!("Error [{}]: {}", kind, render(&err)),
                None => eprintln!("Error: {}", render(&err)),
            }
            ExitCode::FAILURE
        }
    }
}
