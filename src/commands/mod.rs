// Command module routing
//
// To add a new command:
// 1. Create a new file in this directory (e.g., `mycommand.rs`)
// 2. Add `pub mod mycommand;` below
// 3. Add the match arm in `handle_command` function

pub mod lifecycle;
pub mod setup;
pub mod status;

use crate::config::{self, Overrides, Settings};
use crate::remote::AwsCli;
use crate::Commands::{self, *};
use crate::SetupArgs;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Options accepted by every command
#[derive(Debug, Default, Clone)]
pub struct GlobalOptions {
    pub profile_file: Option<PathBuf>,
    pub endpoint_id: Option<String>,
    pub subnet_id: Option<String>,
}

impl GlobalOptions {
    fn overrides(&self) -> Overrides {
        Overrides {
            endpoint_id: self.endpoint_id.clone(),
            subnet_id: self.subnet_id.clone(),
            profile_file: self.profile_file.clone(),
        }
    }
}

/// Dispatch command to appropriate handler
///
/// No subcommand runs first-time setup; everything else works against an
/// already deployed endpoint.
pub fn handle_command(options: GlobalOptions, command: Option<Commands>, setup_args: SetupArgs) -> Result<()> {
    let working_dir = std::env::current_dir().context("Failed to determine working directory")?;
    config::load_dotenv(&working_dir)?;

    let command = match command {
        Some(command) => command,
        None => return setup::handle_setup(&working_dir, &options, setup_args),
    };

    let settings = resolve(&options, &working_dir)?;
    let remote = connect(&settings)?;

    match command {
        Status => status::handle_status(&remote, &settings)?,
        On {
            wait,
            timeout,
            strict,
        } => lifecycle::handle_on(&remote, &settings, wait, timeout, strict)?,
        Off { wait, timeout } => lifecycle::handle_off(&remote, &settings, wait, timeout)?,
        Toggle => lifecycle::handle_toggle(&remote, &settings)?,
    }

    Ok(())
}

fn resolve(options: &GlobalOptions, working_dir: &Path) -> Result<Settings> {
    let settings = config::resolve_settings(&options.overrides(), working_dir, |name| {
        std::env::var(name).ok()
    })?;
    if let Some(path) = &settings.record_path {
        println!("Using setup record {}", path.display());
    }
    Ok(settings)
}

fn connect(settings: &Settings) -> Result<AwsCli> {
    AwsCli::ensure_installed()
        .map_err(|e| crate::error::VpnError::remote("aws-cli", e))?;
    Ok(AwsCli::new(settings.region))
}
