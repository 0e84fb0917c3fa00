// First-time setup: collect parameters, then run the provisioning pipeline
use super::GlobalOptions;
use crate::config::{DeploymentProfile, Region, REGION_VARS, SUBNET_ID_VAR};
use crate::deployer::{TemplateSource, DEFAULT_CLIENT_CIDR};
use crate::error::VpnError;
use crate::pipeline::{validate_friendly_name, SetupPipeline, SetupRequest};
use crate::pki::EasyRsa;
use crate::remote::AwsCli;
use crate::retry::RetryPolicy;
use crate::SetupArgs;
use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

/// `vpn-` followed by eight hex characters
pub fn generate_friendly_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("vpn-{}", &id[..8])
}

/// Empty input takes the default
fn parse_yes_no(input: &str, default: bool) -> Option<bool> {
    match input.trim().to_lowercase().as_str() {
        "" => Some(default),
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

fn read_input(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn prompt(label: &str, default: Option<&str>) -> Result<String> {
    loop {
        let input = match default {
            Some(d) => read_input(&format!("{} [{}]: ", label, d))?,
            None => read_input(&format!("{}: ", label))?,
        };
        if !input.is_empty() {
            return Ok(input);
        }
        if let Some(d) = default {
            return Ok(d.to_string());
        }
        println!("A value is required.");
    }
}

fn confirm(question: &str, default: bool) -> Result<bool> {
    let hint = if default { "[Y/n]" } else { "[y/N]" };
    loop {
        let input = read_input(&format!("{} {}: ", question, hint))?;
        match parse_yes_no(&input, default) {
            Some(answer) => return Ok(answer),
            None => println!("Please answer y or n."),
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn choose_region(args: &SetupArgs) -> Result<Region> {
    if let Some(region) = &args.region {
        return region.parse::<Region>().map_err(anyhow::Error::msg);
    }
    let detected = REGION_VARS.iter().find_map(|var| env_value(var));
    if args.yes {
        let region = detected.ok_or_else(|| {
            VpnError::ConfigurationMissing("region (pass --region or set AWS_REGION)".to_string())
        })?;
        return region.parse::<Region>().map_err(anyhow::Error::msg);
    }
    loop {
        let input = prompt("AWS region", detected.as_deref())?;
        match input.parse::<Region>() {
            Ok(region) => return Ok(region),
            Err(e) => println!("{}", e),
        }
    }
}

fn choose_subnet(options: &GlobalOptions, yes: bool) -> Result<String> {
    if let Some(subnet) = options.subnet_id.clone().filter(|s| !s.trim().is_empty()) {
        return Ok(subnet);
    }
    let detected = env_value(SUBNET_ID_VAR);
    if yes {
        return detected.ok_or_else(|| {
            VpnError::ConfigurationMissing(format!(
                "subnet id (pass --subnet-id or set {})",
                SUBNET_ID_VAR
            ))
            .into()
        });
    }
    prompt("Subnet id to associate", detected.as_deref())
}

fn choose_name(args: &SetupArgs) -> Result<String> {
    if let Some(name) = &args.name {
        validate_friendly_name(name)?;
        return Ok(name.clone());
    }
    let generated = generate_friendly_name();
    if args.yes {
        return Ok(generated);
    }
    loop {
        let name = prompt("Friendly name", Some(&generated))?;
        match validate_friendly_name(&name) {
            Ok(()) => return Ok(name),
            Err(e) => println!("{}", e),
        }
    }
}

fn collect_profile(options: &GlobalOptions, args: &SetupArgs) -> Result<DeploymentProfile> {
    let region = choose_region(args)?;
    let subnet_id = choose_subnet(options, args.yes)?;
    let friendly_name = choose_name(args)?;
    let split_tunnel = if args.split_tunnel || args.yes {
        args.split_tunnel
    } else {
        confirm("Split tunnel (only VPC traffic goes through the VPN)?", false)?
    };
    Ok(DeploymentProfile::new(subnet_id, friendly_name, split_tunnel, region))
}

fn template_source(args: &SetupArgs) -> TemplateSource {
    match (&args.template_file, &args.template_url) {
        (Some(path), _) => TemplateSource::File(path.clone()),
        (None, Some(url)) => TemplateSource::Url(url.clone()),
        (None, None) => TemplateSource::Embedded,
    }
}

pub fn handle_setup(working_dir: &Path, options: &GlobalOptions, args: SetupArgs) -> Result<()> {
    println!("Client VPN setup");
    println!("================");
    println!();

    AwsCli::ensure_installed().map_err(|e| VpnError::remote("aws-cli", e))?;
    let easyrsa = match &args.easyrsa {
        Some(path) => EasyRsa::new(path.clone()),
        None => EasyRsa::discover()?,
    };

    let profile = collect_profile(options, &args)?;
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| working_dir.to_path_buf());

    println!();
    println!("  Region:       {}", profile.region);
    println!("  Subnet:       {}", profile.subnet_id);
    println!("  Name:         {}", profile.friendly_name);
    println!("  Split tunnel: {}", profile.split_tunnel);
    println!("  Output:       {}", output_dir.display());
    println!();
    if !args.yes && !confirm("Create these resources in your AWS account?", true)? {
        anyhow::bail!("Setup cancelled");
    }

    let template = template_source(&args)
        .load(&RetryPolicy::default())
        .context("Failed to load the CloudFormation template")?;

    let request = SetupRequest {
        profile,
        output_dir,
        template,
        client_cidr: DEFAULT_CLIENT_CIDR.to_string(),
        deploy_timeout: Duration::from_secs(args.deploy_timeout),
    };

    println!("Provisioning; the stack alone usually takes 5-10 minutes...");
    let remote = AwsCli::new(Some(request.profile.region));
    let outcome = SetupPipeline::new(&remote, &easyrsa).run(&request)?;

    println!();
    println!("✓ Credentials generated in {}", request.pki_dir().display());
    println!("✓ Endpoint {} deployed", outcome.record.profile.endpoint_id);
    println!("✓ Connection profile written to {}", outcome.profile_file.path.display());
    println!("✓ Setup record saved to {}", outcome.record_path.display());
    println!();
    println!("Turn the VPN on with 'cvpn on' and import the .ovpn file into your client.");
    Ok(())
}
