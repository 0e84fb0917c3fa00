use crate::error::{VpnError, VpnResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod record;

pub use record::{locate_record, BundlePaths, SetupRecord, RECORD_SUFFIX};

pub const ENDPOINT_ID_VAR: &str = "ENDPOINT_ID";
pub const SUBNET_ID_VAR: &str = "SUBNET_ID";
pub const REGION_VARS: &[&str] = &["AWS_REGION", "AWS_DEFAULT_REGION"];

/// Regions where Client VPN endpoints can be deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Region {
    UsEast1,
    UsEast2,
    UsWest1,
    UsWest2,
    CaCentral1,
    EuWest1,
    EuWest2,
    EuWest3,
    EuCentral1,
    EuNorth1,
    ApSouth1,
    ApNortheast1,
    ApNortheast2,
    ApSoutheast1,
    ApSoutheast2,
    SaEast1,
}

impl Region {
    pub fn all() -> &'static [Region] {
        &[
            Region::UsEast1,
            Region::UsEast2,
            Region::UsWest1,
            Region::UsWest2,
            Region::CaCentral1,
            Region::EuWest1,
            Region::EuWest2,
            Region::EuWest3,
            Region::EuCentral1,
            Region::EuNorth1,
            Region::ApSouth1,
            Region::ApNortheast1,
            Region::ApNortheast2,
            Region::ApSoutheast1,
            Region::ApSoutheast2,
            Region::SaEast1,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::UsEast1 => "us-east-1",
            Region::UsEast2 => "us-east-2",
            Region::UsWest1 => "us-west-1",
            Region::UsWest2 => "us-west-2",
            Region::CaCentral1 => "ca-central-1",
            Region::EuWest1 => "eu-west-1",
            Region::EuWest2 => "eu-west-2",
            Region::EuWest3 => "eu-west-3",
            Region::EuCentral1 => "eu-central-1",
            Region::EuNorth1 => "eu-north-1",
            Region::ApSouth1 => "ap-south-1",
            Region::ApNortheast1 => "ap-northeast-1",
            Region::ApNortheast2 => "ap-northeast-2",
            Region::ApSoutheast1 => "ap-southeast-1",
            Region::ApSoutheast2 => "ap-southeast-2",
            Region::SaEast1 => "sa-east-1",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Region::all()
            .iter()
            .copied()
            .find(|r| r.as_str() == wanted)
            .ok_or_else(|| {
                let supported: Vec<&str> = Region::all().iter().map(|r| r.as_str()).collect();
                format!(
                    "unsupported region '{}' (supported: {})",
                    s,
                    supported.join(", ")
                )
            })
    }
}

impl TryFrom<String> for Region {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Region> for String {
    fn from(region: Region) -> Self {
        region.as_str().to_string()
    }
}

/// One endpoint deployment, as entered during setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentProfile {
    /// Assigned by the remote after deployment; empty before that
    #[serde(default)]
    pub endpoint_id: String,
    pub subnet_id: String,
    pub friendly_name: String,
    pub split_tunnel: bool,
    pub region: Region,
}

impl DeploymentProfile {
    pub fn new(
        subnet_id: impl Into<String>,
        friendly_name: impl Into<String>,
        split_tunnel: bool,
        region: Region,
    ) -> Self {
        Self {
            endpoint_id: String::new(),
            subnet_id: subnet_id.into(),
            friendly_name: friendly_name.into(),
            split_tunnel,
            region,
        }
    }

    pub fn is_deployed(&self) -> bool {
        !self.endpoint_id.is_empty()
    }

    /// Fills in the endpoint id; only the first assignment sticks
    pub fn with_endpoint_id(mut self, endpoint_id: impl Into<String>) -> Self {
        if self.endpoint_id.is_empty() {
            self.endpoint_id = endpoint_id.into();
        }
        self
    }
}

/// Values given explicitly on the command line
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub endpoint_id: Option<String>,
    pub subnet_id: Option<String>,
    pub profile_file: Option<PathBuf>,
}

/// Identifiers every lifecycle command works against, resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub endpoint_id: String,
    pub subnet_id: String,
    pub region: Option<Region>,
    /// Setup record the values came from, if any
    pub record_path: Option<PathBuf>,
}

/// Load `.env` from the working directory when one exists
pub fn load_dotenv(working_dir: &Path) -> VpnResult<()> {
    let env_file = working_dir.join(".env");
    if env_file.exists() {
        dotenv::from_path(&env_file).map_err(|e| VpnError::InvalidProfile {
            path: env_file.display().to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

/// Resolve settings: explicit values win over the setup record, which wins
/// over environment variables.
///
/// `env` is the variable lookup; the binary passes `std::env::var`, tests
/// pass a map.
pub fn resolve_settings<E>(overrides: &Overrides, working_dir: &Path, env: E) -> VpnResult<Settings>
where
    E: Fn(&str) -> Option<String>,
{
    let record_path = match &overrides.profile_file {
        Some(path) => Some(path.clone()),
        None => locate_record(working_dir)?,
    };
    let record = match &record_path {
        Some(path) => Some(SetupRecord::load(path)?),
        None => None,
    };
    if let Some(path) = &record_path {
        tracing::debug!(record = %path.display(), "using setup record");
    }

    let lookup = |name: &str| env(name).filter(|v| !v.trim().is_empty());
    let from_record = |pick: fn(&DeploymentProfile) -> &str| {
        record
            .as_ref()
            .map(|r| pick(&r.profile).to_string())
            .filter(|v| !v.is_empty())
    };

    let endpoint_id = non_empty(overrides.endpoint_id.clone())
        .or_else(|| from_record(|p| p.endpoint_id.as_str()))
        .or_else(|| lookup(ENDPOINT_ID_VAR))
        .ok_or_else(|| {
            VpnError::ConfigurationMissing(format!(
                "endpoint id (pass --endpoint-id, point -f at a setup record, or set {})",
                ENDPOINT_ID_VAR
            ))
        })?;
    let subnet_id = non_empty(overrides.subnet_id.clone())
        .or_else(|| from_record(|p| p.subnet_id.as_str()))
        .or_else(|| lookup(SUBNET_ID_VAR))
        .ok_or_else(|| {
            VpnError::ConfigurationMissing(format!(
                "subnet id (pass --subnet-id, point -f at a setup record, or set {})",
                SUBNET_ID_VAR
            ))
        })?;

    let region = match &record {
        Some(r) => Some(r.profile.region),
        None => REGION_VARS.iter().find_map(|var| {
            let value = lookup(var)?;
            match value.parse::<Region>() {
                Ok(region) => Some(region),
                Err(e) => {
                    tracing::warn!(variable = %var, "{}; leaving region to the aws CLI", e);
                    None
                }
            }
        }),
    };

    Ok(Settings {
        endpoint_id,
        subnet_id,
        region,
        record_path,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
