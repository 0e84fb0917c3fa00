use crate::config::DeploymentProfile;
use crate::error::{VpnError, VpnResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// File name suffix of setup records; `<friendly_name>.cvpn.toml`
pub const RECORD_SUFFIX: &str = ".cvpn.toml";

/// Where the generated credential files live on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePaths {
    pub ca_certificate: PathBuf,
    pub server_certificate: PathBuf,
    pub server_key: PathBuf,
    pub client_certificate: PathBuf,
    pub client_key: PathBuf,
}

/// Result of a completed first-time setup, written once per deployment and
/// read back by every later command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupRecord {
    pub profile: DeploymentProfile,
    pub profile_file: PathBuf,
    #[serde(default)]
    pub stack_id: String,
    #[serde(default)]
    pub server_certificate_arn: String,
    #[serde(default)]
    pub credentials: BundlePaths,
    pub created_at: DateTime<Utc>,
}

impl SetupRecord {
    pub fn new(profile: DeploymentProfile, profile_file: PathBuf) -> Self {
        Self {
            profile,
            profile_file,
            stack_id: String::new(),
            server_certificate_arn: String::new(),
            credentials: BundlePaths::default(),
            created_at: Utc::now(),
        }
    }

    pub fn load(path: &Path) -> VpnResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| VpnError::io(format!("Failed to read setup record {}", path.display()), e))?;
        toml::from_str(&content).map_err(|e| VpnError::InvalidProfile {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Writes the record; refuses to replace an existing one
    pub fn save(&self, path: &Path) -> VpnResult<()> {
        if path.exists() {
            return Err(VpnError::InvalidProfile {
                path: path.display().to_string(),
                message: "a setup record already exists here; move it away first".to_string(),
            });
        }
        let content = toml::to_string_pretty(self).map_err(|e| VpnError::InvalidProfile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        fs::write(path, content)
            .map_err(|e| VpnError::io(format!("Failed to write setup record {}", path.display()), e))
    }
}

pub fn record_path(dir: &Path, friendly_name: &str) -> PathBuf {
    dir.join(format!("{}{}", friendly_name, RECORD_SUFFIX))
}

/// Find the setup record in `dir`; the most recently modified wins when there
/// are several
pub fn locate_record(dir: &Path) -> VpnResult<Option<PathBuf>> {
    // glob metacharacters in the directory name must match literally
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let pattern = Path::new(&escaped).join(format!("*{}", RECORD_SUFFIX));
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern).map_err(|e| VpnError::InvalidProfile {
        path: pattern.to_string(),
        message: e.to_string(),
    })?;

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable setup record");
                continue;
            }
        };
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| VpnError::io(format!("Failed to stat {}", path.display()), e))?;
        if newest.as_ref().map_or(true, |(time, _)| modified > *time) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}
