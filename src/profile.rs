// Connection profile materializer: exported client config + client credential -> importable .ovpn
use crate::error::{VpnError, VpnResult};
use crate::pki::Credential;
use crate::remote::ControlPlane;
use crate::retry::{retry_transient, RetryPolicy};
use crate::utils::exec::local;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileFile {
    pub path: PathBuf,
    pub contents: String,
}

/// Put `certificate` and `key` into the `<cert>` and `<key>` blocks of an
/// OpenVPN config, replacing existing blocks or appending new ones
pub fn inject_credentials(template: &str, certificate: &[u8], key: &[u8]) -> VpnResult<String> {
    let certificate = as_text("certificate", certificate)?;
    let key = as_text("private key", key)?;
    let with_cert = set_block(template, "cert", certificate);
    Ok(set_block(&with_cert, "key", key))
}

/// Contents of an inline block, exactly as embedded
pub fn extract_block<'t>(profile: &'t str, tag: &str) -> Option<&'t str> {
    let open = format!("<{}>\n", tag);
    let close = format!("</{}>", tag);
    let start = profile.find(&open)? + open.len();
    let end = profile[start..].find(&close)? + start;
    Some(&profile[start..end])
}

fn as_text<'b>(what: &str, bytes: &'b [u8]) -> VpnResult<&'b str> {
    std::str::from_utf8(bytes).map_err(|e| VpnError::InvalidProfile {
        path: what.to_string(),
        message: format!("not PEM text: {}", e),
    })
}

fn set_block(config: &str, tag: &str, body: &str) -> String {
    let mut block = format!("<{}>\n{}", tag, body);
    if !body.ends_with('\n') {
        block.push('\n');
    }
    block.push_str(&format!("</{}>", tag));

    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    if let Some(start) = config.find(&open) {
        if let Some(rel_end) = config[start..].find(&close) {
            let end = start + rel_end + close.len();
            return format!("{}{}{}", &config[..start], block, &config[end..]);
        }
    }

    let mut out = config.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&block);
    out.push('\n');
    out
}

pub struct ProfileMaterializer<'a, C: ControlPlane + ?Sized> {
    remote: &'a C,
    retry: RetryPolicy,
}

impl<'a, C: ControlPlane + ?Sized> ProfileMaterializer<'a, C> {
    pub fn new(remote: &'a C) -> Self {
        Self {
            remote,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch the endpoint's client configuration, embed `client` and write it
    /// to `output` readable by the owner only
    pub fn materialize(&self, endpoint_id: &str, client: &Credential, output: &Path) -> VpnResult<ProfileFile> {
        info!(endpoint = %endpoint_id, "exporting client configuration");
        let template = retry_transient(&self.retry, "export-client-config", || {
            self.remote
                .fetch_client_config(endpoint_id)
                .map_err(|e| VpnError::remote("export-client-config", e))
        })?;
        let contents = inject_credentials(&template, &client.certificate, &client.private_key)?;

        local::write_private_file(output, contents.as_bytes()).map_err(|e| VpnError::Io {
            context: format!("Failed to write connection profile {}", output.display()),
            source: std::io::Error::other(format!("{:#}", e)),
        })?;
        info!(path = %output.display(), "connection profile written");
        Ok(ProfileFile {
            path: output.to_path_buf(),
            contents,
        })
    }
}
