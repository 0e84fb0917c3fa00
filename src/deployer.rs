use crate::config::DeploymentProfile;
use crate::error::{VpnError, VpnResult};
use crate::pki::Credential;
use crate::remote::{CertificateImport, ControlPlane, StackRequest};
use crate::retry::{poll_until, retry_transient, Deadline, Poll, PollPolicy, RetryPolicy};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Template shipped with the binary
pub const EMBEDDED_TEMPLATE: &str = include_str!("../templates/client-vpn-endpoint.yaml");

/// Stack output that carries the endpoint id
pub const ENDPOINT_OUTPUT: &str = "ClientVpnEndpointId";

pub const DEFAULT_CLIENT_CIDR: &str = "10.250.0.0/22";

/// Where the infrastructure template comes from
#[derive(Debug, Clone, Default)]
pub enum TemplateSource {
    #[default]
    Embedded,
    File(PathBuf),
    Url(String),
}

impl TemplateSource {
    pub fn load(&self, retry: &RetryPolicy) -> VpnResult<String> {
        match self {
            TemplateSource::Embedded => Ok(EMBEDDED_TEMPLATE.to_string()),
            TemplateSource::File(path) => std::fs::read_to_string(path)
                .map_err(|e| VpnError::io(format!("Failed to read template {}", path.display()), e)),
            TemplateSource::Url(url) => retry_transient(retry, "download-template", || download(url)),
        }
    }
}

fn download(url: &str) -> VpnResult<String> {
    info!(url = %url, "downloading template");
    let to_error = |e: reqwest::Error| {
        if e.is_timeout() || e.is_connect() {
            VpnError::TransientRemoteError {
                operation: "download-template".to_string(),
                message: e.to_string(),
            }
        } else {
            VpnError::RemoteRejected {
                operation: "download-template".to_string(),
                code: e
                    .status()
                    .map(|s| s.as_u16().to_string())
                    .unwrap_or_else(|| "request".to_string()),
                message: e.to_string(),
            }
        }
    };
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(to_error)?;
    client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.text())
        .map_err(to_error)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentResult {
    pub endpoint_id: String,
    pub stack_id: String,
}

/// Classification of a stack status string
#[derive(Debug, PartialEq, Eq)]
enum StackPhase {
    InProgress,
    Complete,
    Failed,
}

fn stack_phase(status: &str) -> StackPhase {
    match status {
        "CREATE_COMPLETE" => StackPhase::Complete,
        // A rollback means creation failed even while it is still running
        s if s.contains("ROLLBACK") || s.ends_with("_FAILED") => StackPhase::Failed,
        s if s.ends_with("_IN_PROGRESS") => StackPhase::InProgress,
        _ => StackPhase::Failed,
    }
}

/// CloudFormation stack names: letters, digits and hyphens, starting with a letter
pub fn stack_name(friendly_name: &str) -> String {
    format!("cvpn-{}", friendly_name)
}

pub struct InfrastructureDeployer<'a, C: ControlPlane + ?Sized> {
    remote: &'a C,
    template: String,
    client_cidr: String,
    poll: PollPolicy,
    retry: RetryPolicy,
}

impl<'a, C: ControlPlane + ?Sized> InfrastructureDeployer<'a, C> {
    pub fn new(remote: &'a C, template: String) -> Self {
        Self {
            remote,
            template,
            client_cidr: DEFAULT_CLIENT_CIDR.to_string(),
            poll: PollPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_client_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.client_cidr = cidr.into();
        self
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Import the server certificate (with its CA as chain); returns the ARN the
    /// template references
    pub fn import_server_certificate(&self, server: &Credential, ca_certificate: &Path) -> VpnResult<String> {
        info!(name = %server.name, "importing server certificate");
        let import = CertificateImport {
            certificate: &server.certificate_path,
            private_key: &server.key_path,
            chain: ca_certificate,
        };
        self.remote
            .import_certificate(&import)
            .map_err(|e| VpnError::remote("import-certificate", e))
    }

    pub fn parameters(&self, profile: &DeploymentProfile, server_certificate_arn: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("FriendlyName".to_string(), profile.friendly_name.clone()),
            ("SubnetId".to_string(), profile.subnet_id.clone()),
            ("SplitTunnel".to_string(), profile.split_tunnel.to_string()),
            ("ServerCertificateArn".to_string(), server_certificate_arn.to_string()),
            ("ClientCidrBlock".to_string(), self.client_cidr.clone()),
        ])
    }

    /// Create the stack; returns its id without waiting
    pub fn submit(&self, profile: &DeploymentProfile, server_certificate_arn: &str) -> VpnResult<String> {
        let request = StackRequest {
            stack_name: stack_name(&profile.friendly_name),
            template_body: self.template.clone(),
            parameters: self.parameters(profile, server_certificate_arn),
        };
        info!(stack = %request.stack_name, region = %profile.region, "creating stack");
        self.remote
            .create_stack(&request)
            .map_err(|e| VpnError::remote("create-stack", e))
    }

    /// Poll the stack until it completes or fails. Failure diagnostics are
    /// returned as the remote reported them; nothing is rolled back here.
    pub fn wait(&self, stack_id: &str, deadline: &Deadline) -> VpnResult<DeploymentResult> {
        poll_until(deadline, &self.poll, "deploy-infrastructure", || {
            let stack = retry_transient(&self.retry, "describe-stack", || {
                self.remote
                    .describe_stack(stack_id)
                    .map_err(|e| VpnError::remote("describe-stack", e))
            })?;
            debug!(stack = %stack_id, status = %stack.status, "stack status");
            match stack_phase(&stack.status) {
                StackPhase::InProgress => Ok(Poll::Pending(stack.status)),
                StackPhase::Failed => Err(VpnError::RemoteRejected {
                    operation: "deploy-infrastructure".to_string(),
                    code: stack.status,
                    message: stack
                        .status_reason
                        .unwrap_or_else(|| "no reason reported".to_string()),
                }),
                StackPhase::Complete => {
                    let endpoint_id = stack
                        .outputs
                        .get(ENDPOINT_OUTPUT)
                        .cloned()
                        .ok_or_else(|| {
                            VpnError::unexpected(
                                "deploy-infrastructure",
                                format!("{} without {} output", stack.status, ENDPOINT_OUTPUT),
                            )
                        })?;
                    Ok(Poll::Ready(DeploymentResult {
                        endpoint_id,
                        stack_id: stack.stack_id,
                    }))
                }
            }
        })
    }

    /// Submit and wait in one go
    pub fn deploy(
        &self,
        profile: &DeploymentProfile,
        server_certificate_arn: &str,
        deadline: &Deadline,
    ) -> VpnResult<DeploymentResult> {
        let stack_id = self.submit(profile, server_certificate_arn)?;
        self.wait(&stack_id, deadline)
    }
}
