// Remote control plane - the capability the core depends on, plus the aws CLI backed implementation
mod aws_cli;

pub use aws_cli::AwsCli;

use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Failure of a single remote call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network or throttling class failure; the same call may succeed later
    #[error("transient: {0}")]
    Transient(String),
    /// The remote refused the request; retrying without operator action won't help
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },
}

impl RemoteError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Endpoint as reported by describe-endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescription {
    pub endpoint_id: String,
    pub status_code: String,
}

/// One target-network association of an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationRecord {
    pub association_id: String,
    pub subnet_id: String,
    pub status_code: String,
}

/// PEM files submitted to the certificate manager
#[derive(Debug, Clone)]
pub struct CertificateImport<'a> {
    pub certificate: &'a Path,
    pub private_key: &'a Path,
    pub chain: &'a Path,
}

/// A stack creation request: template body plus named parameters
#[derive(Debug, Clone)]
pub struct StackRequest {
    pub stack_name: String,
    pub template_body: String,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDescription {
    pub stack_id: String,
    pub status: String,
    pub status_reason: Option<String>,
    pub outputs: BTreeMap<String, String>,
}

/// Every remote operation the controller, deployer and materializer need.
///
/// Implementations return the remote acknowledgement codes verbatim; deciding
/// whether a code is acceptable is the caller's job.
pub trait ControlPlane {
    /// `None` when the remote knows no endpoint with this id
    fn describe_endpoint(&self, endpoint_id: &str) -> RemoteResult<Option<EndpointDescription>>;

    /// Returns the acknowledged association status code
    fn associate(&self, endpoint_id: &str, subnet_id: &str) -> RemoteResult<String>;

    /// Creates the `0.0.0.0/0` route via `subnet_id`; returns the acknowledged route status code
    fn create_default_route(&self, endpoint_id: &str, subnet_id: &str) -> RemoteResult<String>;

    fn describe_target_networks(&self, endpoint_id: &str) -> RemoteResult<Vec<AssociationRecord>>;

    /// Returns the acknowledged association status code
    fn disassociate(&self, endpoint_id: &str, association_id: &str) -> RemoteResult<String>;

    /// Returns the certificate ARN
    fn import_certificate(&self, import: &CertificateImport<'_>) -> RemoteResult<String>;

    /// Returns the stack id
    fn create_stack(&self, request: &StackRequest) -> RemoteResult<String>;

    fn describe_stack(&self, stack_id: &str) -> RemoteResult<StackDescription>;

    /// Exported client configuration (an OpenVPN profile without credentials)
    fn fetch_client_config(&self, endpoint_id: &str) -> RemoteResult<String>;
}

/// Route destination that lets all client traffic egress through the subnet
pub const DEFAULT_ROUTE_CIDR: &str = "0.0.0.0/0";
