use crate::controller::EndpointAssociationState;
use crate::remote::RemoteError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error kinds surfaced to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigurationMissing,
    NoEndpointFound,
    UnexpectedRemoteState,
    AmbiguousState,
    NoActiveAssociation,
    TransientRemoteError,
    RemoteRejected,
    ProvisioningStepFailed,
    RouteMissing,
    DeadlineExceeded,
    Toolchain,
    InvalidProfile,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ConfigurationMissing => "ConfigurationMissing",
            ErrorKind::NoEndpointFound => "NoEndpointFound",
            ErrorKind::UnexpectedRemoteState => "UnexpectedRemoteState",
            ErrorKind::AmbiguousState => "AmbiguousState",
            ErrorKind::NoActiveAssociation => "NoActiveAssociation",
            ErrorKind::TransientRemoteError => "TransientRemoteError",
            ErrorKind::RemoteRejected => "RemoteRejected",
            ErrorKind::ProvisioningStepFailed => "ProvisioningStepFailed",
            ErrorKind::RouteMissing => "RouteMissing",
            ErrorKind::DeadlineExceeded => "DeadlineExceeded",
            ErrorKind::Toolchain => "Toolchain",
            ErrorKind::InvalidProfile => "InvalidProfile",
            ErrorKind::Io => "Io",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum VpnError {
    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),

    #[error("no client vpn endpoint found with id {0}")]
    NoEndpointFound(String),

    #[error("unexpected remote state after {operation}: {code}")]
    UnexpectedRemoteState { operation: String, code: String },

    #[error("endpoint {endpoint} is {state}; retry once the pending transition settles")]
    AmbiguousState {
        endpoint: String,
        state: EndpointAssociationState,
    },

    #[error("no target network is associated with endpoint {0}")]
    NoActiveAssociation(String),

    #[error("transient remote error during {operation}: {message}")]
    TransientRemoteError { operation: String, message: String },

    #[error("remote rejected {operation} ({code}): {message}")]
    RemoteRejected {
        operation: String,
        code: String,
        message: String,
    },

    #[error("setup failed at step '{step}': {source}{}", summarize(.completed, .created_remotely))]
    ProvisioningStepFailed {
        step: String,
        completed: Vec<String>,
        created_remotely: Vec<String>,
        #[source]
        source: Box<VpnError>,
    },

    /// The association was requested but the default route could not be
    /// created; `on` alone can't repair this once the association settles
    #[error("association of {endpoint} was requested but the default route is missing: {source}; run 'cvpn off' and then 'cvpn on' once the endpoint has settled")]
    RouteMissing {
        endpoint: String,
        #[source]
        source: Box<VpnError>,
    },

    #[error("{operation} did not finish within {waited:?}")]
    DeadlineExceeded { operation: String, waited: Duration },

    #[error("{tool} failed: {message}")]
    Toolchain { tool: String, message: String },

    #[error("invalid profile {path}: {message}")]
    InvalidProfile { path: String, message: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn summarize(completed: &[String], created: &[String]) -> String {
    let mut out = String::new();
    if !completed.is_empty() {
        out.push_str(&format!("\n  completed steps: {}", completed.join(", ")));
    }
    if created.is_empty() {
        out.push_str("\n  nothing was created remotely");
    } else {
        out.push_str("\n  created remotely (clean up manually if unwanted):");
        for resource in created {
            out.push_str(&format!("\n    - {}", resource));
        }
    }
    out
}

impl VpnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigurationMissing(_) => ErrorKind::ConfigurationMissing,
            Self::NoEndpointFound(_) => ErrorKind::NoEndpointFound,
            Self::UnexpectedRemoteState { .. } => ErrorKind::UnexpectedRemoteState,
            Self::AmbiguousState { .. } => ErrorKind::AmbiguousState,
            Self::NoActiveAssociation(_) => ErrorKind::NoActiveAssociation,
            Self::TransientRemoteError { .. } => ErrorKind::TransientRemoteError,
            Self::RemoteRejected { .. } => ErrorKind::RemoteRejected,
            Self::ProvisioningStepFailed { .. } => ErrorKind::ProvisioningStepFailed,
            Self::RouteMissing { .. } => ErrorKind::RouteMissing,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::Toolchain { .. } => ErrorKind::Toolchain,
            Self::InvalidProfile { .. } => ErrorKind::InvalidProfile,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Only transient remote failures are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientRemoteError { .. })
    }

    pub fn remote(operation: &str, err: RemoteError) -> Self {
        match err {
            RemoteError::Transient(message) => Self::TransientRemoteError {
                operation: operation.to_string(),
                message,
            },
            RemoteError::Rejected { code, message } => Self::RemoteRejected {
                operation: operation.to_string(),
                code,
                message,
            },
        }
    }

    pub fn unexpected(operation: &str, code: impl Into<String>) -> Self {
        Self::UnexpectedRemoteState {
            operation: operation.to_string(),
            code: code.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn toolchain(tool: &str, message: impl Into<String>) -> Self {
        Self::Toolchain {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

pub type VpnResult<T> = Result<T, VpnError>;
