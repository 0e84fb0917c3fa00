use super::{
    AssociationRecord, CertificateImport, ControlPlane, EndpointDescription, RemoteError,
    RemoteResult, StackDescription, StackRequest, DEFAULT_ROUTE_CIDR,
};
use crate::config::Region;
use crate::utils::exec::{failure_message, local};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;

const AWS: &str = "aws";

/// Error codes the AWS APIs use for throttling and service-side hiccups
const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "RequestTimeout",
    "RequestTimeoutException",
    "ServiceUnavailable",
    "InternalError",
    "InternalFailure",
];

/// Messages the CLI prints when it never got an answer
const TRANSIENT_MESSAGES: &[&str] = &[
    "Could not connect to the endpoint URL",
    "Connect timeout",
    "Read timeout",
    "Connection was closed",
];

/// Control plane backed by the `aws` command-line tool.
///
/// Credentials and profile selection are left to the CLI's own resolution
/// (environment, `~/.aws/config`). The region is pinned when known, otherwise
/// the CLI's configured default applies.
pub struct AwsCli {
    region: Option<Region>,
}

impl AwsCli {
    pub fn new(region: Option<Region>) -> Self {
        Self { region }
    }

    /// Fails early with a readable message when the CLI is not installed
    pub fn ensure_installed() -> RemoteResult<()> {
        if local::check_command_exists(AWS) {
            Ok(())
        } else {
            Err(RemoteError::rejected(
                "ToolNotFound",
                "the aws CLI is not installed or not on PATH; install it and run 'aws configure'",
            ))
        }
    }

    fn call<T: DeserializeOwned>(&self, service: &str, operation: &str, args: &[&str]) -> RemoteResult<T> {
        let mut full: Vec<&str> = vec![service, operation];
        full.extend_from_slice(args);
        if let Some(region) = self.region {
            full.extend_from_slice(&["--region", region.as_str()]);
        }
        full.extend_from_slice(&["--output", "json"]);

        let output = local::execute(AWS, &full)
            .map_err(|e| RemoteError::rejected("ExecFailed", format!("{:#}", e)))?;
        if !output.status.success() {
            return Err(classify_failure(&failure_message(&output)));
        }
        parse_json(&output.stdout)
    }
}

/// Split an `aws` failure into transient vs rejected using the error code in
/// `An error occurred (Code) when calling ...`.
pub(crate) fn classify_failure(stderr: &str) -> RemoteError {
    if let Some(code) = extract_error_code(stderr) {
        if TRANSIENT_CODES.contains(&code.as_str()) {
            return RemoteError::Transient(stderr.to_string());
        }
        return RemoteError::rejected(code, stderr);
    }
    if TRANSIENT_MESSAGES.iter().any(|m| stderr.contains(m)) {
        return RemoteError::Transient(stderr.to_string());
    }
    RemoteError::rejected("Unknown", stderr)
}

fn extract_error_code(stderr: &str) -> Option<String> {
    let start = stderr.find("An error occurred (")? + "An error occurred (".len();
    let end = stderr[start..].find(')')? + start;
    Some(stderr[start..end].to_string())
}

fn parse_json<T: DeserializeOwned>(stdout: &[u8]) -> RemoteResult<T> {
    serde_json::from_slice(stdout)
        .map_err(|e| RemoteError::rejected("MalformedResponse", e.to_string()))
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Status {
    code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatusOnly {
    status: Status,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeEndpointsOutput {
    #[serde(default)]
    client_vpn_endpoints: Vec<EndpointEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointEntry {
    client_vpn_endpoint_id: String,
    status: Status,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeTargetNetworksOutput {
    #[serde(default)]
    client_vpn_target_networks: Vec<TargetNetworkEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TargetNetworkEntry {
    association_id: String,
    target_network_id: String,
    status: Status,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImportCertificateOutput {
    certificate_arn: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateStackOutput {
    stack_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStacksOutput {
    #[serde(default)]
    stacks: Vec<StackEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackEntry {
    stack_id: String,
    stack_status: String,
    stack_status_reason: Option<String>,
    #[serde(default)]
    outputs: Vec<StackOutput>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackOutput {
    output_key: String,
    output_value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExportClientConfigOutput {
    client_configuration: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "PascalCase")]
struct StackParameter<'a> {
    parameter_key: &'a str,
    parameter_value: &'a str,
}

fn into_stack_description(entry: StackEntry) -> StackDescription {
    StackDescription {
        stack_id: entry.stack_id,
        status: entry.stack_status,
        status_reason: entry.stack_status_reason,
        outputs: entry
            .outputs
            .into_iter()
            .map(|o| (o.output_key, o.output_value))
            .collect::<BTreeMap<_, _>>(),
    }
}

impl ControlPlane for AwsCli {
    fn describe_endpoint(&self, endpoint_id: &str) -> RemoteResult<Option<EndpointDescription>> {
        let result: RemoteResult<DescribeEndpointsOutput> = self.call(
            "ec2",
            "describe-client-vpn-endpoints",
            &["--client-vpn-endpoint-ids", endpoint_id],
        );
        let output = match result {
            Ok(output) => output,
            Err(RemoteError::Rejected { code, .. }) if code.ends_with(".NotFound") => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };
        Ok(output
            .client_vpn_endpoints
            .into_iter()
            .next()
            .map(|entry| EndpointDescription {
                endpoint_id: entry.client_vpn_endpoint_id,
                status_code: entry.status.code,
            }))
    }

    fn associate(&self, endpoint_id: &str, subnet_id: &str) -> RemoteResult<String> {
        let output: StatusOnly = self.call(
            "ec2",
            "associate-client-vpn-target-network",
            &["--client-vpn-endpoint-id", endpoint_id, "--subnet-id", subnet_id],
        )?;
        Ok(output.status.code)
    }

    fn create_default_route(&self, endpoint_id: &str, subnet_id: &str) -> RemoteResult<String> {
        let output: StatusOnly = self.call(
            "ec2",
            "create-client-vpn-route",
            &[
                "--client-vpn-endpoint-id",
                endpoint_id,
                "--destination-cidr-block",
                DEFAULT_ROUTE_CIDR,
                "--target-vpc-subnet-id",
                subnet_id,
            ],
        )?;
        Ok(output.status.code)
    }

    fn describe_target_networks(&self, endpoint_id: &str) -> RemoteResult<Vec<AssociationRecord>> {
        let output: DescribeTargetNetworksOutput = self.call(
            "ec2",
            "describe-client-vpn-target-networks",
            &["--client-vpn-endpoint-id", endpoint_id],
        )?;
        Ok(output
            .client_vpn_target_networks
            .into_iter()
            .map(|entry| AssociationRecord {
                association_id: entry.association_id,
                subnet_id: entry.target_network_id,
                status_code: entry.status.code,
            })
            .collect())
    }

    fn disassociate(&self, endpoint_id: &str, association_id: &str) -> RemoteResult<String> {
        let output: StatusOnly = self.call(
            "ec2",
            "disassociate-client-vpn-target-network",
            &[
                "--client-vpn-endpoint-id",
                endpoint_id,
                "--association-id",
                association_id,
            ],
        )?;
        Ok(output.status.code)
    }

    fn import_certificate(&self, import: &CertificateImport<'_>) -> RemoteResult<String> {
        let certificate = format!("fileb://{}", import.certificate.display());
        let private_key = format!("fileb://{}", import.private_key.display());
        let chain = format!("fileb://{}", import.chain.display());
        let output: ImportCertificateOutput = self.call(
            "acm",
            "import-certificate",
            &[
                "--certificate",
                &certificate,
                "--private-key",
                &private_key,
                "--certificate-chain",
                &chain,
            ],
        )?;
        Ok(output.certificate_arn)
    }

    fn create_stack(&self, request: &StackRequest) -> RemoteResult<String> {
        let parameters: Vec<StackParameter<'_>> = request
            .parameters
            .iter()
            .map(|(key, value)| StackParameter {
                parameter_key: key,
                parameter_value: value,
            })
            .collect();
        let parameters = serde_json::to_string(&parameters)
            .map_err(|e| RemoteError::rejected("InvalidParameters", e.to_string()))?;
        let output: CreateStackOutput = self.call(
            "cloudformation",
            "create-stack",
            &[
                "--stack-name",
                &request.stack_name,
                "--template-body",
                &request.template_body,
                "--parameters",
                &parameters,
            ],
        )?;
        Ok(output.stack_id)
    }

    fn describe_stack(&self, stack_id: &str) -> RemoteResult<StackDescription> {
        let output: DescribeStacksOutput =
            self.call("cloudformation", "describe-stacks", &["--stack-name", stack_id])?;
        output
            .stacks
            .into_iter()
            .next()
            .map(into_stack_description)
            .ok_or_else(|| RemoteError::rejected("StackNotFound", format!("stack {} not found", stack_id)))
    }

    fn fetch_client_config(&self, endpoint_id: &str) -> RemoteResult<String> {
        let output: ExportClientConfigOutput = self.call(
            "ec2",
            "export-client-vpn-client-configuration",
            &["--client-vpn-endpoint-id", endpoint_id],
        )?;
        Ok(output.client_configuration)
    }
}
