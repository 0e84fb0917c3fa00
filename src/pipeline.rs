//! First-time setup: credentials, certificate import, stack deployment,
//! connection profile, setup record.
//!
//! Steps run strictly in order and each one gates the next. A failure stops the
//! run and reports what completed and which remote resources now exist, so the
//! operator can decide what to clean up. Nothing is torn down automatically.

use crate::config::record::record_path;
use crate::config::{DeploymentProfile, SetupRecord};
use crate::deployer::InfrastructureDeployer;
use crate::error::{VpnError, VpnResult};
use crate::pki::{BundleSpec, CredentialProvisioner, PkiToolchain};
use crate::profile::{ProfileFile, ProfileMaterializer};
use crate::remote::ControlPlane;
use crate::retry::{Deadline, PollPolicy, RetryPolicy};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    GenerateCredentials,
    ImportCertificate,
    DeployInfrastructure,
    MaterializeProfile,
    PersistRecord,
}

impl SetupStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupStep::GenerateCredentials => "generate-credentials",
            SetupStep::ImportCertificate => "import-certificate",
            SetupStep::DeployInfrastructure => "deploy-infrastructure",
            SetupStep::MaterializeProfile => "materialize-profile",
            SetupStep::PersistRecord => "persist-record",
        }
    }
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the pipeline needs, collected up front
#[derive(Debug, Clone)]
pub struct SetupRequest {
    pub profile: DeploymentProfile,
    /// Directory receiving the pki, the .ovpn and the setup record
    pub output_dir: PathBuf,
    pub template: String,
    pub client_cidr: String,
    pub deploy_timeout: Duration,
}

impl SetupRequest {
    pub fn pki_dir(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}-pki", self.profile.friendly_name))
    }

    pub fn profile_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.ovpn", self.profile.friendly_name))
    }

    pub fn record_path(&self) -> PathBuf {
        record_path(&self.output_dir, &self.profile.friendly_name)
    }
}

#[derive(Debug, Clone)]
pub struct SetupOutcome {
    pub record: SetupRecord,
    pub record_path: PathBuf,
    pub profile_file: ProfileFile,
}

/// Friendly names end up in file names and the stack name
pub fn validate_friendly_name(name: &str) -> VpnResult<()> {
    let valid = name.len() <= 64
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(VpnError::InvalidProfile {
            path: name.to_string(),
            message: "friendly name must start with a letter and contain only letters, digits and '-' (max 64)"
                .to_string(),
        })
    }
}

/// Completed steps and remote leftovers of one run
#[derive(Default)]
struct Progress {
    completed: Vec<SetupStep>,
    created_remotely: Vec<String>,
}

impl Progress {
    fn done(&mut self, step: SetupStep) {
        info!(step = %step, "setup step complete");
        self.completed.push(step);
    }

    fn fail(&self, step: SetupStep, source: VpnError) -> VpnError {
        error!(step = %step, error = %source, "setup step failed");
        VpnError::ProvisioningStepFailed {
            step: step.to_string(),
            completed: self.completed.iter().map(|s| s.to_string()).collect(),
            created_remotely: self.created_remotely.clone(),
            source: Box::new(source),
        }
    }
}

pub struct SetupPipeline<'a, C: ControlPlane + ?Sized, P: PkiToolchain + ?Sized> {
    remote: &'a C,
    pki: &'a P,
    poll: PollPolicy,
    retry: RetryPolicy,
}

impl<'a, C: ControlPlane + ?Sized, P: PkiToolchain + ?Sized> SetupPipeline<'a, C, P> {
    pub fn new(remote: &'a C, pki: &'a P) -> Self {
        Self {
            remote,
            pki,
            poll: PollPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Refuse to start when the run could not finish cleanly anyway
    fn preflight(&self, request: &SetupRequest) -> VpnResult<()> {
        validate_friendly_name(&request.profile.friendly_name)?;
        if request.profile.subnet_id.trim().is_empty() {
            return Err(VpnError::ConfigurationMissing("subnet id".to_string()));
        }
        if request.profile.is_deployed() {
            return Err(VpnError::InvalidProfile {
                path: request.profile.friendly_name.clone(),
                message: format!("already deployed as {}", request.profile.endpoint_id),
            });
        }
        for existing in [request.record_path(), request.profile_path()] {
            if existing.exists() {
                return Err(VpnError::InvalidProfile {
                    path: existing.display().to_string(),
                    message: "already exists; pick another friendly name".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn run(&self, request: &SetupRequest) -> VpnResult<SetupOutcome> {
        self.preflight(request)?;
        let mut progress = Progress::default();

        let spec = BundleSpec::for_deployment(request.pki_dir(), &request.profile.friendly_name);
        let bundle = CredentialProvisioner::new(self.pki)
            .generate(&spec)
            .map_err(|e| progress.fail(SetupStep::GenerateCredentials, e))?;
        progress.done(SetupStep::GenerateCredentials);

        let deployer = InfrastructureDeployer::new(self.remote, request.template.clone())
            .with_client_cidr(request.client_cidr.clone())
            .with_poll(self.poll.clone())
            .with_retry(self.retry.clone());

        let certificate_arn = deployer
            .import_server_certificate(&bundle.server, &bundle.authority.certificate_path)
            .map_err(|e| progress.fail(SetupStep::ImportCertificate, e))?;
        progress
            .created_remotely
            .push(format!("certificate {}", certificate_arn));
        progress.done(SetupStep::ImportCertificate);

        let stack_id = deployer
            .submit(&request.profile, &certificate_arn)
            .map_err(|e| progress.fail(SetupStep::DeployInfrastructure, e))?;
        progress.created_remotely.push(format!("stack {}", stack_id));
        let deadline = Deadline::after(request.deploy_timeout);
        let deployment = deployer
            .wait(&stack_id, &deadline)
            .map_err(|e| progress.fail(SetupStep::DeployInfrastructure, e))?;
        progress
            .created_remotely
            .push(format!("client vpn endpoint {}", deployment.endpoint_id));
        progress.done(SetupStep::DeployInfrastructure);

        let profile = request
            .profile
            .clone()
            .with_endpoint_id(deployment.endpoint_id.clone());

        let profile_file = ProfileMaterializer::new(self.remote)
            .with_retry(self.retry.clone())
            .materialize(&deployment.endpoint_id, bundle.client(), &request.profile_path())
            .map_err(|e| progress.fail(SetupStep::MaterializeProfile, e))?;
        progress.done(SetupStep::MaterializeProfile);

        let mut record = SetupRecord::new(profile, profile_file.path.clone());
        record.stack_id = deployment.stack_id;
        record.server_certificate_arn = certificate_arn;
        record.credentials = bundle.paths();
        let record_path = request.record_path();
        record
            .save(&record_path)
            .map_err(|e| progress.fail(SetupStep::PersistRecord, e))?;
        progress.done(SetupStep::PersistRecord);

        Ok(SetupOutcome {
            record,
            record_path,
            profile_file,
        })
    }
}
