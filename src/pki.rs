//! Credential provisioning for mutual-TLS endpoint authentication.
//!
//! The heavy lifting is delegated to an external PKI toolchain (easy-rsa) behind
//! [`PkiToolchain`]; this module sequences it and collects the results into a
//! [`CredentialBundle`].

use crate::config::BundlePaths;
use crate::error::{VpnError, VpnResult};
use crate::utils::exec::{failure_message, local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Certificate/key file pair produced by the toolchain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedPaths {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

/// External PKI operations, run against a scoped working directory
pub trait PkiToolchain {
    fn init_pki(&self, workdir: &Path) -> VpnResult<()>;

    /// Returns the CA certificate path
    fn build_ca(&self, workdir: &Path, common_name: &str) -> VpnResult<PathBuf>;

    fn build_server(&self, workdir: &Path, name: &str) -> VpnResult<IssuedPaths>;

    fn build_client(&self, workdir: &Path, name: &str) -> VpnResult<IssuedPaths>;
}

/// easy-rsa 3 driven in batch mode; every key is issued without a passphrase
pub struct EasyRsa {
    program: PathBuf,
}

impl EasyRsa {
    pub const PROGRAM: &'static str = "easyrsa";

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Locate `easyrsa` on PATH
    pub fn discover() -> VpnResult<Self> {
        which::which(Self::PROGRAM).map(Self::new).map_err(|_| {
            VpnError::toolchain(
                Self::PROGRAM,
                "easyrsa not found on PATH; install easy-rsa 3 or pass --easyrsa <path>",
            )
        })
    }

    fn pki_dir(workdir: &Path) -> PathBuf {
        workdir.join("pki")
    }

    fn run(&self, workdir: &Path, args: &[&str], common_name: Option<&str>) -> VpnResult<()> {
        let pki_dir = Self::pki_dir(workdir).to_string_lossy().into_owned();
        let mut envs = vec![("EASYRSA_BATCH", "1"), ("EASYRSA_PKI", pki_dir.as_str())];
        if let Some(cn) = common_name {
            envs.push(("EASYRSA_REQ_CN", cn));
        }
        let program = self.program.to_string_lossy().into_owned();
        let output = local::execute_in(&program, args, workdir, &envs)
            .map_err(|e| VpnError::toolchain(Self::PROGRAM, format!("{:#}", e)))?;
        if !output.status.success() {
            return Err(VpnError::toolchain(
                Self::PROGRAM,
                format!("{} failed: {}", args.join(" "), failure_message(&output)),
            ));
        }
        Ok(())
    }

    fn issued(workdir: &Path, name: &str) -> IssuedPaths {
        let pki = Self::pki_dir(workdir);
        IssuedPaths {
            certificate: pki.join("issued").join(format!("{}.crt", name)),
            private_key: pki.join("private").join(format!("{}.key", name)),
        }
    }
}

impl PkiToolchain for EasyRsa {
    fn init_pki(&self, workdir: &Path) -> VpnResult<()> {
        self.run(workdir, &["init-pki"], None)
    }

    fn build_ca(&self, workdir: &Path, common_name: &str) -> VpnResult<PathBuf> {
        self.run(workdir, &["build-ca", "nopass"], Some(common_name))?;
        Ok(Self::pki_dir(workdir).join("ca.crt"))
    }

    fn build_server(&self, workdir: &Path, name: &str) -> VpnResult<IssuedPaths> {
        self.run(workdir, &["build-server-full", name, "nopass"], None)?;
        Ok(Self::issued(workdir, name))
    }

    fn build_client(&self, workdir: &Path, name: &str) -> VpnResult<IssuedPaths> {
        self.run(workdir, &["build-client-full", name, "nopass"], None)?;
        Ok(Self::issued(workdir, name))
    }
}

/// What to generate
#[derive(Debug, Clone)]
pub struct BundleSpec {
    pub workdir: PathBuf,
    pub ca_common_name: String,
    pub server_name: String,
    pub client_names: Vec<String>,
}

impl BundleSpec {
    /// Names in the style AWS documents for Client VPN mutual authentication
    pub fn for_deployment(workdir: PathBuf, friendly_name: &str) -> Self {
        Self {
            workdir,
            ca_common_name: format!("{}-ca", friendly_name),
            server_name: "server".to_string(),
            client_names: vec!["client1.domain.tld".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateAuthority {
    pub name: String,
    pub certificate: Vec<u8>,
    pub certificate_path: PathBuf,
}

/// One certificate/key pair; bytes are exactly what the toolchain wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub name: String,
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
    pub certificate_path: PathBuf,
    pub key_path: PathBuf,
}

impl Credential {
    fn read(name: &str, paths: IssuedPaths) -> VpnResult<Self> {
        Ok(Self {
            name: name.to_string(),
            certificate: read_material(&paths.certificate)?,
            private_key: read_material(&paths.private_key)?,
            certificate_path: paths.certificate,
            key_path: paths.private_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pub authority: CertificateAuthority,
    pub server: Credential,
    /// Never empty
    pub clients: Vec<Credential>,
}

impl CredentialBundle {
    /// The client credential embedded in the connection profile
    pub fn client(&self) -> &Credential {
        &self.clients[0]
    }

    pub fn paths(&self) -> BundlePaths {
        BundlePaths {
            ca_certificate: self.authority.certificate_path.clone(),
            server_certificate: self.server.certificate_path.clone(),
            server_key: self.server.key_path.clone(),
            client_certificate: self.client().certificate_path.clone(),
            client_key: self.client().key_path.clone(),
        }
    }
}

fn read_material(path: &Path) -> VpnResult<Vec<u8>> {
    let bytes = fs::read(path)
        .map_err(|e| VpnError::io(format!("Failed to read {}", path.display()), e))?;
    if bytes.is_empty() {
        return Err(VpnError::toolchain(
            EasyRsa::PROGRAM,
            format!("{} is empty", path.display()),
        ));
    }
    Ok(bytes)
}

pub struct CredentialProvisioner<'a, P: PkiToolchain + ?Sized> {
    toolchain: &'a P,
}

impl<'a, P: PkiToolchain + ?Sized> CredentialProvisioner<'a, P> {
    pub fn new(toolchain: &'a P) -> Self {
        Self { toolchain }
    }

    /// Build a CA, a server pair and the client pairs. Any failing step fails
    /// the whole run; a partial bundle is never returned.
    pub fn generate(&self, spec: &BundleSpec) -> VpnResult<CredentialBundle> {
        if spec.client_names.is_empty() {
            return Err(VpnError::toolchain(
                EasyRsa::PROGRAM,
                "at least one client certificate is required",
            ));
        }
        prepare_workdir(&spec.workdir)?;

        info!(workdir = %spec.workdir.display(), "initializing pki");
        self.toolchain.init_pki(&spec.workdir)?;

        info!(common_name = %spec.ca_common_name, "building certificate authority");
        let ca_path = self.toolchain.build_ca(&spec.workdir, &spec.ca_common_name)?;
        let authority = CertificateAuthority {
            name: spec.ca_common_name.clone(),
            certificate: read_material(&ca_path)?,
            certificate_path: ca_path,
        };

        info!(name = %spec.server_name, "issuing server certificate");
        let server_paths = self.toolchain.build_server(&spec.workdir, &spec.server_name)?;
        let server = Credential::read(&spec.server_name, server_paths)?;

        let mut clients = Vec::with_capacity(spec.client_names.len());
        for name in &spec.client_names {
            info!(name = %name, "issuing client certificate");
            let paths = self.toolchain.build_client(&spec.workdir, name)?;
            clients.push(Credential::read(name, paths)?);
        }

        Ok(CredentialBundle {
            authority,
            server,
            clients,
        })
    }
}

/// The working directory must be new or empty so two CAs never mix
fn prepare_workdir(workdir: &Path) -> VpnResult<()> {
    if workdir.exists() {
        let mut entries = fs::read_dir(workdir)
            .map_err(|e| VpnError::io(format!("Failed to read {}", workdir.display()), e))?;
        if entries.next().is_some() {
            return Err(VpnError::toolchain(
                EasyRsa::PROGRAM,
                format!(
                    "{} is not empty; remove it or pick another name to start a fresh pki",
                    workdir.display()
                ),
            ));
        }
        return Ok(());
    }
    fs::create_dir_all(workdir)
        .map_err(|e| VpnError::io(format!("Failed to create {}", workdir.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::FixturePki;

    fn spec(dir: &Path) -> BundleSpec {
        BundleSpec::for_deployment(dir.join("home-pki"), "home")
    }

    #[test]
    fn generates_a_complete_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let pki = FixturePki::default();
        let bundle = CredentialProvisioner::new(&pki).generate(&spec(dir.path())).unwrap();

        assert_eq!(bundle.authority.name, "home-ca");
        assert_eq!(bundle.server.name, "server");
        assert_eq!(bundle.client().name, "client1.domain.tld");
        assert_eq!(bundle.client().certificate, FixturePki::certificate_for("client1.domain.tld"));
        assert_eq!(bundle.client().private_key, FixturePki::key_for("client1.domain.tld"));
        assert_eq!(pki.steps(), vec!["init-pki", "build-ca", "build-server server", "build-client client1.domain.tld"]);
        assert!(bundle.paths().client_key.ends_with("pki/private/client1.domain.tld.key"));
    }

    #[test]
    fn issues_every_requested_client() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec(dir.path());
        spec.client_names.push("laptop".into());
        let bundle = CredentialProvisioner::new(&FixturePki::default()).generate(&spec).unwrap();
        assert_eq!(bundle.clients.len(), 2);
        assert_eq!(bundle.clients[1].name, "laptop");
    }

    #[test]
    fn failing_step_returns_no_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let pki = FixturePki::failing_at("build-server");
        let err = CredentialProvisioner::new(&pki).generate(&spec(dir.path())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Toolchain);
        assert!(!pki.steps().iter().any(|s| s.starts_with("build-client")));
    }

    #[test]
    fn refuses_a_used_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec(dir.path());
        fs::create_dir_all(&spec.workdir).unwrap();
        fs::write(spec.workdir.join("leftover"), "x").unwrap();
        let pki = FixturePki::default();
        let err = CredentialProvisioner::new(&pki).generate(&spec).unwrap_err();
        assert!(err.to_string().contains("not empty"));
        assert!(pki.steps().is_empty());
    }

    #[test]
    fn requires_a_client() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = spec(dir.path());
        spec.client_names.clear();
        assert!(CredentialProvisioner::new(&FixturePki::default()).generate(&spec).is_err());
    }

    #[test]
    fn easyrsa_layout_matches_its_output_tree() {
        let paths = EasyRsa::issued(Path::new("/tmp/home-pki"), "server");
        assert_eq!(paths.certificate, PathBuf::from("/tmp/home-pki/pki/issued/server.crt"));
        assert_eq!(paths.private_key, PathBuf::from("/tmp/home-pki/pki/private/server.key"));
    }
}
