//! Throwaway PKI for integration tests: one CA, a `localhost` server
//! certificate and any number of client certificates, written as PEM files
//! into a temporary directory that lives as long as the [`TestPki`].

use std::fs;
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::CertificateDer;
use tempfile::TempDir;

pub const SERVER_NAME: &str = "localhost";

/// PEM files for one issued certificate.
#[derive(Debug, Clone)]
pub struct IssuedIdentity {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub cert_der: CertificateDer<'static>,
}

pub struct TestPki {
    dir: TempDir,
    ca_cert: Certificate,
    ca_key: KeyPair,
    ca_path: PathBuf,
    server: IssuedIdentity,
}

impl TestPki {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("pki temp dir");

        let ca_key = KeyPair::generate().expect("ca key");
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name.push(DnType::CommonName, "ipcache test ca");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_cert = ca_params.self_signed(&ca_key).expect("self-sign ca");
        let ca_path = dir.path().join("ca.pem");
        fs::write(&ca_path, ca_cert.pem()).expect("write ca pem");

        let server = issue(
            dir.path(),
            (&ca_cert, &ca_key),
            "server",
            vec![SERVER_NAME.to_string()],
            ExtendedKeyUsagePurpose::ServerAuth,
        );
        Self { dir, ca_cert, ca_key, ca_path, server }
    }

    /// Trust bundle holding the CA certificate.
    pub fn ca_path(&self) -> &Path {
        &self.ca_path
    }

    pub fn server(&self) -> &IssuedIdentity {
        &self.server
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Issues a client certificate with common name `name`.
    pub fn issue_client(&self, name: &str) -> IssuedIdentity {
        issue(
            self.dir.path(),
            (&self.ca_cert, &self.ca_key),
            name,
            Vec::new(),
            ExtendedKeyUsagePurpose::ClientAuth,
        )
    }
}

fn issue(
    dir: &Path,
    (ca_cert, ca_key): (&Certificate, &KeyPair),
    name: &str,
    subject_alt_names: Vec<String>,
    usage: ExtendedKeyUsagePurpose,
) -> IssuedIdentity {
    let key = KeyPair::generate().expect("leaf key");
    let mut params = CertificateParams::new(subject_alt_names).expect("leaf params");
    params.distinguished_name.push(DnType::CommonName, name);
    params.extended_key_usages = vec![usage];
    let cert = params.signed_by(&key, ca_cert, ca_key).expect("sign leaf");

    let cert_path = dir.join(format!("{name}.pem"));
    let key_path = dir.join(format!("{name}.key"));
    fs::write(&cert_path, cert.pem()).expect("write leaf pem");
    fs::write(&key_path, key.serialize_pem()).expect("write leaf key");
    IssuedIdentity { cert_path, key_path, cert_der: cert.der().clone() }
}

impl Default for TestPki {
    fn default() -> Self {
        Self::new()
    }
}
