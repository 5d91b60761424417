use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use ipcache_proto::tls::{load_cert_chain, load_private_key, load_root_store};

#[derive(Debug, Clone)]
pub struct ClientTlsPaths {
    /// PEM chain identifying this daemon, leaf first.
    pub cert_chain: PathBuf,
    pub private_key: PathBuf,
    /// PEM bundle used to verify the server.
    pub server_root_ca: PathBuf,
}

/// TLS 1.3 client config that presents the daemon certificate.
pub fn build_client_config(paths: &ClientTlsPaths) -> io::Result<Arc<rustls::ClientConfig>> {
    let roots = load_root_store(&paths.server_root_ca)?;
    let chain = load_cert_chain(&paths.cert_chain)?;
    let key = load_private_key(&paths.private_key)?;

    let config = rustls::ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid client certificate/key configuration: {err}"),
            )
        })?;
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipcache_test_support::TestPki;

    #[test]
    fn builds_from_issued_client_identity() {
        let pki = TestPki::new();
        let daemon = pki.issue_client("daemon");
        build_client_config(&ClientTlsPaths {
            cert_chain: daemon.cert_path,
            private_key: daemon.key_path,
            server_root_ca: pki.ca_path().to_path_buf(),
        })
        .expect("client config");
    }

    #[test]
    fn missing_key_is_reported_with_path() {
        let pki = TestPki::new();
        let daemon = pki.issue_client("daemon");
        let err = build_client_config(&ClientTlsPaths {
            cert_chain: daemon.cert_path,
            private_key: pki.dir().join("nope.key"),
            server_root_ca: pki.ca_path().to_path_buf(),
        })
        .expect_err("missing key");
        assert!(err.to_string().contains("nope.key"), "{err}");
    }
}
