use std::io;
use std::sync::Arc;

use ipcache_proto::tls::{load_cert_chain, load_private_key, load_root_store};
use rustls::server::WebPkiClientVerifier;

use crate::config::TlsPaths;

/// TLS 1.3 only, and every client must present a certificate chaining to
/// `client_ca`.
pub fn build_server_config(paths: &TlsPaths) -> io::Result<Arc<rustls::ServerConfig>> {
    let server_chain = load_cert_chain(&paths.cert_chain)?;
    let private_key = load_private_key(&paths.private_key)?;
    let roots = load_root_store(&paths.client_ca)?;

    let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).build().map_err(|err| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "failed to build client verifier from {}: {}",
                paths.client_ca.display(),
                err
            ),
        )
    })?;

    let config = rustls::ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_client_cert_verifier(verifier)
        .with_single_cert(server_chain, private_key)
        .map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid server certificate/key configuration: {err}"),
            )
        })?;
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipcache_test_support::TestPki;

    fn paths(pki: &TestPki) -> TlsPaths {
        TlsPaths {
            cert_chain: pki.server().cert_path.clone(),
            private_key: pki.server().key_path.clone(),
            client_ca: pki.ca_path().to_path_buf(),
        }
    }

    #[test]
    fn builds_from_test_pki() {
        let pki = TestPki::new();
        build_server_config(&paths(&pki)).expect("server config");
    }

    #[test]
    fn missing_client_ca_is_reported_with_path() {
        let pki = TestPki::new();
        let mut paths = paths(&pki);
        paths.client_ca = pki.dir().join("absent.pem");
        let err = build_server_config(&paths).expect_err("missing ca");
        assert!(err.to_string().contains("absent.pem"), "{err}");
    }
}
