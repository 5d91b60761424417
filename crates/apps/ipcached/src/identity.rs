//! Who is on the other end of a connection.
//!
//! A principal is named by the subject key identifier of its client
//! certificate, so re-issuing a certificate for the same key keeps the same
//! identity. The IP is whatever address the connection arrived from.

use std::io;
use std::net::{IpAddr, SocketAddr};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use x509_parser::extensions::ParsedExtension;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Length of a key identifier derived from the public key when the
/// certificate carries none (RFC 7093, method 1).
const DERIVED_KEY_ID_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    pub id: String,
    pub ip: IpAddr,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("peer presented no client certificate")]
    NoPeerCertificate,

    #[error("peer certificate is not valid X.509: {0}")]
    MalformedCertificate(String),

    #[error("peer address unavailable: {0}")]
    NoPeerAddress(#[source] io::Error),
}

/// Resolves the principal behind an established server-side TLS stream.
pub fn resolve(stream: &TlsStream<TcpStream>) -> Result<Principal, IdentityError> {
    let (tcp, session) = stream.get_ref();
    resolve_principal(session.peer_certificates(), tcp.peer_addr())
}

pub fn resolve_principal(
    peer_certificates: Option<&[CertificateDer<'_>]>,
    peer_addr: io::Result<SocketAddr>,
) -> Result<Principal, IdentityError> {
    let leaf =
        peer_certificates.and_then(|certs| certs.first()).ok_or(IdentityError::NoPeerCertificate)?;
    let id = principal_id_from_der(leaf.as_ref())?;
    // Dual-stack listeners report IPv4 peers as ::ffff:a.b.c.d.
    let ip = peer_addr.map_err(IdentityError::NoPeerAddress)?.ip().to_canonical();
    Ok(Principal { id, ip })
}

/// Base64 (standard alphabet, padded) of the certificate's subject key
/// identifier.
pub fn principal_id_from_der(der: &[u8]) -> Result<String, IdentityError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|err| IdentityError::MalformedCertificate(err.to_string()))?;
    let key_id = subject_key_identifier(&cert).unwrap_or_else(|| {
        derived_key_identifier(cert.public_key().subject_public_key.data.as_ref())
    });
    Ok(STANDARD.encode(key_id))
}

fn subject_key_identifier(cert: &X509Certificate<'_>) -> Option<Vec<u8>> {
    cert.extensions().iter().find_map(|extension| match extension.parsed_extension() {
        ParsedExtension::SubjectKeyIdentifier(key_id) => Some(key_id.0.to_vec()),
        _ => None,
    })
}

fn derived_key_identifier(subject_public_key: &[u8]) -> Vec<u8> {
    Sha256::digest(subject_public_key)[..DERIVED_KEY_ID_LEN].to_vec()
}
