//! PEM loading for certificates, keys and trust bundles.
//!
//! Every error names the file it came from, and keeps the `io::ErrorKind`
//! of the underlying failure (`NotFound` for a missing file, `InvalidData`
//! for unusable contents).

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;

pub fn load_cert_chain(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let chain: Vec<_> = rustls_pemfile::certs(&mut open_pem(path)?)
        .collect::<Result<_, _>>()
        .map_err(|err| invalid_data(path, format_args!("bad certificate PEM: {err}")))?;
    if chain.is_empty() {
        return Err(invalid_data(path, "contains no certificates"));
    }
    Ok(chain)
}

pub fn load_private_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open_pem(path)?)
        .map_err(|err| invalid_data(path, format_args!("bad private key PEM: {err}")))?
        .ok_or_else(|| invalid_data(path, "contains no private key"))
}

/// Trust anchors for verifying the other side. Entries rustls cannot parse
/// are skipped with a warning; a bundle with none left is an error.
pub fn load_root_store(path: &Path) -> io::Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    match roots.add_parsable_certificates(load_cert_chain(path)?) {
        (0, _) => Err(invalid_data(path, "contains no usable CA certificates")),
        (_, 0) => Ok(roots),
        (_, ignored) => {
            log::warn!("skipped {ignored} unparsable CA certificates in {}", path.display());
            Ok(roots)
        }
    }
}

fn open_pem(path: &Path) -> io::Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|err| io::Error::new(err.kind(), format!("open {}: {err}", path.display())))
}

fn invalid_data(path: &Path, detail: impl fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("{}: {detail}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_file_keeps_not_found_kind() {
        let temp = TempDir::new().expect("temp dir");
        let err = load_cert_chain(&temp.path().join("absent.pem")).expect_err("missing");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains("absent.pem"));
    }

    #[test]
    fn pem_without_certificates_is_invalid_data() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("empty.pem");
        fs::write(&path, "not a pem file\n").expect("write");
        assert_eq!(load_cert_chain(&path).expect_err("empty").kind(), io::ErrorKind::InvalidData);
        assert_eq!(load_private_key(&path).expect_err("no key").kind(), io::ErrorKind::InvalidData);
        assert_eq!(load_root_store(&path).expect_err("no roots").kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn contents_errors_name_the_file() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("server.key");
        fs::write(&path, "").expect("write");
        let err = load_private_key(&path).expect_err("no key");
        assert!(err.to_string().contains("server.key"), "{err}");
        assert!(err.to_string().contains("no private key"), "{err}");
    }
}
