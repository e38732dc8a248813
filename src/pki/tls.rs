//! rustls client configuration for the mTLS connection to the orchestrator.

use rustls::crypto::ring::sign::any_supported_type;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, InconsistentKeys, RootCertStore};
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{PkiError, Result};

/// Load every certificate in a PEM file
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| PkiError::TlsAssembly(format!("failed to open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            PkiError::TlsAssembly(format!("invalid certificate in {}: {}", path.display(), e))
        })?;

    if certs.is_empty() {
        return Err(PkiError::TlsAssembly(format!(
            "no certificates found in {}",
            path.display()
        )));
    }

    debug!("Loaded {} certificates from {:?}", certs.len(), path);
    Ok(certs)
}

/// Load the first private key in a PEM file (PKCS#8, SEC1 or PKCS#1)
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| PkiError::TlsAssembly(format!("failed to open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    read_private_key(&mut reader, &path.display().to_string())
}

/// Parse the first private key out of PEM text
pub fn parse_private_key(key_pem: &str) -> Result<PrivateKeyDer<'static>> {
    read_private_key(&mut key_pem.as_bytes(), "key PEM")
}

fn read_private_key(reader: &mut dyn BufRead, origin: &str) -> Result<PrivateKeyDer<'static>> {
    private_key(reader)
        .map_err(|e| PkiError::TlsAssembly(format!("invalid private key in {}: {}", origin, e)))?
        .ok_or_else(|| PkiError::TlsAssembly(format!("no private key found in {}", origin)))
}

/// Check that the leaf of `chain` was issued for `key`
pub fn verify_key_matches(chain: &[CertificateDer<'static>], key: &PrivateKeyDer<'_>) -> Result<()> {
    let signing_key = any_supported_type(key)
        .map_err(|e| PkiError::TlsAssembly(format!("unsupported client key: {}", e)))?;

    match CertifiedKey::new(chain.to_vec(), signing_key).keys_match() {
        Ok(()) => Ok(()),
        Err(rustls::Error::InconsistentKeys(InconsistentKeys::KeyMismatch)) => Err(
            PkiError::TlsAssembly("client certificate does not match client key".to_string()),
        ),
        // Key type cannot report its public half; rustls accepts it the same way
        Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => Ok(()),
        Err(e) => Err(PkiError::TlsAssembly(format!(
            "failed to check client certificate: {}",
            e
        ))),
    }
}

/// Build the client configuration: present the client certificate, trust
/// only `ca_cert_path`, and speak TLS 1.2 or 1.3.
pub fn build_client_config(
    ca_cert_path: &Path,
    cert_path: &Path,
    key_path: &Path,
) -> Result<Arc<ClientConfig>> {
    let ca_certs = load_certs(ca_cert_path)?;
    let mut root_store = RootCertStore::empty();
    for cert in ca_certs {
        root_store
            .add(cert)
            .map_err(|e| PkiError::TlsAssembly(format!("failed to add CA cert: {}", e)))?;
    }

    let chain = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    verify_key_matches(&chain, &key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| PkiError::TlsAssembly(format!("unsupported protocol versions: {}", e)))?
        .with_root_certificates(root_store)
        .with_client_auth_cert(chain, key)
        .map_err(|e| PkiError::TlsAssembly(format!("failed to load client certificate: {}", e)))?;

    info!(
        ca = %ca_cert_path.display(),
        cert = %cert_path.display(),
        "Created mTLS client configuration (TLS 1.2+)"
    );
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::testing::{far_future, KeyFixture, TestAuthority};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        ca: std::path::PathBuf,
        cert: std::path::PathBuf,
        key: std::path::PathBuf,
    }

    fn write_fixture(authority: &TestAuthority, cert_pem: &str, key_pem: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let ca = dir.path().join("ca.crt");
        let cert = dir.path().join("client.crt");
        let key = dir.path().join("client.key");
        authority.write_ca(&ca);
        fs::write(&cert, cert_pem).unwrap();
        fs::write(&key, key_pem).unwrap();
        Fixture {
            _dir: dir,
            ca,
            cert,
            key,
        }
    }

    fn fixture(authority: &TestAuthority) -> Fixture {
        let (cert_pem, key_pem) = authority.issue("alice", far_future());
        write_fixture(authority, &cert_pem, &key_pem)
    }

    #[test]
    fn test_builds_mtls_config() {
        let authority = TestAuthority::new();
        let f = fixture(&authority);

        let config = build_client_config(&f.ca, &f.cert, &f.key).unwrap();
        assert!(config.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn test_accepts_sec1_and_pkcs1_keys() {
        let authority = TestAuthority::new();

        for fixture_key in [KeyFixture::EcSec1, KeyFixture::RsaPkcs1] {
            let cert_pem = authority.issue_for_key(fixture_key, "alice", far_future());
            let f = write_fixture(&authority, &cert_pem, fixture_key.stored_pem());

            let config = build_client_config(&f.ca, &f.cert, &f.key);
            assert!(config.is_ok(), "{:?}: {:?}", fixture_key, config.err());
        }
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let authority = TestAuthority::new();
        let f = fixture(&authority);

        // Key from a different issuance
        let (_, other_key) = authority.issue("alice", far_future());
        fs::write(&f.key, other_key).unwrap();

        match build_client_config(&f.ca, &f.cert, &f.key) {
            Err(PkiError::TlsAssembly(msg)) => assert!(msg.contains("does not match")),
            other => panic!("expected TLS assembly error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_mismatched_sec1_key_is_rejected() {
        let authority = TestAuthority::new();
        let (cert_pem, _) = authority.issue("alice", far_future());
        let f = write_fixture(&authority, &cert_pem, KeyFixture::EcSec1.stored_pem());

        match build_client_config(&f.ca, &f.cert, &f.key) {
            Err(PkiError::TlsAssembly(msg)) => assert!(msg.contains("does not match")),
            other => panic!("expected TLS assembly error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_corrupt_certificate_is_rejected() {
        let authority = TestAuthority::new();
        let f = fixture(&authority);
        fs::write(&f.cert, "garbage").unwrap();

        assert!(matches!(
            build_client_config(&f.ca, &f.cert, &f.key),
            Err(PkiError::TlsAssembly(_))
        ));
    }

    #[test]
    fn test_missing_ca_is_rejected() {
        let authority = TestAuthority::new();
        let f = fixture(&authority);
        fs::remove_file(&f.ca).unwrap();

        assert!(matches!(
            build_client_config(&f.ca, &f.cert, &f.key),
            Err(PkiError::TlsAssembly(_))
        ));
    }

    #[test]
    fn test_key_file_without_key_is_rejected() {
        let authority = TestAuthority::new();
        let f = fixture(&authority);
        fs::write(&f.key, &authority.cert_pem).unwrap();

        match load_private_key(&f.key) {
            Err(PkiError::TlsAssembly(msg)) => assert!(msg.contains("no private key")),
            other => panic!("expected TLS assembly error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_parse_private_key_formats() {
        assert!(matches!(
            parse_private_key(KeyFixture::EcSec1.stored_pem()),
            Ok(PrivateKeyDer::Sec1(_))
        ));
        assert!(matches!(
            parse_private_key(KeyFixture::RsaPkcs1.stored_pem()),
            Ok(PrivateKeyDer::Pkcs1(_))
        ));
        assert!(parse_private_key("nothing here").is_err());
    }
}
