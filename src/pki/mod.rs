pub mod manager;
pub mod request;
pub mod signer;
pub mod state;
pub mod store;
pub mod tls;

pub use manager::{CertificateManager, EnsureOutcome};
pub use signer::CertificateSigner;
pub use state::CredentialState;

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while bootstrapping or loading the client credential.
///
/// Every variant is terminal for the operation that produced it.
#[derive(Debug, Error)]
pub enum PkiError {
    /// Bad endpoint scheme, missing path or unusable identity
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Key pair or CSR could not be produced
    #[error("key/CSR generation failed: {0}")]
    CryptoGeneration(String),

    /// Network, TLS handshake, timeout or undecodable response from the signing authority
    #[error("signing authority unreachable: {0}")]
    Transport(String),

    /// The signing authority answered but refused to sign
    #[error("signing authority rejected the request: {body}")]
    SigningRejected { body: String },

    /// Reading or writing a credential file failed
    #[error("credential persistence failed for {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    /// Client certificate, key or CA could not be turned into a TLS configuration
    #[error("TLS configuration failed: {0}")]
    TlsAssembly(String),
}

impl PkiError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PkiError::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a caller-side retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, PkiError::Transport(_))
    }
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Client identity and where its credential lives.
///
/// Supplied once when the manager is built and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Subject common name placed in the CSR
    pub common_name: String,

    /// Subject organization placed in the CSR
    pub organization: String,

    /// CA root used to verify both the signing authority and the orchestrator
    pub ca_cert_path: PathBuf,

    /// Client certificate (PEM)
    pub cert_path: PathBuf,

    /// Client private key (PEM, PKCS#8)
    pub key_path: PathBuf,

    /// Base URL of the signing authority
    pub signing_url: String,
}

impl Identity {
    /// Reject descriptors that cannot possibly produce a credential
    pub fn validate(&self) -> Result<()> {
        if self.common_name.trim().is_empty() {
            return Err(PkiError::Configuration(
                "common name must not be empty".to_string(),
            ));
        }

        for (label, path) in [
            ("CA certificate", &self.ca_cert_path),
            ("client certificate", &self.cert_path),
            ("client key", &self.key_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(PkiError::Configuration(format!("{} path is empty", label)));
            }
        }

        if self.cert_path == self.key_path {
            return Err(PkiError::Configuration(
                "client certificate and key must use different paths".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse a PEM document and return the DER bytes of its first block
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::TlsAssembly(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// SHA-256 fingerprint of a PEM certificate, hex encoded
pub fn fingerprint(certificate_pem: &str) -> Result<String> {
    use ring::digest;

    let der = parse_pem(certificate_pem)?;
    let digest = digest::digest(&digest::SHA256, &der);
    Ok(hex::encode(digest.as_ref()))
}
