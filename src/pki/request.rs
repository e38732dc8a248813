use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
use tracing::debug;

use super::{Identity, PkiError, Result};

/// Freshly generated key pair and the CSR that binds it to an identity.
///
/// The private key never leaves this value until it is handed to the
/// credential store.
pub struct CertRequest {
    key_pem: String,
    csr_pem: String,
}

impl CertRequest {
    /// Generate a new key pair and CSR for `identity`
    pub fn generate(identity: &Identity) -> Result<Self> {
        // ECDSA P-256 is at least as strong as RSA-2048; rcgen draws from the OS RNG
        let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| PkiError::CryptoGeneration(format!("failed to generate key: {}", e)))?;

        let mut params = CertificateParams::default();
        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, identity.common_name.as_str());
        if !identity.organization.is_empty() {
            distinguished_name.push(DnType::OrganizationName, identity.organization.as_str());
        }
        params.distinguished_name = distinguished_name;

        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| PkiError::CryptoGeneration(format!("failed to create CSR: {}", e)))?;
        let csr_pem = csr
            .pem()
            .map_err(|e| PkiError::CryptoGeneration(format!("failed to encode CSR: {}", e)))?;

        debug!(common_name = %identity.common_name, "Generated key pair and CSR");

        Ok(Self {
            key_pem: key_pair.serialize_pem(),
            csr_pem,
        })
    }

    /// CSR in PEM form, ready to send to the signing authority
    pub fn csr_pem(&self) -> &str {
        &self.csr_pem
    }

    /// Private key in PEM (PKCS#8) form
    pub fn private_key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Hand over the private key, consuming the request
    pub fn into_private_key_pem(self) -> String {
        self.key_pem
    }
}

impl std::fmt::Debug for CertRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertRequest")
            .field("csr_pem", &self.csr_pem)
            .field("key_pem", &"[REDACTED]")
            .finish()
    }
}
