use chrono::{DateTime, Utc};
use std::fmt;
use std::fs;
use std::path::Path;

/// What is currently on disk for the client credential.
///
/// Only [`CredentialState::Valid`] lets the manager skip a bootstrap;
/// every other state leads to a fresh key and certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialState {
    /// Certificate or key file is missing
    Absent,

    /// Both files exist but the certificate cannot be read, decoded or parsed
    Unreadable(String),

    /// Certificate parsed but `NotAfter` has passed
    Expired { not_after: DateTime<Utc> },

    /// Certificate parsed and still inside its validity window
    Valid { not_after: DateTime<Utc> },
}

impl CredentialState {
    /// Inspect the credential files as of now
    pub fn inspect(cert_path: &Path, key_path: &Path) -> Self {
        Self::inspect_at(cert_path, key_path, Utc::now())
    }

    /// Inspect the credential files against an explicit clock
    pub fn inspect_at(cert_path: &Path, key_path: &Path, now: DateTime<Utc>) -> Self {
        if !cert_path.exists() || !key_path.exists() {
            return CredentialState::Absent;
        }

        let certificate_pem = match fs::read_to_string(cert_path) {
            Ok(pem) => pem,
            Err(e) => return CredentialState::Unreadable(format!("read failed: {}", e)),
        };

        match not_after(&certificate_pem) {
            Ok(not_after) if now < not_after => CredentialState::Valid { not_after },
            Ok(not_after) => CredentialState::Expired { not_after },
            Err(reason) => CredentialState::Unreadable(reason),
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, CredentialState::Valid { .. })
    }
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialState::Absent => write!(f, "absent"),
            CredentialState::Unreadable(reason) => write!(f, "unreadable ({})", reason),
            CredentialState::Expired { not_after } => {
                write!(f, "expired at {}", not_after.format("%Y-%m-%d %H:%M:%S UTC"))
            }
            CredentialState::Valid { not_after } => {
                write!(f, "valid until {}", not_after.format("%Y-%m-%d %H:%M:%S UTC"))
            }
        }
    }
}

/// Extract `NotAfter` from a PEM certificate
fn not_after(certificate_pem: &str) -> Result<DateTime<Utc>, String> {
    let pem = pem::parse(certificate_pem).map_err(|e| format!("PEM decode failed: {}", e))?;
    let (_, cert) = x509_parser::parse_x509_certificate(pem.contents())
        .map_err(|e| format!("X.509 parse failed: {}", e))?;

    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| format!("NotAfter out of range: {}", timestamp))
}
