use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Identity, PkiError, Result};
use crate::retry::{retry_with_backoff, RetryConfig};

/// Sub-path of the signing authority that accepts CSRs
pub const SIGN_PATH: &str = "/api/v1/cfssl/sign";

/// Request timeout for the signing exchange
pub const DEFAULT_SIGN_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can turn a PEM CSR into a PEM certificate
#[async_trait]
pub trait CertificateSigner: Send + Sync {
    async fn sign(&self, csr_pem: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    certificate_request: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    success: bool,
    #[serde(default)]
    result: Option<SignResult>,
}

#[derive(Debug, Deserialize)]
struct SignResult {
    #[serde(default)]
    certificate: String,
}

/// Client for a CFSSL-style `sign` endpoint reached over a CA-pinned HTTPS channel
#[derive(Debug, Clone)]
pub struct CfsslSigner {
    sign_url: String,
    ca_cert_path: PathBuf,
    timeout: Duration,
}

impl CfsslSigner {
    /// Create a signer for `base_url`; only HTTPS URLs are accepted
    pub fn new(base_url: &str, ca_cert_path: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim();
        if !base_url.starts_with("https://") {
            return Err(PkiError::Configuration(format!(
                "signing authority URL must start with https://, got: {}",
                base_url
            )));
        }

        Ok(Self {
            sign_url: format!("{}{}", base_url.trim_end_matches('/'), SIGN_PATH),
            ca_cert_path: ca_cert_path.into(),
            timeout,
        })
    }

    pub fn from_identity(identity: &Identity, timeout: Duration) -> Result<Self> {
        Self::new(&identity.signing_url, &identity.ca_cert_path, timeout)
    }

    /// HTTPS client that trusts only the configured CA root
    fn http_client(&self) -> Result<reqwest::Client> {
        let ca_pem = std::fs::read(&self.ca_cert_path)
            .map_err(|e| PkiError::persistence(&self.ca_cert_path, format!("failed to read CA cert: {}", e)))?;

        let ca_cert = reqwest::Certificate::from_pem(&ca_pem)
            .map_err(|e| PkiError::TlsAssembly(format!("invalid CA certificate: {}", e)))?;

        reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(ca_cert)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .timeout(self.timeout)
            .build()
            .map_err(|e| PkiError::TlsAssembly(format!("failed to build HTTP client: {}", e)))
    }
}

#[async_trait]
impl CertificateSigner for CfsslSigner {
    async fn sign(&self, csr_pem: &str) -> Result<String> {
        let http_client = self.http_client()?;

        info!(url = %self.sign_url, "Submitting CSR to signing authority");

        let response = http_client
            .post(&self.sign_url)
            .json(&SignRequest {
                certificate_request: csr_pem,
            })
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        debug!(status = %status, bytes = body.len(), "Signing authority responded");
        if !status.is_success() {
            warn!(status = %status, "Signing authority returned non-success status");
        }

        let certificate_pem = parse_sign_response(&body)?;
        info!("Certificate received from signing authority");
        Ok(certificate_pem)
    }
}

/// Interpret a signing response body.
///
/// A body that is not JSON of the expected shape is a transport failure; a
/// decodable refusal (or a success without a certificate) is a rejection
/// carrying the raw body.
pub fn parse_sign_response(body: &str) -> Result<String> {
    let response: SignResponse = serde_json::from_str(body).map_err(|e| {
        PkiError::Transport(format!(
            "failed to decode signing response: {}; body: {}",
            e,
            truncate(body, 512)
        ))
    })?;

    match response {
        SignResponse {
            success: true,
            result: Some(SignResult { certificate }),
        } if certificate.contains("BEGIN CERTIFICATE") => Ok(certificate),
        _ => Err(PkiError::SigningRejected {
            body: body.to_string(),
        }),
    }
}

fn transport_error(e: &reqwest::Error, timeout: Duration) -> PkiError {
    if e.is_timeout() {
        return PkiError::Transport(format!("request timed out after {:?}", timeout));
    }

    // reqwest's Display omits the underlying io/TLS cause
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    PkiError::Transport(message)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Signer decorator that retries transport failures with backoff.
///
/// Rejections, configuration and TLS errors are returned on first sight.
pub struct RetryingSigner<S> {
    inner: S,
    config: RetryConfig,
}

impl<S: CertificateSigner> RetryingSigner<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<S: CertificateSigner> CertificateSigner for RetryingSigner<S> {
    async fn sign(&self, csr_pem: &str) -> Result<String> {
        retry_with_backoff(&self.config, "sign_csr", PkiError::is_transient, || {
            self.inner.sign(csr_pem)
        })
        .await
    }
}
