use chrono::{DateTime, Utc};
use rustls::pki_types::CertificateDer;
use rustls::ClientConfig;
use std::sync::Arc;
use tracing::{info, warn, Instrument, Span};

use super::request::CertRequest;
use super::signer::{CertificateSigner, CfsslSigner, RetryingSigner};
use super::state::CredentialState;
use super::store::CredentialStore;
use super::tls::{build_client_config, parse_private_key, verify_key_matches};
use super::{fingerprint, parse_pem, Identity, PkiError, Result};
use crate::retry::RetryConfig;

/// What `ensure_certificate` had to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Existing credential is usable; nothing was generated, sent or written
    AlreadyValid { not_after: DateTime<Utc> },

    /// A new key and certificate replaced whatever was there before
    Issued { previous: CredentialState },
}

/// Read-only snapshot of the stored credential
#[derive(Debug, Clone)]
pub struct CredentialStatus {
    pub state: CredentialState,
    pub fingerprint: Option<String>,
}

/// Bootstraps and loads the client credential for one identity.
///
/// Construction performs no I/O. [`CertificateManager::ensure_certificate`]
/// runs state check, generation, signing and persistence in that order and
/// stops at the first failure; [`CertificateManager::tls_config`] turns the
/// stored credential into a rustls configuration.
///
/// Concurrent bootstraps against the same paths are not coordinated.
pub struct CertificateManager<S = RetryingSigner<CfsslSigner>> {
    identity: Identity,
    signer: S,
    store: CredentialStore,
    span: Span,
}

impl CertificateManager {
    /// Manager talking to the identity's CFSSL endpoint
    pub fn with_cfssl(
        identity: Identity,
        timeout: std::time::Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let signer = RetryingSigner::new(CfsslSigner::from_identity(&identity, timeout)?, retry);
        Self::new(identity, signer)
    }
}

impl<S: CertificateSigner> CertificateManager<S> {
    pub fn new(identity: Identity, signer: S) -> Result<Self> {
        identity.validate()?;
        let store = CredentialStore::from_identity(&identity);

        Ok(Self {
            identity,
            signer,
            store,
            span: Span::none(),
        })
    }

    /// Run every bootstrap step inside `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Make sure a usable certificate and key are on disk.
    ///
    /// Idempotent while the stored certificate is valid. An absent, expired
    /// or unreadable credential is fully replaced by a new key and a newly
    /// signed certificate.
    pub async fn ensure_certificate(&self) -> Result<EnsureOutcome> {
        self.bootstrap().instrument(self.span.clone()).await
    }

    async fn bootstrap(&self) -> Result<EnsureOutcome> {
        let state = self.inspect();

        match &state {
            CredentialState::Valid { not_after } => {
                info!(not_after = %not_after, "Client certificate is valid");
                return Ok(EnsureOutcome::AlreadyValid {
                    not_after: *not_after,
                });
            }
            CredentialState::Unreadable(reason) => {
                // Treated as absent; the file at cert_path is replaced
                warn!(
                    path = %self.identity.cert_path.display(),
                    reason = %reason,
                    "Existing client certificate is unreadable, issuing a new one"
                );
            }
            CredentialState::Expired { not_after } => {
                info!(not_after = %not_after, "Client certificate expired, issuing a new one");
            }
            CredentialState::Absent => {
                info!(common_name = %self.identity.common_name, "No client credential found, bootstrapping");
            }
        }

        let request = CertRequest::generate(&self.identity)?;
        let certificate_pem = self.signer.sign(request.csr_pem()).await?;

        // The authority must have signed the key we just generated
        let leaf = parse_pem(&certificate_pem).map_err(|_| PkiError::SigningRejected {
            body: certificate_pem.clone(),
        })?;
        let key = parse_private_key(request.private_key_pem())?;
        verify_key_matches(&[CertificateDer::from(leaf)], &key)?;

        self.store
            .save(&certificate_pem, &request.into_private_key_pem())?;

        info!(
            fingerprint = %fingerprint(&certificate_pem).unwrap_or_default(),
            "Client certificate issued"
        );
        Ok(EnsureOutcome::Issued { previous: state })
    }

    fn inspect(&self) -> CredentialState {
        CredentialState::inspect(&self.identity.cert_path, &self.identity.key_path)
    }

    /// TLS configuration for the orchestrator connection.
    ///
    /// Only meaningful after `ensure_certificate` has succeeded.
    pub fn tls_config(&self) -> Result<Arc<ClientConfig>> {
        let _guard = self.span.enter();
        build_client_config(
            &self.identity.ca_cert_path,
            &self.identity.cert_path,
            &self.identity.key_path,
        )
    }

    /// Inspect the stored credential without changing anything
    pub fn status(&self) -> CredentialStatus {
        let state = self.inspect();
        let fingerprint = match &state {
            CredentialState::Valid { .. } | CredentialState::Expired { .. } => self
                .store
                .load()
                .ok()
                .and_then(|(cert, _)| fingerprint(&cert).ok()),
            _ => None,
        };

        CredentialStatus { state, fingerprint }
    }
}
