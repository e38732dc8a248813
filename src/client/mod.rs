//! mTLS client for the orchestrator API.

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, info_span};

use crate::config::Config;
use crate::models::{Node, NodeList, ScheduleResponse, Workload};
use crate::pki::{CertificateManager, CertificateSigner, PkiError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Pki(#[from] PkiError),

    #[error("failed to send request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Authenticated connection to the orchestrator
#[derive(Debug, Clone)]
pub struct ApiClient {
    endpoint: String,
    http: reqwest::Client,
}

/// Refuse anything but an https endpoint
pub fn check_endpoint(endpoint: &str) -> std::result::Result<(), PkiError> {
    if !endpoint.starts_with("https://") {
        return Err(PkiError::Configuration(format!(
            "api_endpoint must start with https:// when using mTLS, got: {}",
            endpoint
        )));
    }
    Ok(())
}

impl ApiClient {
    /// Bootstrap the client credential against the configured CFSSL
    /// authority and connect.
    ///
    /// The endpoint scheme is checked first; nothing is generated or
    /// written for a plain-http endpoint.
    pub async fn connect(config: &Config) -> Result<Self> {
        check_endpoint(&config.api_endpoint)?;

        let identity = config.identity();
        let span = info_span!("certificate", cn = %identity.common_name);
        let manager =
            CertificateManager::with_cfssl(identity, config.sign_timeout(), config.retry_config())?
                .with_span(span);
        Self::with_manager(&config.api_endpoint, &manager).await
    }

    /// Connect using an already built certificate manager
    pub async fn with_manager<S: CertificateSigner>(
        endpoint: &str,
        manager: &CertificateManager<S>,
    ) -> Result<Self> {
        check_endpoint(endpoint)?;

        let outcome = manager.ensure_certificate().await?;
        debug!(?outcome, "Client certificate ready");

        let tls = manager.tls_config()?;
        let http = reqwest::Client::builder()
            .use_preconfigured_tls((*tls).clone())
            .build()?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
    }

    /// Send, log the responding service, and return the body of a 200 response
    async fn send(&self, builder: RequestBuilder) -> Result<String> {
        let response = builder.send().await?;

        if let Some(service) = response
            .headers()
            .get("X-Service-Name")
            .and_then(|v| v.to_str().ok())
        {
            info!(service = %service, "Response from service");
        }

        let status = response.status();
        let body = response.text().await?;
        debug!(status = %status, body = %body, "Raw response body");

        if status != StatusCode::OK {
            return Err(ClientError::Status { status, body });
        }
        Ok(body)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = self.send(self.request(Method::GET, path)).await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn schedule_workload(&self, workload: &Workload) -> Result<ScheduleResponse> {
        let builder = self
            .request(Method::POST, "/workloads/schedule")
            .body(serde_json::to_vec(workload)?);
        let body = self.send(builder).await?;
        let response: ScheduleResponse = serde_json::from_str(&body)?;

        info!(
            workload = %response.workload_id,
            node = %response.node_id,
            "Scheduled workload"
        );
        Ok(response)
    }

    pub async fn list_workloads(&self) -> Result<Vec<Workload>> {
        self.get("/workloads").await
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let list: NodeList = self.get("/nodes").await?;
        Ok(list.nodes)
    }

    /// Cluster metrics, passed through as arbitrary JSON
    pub async fn cluster_metrics(&self) -> Result<Value> {
        self.get("/cluster/metrics").await
    }
}
