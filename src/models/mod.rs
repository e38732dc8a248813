//! Wire types exchanged with the orchestrator API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// CPU and memory figures as reported by the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub cpu: i64,
    #[serde(default)]
    pub memory: i64,
}

/// Supported workload kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    DockerContainer,
    DockerCompose,
    GitCompose,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::DockerContainer => "docker-container",
            WorkloadKind::DockerCompose => "docker-compose",
            WorkloadKind::GitCompose => "git-compose",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker-container" => Ok(WorkloadKind::DockerContainer),
            "docker-compose" => Ok(WorkloadKind::DockerCompose),
            "git-compose" => Ok(WorkloadKind::GitCompose),
            other => Err(ValidationError::UnknownType(other.to_string())),
        }
    }
}

/// Reasons a workload is refused before it is sent
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name and type are required")]
    MissingNameOrType,

    #[error("type must be docker-container, docker-compose, or git-compose, got: {0}")]
    UnknownType(String),

    #[error("{field} required for {kind}")]
    MissingField {
        field: &'static str,
        kind: WorkloadKind,
    },
}

/// A schedulable unit of work
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub workload_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,

    /// Base64-encoded compose document
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compose: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_repo: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_branch: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_token: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_path: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env_vars: HashMap<String, String>,

    /// e.g. `8080:80`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,

    /// e.g. `/host:/container`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub restart_policy: String,

    #[serde(default)]
    pub resources: Resources,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_id: String,

    #[serde(default)]
    pub status: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Workload {
    /// Check that the fields required by the workload's type are present
    pub fn validate(&self) -> Result<WorkloadKind, ValidationError> {
        if self.name.is_empty() || self.workload_type.is_empty() {
            return Err(ValidationError::MissingNameOrType);
        }

        let kind: WorkloadKind = self.workload_type.parse()?;
        let missing = match kind {
            WorkloadKind::DockerContainer if self.image.is_empty() => Some("image"),
            WorkloadKind::DockerCompose if self.local_path.is_empty() => Some("local-path"),
            WorkloadKind::GitCompose if self.git_repo.is_empty() => Some("git-repo"),
            _ => None,
        };

        match missing {
            Some(field) => Err(ValidationError::MissingField { field, kind }),
            None => Ok(kind),
        }
    }
}

/// A cluster node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub node_id: String,

    #[serde(default)]
    pub ip_address: String,

    #[serde(default)]
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,

    #[serde(default)]
    pub resources: Resources,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// Envelope of `GET /nodes`
#[derive(Debug, Deserialize)]
pub(crate) struct NodeList {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// Answer to a scheduling request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    #[serde(default)]
    pub workload_id: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub status: String,
}

/// Parse `k1=v1,k2=v2`; pairs without `=` are skipped
pub fn parse_env_vars(input: &str) -> HashMap<String, String> {
    input
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
