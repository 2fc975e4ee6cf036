//! Provider selection and configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use scan_test_core::ProviderError;

use crate::azure_devops::AzureDevOpsConfig;
use crate::bitbucket::BitbucketConfig;
use crate::github_actions::GitHubActionsConfig;
use crate::gitlab_ci::GitLabCiConfig;

/// The CI/CD systems tests can be dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    GitHubActions,
    GitLabCi,
    AzureDevOps,
    Bitbucket,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::GitHubActions,
        ProviderKind::GitLabCi,
        ProviderKind::AzureDevOps,
        ProviderKind::Bitbucket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GitHubActions => "github-actions",
            ProviderKind::GitLabCi => "gitlab-ci",
            ProviderKind::AzureDevOps => "azure-devops",
            ProviderKind::Bitbucket => "bitbucket",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown provider '{0}' (expected one of: github-actions, gitlab-ci, azure-devops, bitbucket)")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

/// An API token. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Accept either a JSON string or a JSON integer for an identifier field.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// Configuration for whichever provider was selected.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    GitHubActions(GitHubActionsConfig),
    GitLabCi(GitLabCiConfig),
    AzureDevOps(AzureDevOpsConfig),
    Bitbucket(BitbucketConfig),
}

impl ProviderConfig {
    /// Parse the JSON configuration for `kind`.
    pub fn from_json(kind: ProviderKind, json: &str) -> Result<Self, ProviderError> {
        let invalid = |e: serde_json::Error| ProviderError::Config(format!("invalid {kind} configuration: {e}"));
        Ok(match kind {
            ProviderKind::GitHubActions => ProviderConfig::GitHubActions(serde_json::from_str(json).map_err(invalid)?),
            ProviderKind::GitLabCi => ProviderConfig::GitLabCi(serde_json::from_str(json).map_err(invalid)?),
            ProviderKind::AzureDevOps => ProviderConfig::AzureDevOps(serde_json::from_str(json).map_err(invalid)?),
            ProviderKind::Bitbucket => ProviderConfig::Bitbucket(serde_json::from_str(json).map_err(invalid)?),
        })
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::GitHubActions(_) => ProviderKind::GitHubActions,
            ProviderConfig::GitLabCi(_) => ProviderKind::GitLabCi,
            ProviderConfig::AzureDevOps(_) => ProviderKind::AzureDevOps,
            ProviderConfig::Bitbucket(_) => ProviderKind::Bitbucket,
        }
    }
}
