//! Pipeline providers for scan-test
//!
//! Each module adapts one CI/CD system to
//! [`scan_test_core::PipelineProvider`]:
//! - `github_actions`: workflow dispatch, run found again via a UUID in its title
//! - `gitlab_ci`: pipeline creation with variables
//! - `azure_devops`: pipeline run with template parameters
//! - `bitbucket`: custom pipeline trigger
//!
//! Every provider owns one HTTP client built in `from_config` and released
//! when the provider is dropped.

pub mod azure_devops;
pub mod bitbucket;
pub mod config;
pub mod github_actions;
pub mod gitlab_ci;
mod http;
mod variables;

pub use azure_devops::{AzureDevOpsConfig, AzureDevOpsProvider};
pub use bitbucket::{BitbucketConfig, BitbucketProvider};
pub use config::{ProviderConfig, ProviderKind, Secret, UnknownProvider};
pub use github_actions::{GitHubActionsConfig, GitHubActionsProvider};
pub use gitlab_ci::{GitLabCiConfig, GitLabCiProvider};
