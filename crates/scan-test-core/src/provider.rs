//! The pipeline provider contract.
//!
//! A provider triggers one external CI run per dispatch and answers read-only
//! status queries for it. Everything a provider needs to find its run again
//! travels in [`PipelineProvider::State`]; providers hold no per-dispatch
//! fields, so one instance can serve many concurrent waits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProviderError;
use crate::matrix::MatrixEntry;
use crate::result::TestResult;

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// The registry commit under test, forwarded to every dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryTarget {
    /// Git ref (usually a commit SHA) of the registry.
    pub registry_ref: String,
    /// Registry repository in `org/repo` form.
    pub registry_repo: String,
}

impl RegistryTarget {
    pub fn new(registry_ref: impl Into<String>, registry_repo: impl Into<String>) -> Self {
        Self {
            registry_ref: registry_ref.into(),
            registry_repo: registry_repo.into(),
        }
    }
}

/// Answer to a single poll.
///
/// `Complete(vec![])` is a finished run that reported no results, which is
/// not the same as `Pending`.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Pending,
    Complete(Vec<TestResult>),
}

impl PollStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, PollStatus::Pending)
    }
}

/// An adapter to one external CI/CD system.
#[async_trait]
pub trait PipelineProvider: Send + Sync {
    /// Correlation data returned by `dispatch` and required by `poll`.
    type State: fmt::Debug + Send + Sync;

    /// Stable provider key, e.g. `github-actions`.
    fn name(&self) -> &'static str;

    /// Trigger exactly one pipeline run covering `entries`.
    ///
    /// Returns as soon as the run is accepted; it never waits for completion.
    async fn dispatch(
        &self,
        entries: &[MatrixEntry],
        registry: &RegistryTarget,
    ) -> ProviderResult<Self::State>;

    /// Query the run started by the matching `dispatch`.
    ///
    /// Read-only and idempotent. A batch counts as complete only once every
    /// entry in it has finished.
    async fn poll(&self, state: &Self::State) -> ProviderResult<PollStatus>;
}
