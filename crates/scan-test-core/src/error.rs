//! Error taxonomy for scanner test runs.
//!
//! Each stage of a run has its own error type so callers can tell them apart:
//! detection and definition errors abort the whole run, provider errors abort
//! one batch, and a wait timeout is an expected outcome rather than a fault.

use std::path::PathBuf;
use std::time::Duration;

/// Errors produced while detecting changed scanners.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("cannot resolve git ref '{reference}' (also tried origin/{reference})")]
    RefNotFound { reference: String },

    #[error("not a git repository: {path}: {reason}")]
    Repository { path: PathBuf, reason: String },

    #[error("git command failed: {0}")]
    Git(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while loading and validating `tests.yaml` definitions.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("invalid test definition for scanner {scanner}: {reason}")]
    Parse { scanner: String, reason: String },

    #[error("unsupported test definition version '{version}' for scanner {scanner} (supported: {supported})")]
    UnsupportedSchemaVersion {
        scanner: String,
        version: String,
        supported: &'static str,
    },

    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by a pipeline provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} dispatch failed: {message}")]
    Dispatch {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} poll failed: {message}")]
    Poll {
        provider: &'static str,
        message: String,
    },

    #[error("invalid provider configuration: {0}")]
    Config(String),
}

/// Terminal failures of a completion wait.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("tests did not complete within {timeout:?} ({polls} polls)")]
    Timeout { timeout: Duration, polls: u32 },

    #[error(transparent)]
    Poll(ProviderError),
}

impl WaitError {
    /// Whether the wait ended because the deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }
}

/// Umbrella error for a scanner test run.
#[derive(Debug, thiserror::Error)]
pub enum ScanTestError {
    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for scanner test operations.
pub type Result<T> = std::result::Result<T, ScanTestError>;
