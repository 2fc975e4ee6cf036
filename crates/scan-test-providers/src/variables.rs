//! Pipeline variables shared by the GitLab, Azure DevOps and Bitbucket
//! providers.

use scan_test_core::matrix::{matrix_payload, scanner_label};
use scan_test_core::{MatrixEntry, ProviderError, RegistryTarget};

pub(crate) const SCANNER_ID: &str = "SCANNER_ID";
pub(crate) const REGISTRY_REF: &str = "REGISTRY_REF";
pub(crate) const REGISTRY_REPO: &str = "REGISTRY_REPO";
pub(crate) const MATRIX_TESTS: &str = "MATRIX_TESTS";

/// Name/value pairs handed to the remote pipeline, in a fixed order.
pub(crate) fn pipeline_variables(
    provider: &'static str,
    entries: &[MatrixEntry],
    registry: &RegistryTarget,
) -> Result<Vec<(&'static str, String)>, ProviderError> {
    let matrix = matrix_payload(entries).map_err(|e| ProviderError::Dispatch {
        provider,
        message: format!("failed to encode matrix: {e}"),
    })?;
    Ok(vec![
        (SCANNER_ID, scanner_label(entries)),
        (REGISTRY_REF, registry.registry_ref.clone()),
        (REGISTRY_REPO, registry.registry_repo.clone()),
        (MATRIX_TESTS, matrix),
    ])
}
