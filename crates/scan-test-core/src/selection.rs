//! Choosing which scanners a run tests.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::info;

use crate::definition::DefinitionLoader;
use crate::detector::{changed_files, extract_scanner_ids, has_workflow_changes};
use crate::error::DetectError;
use crate::obs;
use crate::scanner::ScannerId;

/// Outcome of scanner selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannerSelection {
    /// Every scanner touched by the diff.
    pub changed: BTreeSet<ScannerId>,
    /// Scanners that will be tested.
    pub selected: BTreeSet<ScannerId>,
    /// Whether `selected` came from the fallback list.
    pub used_fallback: bool,
}

/// Select scanners to test for the diff between `base_ref` and `head_ref`.
///
/// Changed scanners without a test definition are dropped. When nothing is
/// left and the diff touches `.github/workflows/`, the fallback scanners that
/// have definitions are tested instead, so workflow edits still get coverage.
pub async fn select_scanners<L>(
    repo_path: &Path,
    base_ref: &str,
    head_ref: &str,
    fallback: &[ScannerId],
    loader: &L,
) -> Result<ScannerSelection, DetectError>
where
    L: DefinitionLoader + ?Sized,
{
    let files = changed_files(repo_path, base_ref, head_ref).await?;
    let selection = select_from_changes(&files, fallback, loader);

    obs::emit_scanners_selected(
        selection.changed.len(),
        selection.selected.len(),
        selection.used_fallback,
    );
    Ok(selection)
}

/// Selection logic over an already computed list of changed paths.
pub fn select_from_changes<L, S>(files: &[S], fallback: &[ScannerId], loader: &L) -> ScannerSelection
where
    L: DefinitionLoader + ?Sized,
    S: AsRef<str>,
{
    let changed = extract_scanner_ids(files);
    let selected: BTreeSet<ScannerId> = changed
        .iter()
        .filter(|id| loader.has_definition(id))
        .cloned()
        .collect();

    if !selected.is_empty() || fallback.is_empty() || !has_workflow_changes(files) {
        return ScannerSelection {
            changed,
            selected,
            used_fallback: false,
        };
    }

    info!(fallback = fallback.len(), "Workflow files changed, testing fallback scanners");
    let selected = fallback
        .iter()
        .filter(|id| loader.has_definition(id))
        .cloned()
        .collect();

    ScannerSelection {
        changed,
        selected,
        used_fallback: true,
    }
}

/// Parse a comma-separated list of `org/name` scanner ids, skipping blanks.
pub fn parse_scanner_list(list: &str) -> Result<Vec<ScannerId>, crate::scanner::InvalidScannerId> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}
