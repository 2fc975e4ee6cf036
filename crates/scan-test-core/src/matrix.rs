//! Test matrix expansion.
//!
//! Every declared test fans out into one [`MatrixEntry`] per scan path. The
//! resulting order is fully determined by the inputs (scanner order, then
//! test order, then scan-path order), so the JSON payload handed to a
//! provider is reproducible byte for byte.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::definition::{DefinitionLoader, TestDefinition, TestTimeout, TestType};
use crate::error::DefinitionError;
use crate::scanner::ScannerId;

/// One `(test, scan_path)` pair: the smallest unit a provider dispatches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatrixEntry {
    pub scanner_id: ScannerId,
    pub test_name: String,
    #[serde(rename = "type")]
    pub test_type: TestType,
    pub source_url: String,
    pub source_ref: String,
    pub scan_path: String,
    pub timeout: TestTimeout,
}

/// Entries for a single scanner, dispatched together as one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixBatch {
    pub scanner_id: ScannerId,
    pub entries: Vec<MatrixEntry>,
}

/// Expand one scanner's definition into matrix entries.
pub fn expand_definition(scanner: &ScannerId, definition: &TestDefinition) -> Vec<MatrixEntry> {
    definition
        .tests
        .iter()
        .flat_map(|test| {
            test.effective_scan_paths()
                .into_iter()
                .map(move |scan_path| MatrixEntry {
                    scanner_id: scanner.clone(),
                    test_name: test.name.clone(),
                    test_type: test.test_type,
                    source_url: test.source.url.clone(),
                    source_ref: test.source.git_ref.clone(),
                    scan_path: scan_path.to_string(),
                    timeout: test.timeout,
                })
        })
        .collect()
}

/// Build the flat test matrix for a set of scanners.
///
/// Scanners without a definition are skipped. Any unsupported schema version
/// or invalid definition fails the whole call and no entries are returned.
pub fn build_matrix<L>(
    scanner_ids: &BTreeSet<ScannerId>,
    loader: &L,
) -> Result<Vec<MatrixEntry>, DefinitionError>
where
    L: DefinitionLoader + ?Sized,
{
    let mut definitions = Vec::with_capacity(scanner_ids.len());
    for scanner in scanner_ids {
        let Some(definition) = loader.load(scanner)? else {
            debug!(scanner_id = %scanner, "Skipping scanner without tests");
            continue;
        };
        definition.check_version(scanner)?;
        definitions.push((scanner, definition));
    }

    let entries: Vec<MatrixEntry> = definitions
        .iter()
        .flat_map(|(scanner, definition)| expand_definition(scanner, definition))
        .collect();

    info!(
        scanners = definitions.len(),
        entries = entries.len(),
        "Built test matrix"
    );
    Ok(entries)
}

/// Split a matrix into per-scanner batches, keeping first-seen order.
pub fn group_by_scanner(entries: Vec<MatrixEntry>) -> Vec<MatrixBatch> {
    let mut batches: Vec<MatrixBatch> = Vec::new();
    for entry in entries {
        match batches.iter_mut().find(|b| b.scanner_id == entry.scanner_id) {
            Some(batch) => batch.entries.push(entry),
            None => batches.push(MatrixBatch {
                scanner_id: entry.scanner_id.clone(),
                entries: vec![entry],
            }),
        }
    }
    batches
}

/// Serialize entries as the JSON array providers pass to their pipelines.
pub fn matrix_payload(entries: &[MatrixEntry]) -> serde_json::Result<String> {
    serde_json::to_string(entries)
}

/// SHA-256 of the matrix payload, for correlating dispatches in logs.
pub fn payload_digest(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Comma-separated, deduplicated scanner ids covered by `entries`.
pub fn scanner_label(entries: &[MatrixEntry]) -> String {
    let ids: BTreeSet<String> = entries.iter().map(|e| e.scanner_id.to_string()).collect();
    ids.into_iter().collect::<Vec<_>>().join(",")
}
