//! Change detection against a local scanner registry checkout.
//!
//! All queries shell out to `git`; the repository is only read.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::DetectError;
use crate::scanner::ScannerId;

type Result<T> = std::result::Result<T, DetectError>;

/// Directory whose changes trigger the fallback scanner list.
pub const WORKFLOWS_DIR: &str = ".github/workflows/";

/// Detect which scanners changed between `base_ref` and `head_ref`.
///
/// Each ref is resolved literally first and then as `origin/<ref>`. The
/// returned set is ordered, so the same pair of commits always produces the
/// same output.
pub async fn detect_changed_scanners(
    repo_path: &Path,
    base_ref: &str,
    head_ref: &str,
) -> Result<BTreeSet<ScannerId>> {
    let files = changed_files(repo_path, base_ref, head_ref).await?;
    let scanners = extract_scanner_ids(&files);
    debug!(
        changed_files = files.len(),
        changed_scanners = scanners.len(),
        "Computed changed scanners"
    );
    Ok(scanners)
}

/// List every path that differs between two refs.
///
/// Renames are reported as a deletion plus an addition, so both the old and
/// the new path appear. The list is sorted and deduplicated.
pub async fn changed_files(repo_path: &Path, base_ref: &str, head_ref: &str) -> Result<Vec<String>> {
    ensure_repository(repo_path).await?;
    let base = resolve_ref(repo_path, base_ref).await?;
    let head = resolve_ref(repo_path, head_ref).await?;

    let output = git(repo_path, &["diff", "--name-only", "--no-renames", "-z", &base, &head]).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DetectError::Git(format!(
            "git diff {base} {head} failed: {}",
            stderr.trim()
        )));
    }

    let files: BTreeSet<String> = String::from_utf8_lossy(&output.stdout)
        .split('\0')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    Ok(files.into_iter().collect())
}

/// Resolve a ref to a commit SHA, falling back to `origin/<ref>`.
///
/// CI checkouts often only carry remote-tracking branches, so `main` may only
/// exist as `origin/main`. Refs already qualified with `origin/` or `refs/`
/// are not retried.
pub async fn resolve_ref(repo_path: &Path, reference: &str) -> Result<String> {
    if let Some(sha) = rev_parse_commit(repo_path, reference).await? {
        return Ok(sha);
    }

    if !reference.starts_with("origin/") && !reference.starts_with("refs/") {
        let origin_ref = format!("origin/{reference}");
        if let Some(sha) = rev_parse_commit(repo_path, &origin_ref).await? {
            debug!(reference = %reference, resolved = %origin_ref, "Resolved ref via origin fallback");
            return Ok(sha);
        }
    }

    Err(DetectError::RefNotFound {
        reference: reference.to_string(),
    })
}

/// Extract the deduplicated set of scanners touched by a list of paths.
pub fn extract_scanner_ids<S: AsRef<str>>(paths: &[S]) -> BTreeSet<ScannerId> {
    paths
        .iter()
        .filter_map(|p| ScannerId::from_registry_path(p.as_ref()))
        .collect()
}

/// Whether any path lives under `.github/workflows/`.
pub fn has_workflow_changes<S: AsRef<str>>(paths: &[S]) -> bool {
    paths.iter().any(|p| p.as_ref().starts_with(WORKFLOWS_DIR))
}

/// Fail with `DetectError::Repository` unless `repo_path` is inside a git repository.
pub async fn ensure_repository(repo_path: &Path) -> Result<()> {
    if !repo_path.is_dir() {
        return Err(DetectError::Repository {
            path: repo_path.to_path_buf(),
            reason: "directory does not exist".to_string(),
        });
    }

    let output = git(repo_path, &["rev-parse", "--git-dir"]).await?;
    if !output.status.success() {
        return Err(DetectError::Repository {
            path: repo_path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

async fn rev_parse_commit(repo_path: &Path, reference: &str) -> Result<Option<String>> {
    // A leading dash would be read as an option.
    if reference.is_empty() || reference.starts_with('-') {
        return Ok(None);
    }

    let spec = format!("{reference}^{{commit}}");
    let output = git(repo_path, &["rev-parse", "--verify", "--quiet", &spec]).await?;
    if !output.status.success() {
        return Ok(None);
    }

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok((!sha.is_empty()).then_some(sha))
}

async fn git(repo_path: &Path, args: &[&str]) -> Result<std::process::Output> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_deduplicates_and_sorts() {
        let paths = [
            "scanners/zorg/zebra/module.yaml",
            "scanners/aorg/apple/tests.yaml",
            "scanners/zorg/zebra/rules/one.yaml",
            "README.md",
            "scanners/aorg/apple/module.yaml",
        ];
        let ids: Vec<String> = extract_scanner_ids(&paths).iter().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["aorg/apple", "zorg/zebra"]);
    }

    #[test]
    fn extract_is_independent_of_input_order() {
        let mut paths = vec![
            "scanners/b/two/x",
            "scanners/a/one/x",
            "scanners/c/three/x",
            "scanners/a/one/y",
        ];
        let forward = extract_scanner_ids(&paths);
        paths.reverse();
        let backward = extract_scanner_ids(&paths);
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 3);
    }

    #[test]
    fn extract_from_empty_list_is_empty() {
        let paths: [&str; 0] = [];
        assert!(extract_scanner_ids(&paths).is_empty());
    }

    #[test]
    fn workflow_changes_detected_by_prefix() {
        assert!(has_workflow_changes(&[".github/workflows/test.yml"]));
        assert!(!has_workflow_changes(&[".github/CODEOWNERS", "scanners/a/b/c"]));
    }

    #[tokio::test]
    async fn missing_directory_is_a_repository_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = ensure_repository(&missing).await.unwrap_err();
        assert!(matches!(err, DetectError::Repository { .. }));
    }
}
