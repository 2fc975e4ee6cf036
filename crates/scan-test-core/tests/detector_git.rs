//! Integration tests for change detection using real git repositories.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

use scan_test_core::detector::{changed_files, detect_changed_scanners, resolve_ref};
use scan_test_core::{select_scanners, DetectError, FsDefinitionLoader, ScannerId};

fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn make_git_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    run_git(dir.path(), &["config", "commit.gpgsign", "false"]);
    dir
}

fn commit(repo_dir: &Path, message: &str) -> String {
    run_git(repo_dir, &["add", "-A"]);
    run_git(repo_dir, &["commit", "--allow-empty", "-m", message]);
    run_git(repo_dir, &["rev-parse", "HEAD"])
}

fn write(repo_dir: &Path, rel: &str, content: &str) {
    let path = repo_dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn create_scanner(repo_dir: &Path, id: &str, with_tests: bool) {
    write(repo_dir, &format!("scanners/{id}/module.yaml"), "name: scanner\n");
    if with_tests {
        write(
            repo_dir,
            &format!("scanners/{id}/tests.yaml"),
            r#"version: "1.0"
tests:
  - name: "smoke"
    type: "source-code"
    source:
      url: "https://github.com/org/repo.git"
      ref: "main"
"#,
        );
    }
}

fn ids(list: &[&str]) -> BTreeSet<ScannerId> {
    list.iter().map(|s| s.parse().unwrap()).collect()
}

#[tokio::test]
async fn detects_added_scanners() {
    let repo = make_git_repo();
    let base = commit(repo.path(), "initial");

    create_scanner(repo.path(), "zorg/zebra", true);
    create_scanner(repo.path(), "aorg/apple", false);
    write(repo.path(), "README.md", "registry\n");
    commit(repo.path(), "add scanners");

    let changed = detect_changed_scanners(repo.path(), &base, "HEAD").await.unwrap();

    assert_eq!(changed, ids(&["aorg/apple", "zorg/zebra"]));
}

#[tokio::test]
async fn no_changes_yield_empty_set() {
    let repo = make_git_repo();
    let head = commit(repo.path(), "initial");

    let changed = detect_changed_scanners(repo.path(), &head, "HEAD").await.unwrap();

    assert!(changed.is_empty());
}

#[tokio::test]
async fn deletions_and_modifications_count() {
    let repo = make_git_repo();
    create_scanner(repo.path(), "org/removed", false);
    create_scanner(repo.path(), "org/edited", false);
    let base = commit(repo.path(), "initial");

    std::fs::remove_dir_all(repo.path().join("scanners/org/removed")).unwrap();
    write(repo.path(), "scanners/org/edited/module.yaml", "name: changed\n");
    commit(repo.path(), "edit");

    let changed = detect_changed_scanners(repo.path(), &base, "HEAD").await.unwrap();

    assert_eq!(changed, ids(&["org/edited", "org/removed"]));
}

#[tokio::test]
async fn renames_count_old_and_new_scanner() {
    let repo = make_git_repo();
    create_scanner(repo.path(), "old/scanner", false);
    let base = commit(repo.path(), "initial");

    std::fs::create_dir_all(repo.path().join("scanners/new")).unwrap();
    run_git(repo.path(), &["mv", "scanners/old/scanner", "scanners/new/scanner"]);
    commit(repo.path(), "rename");

    let files = changed_files(repo.path(), &base, "HEAD").await.unwrap();
    assert!(files.contains(&"scanners/old/scanner/module.yaml".to_string()));
    assert!(files.contains(&"scanners/new/scanner/module.yaml".to_string()));

    let changed = detect_changed_scanners(repo.path(), &base, "HEAD").await.unwrap();
    assert_eq!(changed, ids(&["new/scanner", "old/scanner"]));
}

#[tokio::test]
async fn resolves_ref_via_origin_fallback() {
    let repo = make_git_repo();
    let sha = commit(repo.path(), "initial");
    run_git(repo.path(), &["update-ref", "refs/remotes/origin/release", &sha]);

    let resolved = resolve_ref(repo.path(), "release").await.unwrap();

    assert_eq!(resolved, sha);
}

#[tokio::test]
async fn unknown_ref_is_ref_not_found() {
    let repo = make_git_repo();
    commit(repo.path(), "initial");

    let err = resolve_ref(repo.path(), "does-not-exist").await.unwrap_err();
    assert!(matches!(err, DetectError::RefNotFound { ref reference } if reference == "does-not-exist"));

    let err = detect_changed_scanners(repo.path(), "does-not-exist", "HEAD")
        .await
        .unwrap_err();
    assert!(matches!(err, DetectError::RefNotFound { .. }));
}

#[tokio::test]
async fn non_repository_is_repository_error() {
    let dir = tempfile::tempdir().unwrap();

    let err = detect_changed_scanners(dir.path(), "HEAD~1", "HEAD").await.unwrap_err();

    assert!(matches!(err, DetectError::Repository { .. }), "got {err}");
}

#[tokio::test]
async fn selection_keeps_only_scanners_with_tests() {
    let repo = make_git_repo();
    let base = commit(repo.path(), "initial");

    create_scanner(repo.path(), "org/with-tests", true);
    create_scanner(repo.path(), "org/without-tests", false);
    commit(repo.path(), "add scanners");

    let loader = FsDefinitionLoader::new(repo.path());
    let selection = select_scanners(repo.path(), &base, "HEAD", &[], &loader)
        .await
        .unwrap();

    assert_eq!(selection.changed.len(), 2);
    assert_eq!(selection.selected, ids(&["org/with-tests"]));
    assert!(!selection.used_fallback);
}

#[tokio::test]
async fn selection_falls_back_on_workflow_changes() {
    let repo = make_git_repo();
    create_scanner(repo.path(), "org/fallback", true);
    let base = commit(repo.path(), "initial");

    write(repo.path(), ".github/workflows/test.yml", "on: push\n");
    commit(repo.path(), "touch workflow");

    let loader = FsDefinitionLoader::new(repo.path());
    let fallback: Vec<ScannerId> = vec!["org/fallback".parse().unwrap(), "org/missing".parse().unwrap()];
    let selection = select_scanners(repo.path(), &base, "HEAD", &fallback, &loader)
        .await
        .unwrap();

    assert!(selection.used_fallback);
    assert_eq!(selection.selected, ids(&["org/fallback"]));
}
