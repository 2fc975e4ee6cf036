//! scan-test - dispatch scanner registry tests to a CI/CD provider
//!
//! Detects which scanners changed between two refs of a scanner registry,
//! expands their `tests.yaml` files into a test matrix, runs one pipeline
//! per scanner on the chosen provider and prints a JSON report on stdout.
//!
//! The exit code is 1 when any test failed, errored or timed out.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};

use scan_test_core::{
    build_matrix, parse_scanner_list, select_scanners, FsDefinitionLoader, MatrixEntry,
    PipelineProvider, RegistryTarget, RunReport, TestOrchestrator, WaitPolicy,
};
use scan_test_providers::{
    AzureDevOpsProvider, BitbucketProvider, GitHubActionsProvider, GitLabCiProvider,
    ProviderConfig, ProviderKind,
};

#[derive(Parser, Debug)]
#[command(name = "scan-test")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run scanner registry tests on an external CI/CD provider", long_about = None)]
struct Cli {
    /// Provider key: github-actions, gitlab-ci, azure-devops or bitbucket
    #[arg(long, env = "SCAN_TEST_PROVIDER")]
    provider: ProviderKind,

    /// Provider configuration as a JSON object
    #[arg(long, env = "SCAN_TEST_PROVIDER_CONFIG", hide_env_values = true)]
    provider_config: String,

    /// Path to the scanner registry checkout
    #[arg(long, default_value = ".")]
    registry_path: PathBuf,

    /// Registry repository in org/repo form, forwarded to the pipeline
    #[arg(long)]
    registry_repo: String,

    /// Registry ref (usually the PR head SHA), forwarded to the pipeline
    #[arg(long)]
    registry_ref: String,

    /// Base ref to diff against
    #[arg(long)]
    base_ref: String,

    /// Head ref to diff
    #[arg(long, default_value = "HEAD")]
    head_ref: String,

    /// Comma-separated scanners to test when only workflow files changed
    #[arg(long, default_value = "")]
    fallback_scanners: String,

    /// Seconds to wait for each pipeline before giving up
    #[arg(long, default_value_t = 1800)]
    timeout_secs: u64,

    /// Seconds between status polls
    #[arg(long, default_value_t = 30)]
    poll_interval_secs: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn policy(&self) -> WaitPolicy {
        WaitPolicy::new(
            Duration::from_secs(self.timeout_secs),
            Duration::from_secs(self.poll_interval_secs),
        )
    }

    fn registry(&self) -> RegistryTarget {
        RegistryTarget::new(&self.registry_ref, &self.registry_repo)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    scan_test_core::init_tracing(cli.json, level);

    let report = run(&cli).await?;

    for line in report.summary_lines() {
        info!("{line}");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    let code = report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(cli: &Cli) -> Result<RunReport> {
    info!(provider = %cli.provider, "Loading provider");
    let config = ProviderConfig::from_json(cli.provider, &cli.provider_config)
        .context("Failed to parse provider configuration")?;
    let fallback = parse_scanner_list(&cli.fallback_scanners).context("Invalid --fallback-scanners")?;

    let loader = FsDefinitionLoader::new(&cli.registry_path);
    info!(base_ref = %cli.base_ref, head_ref = %cli.head_ref, "Detecting changed scanners");
    let selection = select_scanners(&cli.registry_path, &cli.base_ref, &cli.head_ref, &fallback, &loader)
        .await
        .context("Failed to detect changed scanners")?;

    if selection.selected.is_empty() {
        info!("No changed scanners with tests detected");
        return Ok(RunReport::default());
    }

    let entries = build_matrix(&selection.selected, &loader).context("Failed to build test matrix")?;
    if entries.is_empty() {
        info!("Test definitions declare no tests");
        return Ok(RunReport::default());
    }

    let registry = cli.registry();
    let policy = cli.policy();
    let report = match config {
        ProviderConfig::GitHubActions(config) => {
            execute(&GitHubActionsProvider::from_config(config)?, entries, &registry, policy).await
        }
        ProviderConfig::GitLabCi(config) => {
            execute(&GitLabCiProvider::from_config(config)?, entries, &registry, policy).await
        }
        ProviderConfig::AzureDevOps(config) => {
            execute(&AzureDevOpsProvider::from_config(config)?, entries, &registry, policy).await
        }
        ProviderConfig::Bitbucket(config) => {
            execute(&BitbucketProvider::from_config(config)?, entries, &registry, policy).await
        }
    };
    Ok(report)
}

/// Run the matrix on `provider` and fold the results into a report.
async fn execute<P: PipelineProvider>(
    provider: &P,
    entries: Vec<MatrixEntry>,
    registry: &RegistryTarget,
    policy: WaitPolicy,
) -> RunReport {
    info!(tests = entries.len(), provider = provider.name(), "Running tests");
    let results = TestOrchestrator::new(provider, policy)
        .run_tests(entries, registry)
        .await;
    RunReport::from_scanner_results(&results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_test_core::fakes::{MemoryDefinitionLoader, ScriptedPoll, ScriptedProvider};
    use scan_test_core::{
        ScannerId, TestDefinition, TestResult, TestSource, TestSpec, TestStatus, TestTimeout,
        TestType,
    };
    use std::collections::BTreeSet;
    use std::path::Path;
    use std::process::Command;

    fn args(extra: &[&str]) -> Vec<String> {
        let mut argv: Vec<String> = [
            "scan-test",
            "--provider",
            "gitlab-ci",
            "--provider-config",
            r#"{"token":"t","project_id":1}"#,
            "--registry-repo",
            "org/registry",
            "--registry-ref",
            "abc123",
            "--base-ref",
            "main",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        argv.extend(extra.iter().map(|s| s.to_string()));
        argv
    }

    fn run_git(dir: &Path, args: &[&str]) {
        let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    #[test]
    fn defaults_apply() {
        let cli = Cli::try_parse_from(args(&[])).unwrap();
        assert_eq!(cli.provider, ProviderKind::GitLabCi);
        assert_eq!(cli.head_ref, "HEAD");
        assert_eq!(cli.registry_path, PathBuf::from("."));
        assert_eq!(cli.policy(), WaitPolicy::default());
        assert_eq!(cli.registry(), RegistryTarget::new("abc123", "org/registry"));
        assert!(cli.fallback_scanners.is_empty());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut argv = args(&[]);
        argv[2] = "jenkins".to_string();
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn wait_flags_override_policy() {
        let cli = Cli::try_parse_from(args(&["--timeout-secs", "60", "--poll-interval-secs", "5"])).unwrap();
        assert_eq!(
            cli.policy(),
            WaitPolicy::new(Duration::from_secs(60), Duration::from_secs(5))
        );
    }

    #[tokio::test]
    async fn no_changes_produce_empty_report() {
        let repo = tempfile::tempdir().unwrap();
        run_git(repo.path(), &["init"]);
        run_git(repo.path(), &["config", "user.name", "test-user"]);
        run_git(repo.path(), &["config", "user.email", "test@example.com"]);
        run_git(repo.path(), &["config", "commit.gpgsign", "false"]);
        run_git(repo.path(), &["commit", "--allow-empty", "-m", "initial"]);

        let path = repo.path().to_string_lossy().to_string();
        let mut argv = args(&["--registry-path", &path]);
        argv[10] = "HEAD".to_string();
        let cli = Cli::try_parse_from(argv).unwrap();

        let report = run(&cli).await.unwrap();

        assert_eq!(report, RunReport::default());
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn invalid_provider_config_fails_before_detection() {
        let mut argv = args(&["--registry-path", "/does/not/exist"]);
        argv[4] = r#"{"token":"t"}"#.to_string();
        let cli = Cli::try_parse_from(argv).unwrap();

        let err = run(&cli).await.unwrap_err();

        assert!(format!("{err:#}").contains("provider configuration"));
    }

    #[tokio::test(start_paused = true)]
    async fn execute_reports_each_scanner() {
        let spec = TestSpec {
            name: "smoke".to_string(),
            test_type: TestType::SourceCode,
            source: TestSource {
                url: "https://github.com/org/repo.git".to_string(),
                git_ref: "main".to_string(),
            },
            scan_paths: vec![],
            timeout: TestTimeout::DEFAULT,
        };
        let definition = TestDefinition {
            version: "1.0".to_string(),
            tests: vec![spec],
        };
        let loader = MemoryDefinitionLoader::new()
            .with("org/a", definition.clone())
            .with("org/b", definition);
        let scanners: BTreeSet<ScannerId> = ["org/a", "org/b"].iter().map(|s| s.parse().unwrap()).collect();
        let entries = build_matrix(&scanners, &loader).unwrap();

        let provider = ScriptedProvider::always_pending().with_script(
            "org/a",
            vec![ScriptedPoll::Complete(vec![TestResult::new("org/a", TestStatus::Pass, 4.0)])],
        );
        let policy = WaitPolicy::new(Duration::from_secs(60), Duration::from_secs(30));

        let registry = RegistryTarget::new("abc123", "org/registry");
        let report = execute(&provider, entries, &registry, policy).await;

        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 1);
        assert_eq!(report.timeouts, 1);
        assert_eq!(report.exit_code(), 1);
    }
}
