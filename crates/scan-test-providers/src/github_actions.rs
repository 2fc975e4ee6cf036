//! GitHub Actions provider.
//!
//! Dispatches a `workflow_dispatch` event and finds the resulting run again
//! through a per-dispatch UUID. The workflow must include the `dispatch_id`
//! input in its `run-name`, e.g. `run-name: scan-test ${{ inputs.dispatch_id }}`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use scan_test_core::matrix::{matrix_payload, scanner_label};
use scan_test_core::{
    MatrixEntry, PipelineProvider, PollStatus, ProviderError, ProviderResult, RegistryTarget,
    TestResult, TestStatus,
};

use crate::config::{string_or_number, Secret};
use crate::http::{self, Call};

pub const PROVIDER_NAME: &str = "github-actions";

/// Page size used when listing workflow runs (the API maximum).
const RUNS_PER_PAGE: usize = 100;

/// Runs are searched from this long before the dispatch to absorb clock
/// skew between this host and GitHub.
const CREATED_SKEW_SECS: i64 = 60;

fn default_ref() -> String {
    "main".to_string()
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubActionsConfig {
    pub token: Secret,
    pub owner: String,
    pub repo: String,
    /// Workflow file name (`scan.yml`) or numeric workflow id.
    #[serde(deserialize_with = "string_or_number")]
    pub workflow_id: String,
    /// Branch the workflow is dispatched on.
    #[serde(rename = "ref", default = "default_ref")]
    pub git_ref: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

/// Correlation data for one workflow dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubDispatch {
    pub dispatch_id: String,
    pub dispatch_time: DateTime<Utc>,
    pub scanner_label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WorkflowRun {
    pub id: u64,
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    pub display_title: String,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsPage {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

pub struct GitHubActionsProvider {
    config: GitHubActionsConfig,
    base: Url,
    client: Client,
}

impl GitHubActionsProvider {
    pub fn from_config(config: GitHubActionsConfig) -> Result<Self, ProviderError> {
        let base = http::base_url(&config.api_base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            http::secret_header(&format!("Bearer {}", config.token.expose()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));

        Ok(Self {
            client: http::build_client(headers)?,
            config,
            base,
        })
    }

    fn dispatch_url(&self) -> Url {
        http::endpoint(
            &self.base,
            &[
                "repos",
                &self.config.owner,
                &self.config.repo,
                "actions",
                "workflows",
                &self.config.workflow_id,
                "dispatches",
            ],
        )
    }

    fn runs_url(&self) -> Url {
        http::endpoint(
            &self.base,
            &["repos", &self.config.owner, &self.config.repo, "actions", "runs"],
        )
    }

    /// Request body for the `workflow_dispatch` call.
    pub(crate) fn dispatch_body(
        &self,
        dispatch_id: &str,
        entries: &[MatrixEntry],
        registry: &RegistryTarget,
    ) -> ProviderResult<Value> {
        let matrix = matrix_payload(entries)
            .map_err(|e| Call::dispatch(PROVIDER_NAME).error(format!("failed to encode matrix: {e}")))?;
        Ok(json!({
            "ref": self.config.git_ref,
            "inputs": {
                "dispatch_id": dispatch_id,
                "scanner_id": scanner_label(entries),
                "registry_ref": registry.registry_ref,
                "registry_repo": registry.registry_repo,
                "matrix": matrix,
            }
        }))
    }

    /// Page through runs created since the dispatch until the one carrying
    /// `state.dispatch_id` shows up.
    async fn find_run(&self, state: &GitHubDispatch) -> ProviderResult<Option<WorkflowRun>> {
        let call = Call::poll(PROVIDER_NAME);
        let created = created_filter(state.dispatch_time);
        let per_page = RUNS_PER_PAGE.to_string();

        for page in 1u32.. {
            let request = self.client.get(self.runs_url()).query(&[
                ("per_page", per_page.as_str()),
                ("created", created.as_str()),
                ("page", page.to_string().as_str()),
            ]);
            let response = http::send(call, request).await?;
            let response = http::expect_status(call, response, StatusCode::OK).await?;
            let listing: WorkflowRunsPage = http::json(call, response).await?;

            let count = listing.workflow_runs.len();
            if let Some(run) = find_matching_run(listing.workflow_runs, &state.dispatch_id) {
                return Ok(Some(run));
            }
            if count < RUNS_PER_PAGE {
                break;
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl PipelineProvider for GitHubActionsProvider {
    type State = GitHubDispatch;

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn dispatch(
        &self,
        entries: &[MatrixEntry],
        registry: &RegistryTarget,
    ) -> ProviderResult<GitHubDispatch> {
        let call = Call::dispatch(PROVIDER_NAME);
        let dispatch_id = Uuid::new_v4().to_string();
        let dispatch_time = Utc::now();
        let body = self.dispatch_body(&dispatch_id, entries, registry)?;
        let label = scanner_label(entries);

        info!(
            owner = %self.config.owner,
            repo = %self.config.repo,
            workflow_id = %self.config.workflow_id,
            git_ref = %self.config.git_ref,
            scanner_id = %label,
            dispatch_id = %dispatch_id,
            "Dispatching workflow"
        );

        let response = http::send(call, self.client.post(self.dispatch_url()).json(&body)).await?;
        http::expect_status(call, response, StatusCode::NO_CONTENT).await?;

        Ok(GitHubDispatch {
            dispatch_id,
            dispatch_time,
            scanner_label: label,
        })
    }

    async fn poll(&self, state: &GitHubDispatch) -> ProviderResult<PollStatus> {
        let Some(run) = self.find_run(state).await? else {
            debug!(dispatch_id = %state.dispatch_id, "Workflow run not found yet");
            return Ok(PollStatus::Pending);
        };
        Ok(run_status(&state.scanner_label, &run))
    }
}

/// The `created` search qualifier for runs started around `dispatch_time`.
pub(crate) fn created_filter(dispatch_time: DateTime<Utc>) -> String {
    let since = dispatch_time - chrono::Duration::seconds(CREATED_SKEW_SECS);
    format!(">={}", since.format("%Y-%m-%dT%H:%M:%SZ"))
}

/// The run whose display title carries `dispatch_id`, if any.
pub(crate) fn find_matching_run(runs: Vec<WorkflowRun>, dispatch_id: &str) -> Option<WorkflowRun> {
    runs.into_iter().find(|run| run.display_title.contains(dispatch_id))
}

pub(crate) fn conclusion_status(conclusion: Option<&str>) -> TestStatus {
    match conclusion {
        Some("success") | Some("neutral") => TestStatus::Pass,
        Some("failure") => TestStatus::Fail,
        Some("timed_out") => TestStatus::Timeout,
        _ => TestStatus::Error,
    }
}

pub(crate) fn run_status(label: &str, run: &WorkflowRun) -> PollStatus {
    if run.status != "completed" {
        debug!(run_id = run.id, status = %run.status, "Workflow run still in progress");
        return PollStatus::Pending;
    }

    let status = conclusion_status(run.conclusion.as_deref());
    let mut result = TestResult::new(label, status, http::duration_secs(run.created_at, run.updated_at))
        .with_run_url(run.html_url.clone());
    if !status.is_success() {
        let conclusion = run.conclusion.as_deref().unwrap_or("none");
        result = result.with_message(format!("workflow run concluded: {conclusion}"));
    }
    PollStatus::Complete(vec![result])
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_test_core::{TestTimeout, TestType};

    fn provider() -> GitHubActionsProvider {
        let config: GitHubActionsConfig = serde_json::from_value(json!({
            "token": "ghp_secret",
            "owner": "boostsecurityio",
            "repo": "scanner-tests",
            "workflow_id": "scan.yml",
        }))
        .unwrap();
        GitHubActionsProvider::from_config(config).unwrap()
    }

    fn entry(name: &str, scan_path: &str) -> MatrixEntry {
        MatrixEntry {
            scanner_id: "boostsecurityio/trivy-fs".parse().unwrap(),
            test_name: name.to_string(),
            test_type: TestType::SourceCode,
            source_url: "https://github.com/org/repo.git".to_string(),
            source_ref: "main".to_string(),
            scan_path: scan_path.to_string(),
            timeout: TestTimeout::DEFAULT,
        }
    }

    fn runs_fixture() -> Vec<WorkflowRun> {
        let page: WorkflowRunsPage = serde_json::from_value(json!({
            "total_count": 2,
            "workflow_runs": [
                {
                    "id": 1,
                    "name": "scan",
                    "status": "in_progress",
                    "conclusion": null,
                    "display_title": "scan-test 11111111-aaaa",
                    "html_url": "https://github.com/o/r/actions/runs/1",
                    "created_at": "2024-05-01T10:00:00Z",
                    "updated_at": "2024-05-01T10:01:00Z"
                },
                {
                    "id": 2,
                    "name": "scan",
                    "status": "completed",
                    "conclusion": "failure",
                    "display_title": "scan-test 22222222-bbbb",
                    "html_url": "https://github.com/o/r/actions/runs/2",
                    "created_at": "2024-05-01T10:00:00Z",
                    "updated_at": "2024-05-01T10:02:30Z"
                }
            ]
        }))
        .unwrap();
        page.workflow_runs
    }

    #[test]
    fn urls_follow_the_actions_api() {
        let p = provider();
        assert_eq!(
            p.dispatch_url().as_str(),
            "https://api.github.com/repos/boostsecurityio/scanner-tests/actions/workflows/scan.yml/dispatches"
        );
        assert_eq!(
            p.runs_url().as_str(),
            "https://api.github.com/repos/boostsecurityio/scanner-tests/actions/runs"
        );
    }

    #[test]
    fn dispatch_body_carries_inputs_and_full_matrix() {
        let p = provider();
        let entries = vec![entry("t1", "app"), entry("t1", "api")];
        let registry = RegistryTarget::new("abc123", "boostsecurityio/registry");

        let body = p.dispatch_body("uuid-1", &entries, &registry).unwrap();

        assert_eq!(body["ref"], "main");
        let inputs = &body["inputs"];
        assert_eq!(inputs["dispatch_id"], "uuid-1");
        assert_eq!(inputs["scanner_id"], "boostsecurityio/trivy-fs");
        assert_eq!(inputs["registry_ref"], "abc123");
        assert_eq!(inputs["registry_repo"], "boostsecurityio/registry");

        let matrix: Vec<MatrixEntry> = serde_json::from_str(inputs["matrix"].as_str().unwrap()).unwrap();
        assert_eq!(matrix, entries);
    }

    #[test]
    fn matches_run_by_dispatch_id_in_title() {
        let run = find_matching_run(runs_fixture(), "22222222-bbbb").unwrap();
        assert_eq!(run.id, 2);
        assert!(find_matching_run(runs_fixture(), "33333333").is_none());
    }

    #[test]
    fn conclusion_mapping() {
        let cases = [
            (Some("success"), TestStatus::Pass),
            (Some("neutral"), TestStatus::Pass),
            (Some("failure"), TestStatus::Fail),
            (Some("timed_out"), TestStatus::Timeout),
            (Some("cancelled"), TestStatus::Error),
            (Some("action_required"), TestStatus::Error),
            (Some("skipped"), TestStatus::Error),
            (Some("stale"), TestStatus::Error),
            (None, TestStatus::Error),
        ];
        for (conclusion, expected) in cases {
            assert_eq!(conclusion_status(conclusion), expected, "{conclusion:?}");
        }
    }

    #[test]
    fn in_progress_run_is_pending() {
        let runs = runs_fixture();
        assert!(run_status("org/a", &runs[0]).is_pending());
    }

    #[test]
    fn completed_run_yields_one_result() {
        let runs = runs_fixture();
        let PollStatus::Complete(results) = run_status("boostsecurityio/trivy-fs", &runs[1]) else {
            panic!("expected complete");
        };
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.name, "boostsecurityio/trivy-fs");
        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.duration_secs, 150.0);
        assert_eq!(result.run_url.as_deref(), Some("https://github.com/o/r/actions/runs/2"));
        assert!(result.message.as_deref().unwrap().contains("failure"));
    }

    #[test]
    fn created_filter_allows_for_clock_skew() {
        let t = DateTime::parse_from_rfc3339("2024-05-01T10:00:30Z").unwrap().with_timezone(&Utc);
        assert_eq!(created_filter(t), ">=2024-05-01T09:59:30Z");
    }
}
