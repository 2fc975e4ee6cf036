//! GitLab CI provider.
//!
//! Creates a pipeline through the pipelines API. GitLab hands the pipeline id
//! back directly, so no extra correlation is needed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use scan_test_core::matrix::scanner_label;
use scan_test_core::{
    MatrixEntry, PipelineProvider, PollStatus, ProviderError, ProviderResult, RegistryTarget,
    TestResult, TestStatus,
};

use crate::config::{string_or_number, Secret};
use crate::http::{self, Call};
use crate::variables::pipeline_variables;

pub const PROVIDER_NAME: &str = "gitlab-ci";

const TERMINAL_STATUSES: [&str; 5] = ["success", "failed", "canceled", "skipped", "manual"];

fn default_ref() -> String {
    "main".to_string()
}

fn default_api_base_url() -> String {
    "https://gitlab.com/api/v4".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabCiConfig {
    pub token: Secret,
    /// Numeric project id or `group/project` path.
    #[serde(deserialize_with = "string_or_number")]
    pub project_id: String,
    #[serde(rename = "ref", default = "default_ref")]
    pub git_ref: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

/// Correlation data for one created pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitLabPipelineRun {
    pub pipeline_id: u64,
    pub scanner_label: String,
}

#[derive(Debug, Serialize)]
struct Variable<'a> {
    key: &'a str,
    value: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreatePipeline<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    variables: Vec<Variable<'a>>,
}

#[derive(Debug, Deserialize)]
struct CreatedPipeline {
    id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Pipeline {
    pub id: u64,
    pub status: String,
    pub web_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct GitLabCiProvider {
    config: GitLabCiConfig,
    base: Url,
    client: Client,
}

impl GitLabCiProvider {
    pub fn from_config(config: GitLabCiConfig) -> Result<Self, ProviderError> {
        let base = http::base_url(&config.api_base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert("private-token", http::secret_header(config.token.expose())?);

        Ok(Self {
            client: http::build_client(headers)?,
            config,
            base,
        })
    }

    fn create_url(&self) -> Url {
        http::endpoint(&self.base, &["projects", &self.config.project_id, "pipeline"])
    }

    fn pipeline_url(&self, pipeline_id: u64) -> Url {
        http::endpoint(
            &self.base,
            &["projects", &self.config.project_id, "pipelines", &pipeline_id.to_string()],
        )
    }

    pub(crate) fn create_body<'a>(
        &'a self,
        entries: &[MatrixEntry],
        registry: &RegistryTarget,
    ) -> ProviderResult<CreatePipeline<'a>> {
        let variables = pipeline_variables(PROVIDER_NAME, entries, registry)?
            .into_iter()
            .map(|(key, value)| Variable { key, value })
            .collect();
        Ok(CreatePipeline {
            git_ref: &self.config.git_ref,
            variables,
        })
    }
}

#[async_trait]
impl PipelineProvider for GitLabCiProvider {
    type State = GitLabPipelineRun;

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn dispatch(
        &self,
        entries: &[MatrixEntry],
        registry: &RegistryTarget,
    ) -> ProviderResult<GitLabPipelineRun> {
        let call = Call::dispatch(PROVIDER_NAME);
        let body = self.create_body(entries, registry)?;

        let response = http::send(call, self.client.post(self.create_url()).json(&body)).await?;
        let response = http::expect_status(call, response, StatusCode::CREATED).await?;
        let created: CreatedPipeline = http::json(call, response).await?;

        let label = scanner_label(entries);
        info!(pipeline_id = created.id, scanner_id = %label, "Created pipeline");
        Ok(GitLabPipelineRun {
            pipeline_id: created.id,
            scanner_label: label,
        })
    }

    async fn poll(&self, state: &GitLabPipelineRun) -> ProviderResult<PollStatus> {
        let call = Call::poll(PROVIDER_NAME);
        let response = http::send(call, self.client.get(self.pipeline_url(state.pipeline_id))).await?;
        let response = http::expect_status(call, response, StatusCode::OK).await?;
        let pipeline: Pipeline = http::json(call, response).await?;
        Ok(pipeline_status(&state.scanner_label, &pipeline))
    }
}

pub(crate) fn is_terminal(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

pub(crate) fn result_status(status: &str) -> TestStatus {
    match status {
        "success" => TestStatus::Pass,
        "failed" => TestStatus::Fail,
        _ => TestStatus::Error,
    }
}

pub(crate) fn pipeline_status(label: &str, pipeline: &Pipeline) -> PollStatus {
    if !is_terminal(&pipeline.status) {
        debug!(pipeline_id = pipeline.id, status = %pipeline.status, "Pipeline still running");
        return PollStatus::Pending;
    }

    let status = result_status(&pipeline.status);
    let mut result = TestResult::new(
        label,
        status,
        http::duration_secs(pipeline.created_at, pipeline.updated_at),
    )
    .with_run_url(pipeline.web_url.clone());
    if !status.is_success() {
        result = result.with_message(format!("pipeline finished with status {}", pipeline.status));
    }
    PollStatus::Complete(vec![result])
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_test_core::{TestTimeout, TestType};
    use serde_json::json;

    fn provider(project_id: serde_json::Value) -> GitLabCiProvider {
        let config: GitLabCiConfig = serde_json::from_value(json!({
            "token": "glpat-secret",
            "project_id": project_id,
            "ref": "scanners",
        }))
        .unwrap();
        GitLabCiProvider::from_config(config).unwrap()
    }

    fn pipeline(status: &str) -> Pipeline {
        serde_json::from_value(json!({
            "id": 991,
            "iid": 12,
            "project_id": 5,
            "status": status,
            "ref": "scanners",
            "sha": "deadbeef",
            "web_url": "https://gitlab.com/g/p/-/pipelines/991",
            "created_at": "2024-05-01T10:00:00.000Z",
            "updated_at": "2024-05-01T10:05:00.000Z"
        }))
        .unwrap()
    }

    #[test]
    fn project_path_is_encoded_as_one_segment() {
        let p = provider(json!("group/sub/project"));
        assert_eq!(
            p.create_url().as_str(),
            "https://gitlab.com/api/v4/projects/group%2Fsub%2Fproject/pipeline"
        );
        assert_eq!(
            p.pipeline_url(7).as_str(),
            "https://gitlab.com/api/v4/projects/group%2Fsub%2Fproject/pipelines/7"
        );
    }

    #[test]
    fn create_body_has_ref_and_variables() {
        let p = provider(json!(5));
        let entries = vec![MatrixEntry {
            scanner_id: "org/scanner".parse().unwrap(),
            test_name: "smoke".to_string(),
            test_type: TestType::SourceCode,
            source_url: "https://github.com/org/repo.git".to_string(),
            source_ref: "main".to_string(),
            scan_path: ".".to_string(),
            timeout: TestTimeout::DEFAULT,
        }];
        let body = serde_json::to_value(p.create_body(&entries, &RegistryTarget::new("sha1", "org/registry")).unwrap())
            .unwrap();

        assert_eq!(body["ref"], "scanners");
        let variables = body["variables"].as_array().unwrap();
        assert_eq!(variables.len(), 4);
        assert_eq!(variables[0], json!({"key": "SCANNER_ID", "value": "org/scanner"}));
        assert_eq!(variables[1], json!({"key": "REGISTRY_REF", "value": "sha1"}));
        assert_eq!(variables[2], json!({"key": "REGISTRY_REPO", "value": "org/registry"}));
        assert_eq!(variables[3]["key"], "MATRIX_TESTS");
    }

    #[test]
    fn running_statuses_are_pending() {
        for status in ["created", "waiting_for_resource", "preparing", "pending", "running", "scheduled"] {
            assert!(pipeline_status("org/a", &pipeline(status)).is_pending(), "{status}");
        }
    }

    #[test]
    fn terminal_status_mapping() {
        let cases = [
            ("success", TestStatus::Pass),
            ("failed", TestStatus::Fail),
            ("canceled", TestStatus::Error),
            ("skipped", TestStatus::Error),
            ("manual", TestStatus::Error),
        ];
        for (status, expected) in cases {
            let PollStatus::Complete(results) = pipeline_status("org/a", &pipeline(status)) else {
                panic!("{status} should be terminal");
            };
            assert_eq!(results[0].status, expected, "{status}");
            assert_eq!(results[0].duration_secs, 300.0);
            assert_eq!(results[0].run_url.as_deref(), Some("https://gitlab.com/g/p/-/pipelines/991"));
        }
    }
}
