//! Bitbucket Pipelines provider.
//!
//! Triggers the `test-scanner` custom pipeline on a branch. Pipeline state
//! names are loosely documented; anything outside the known terminal set is
//! treated as still running.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, AUTHORIZATION, LOCATION};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use scan_test_core::matrix::scanner_label;
use scan_test_core::{
    MatrixEntry, PipelineProvider, PollStatus, ProviderError, ProviderResult, RegistryTarget,
    TestResult, TestStatus,
};

use crate::config::Secret;
use crate::http::{self, Call};
use crate::variables::pipeline_variables;

pub const PROVIDER_NAME: &str = "bitbucket";

/// Custom pipeline selector the registry's `bitbucket-pipelines.yml` defines.
pub const CUSTOM_PIPELINE: &str = "test-scanner";

const TERMINAL_STATES: [&str; 4] = ["COMPLETED", "STOPPED", "ERROR", "FAILED"];

fn default_branch() -> String {
    "main".to_string()
}

fn default_api_base_url() -> String {
    "https://api.bitbucket.org/2.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitbucketConfig {
    pub token: Secret,
    pub workspace: String,
    pub repo_slug: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

/// Correlation data for one triggered pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitbucketPipelineRun {
    /// Pipeline UUID including braces, e.g. `{8f0c...}`.
    pub pipeline_uuid: String,
    /// Taken from the `Location` header of the trigger response.
    pub run_url: Option<String>,
    pub scanner_label: String,
}

#[derive(Debug, Deserialize)]
struct CreatedPipeline {
    uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PipelineResultName {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PipelineState {
    pub name: String,
    #[serde(default)]
    pub result: Option<PipelineResultName>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Pipeline {
    pub uuid: String,
    pub state: PipelineState,
    pub created_on: DateTime<Utc>,
    #[serde(default)]
    pub completed_on: Option<DateTime<Utc>>,
}

pub struct BitbucketProvider {
    config: BitbucketConfig,
    base: Url,
    client: Client,
}

impl BitbucketProvider {
    pub fn from_config(config: BitbucketConfig) -> Result<Self, ProviderError> {
        let base = http::base_url(&config.api_base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            http::secret_header(&format!("Bearer {}", config.token.expose()))?,
        );

        Ok(Self {
            client: http::build_client(headers)?,
            config,
            base,
        })
    }

    fn pipelines_url(&self) -> Url {
        http::endpoint(
            &self.base,
            &["repositories", &self.config.workspace, &self.config.repo_slug, "pipelines", ""],
        )
    }

    fn pipeline_url(&self, pipeline_uuid: &str) -> Url {
        http::endpoint(
            &self.base,
            &["repositories", &self.config.workspace, &self.config.repo_slug, "pipelines", pipeline_uuid],
        )
    }

    pub(crate) fn trigger_body(&self, entries: &[MatrixEntry], registry: &RegistryTarget) -> ProviderResult<Value> {
        let variables: Vec<Value> = pipeline_variables(PROVIDER_NAME, entries, registry)?
            .into_iter()
            .map(|(key, value)| json!({"key": key, "value": value}))
            .collect();
        Ok(json!({
            "target": {
                "type": "pipeline_ref_target",
                "ref_type": "branch",
                "ref_name": self.config.branch,
                "selector": {
                    "type": "custom",
                    "pattern": CUSTOM_PIPELINE,
                },
            },
            "variables": variables,
        }))
    }
}

#[async_trait]
impl PipelineProvider for BitbucketProvider {
    type State = BitbucketPipelineRun;

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn dispatch(
        &self,
        entries: &[MatrixEntry],
        registry: &RegistryTarget,
    ) -> ProviderResult<BitbucketPipelineRun> {
        let call = Call::dispatch(PROVIDER_NAME);
        let body = self.trigger_body(entries, registry)?;

        let response = http::send(call, self.client.post(self.pipelines_url()).json(&body)).await?;
        let response = http::expect_status(call, response, StatusCode::CREATED).await?;
        let run_url = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let created: CreatedPipeline = http::json(call, response).await?;

        let label = scanner_label(entries);
        info!(pipeline_uuid = %created.uuid, scanner_id = %label, "Created pipeline");
        Ok(BitbucketPipelineRun {
            pipeline_uuid: created.uuid,
            run_url,
            scanner_label: label,
        })
    }

    async fn poll(&self, state: &BitbucketPipelineRun) -> ProviderResult<PollStatus> {
        let call = Call::poll(PROVIDER_NAME);
        let response = http::send(call, self.client.get(self.pipeline_url(&state.pipeline_uuid))).await?;
        let response = http::expect_status(call, response, StatusCode::OK).await?;
        let pipeline: Pipeline = http::json(call, response).await?;
        Ok(pipeline_status(state, &pipeline))
    }
}

pub(crate) fn is_terminal(state: &str) -> bool {
    TERMINAL_STATES.contains(&state)
}

pub(crate) fn result_status(result: Option<&str>) -> TestStatus {
    match result {
        Some("SUCCESSFUL") => TestStatus::Pass,
        Some("FAILED") => TestStatus::Fail,
        _ => TestStatus::Error,
    }
}

pub(crate) fn pipeline_status(state: &BitbucketPipelineRun, pipeline: &Pipeline) -> PollStatus {
    if !is_terminal(&pipeline.state.name) {
        debug!(pipeline_uuid = %pipeline.uuid, state = %pipeline.state.name, "Pipeline still running");
        return PollStatus::Pending;
    }

    let result_name = pipeline.state.result.as_ref().map(|r| r.name.as_str());
    let status = result_status(result_name);
    let duration = pipeline
        .completed_on
        .map(|completed| http::duration_secs(pipeline.created_on, completed))
        .unwrap_or(0.0);
    let mut result = TestResult::new(&state.scanner_label, status, duration);
    if let Some(url) = &state.run_url {
        result = result.with_run_url(url.clone());
    }
    if !status.is_success() {
        result = result.with_message(format!(
            "pipeline {}: {}",
            pipeline.state.name,
            result_name.unwrap_or("no result")
        ));
    }
    PollStatus::Complete(vec![result])
}
