//! Azure DevOps provider.
//!
//! Queues a pipeline run with template parameters. Authentication is HTTP
//! Basic with an empty user name and the personal access token as password.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64_STD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use scan_test_core::matrix::scanner_label;
use scan_test_core::{
    MatrixEntry, PipelineProvider, PollStatus, ProviderError, ProviderResult, RegistryTarget,
    TestResult, TestStatus,
};

use crate::config::{string_or_number, Secret};
use crate::http::{self, Call};
use crate::variables::pipeline_variables;

pub const PROVIDER_NAME: &str = "azure-devops";

const API_VERSION: &str = "7.1";

fn default_api_base_url() -> String {
    "https://dev.azure.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzureDevOpsConfig {
    pub token: Secret,
    pub organization: String,
    pub project: String,
    #[serde(deserialize_with = "string_or_number")]
    pub pipeline_id: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

/// Correlation data for one queued run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureRun {
    pub run_id: u64,
    pub scanner_label: String,
}

#[derive(Debug, Deserialize)]
struct QueuedRun {
    id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WebLink {
    pub href: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RunLinks {
    #[serde(default)]
    pub web: Option<WebLink>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PipelineRun {
    pub id: u64,
    pub state: String,
    #[serde(default)]
    pub result: Option<String>,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub finished_date: Option<DateTime<Utc>>,
    #[serde(rename = "_links", default)]
    pub links: Option<RunLinks>,
}

pub struct AzureDevOpsProvider {
    config: AzureDevOpsConfig,
    base: Url,
    client: Client,
}

/// `Authorization` value for a personal access token.
pub(crate) fn basic_auth(token: &str) -> String {
    format!("Basic {}", B64_STD.encode(format!(":{token}")))
}

impl AzureDevOpsProvider {
    pub fn from_config(config: AzureDevOpsConfig) -> Result<Self, ProviderError> {
        let base = http::base_url(&config.api_base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, http::secret_header(&basic_auth(config.token.expose()))?);

        Ok(Self {
            client: http::build_client(headers)?,
            config,
            base,
        })
    }

    fn runs_url(&self, run_id: Option<u64>) -> Url {
        let run_id = run_id.map(|id| id.to_string());
        let mut segments = vec![
            self.config.organization.as_str(),
            self.config.project.as_str(),
            "_apis",
            "pipelines",
            self.config.pipeline_id.as_str(),
            "runs",
        ];
        if let Some(id) = run_id.as_deref() {
            segments.push(id);
        }
        let mut url = http::endpoint(&self.base, &segments);
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        url
    }

    pub(crate) fn run_body(&self, entries: &[MatrixEntry], registry: &RegistryTarget) -> ProviderResult<Value> {
        let parameters: Map<String, Value> = pipeline_variables(PROVIDER_NAME, entries, registry)?
            .into_iter()
            .map(|(key, value)| (key.to_string(), Value::String(value)))
            .collect();
        let mut body = Map::new();
        body.insert("templateParameters".to_string(), Value::Object(parameters));
        Ok(Value::Object(body))
    }
}

#[async_trait]
impl PipelineProvider for AzureDevOpsProvider {
    type State = AzureRun;

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn dispatch(&self, entries: &[MatrixEntry], registry: &RegistryTarget) -> ProviderResult<AzureRun> {
        let call = Call::dispatch(PROVIDER_NAME);
        let body = self.run_body(entries, registry)?;

        let response = http::send(call, self.client.post(self.runs_url(None)).json(&body)).await?;
        let response = http::expect_status(call, response, StatusCode::OK).await?;
        let queued: QueuedRun = http::json(call, response).await?;

        let label = scanner_label(entries);
        info!(run_id = queued.id, scanner_id = %label, "Created pipeline run");
        Ok(AzureRun {
            run_id: queued.id,
            scanner_label: label,
        })
    }

    async fn poll(&self, state: &AzureRun) -> ProviderResult<PollStatus> {
        let call = Call::poll(PROVIDER_NAME);
        let response = http::send(call, self.client.get(self.runs_url(Some(state.run_id)))).await?;
        let response = http::expect_status(call, response, StatusCode::OK).await?;
        let run: PipelineRun = http::json(call, response).await?;
        Ok(run_status(&state.scanner_label, &run))
    }
}

pub(crate) fn is_terminal(state: &str) -> bool {
    matches!(state, "completed" | "canceling")
}

pub(crate) fn result_status(result: Option<&str>) -> TestStatus {
    match result {
        Some("succeeded") => TestStatus::Pass,
        Some("failed") => TestStatus::Fail,
        _ => TestStatus::Error,
    }
}

pub(crate) fn run_status(label: &str, run: &PipelineRun) -> PollStatus {
    if !is_terminal(&run.state) {
        debug!(run_id = run.id, state = %run.state, "Pipeline run still in progress");
        return PollStatus::Pending;
    }

    let status = result_status(run.result.as_deref());
    let duration = run
        .finished_date
        .map(|finished| http::duration_secs(run.created_date, finished))
        .unwrap_or(0.0);
    let mut result = TestResult::new(label, status, duration);
    if let Some(web) = run.links.as_ref().and_then(|links| links.web.as_ref()) {
        result = result.with_run_url(web.href.clone());
    }
    if !status.is_success() {
        let outcome = run.result.as_deref().unwrap_or("unknown");
        result = result.with_message(format!("pipeline run {}: {outcome}", run.state));
    }
    PollStatus::Complete(vec![result])
}
