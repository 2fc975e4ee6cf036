//! HTTP plumbing shared by the providers.
//!
//! One `reqwest::Client` per provider instance carries the auth headers; it
//! is built once in the provider's constructor and dropped with it.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use scan_test_core::ProviderError;
use serde::de::DeserializeOwned;
use tracing::warn;

const USER_AGENT: &str = concat!("scan-test/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout for every provider call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Which provider operation an HTTP call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Dispatch,
    Poll,
}

/// Error context for one HTTP call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Call {
    pub provider: &'static str,
    pub stage: Stage,
}

impl Call {
    pub fn dispatch(provider: &'static str) -> Self {
        Self {
            provider,
            stage: Stage::Dispatch,
        }
    }

    pub fn poll(provider: &'static str) -> Self {
        Self {
            provider,
            stage: Stage::Poll,
        }
    }

    pub fn error(&self, message: impl Into<String>) -> ProviderError {
        let message = message.into();
        match self.stage {
            Stage::Dispatch => ProviderError::Dispatch {
                provider: self.provider,
                message,
            },
            Stage::Poll => ProviderError::Poll {
                provider: self.provider,
                message,
            },
        }
    }
}

/// Build the session client with `headers` attached to every request.
pub(crate) fn build_client(headers: HeaderMap) -> Result<Client, ProviderError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))
}

/// A sensitive header value (marked so it never shows up in debug output).
pub(crate) fn secret_header(value: &str) -> Result<HeaderValue, ProviderError> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| ProviderError::Config("token contains invalid header characters".to_string()))?;
    header.set_sensitive(true);
    Ok(header)
}

/// Parse a configured API base URL.
pub(crate) fn base_url(raw: &str) -> Result<Url, ProviderError> {
    let url = Url::parse(raw).map_err(|e| ProviderError::Config(format!("invalid api_base_url '{raw}': {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ProviderError::Config(format!("api_base_url '{raw}' cannot be a base URL")));
    }
    Ok(url)
}

/// Append percent-encoded path segments to `base`.
///
/// Segments are encoded individually, so a GitLab project path like
/// `group/project` becomes a single `group%2Fproject` segment.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Send a request, retrying once on a transport failure.
///
/// HTTP error statuses are returned as-is. Polls retry on connect and
/// timeout failures. Dispatches retry only when the connection was never
/// established: a dispatch that timed out may already have started a
/// pipeline, and sending it again would start a second one.
pub(crate) async fn send(call: Call, request: RequestBuilder) -> Result<Response, ProviderError> {
    let retry = request.try_clone();
    match request.send().await {
        Ok(response) => Ok(response),
        Err(err) if is_retryable(call.stage, &err) => {
            let Some(retry) = retry else {
                return Err(call.error(format!("request failed: {err}")));
            };
            warn!(provider = call.provider, error = %err, "Transient HTTP failure, retrying once");
            retry
                .send()
                .await
                .map_err(|e| call.error(format!("request failed after retry: {e}")))
        }
        Err(err) => Err(call.error(format!("request failed: {err}"))),
    }
}

fn is_retryable(stage: Stage, err: &reqwest::Error) -> bool {
    match stage {
        Stage::Dispatch => err.is_connect(),
        Stage::Poll => err.is_connect() || err.is_timeout(),
    }
}

/// Fail unless the response has status `expected`.
pub(crate) async fn expect_status(
    call: Call,
    response: Response,
    expected: StatusCode,
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status == expected {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(call.error(format!("unexpected status {status}: {}", body.trim())))
}

/// Read and deserialize a JSON body.
pub(crate) async fn json<T: DeserializeOwned>(call: Call, response: Response) -> Result<T, ProviderError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| call.error(format!("failed to read response body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| call.error(format!("invalid response body: {e}")))
}

/// Seconds between two timestamps, clamped at zero.
pub(crate) fn duration_secs(
    start: chrono::DateTime<chrono::Utc>,
    end: chrono::DateTime<chrono::Utc>,
) -> f64 {
    let millis = (end - start).num_milliseconds().max(0);
    millis as f64 / 1000.0
}
