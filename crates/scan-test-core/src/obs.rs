//! Structured observability hooks for scanner test runs.
//!
//! This module provides:
//! - A batch-scoped span to instrument each dispatch-then-wait future
//! - Emission functions for lifecycle events: detection, dispatch, poll, wait outcome
//!
//! Events are emitted at `info!` (poll progress at `debug!`), filtered via `RUST_LOG`.

use std::time::Duration;

use tracing::{debug, info, warn, Span};

/// Span tagging every event of one batch with its scanner and provider.
///
/// # Example
///
/// ```ignore
/// run_batch(batch).instrument(batch_span("org/trivy", "gitlab-ci")).await;
/// ```
pub fn batch_span(scanner_id: &str, provider: &str) -> Span {
    tracing::info_span!("scan_test.batch", scanner_id = %scanner_id, provider = %provider)
}

/// Emit event: changed scanners detected and selected for testing.
pub fn emit_scanners_selected(changed: usize, selected: usize, fallback: bool) {
    info!(
        event = "scanners.selected",
        changed = changed,
        selected = selected,
        fallback = fallback,
    );
}

/// Emit event: a batch was handed to a provider.
pub fn emit_batch_dispatched(provider: &str, entries: usize, payload_digest: &str) {
    info!(
        event = "batch.dispatched",
        provider = %provider,
        entries = entries,
        payload_digest = %&payload_digest[..12.min(payload_digest.len())],
    );
}

/// Emit event: a poll found the run still executing.
pub fn emit_poll_pending(provider: &str, polls: u32, elapsed: Duration) {
    debug!(
        event = "wait.pending",
        provider = %provider,
        polls = polls,
        elapsed_ms = elapsed.as_millis() as u64,
    );
}

/// Emit event: a wait finished with results.
pub fn emit_wait_completed(provider: &str, polls: u32, results: usize, elapsed: Duration) {
    info!(
        event = "wait.completed",
        provider = %provider,
        polls = polls,
        results = results,
        elapsed_ms = elapsed.as_millis() as u64,
    );
}

/// Emit event: a wait hit its deadline (warning level).
pub fn emit_wait_timed_out(provider: &str, polls: u32, timeout: Duration) {
    warn!(
        event = "wait.timed_out",
        provider = %provider,
        polls = polls,
        timeout_secs = timeout.as_secs(),
    );
}

/// Emit event: a batch failed to dispatch or poll (warning level).
pub fn emit_batch_failed(provider: &str, error: &dyn std::fmt::Display) {
    warn!(event = "batch.failed", provider = %provider, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitters_accept_short_digests() {
        emit_batch_dispatched("scripted", 2, "abc");
        emit_batch_dispatched("scripted", 2, "0123456789abcdef0123");
    }

    #[test]
    fn batch_span_create() {
        let span = batch_span("org/scanner", "scripted");
        let _entered = span.enter();
    }
}
