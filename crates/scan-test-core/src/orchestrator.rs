//! Test orchestration on a single provider.

use futures::future::join_all;
use tracing::{info, Instrument};

use crate::error::{ScanTestError, WaitError};
use crate::matrix::{group_by_scanner, matrix_payload, payload_digest, MatrixBatch, MatrixEntry};
use crate::obs;
use crate::provider::{PipelineProvider, RegistryTarget};
use crate::result::{ScannerResult, TestResult, TestStatus};
use crate::waiter::{wait_for_completion, WaitPolicy};

/// Dispatches matrix batches to one provider and collects their results.
///
/// Each scanner's entries form one batch: one dispatch, one wait. Batches run
/// concurrently and independently; a failing batch never affects the others.
pub struct TestOrchestrator<'a, P: PipelineProvider> {
    provider: &'a P,
    policy: WaitPolicy,
}

impl<'a, P: PipelineProvider> TestOrchestrator<'a, P> {
    pub fn new(provider: &'a P, policy: WaitPolicy) -> Self {
        Self { provider, policy }
    }

    /// Run every batch of `entries` and return one result set per scanner,
    /// in matrix order.
    pub async fn run_tests(
        &self,
        entries: Vec<MatrixEntry>,
        registry: &RegistryTarget,
    ) -> Vec<ScannerResult> {
        let batches = group_by_scanner(entries);
        if batches.is_empty() {
            info!("No matrix entries to dispatch");
            return Vec::new();
        }

        info!(
            provider = self.provider.name(),
            scanners = batches.len(),
            "Dispatching tests"
        );

        let runs = batches.into_iter().map(|batch| {
            let span = obs::batch_span(&batch.scanner_id.to_string(), self.provider.name());
            self.run_batch(batch, registry).instrument(span)
        });
        let results = join_all(runs).await;

        info!("Test execution completed");
        results
    }

    /// Dispatch one batch and wait for it, folding failures into results.
    pub async fn run_batch(&self, batch: MatrixBatch, registry: &RegistryTarget) -> ScannerResult {
        let label = batch.scanner_id.to_string();
        let results = match self.dispatch_and_wait(&batch.entries, registry).await {
            Ok(results) => results,
            Err(err) => {
                obs::emit_batch_failed(self.provider.name(), &err);
                vec![failure_result(&label, &err)]
            }
        };

        ScannerResult {
            scanner_id: batch.scanner_id,
            results,
        }
    }

    async fn dispatch_and_wait(
        &self,
        entries: &[MatrixEntry],
        registry: &RegistryTarget,
    ) -> Result<Vec<TestResult>, ScanTestError> {
        let digest = payload_digest(&matrix_payload(entries)?);
        let state = self.provider.dispatch(entries, registry).await?;
        obs::emit_batch_dispatched(self.provider.name(), entries.len(), &digest);

        let results = wait_for_completion(self.provider, &state, self.policy).await?;
        Ok(results)
    }
}

/// The single result reported for a batch that produced no provider results.
///
/// A wait timeout reads as "still running"; anything else is an error.
pub fn failure_result(name: &str, err: &ScanTestError) -> TestResult {
    match err {
        ScanTestError::Wait(WaitError::Timeout { timeout, .. }) => TestResult::new(
            name,
            TestStatus::Timeout,
            timeout.as_secs_f64(),
        )
        .with_message(format!(
            "tests still running after {}s; stopped waiting",
            timeout.as_secs()
        )),
        other => TestResult::new(name, TestStatus::Error, 0.0).with_message(other.to_string()),
    }
}
