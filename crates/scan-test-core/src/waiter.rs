//! Timeout-bounded completion wait shared by every provider.
//!
//! The wait is a small state machine: it starts `Waiting`, each poll either
//! keeps it `Waiting` or moves it to `Complete`, and after each sleep an
//! elapsed deadline moves it to `TimedOut`. Both terminal states end the
//! loop, and no poll is issued once the deadline has passed.

use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::error::WaitError;
use crate::obs;
use crate::provider::{PipelineProvider, PollStatus};
use crate::result::TestResult;

/// Default upper bound on one wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default pause between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait and how often to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitPolicy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }
}

/// Poll `provider` until the dispatched run completes or the deadline passes.
///
/// Fails with [`WaitError::Timeout`] after at least `timeout` and at most
/// `timeout + poll_interval` (plus poll latency) when the run never
/// completes. A poll error ends the wait immediately as [`WaitError::Poll`].
pub async fn wait_for_completion<P>(
    provider: &P,
    state: &P::State,
    policy: WaitPolicy,
) -> Result<Vec<TestResult>, WaitError>
where
    P: PipelineProvider + ?Sized,
{
    let started = Instant::now();
    let mut polls: u32 = 0;

    loop {
        polls += 1;
        match provider.poll(state).await.map_err(WaitError::Poll)? {
            PollStatus::Complete(results) => {
                obs::emit_wait_completed(provider.name(), polls, results.len(), started.elapsed());
                return Ok(results);
            }
            PollStatus::Pending => obs::emit_poll_pending(provider.name(), polls, started.elapsed()),
        }

        sleep(policy.poll_interval).await;

        if started.elapsed() >= policy.timeout {
            obs::emit_wait_timed_out(provider.name(), polls, policy.timeout);
            return Err(WaitError::Timeout {
                timeout: policy.timeout,
                polls,
            });
        }
    }
}
