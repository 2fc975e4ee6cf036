//! In-memory fakes for the provider and loader traits (testing only)
//!
//! `ScriptedProvider` replays scripted poll answers per dispatch and records
//! every call; `MemoryDefinitionLoader` serves definitions from a map.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::definition::{DefinitionLoader, TestDefinition};
use crate::error::{DefinitionError, ProviderError};
use crate::matrix::{scanner_label, MatrixEntry};
use crate::provider::{PipelineProvider, PollStatus, ProviderResult, RegistryTarget};
use crate::result::TestResult;
use crate::scanner::ScannerId;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// One scripted answer to a poll.
#[derive(Debug, Clone)]
pub enum ScriptedPoll {
    Pending,
    Complete(Vec<TestResult>),
    Fail(String),
}

/// Provider whose poll answers come from a script.
///
/// The dispatch state is the batch's scanner label, so each dispatched batch
/// replays its own script (or the default one). Once a script runs out the
/// run stays pending forever.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    default_script: Vec<ScriptedPoll>,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedPoll>>>,
    failing_dispatches: HashSet<String>,
    dispatched: Mutex<Vec<(Vec<MatrixEntry>, RegistryTarget)>>,
    polled: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// Every dispatch replays `script`.
    pub fn new(script: Vec<ScriptedPoll>) -> Self {
        Self {
            default_script: script,
            ..Self::default()
        }
    }

    /// A provider whose runs never finish.
    pub fn always_pending() -> Self {
        Self::new(Vec::new())
    }

    /// Use `script` for the dispatch whose state key is `key`.
    pub fn with_script(self, key: &str, script: Vec<ScriptedPoll>) -> Self {
        lock(&self.scripts).insert(key.to_string(), script.into());
        self
    }

    /// Make dispatching the batch keyed `key` fail.
    pub fn with_failing_dispatch(mut self, key: &str) -> Self {
        self.failing_dispatches.insert(key.to_string());
        self
    }

    /// Build a dispatch state without dispatching.
    pub fn dispatch_state(&self, key: &str) -> String {
        key.to_string()
    }

    pub fn poll_count(&self) -> usize {
        lock(&self.polled).len()
    }

    /// States passed to `poll`, in call order.
    pub fn polled_states(&self) -> Vec<String> {
        lock(&self.polled).clone()
    }

    /// Batches passed to `dispatch`, in call order.
    pub fn dispatched(&self) -> Vec<(Vec<MatrixEntry>, RegistryTarget)> {
        lock(&self.dispatched).clone()
    }
}

#[async_trait]
impl PipelineProvider for ScriptedProvider {
    type State = String;

    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn dispatch(
        &self,
        entries: &[MatrixEntry],
        registry: &RegistryTarget,
    ) -> ProviderResult<Self::State> {
        let key = scanner_label(entries);
        if self.failing_dispatches.contains(&key) {
            return Err(ProviderError::Dispatch {
                provider: self.name(),
                message: format!("scripted dispatch failure for {key}"),
            });
        }
        lock(&self.dispatched).push((entries.to_vec(), registry.clone()));
        Ok(key)
    }

    async fn poll(&self, state: &Self::State) -> ProviderResult<PollStatus> {
        lock(&self.polled).push(state.clone());

        let next = lock(&self.scripts)
            .entry(state.clone())
            .or_insert_with(|| self.default_script.clone().into())
            .pop_front();

        match next {
            None | Some(ScriptedPoll::Pending) => Ok(PollStatus::Pending),
            Some(ScriptedPoll::Complete(results)) => Ok(PollStatus::Complete(results)),
            Some(ScriptedPoll::Fail(message)) => Err(ProviderError::Poll {
                provider: self.name(),
                message,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryDefinitionLoader
// ---------------------------------------------------------------------------

/// Definition loader backed by a `BTreeMap<ScannerId, TestDefinition>`.
#[derive(Debug, Default, Clone)]
pub struct MemoryDefinitionLoader {
    definitions: BTreeMap<ScannerId, TestDefinition>,
}

impl MemoryDefinitionLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition for `scanner` (`org/name`).
    ///
    /// Panics on a malformed scanner id.
    pub fn with(mut self, scanner: &str, definition: TestDefinition) -> Self {
        let id: ScannerId = scanner
            .parse()
            .unwrap_or_else(|e| panic!("bad scanner id in fake: {e}"));
        self.definitions.insert(id, definition);
        self
    }
}

impl DefinitionLoader for MemoryDefinitionLoader {
    fn load(&self, scanner: &ScannerId) -> Result<Option<TestDefinition>, DefinitionError> {
        Ok(self.definitions.get(scanner).cloned())
    }
}
