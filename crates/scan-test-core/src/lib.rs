//! scan-test core library
//!
//! Decides which scanners of a scanner registry changed in a pull request and
//! runs their declared tests on an external CI/CD provider:
//! - `detector` / `selection`: git diff → changed scanner ids
//! - `definition` / `matrix`: `tests.yaml` → flat, ordered test matrix
//! - `provider` / `waiter`: dispatch a batch, poll until done or timed out
//! - `orchestrator`: one concurrent dispatch-then-wait per scanner

pub mod definition;
pub mod detector;
pub mod error;
pub mod fakes;
pub mod matrix;
pub mod obs;
pub mod orchestrator;
pub mod provider;
pub mod result;
pub mod scanner;
pub mod selection;
pub mod telemetry;
pub mod waiter;

pub use definition::{
    parse_definition, DefinitionLoader, FsDefinitionLoader, TestDefinition, TestSource, TestSpec,
    TestTimeout, TestType, SUPPORTED_SCHEMA_VERSION,
};
pub use detector::{changed_files, detect_changed_scanners, resolve_ref};
pub use error::{
    DefinitionError, DetectError, ProviderError, Result, ScanTestError, WaitError,
};
pub use matrix::{build_matrix, group_by_scanner, matrix_payload, MatrixBatch, MatrixEntry};
pub use orchestrator::TestOrchestrator;
pub use provider::{PipelineProvider, PollStatus, ProviderResult, RegistryTarget};
pub use result::{RunReport, ScannerResult, TestResult, TestStatus};
pub use scanner::ScannerId;
pub use selection::{parse_scanner_list, select_scanners, ScannerSelection};
pub use telemetry::init_tracing;
pub use waiter::{wait_for_completion, WaitPolicy};

/// scan-test version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
