//! Test definitions (`tests.yaml`) and their loaders.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DefinitionError;
use crate::scanner::{ScannerId, SCANNERS_DIR};

/// The only `tests.yaml` schema version this crate understands.
pub const SUPPORTED_SCHEMA_VERSION: &str = "1.0";

/// File name of a scanner's test definition.
pub const TEST_DEFINITION_FILE: &str = "tests.yaml";

/// Scan path used when a test lists none.
pub const DEFAULT_SCAN_PATH: &str = ".";

/// Complete test definition for one scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDefinition {
    pub version: String,

    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

impl TestDefinition {
    /// Reject definitions written against another schema version.
    pub fn check_version(&self, scanner: &ScannerId) -> Result<(), DefinitionError> {
        if self.version == SUPPORTED_SCHEMA_VERSION {
            Ok(())
        } else {
            Err(DefinitionError::UnsupportedSchemaVersion {
                scanner: scanner.to_string(),
                version: self.version.clone(),
                supported: SUPPORTED_SCHEMA_VERSION,
            })
        }
    }

    /// Validate every test in the definition.
    pub fn validate(&self, scanner: &ScannerId) -> Result<(), DefinitionError> {
        self.tests.iter().try_for_each(|t| t.validate(scanner))
    }
}

/// Kind of artifact a test scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestType {
    SourceCode,
    ContainerImage,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::SourceCode => "source-code",
            TestType::ContainerImage => "container-image",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository the test checks out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSource {
    /// HTTPS git URL.
    pub url: String,

    /// Branch, tag or commit SHA.
    #[serde(rename = "ref")]
    pub git_ref: String,
}

/// A single declared test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub test_type: TestType,

    pub source: TestSource,

    /// Paths to scan; empty means the repository root.
    #[serde(default)]
    pub scan_paths: Vec<String>,

    #[serde(default)]
    pub timeout: TestTimeout,
}

impl TestSpec {
    /// Scan paths with the `["."]` default applied.
    pub fn effective_scan_paths(&self) -> Vec<&str> {
        if self.scan_paths.is_empty() {
            vec![DEFAULT_SCAN_PATH]
        } else {
            self.scan_paths.iter().map(String::as_str).collect()
        }
    }

    fn validate(&self, scanner: &ScannerId) -> Result<(), DefinitionError> {
        let invalid = |reason: String| DefinitionError::Parse {
            scanner: scanner.to_string(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("test name must not be empty".to_string()));
        }
        if https_host(&self.source.url).is_none() {
            return Err(invalid(format!(
                "test '{}': source url must be an https URL with a host: {}",
                self.name, self.source.url
            )));
        }
        if self.source.git_ref.trim().is_empty() {
            return Err(invalid(format!("test '{}': source ref must not be empty", self.name)));
        }
        if self.scan_paths.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid(format!("test '{}': scan paths must not be empty", self.name)));
        }
        Ok(())
    }
}

/// Host of an `https://` URL, if it has a non-empty one.
fn https_host(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("https://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let host = match host_port.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => host_port,
    };
    if host.is_empty() || host.chars().any(|c| c.is_whitespace()) {
        None
    } else {
        Some(host)
    }
}

/// Per-test timeout, written as `300s`, `5m`, `1h` or bare seconds.
///
/// Displays in the largest unit that represents it exactly, so `300s`
/// round-trips as `5m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TestTimeout(Duration);

impl TestTimeout {
    pub const DEFAULT: TestTimeout = TestTimeout(Duration::from_secs(5 * 60));

    pub fn from_secs(secs: u64) -> Self {
        TestTimeout(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl Default for TestTimeout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for TestTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        if secs > 0 && secs % 3600 == 0 {
            write!(f, "{}h", secs / 3600)
        } else if secs > 0 && secs % 60 == 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{secs}s")
        }
    }
}

impl FromStr for TestTimeout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, multiplier) = match s.char_indices().last() {
            Some((i, 's')) => (&s[..i], 1),
            Some((i, 'm')) => (&s[..i], 60),
            Some((i, 'h')) => (&s[..i], 3600),
            Some(_) => (s, 1),
            None => return Err("timeout must not be empty".to_string()),
        };

        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid timeout '{s}': expected e.g. 300s, 5m or 1h"))?;
        if value == 0 {
            return Err(format!("invalid timeout '{s}': must be positive"));
        }
        value
            .checked_mul(multiplier)
            .map(TestTimeout::from_secs)
            .ok_or_else(|| format!("invalid timeout '{s}': too large"))
    }
}

impl TryFrom<String> for TestTimeout {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TestTimeout> for String {
    fn from(t: TestTimeout) -> Self {
        t.to_string()
    }
}

/// Source of scanner test definitions.
///
/// `Ok(None)` means the scanner has no definition and is skipped; it is not
/// an error.
pub trait DefinitionLoader {
    fn load(&self, scanner: &ScannerId) -> Result<Option<TestDefinition>, DefinitionError>;

    /// Whether `scanner` has a definition.
    ///
    /// A definition that fails to load still counts, so the failure surfaces
    /// when the matrix is built instead of the scanner being dropped.
    fn has_definition(&self, scanner: &ScannerId) -> bool {
        self.load(scanner).map_or(true, |d| d.is_some())
    }
}

/// Loads `scanners/<org>/<name>/tests.yaml` from a registry checkout.
#[derive(Debug, Clone)]
pub struct FsDefinitionLoader {
    registry_path: PathBuf,
}

impl FsDefinitionLoader {
    pub fn new(registry_path: impl Into<PathBuf>) -> Self {
        Self {
            registry_path: registry_path.into(),
        }
    }

    /// Location of a scanner's `tests.yaml`.
    pub fn definition_path(&self, scanner: &ScannerId) -> PathBuf {
        self.registry_path
            .join(SCANNERS_DIR)
            .join(&scanner.org)
            .join(&scanner.name)
            .join(TEST_DEFINITION_FILE)
    }
}

impl DefinitionLoader for FsDefinitionLoader {
    fn load(&self, scanner: &ScannerId) -> Result<Option<TestDefinition>, DefinitionError> {
        let path = self.definition_path(scanner);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(scanner_id = %scanner, "No test definition");
                return Ok(None);
            }
            Err(source) => return Err(DefinitionError::Io { path, source }),
        };

        parse_definition(scanner, &content).map(Some)
    }

    fn has_definition(&self, scanner: &ScannerId) -> bool {
        self.definition_path(scanner).is_file()
    }
}

/// Just the `version` key, read before the rest of the file.
#[derive(Debug, Deserialize)]
struct SchemaHeader {
    version: String,
}

/// Parse and validate the contents of a `tests.yaml` file.
///
/// The schema version is checked before the body is deserialized, so a
/// file written for a newer schema fails with `UnsupportedSchemaVersion`
/// even when its tests do not fit the current model.
pub fn parse_definition(scanner: &ScannerId, content: &str) -> Result<TestDefinition, DefinitionError> {
    let invalid = |reason: String| DefinitionError::Parse {
        scanner: scanner.to_string(),
        reason,
    };

    if content.trim().is_empty() {
        return Err(invalid("empty test file".to_string()));
    }

    let header: SchemaHeader =
        serde_yaml::from_str(content).map_err(|e| invalid(format!("invalid YAML: {e}")))?;
    if header.version != SUPPORTED_SCHEMA_VERSION {
        return Err(DefinitionError::UnsupportedSchemaVersion {
            scanner: scanner.to_string(),
            version: header.version,
            supported: SUPPORTED_SCHEMA_VERSION,
        });
    }

    let definition: TestDefinition =
        serde_yaml::from_str(content).map_err(|e| invalid(format!("invalid YAML: {e}")))?;

    definition.validate(scanner)?;
    Ok(definition)
}
