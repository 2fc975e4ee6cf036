//! Scanner identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Top-level directory holding scanner sources in a registry.
pub const SCANNERS_DIR: &str = "scanners";

/// A scanner identified by `(org, name)`.
///
/// Scanner sources live under `scanners/<org>/<name>/`. Ordering is by
/// `org` then `name`, which gives every set of identifiers a stable order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScannerId {
    pub org: String,
    pub name: String,
}

impl ScannerId {
    pub fn new(org: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            name: name.into(),
        }
    }

    /// Extract the scanner a registry-relative path belongs to.
    ///
    /// Only paths shaped `scanners/<org>/<scanner>/<file...>` match; the
    /// scanner directory itself or anything outside `scanners/` yields `None`.
    pub fn from_registry_path(path: &str) -> Option<Self> {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        if parts.next()? != SCANNERS_DIR {
            return None;
        }
        let org = parts.next()?;
        let name = parts.next()?;
        parts.next()?;
        Some(Self::new(org, name))
    }
}

impl fmt::Display for ScannerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.name)
    }
}

/// Error returned when a scanner identifier is not `org/name`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid scanner id '{0}': expected <org>/<name>")]
pub struct InvalidScannerId(pub String);

impl FromStr for ScannerId {
    type Err = InvalidScannerId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((org, name)) if !org.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(org, name))
            }
            _ => Err(InvalidScannerId(s.to_string())),
        }
    }
}

impl TryFrom<String> for ScannerId {
    type Error = InvalidScannerId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ScannerId> for String {
    fn from(id: ScannerId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_scanner_from_nested_path() {
        let id = ScannerId::from_registry_path("scanners/boostsecurityio/trivy-fs/rules/a.yaml");
        assert_eq!(id, Some(ScannerId::new("boostsecurityio", "trivy-fs")));
    }

    #[test]
    fn ignores_paths_outside_scanners() {
        assert_eq!(ScannerId::from_registry_path("README.md"), None);
        assert_eq!(ScannerId::from_registry_path(".github/workflows/ci.yml"), None);
        assert_eq!(ScannerId::from_registry_path("docs/scanners/org/x/y"), None);
    }

    #[test]
    fn requires_a_file_below_the_scanner_dir() {
        assert_eq!(ScannerId::from_registry_path("scanners/org/scanner"), None);
        assert_eq!(ScannerId::from_registry_path("scanners/org"), None);
        assert!(ScannerId::from_registry_path("scanners/org/scanner/module.yaml").is_some());
    }

    #[test]
    fn parses_and_displays_org_slash_name() {
        let id: ScannerId = "org/scanner".parse().unwrap();
        assert_eq!(id.org, "org");
        assert_eq!(id.name, "scanner");
        assert_eq!(id.to_string(), "org/scanner");

        assert!("no-slash".parse::<ScannerId>().is_err());
        assert!("/name".parse::<ScannerId>().is_err());
        assert!("a/b/c".parse::<ScannerId>().is_err());
    }

    #[test]
    fn orders_by_org_then_name() {
        let mut ids = vec![
            ScannerId::new("zorg", "a"),
            ScannerId::new("aorg", "z"),
            ScannerId::new("aorg", "b"),
        ];
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["aorg/b", "aorg/z", "zorg/a"]);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ScannerId::new("org", "scanner");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"org/scanner\"");
    }
}
