use crate::error::{HarnessError, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Component, Path, PathBuf};

/// Fixtures shipped under `fixtures/html/`.
pub const DEFAULT_FIXTURES: &[(&str, &str)] = &[
    ("normal", "normal.html"),
    ("nested-iframes", "nested-iframes.html"),
    ("violation", "violation.html"),
    ("include-exclude", "include-exclude.html"),
    ("shadow-error", "shadow-error.html"),
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fixture {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct FixtureRegistry {
    base_dir: PathBuf,
    fixtures: BTreeMap<String, Fixture>,
}

impl FixtureRegistry {
    /// An empty registry resolving relative paths against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let base_dir = if base_dir.is_absolute() {
            base_dir
        } else {
            env::current_dir()
                .map(|cwd| cwd.join(&base_dir))
                .unwrap_or(base_dir)
        };
        Self {
            base_dir: normalize(&base_dir),
            fixtures: BTreeMap::new(),
        }
    }

    pub fn with_default_fixtures(base_dir: impl Into<PathBuf>) -> Self {
        DEFAULT_FIXTURES
            .iter()
            .fold(Self::new(base_dir), |registry, (name, path)| {
                registry.with_fixture(*name, *path)
            })
    }

    pub fn with_fixture(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        let name = name.into();
        let fixture = Fixture {
            name: name.clone(),
            path: path.into(),
        };
        self.fixtures.insert(name, fixture);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn get(&self, name: &str) -> Option<&Fixture> {
        self.fixtures.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fixtures.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fixtures.keys().map(String::as_str)
    }

    /// Absolute `file://` URI for a registered fixture. The file itself is not
    /// checked; a missing document surfaces as a navigation error.
    pub fn resolve(&self, name: &str) -> Result<Url> {
        let fixture = self
            .fixtures
            .get(name)
            .ok_or_else(|| HarnessError::FixtureNotFound(name.to_string()))?;

        let path = normalize(&self.base_dir.join(&fixture.path));
        Url::from_file_path(&path).map_err(|_| {
            HarnessError::InvalidConfiguration(format!(
                "fixture '{}' does not map to a file URI: {}",
                name,
                path.display()
            ))
        })
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_fixture_to_file_uri() {
        let registry = FixtureRegistry::new("/srv/site")
            .with_fixture("home", "pages/index.html");
        let url = registry.resolve("home").expect("fixture registered");
        assert_eq!(url.scheme(), "file");
        assert_eq!(url.as_str(), "file:///srv/site/pages/index.html");
    }

    #[test]
    fn relative_segments_are_collapsed() {
        let registry = FixtureRegistry::new("/srv/site/nested/")
            .with_fixture("up", "../other/./page.html");
        let url = registry.resolve("up").expect("fixture registered");
        assert_eq!(url.as_str(), "file:///srv/site/other/page.html");
    }

    #[test]
    fn relative_base_is_made_absolute() {
        let registry = FixtureRegistry::with_default_fixtures("fixtures/html");
        assert!(registry.base_dir().is_absolute());
        let url = registry.resolve("normal").expect("default fixture");
        assert!(url.path().ends_with("/fixtures/html/normal.html"));
    }

    #[test]
    fn unknown_fixture_fails() {
        let registry = FixtureRegistry::with_default_fixtures("/tmp");
        let err = registry.resolve("missing").expect_err("not registered");
        assert!(matches!(err, HarnessError::FixtureNotFound(name) if name == "missing"));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let registry = FixtureRegistry::new("/definitely/not/here")
            .with_fixture("ghost", "ghost.html");
        assert!(registry.resolve("ghost").is_ok());
    }

    #[test]
    fn default_fixtures_are_listed_in_order() {
        let registry = FixtureRegistry::with_default_fixtures("/tmp");
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            vec![
                "include-exclude",
                "nested-iframes",
                "normal",
                "shadow-error",
                "violation",
            ]
        );
    }
}
