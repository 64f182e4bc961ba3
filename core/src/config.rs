use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;

pub const ENV_WEBDRIVER_URL: &str = "AXECHECK_WEBDRIVER_URL";
pub const ENV_BROWSER: &str = "AXECHECK_BROWSER";
pub const ENV_BROWSER_ARGS: &str = "AXECHECK_BROWSER_ARGS";
pub const ENV_HEADLESS: &str = "AXECHECK_HEADLESS";
pub const ENV_AXE_SOURCE: &str = "AXECHECK_AXE_SOURCE";
pub const ENV_ARTIFACTS_DIR: &str = "AXECHECK_ARTIFACTS_DIR";
pub const ENV_FIXTURES_DIR: &str = "AXECHECK_FIXTURES_DIR";
pub const ENV_SCRIPT_TIMEOUT_MS: &str = "AXECHECK_SCRIPT_TIMEOUT_MS";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chrome,
    Firefox,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chrome => "chrome",
            BrowserKind::Firefox => "firefox",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chrome" | "chromium" => Some(BrowserKind::Chrome),
            "firefox" => Some(BrowserKind::Firefox),
            _ => None,
        }
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to reach a browser, load axe-core and store artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub webdriver_url: String,
    pub browser: BrowserKind,
    pub headless: bool,
    #[serde(default)]
    pub browser_args: Vec<String>,
    pub axe_source: PathBuf,
    pub artifacts_dir: PathBuf,
    pub fixtures_dir: PathBuf,
    pub script_timeout_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            browser: BrowserKind::Chrome,
            headless: true,
            browser_args: Vec::new(),
            axe_source: PathBuf::from("node_modules/axe-core/axe.min.js"),
            artifacts_dir: PathBuf::from("artifacts"),
            fixtures_dir: PathBuf::from("fixtures/html"),
            script_timeout_ms: 30_000,
        }
    }
}

impl HarnessConfig {
    /// Defaults overlaid with `AXECHECK_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_WEBDRIVER_URL) {
            if !url.trim().is_empty() {
                config.webdriver_url = url.trim().to_string();
            }
        }

        if let Some(raw) = lookup(ENV_BROWSER) {
            config.browser = BrowserKind::parse(&raw).ok_or_else(|| {
                HarnessError::InvalidConfiguration(format!(
                    "{ENV_BROWSER}: unsupported browser '{raw}'"
                ))
            })?;
        }

        if let Some(raw) = lookup(ENV_BROWSER_ARGS) {
            config.browser_args = shell_words::split(&raw).map_err(|err| {
                HarnessError::InvalidConfiguration(format!("{ENV_BROWSER_ARGS}: {err}"))
            })?;
        }

        if let Some(raw) = lookup(ENV_HEADLESS) {
            config.headless = parse_bool(&raw).ok_or_else(|| {
                HarnessError::InvalidConfiguration(format!(
                    "{ENV_HEADLESS}: expected a boolean, got '{raw}'"
                ))
            })?;
        }

        if let Some(path) = lookup(ENV_AXE_SOURCE) {
            config.axe_source = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_ARTIFACTS_DIR) {
            config.artifacts_dir = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_FIXTURES_DIR) {
            config.fixtures_dir = PathBuf::from(path);
        }

        if let Some(raw) = lookup(ENV_SCRIPT_TIMEOUT_MS) {
            config.script_timeout_ms = raw.trim().parse().map_err(|err| {
                HarnessError::InvalidConfiguration(format!("{ENV_SCRIPT_TIMEOUT_MS}: {err}"))
            })?;
        }

        Ok(config)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
