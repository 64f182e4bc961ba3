use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("unknown fixture '{0}'")]
    FixtureNotFound(String),
    #[error("failed to start browser session: {0}")]
    SessionStart(String),
    #[error("invalid scan configuration: {0}")]
    InvalidConfiguration(String),
    #[error("conflicting scan scope: {0}")]
    ConflictingScope(String),
    #[error("accessibility scan failed: {0}")]
    ScanExecution(String),
    #[error("webdriver command '{command}' failed: {message}")]
    WebDriver { command: String, message: String },
    #[error("failed to load axe-core source from {path}: {message}")]
    EngineLoad { path: String, message: String },
    #[error("invalid suite: {0}")]
    Suite(String),
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),
}

impl HarnessError {
    pub(crate) fn webdriver(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WebDriver {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn is_assertion(&self) -> bool {
        matches!(self, HarnessError::Assertion(_))
    }
}

/// A failed expectation over a scan result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionFailure {
    pub check: String,
    pub expected: usize,
    pub actual: usize,
    pub detail: Option<String>,
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, found {}",
            self.check, self.expected, self.actual
        )?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AssertionFailure {}

pub type Result<T> = std::result::Result<T, HarnessError>;
