use crate::config::{BrowserKind, HarnessConfig};
use crate::driver::{BrowserDriver, ElementHandle, Locator, WebDriverClient};
use crate::error::{HarnessError, Result};
use reqwest::Url;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub webdriver_url: String,
    pub browser: BrowserKind,
    pub headless: bool,
    pub browser_args: Vec<String>,
    pub script_timeout_ms: u64,
}

impl From<&HarnessConfig> for SessionConfig {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            webdriver_url: config.webdriver_url.clone(),
            browser: config.browser,
            headless: config.headless,
            browser_args: config.browser_args.clone(),
            script_timeout_ms: config.script_timeout_ms,
        }
    }
}

impl SessionConfig {
    /// W3C capabilities for the new-session request.
    pub fn capabilities(&self) -> Value {
        let mut args = self.browser_args.clone();
        match self.browser {
            BrowserKind::Chrome => {
                if self.headless && !args.iter().any(|arg| arg.starts_with("--headless")) {
                    args.insert(0, "--headless=new".to_string());
                }
                json!({
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args },
                    "timeouts": { "script": self.script_timeout_ms },
                })
            }
            BrowserKind::Firefox => {
                if self.headless && !args.iter().any(|arg| arg == "-headless") {
                    args.insert(0, "-headless".to_string());
                }
                json!({
                    "browserName": "firefox",
                    "moz:firefoxOptions": { "args": args },
                    "timeouts": { "script": self.script_timeout_ms },
                })
            }
        }
    }

    fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms.saturating_add(60_000))
    }
}

pub trait Connector: Send + Sync {
    fn connect(&self, config: &SessionConfig) -> Result<Box<dyn BrowserDriver>>;
}

#[derive(Debug, Default)]
pub struct WebDriverConnector;

impl Connector for WebDriverConnector {
    fn connect(&self, config: &SessionConfig) -> Result<Box<dyn BrowserDriver>> {
        let client = WebDriverClient::connect(
            &config.webdriver_url,
            config.capabilities(),
            config.http_timeout(),
        )?;
        Ok(Box::new(client))
    }
}

#[derive(Clone)]
pub struct SessionManager {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, Arc::new(WebDriverConnector))
    }

    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn open(&self) -> Result<Session> {
        let driver = self.connector.connect(&self.config).map_err(|err| match err {
            HarnessError::SessionStart(_) => err,
            other => HarnessError::SessionStart(other.to_string()),
        })?;
        info!(
            session = driver.session_id(),
            browser = %self.config.browser,
            "browser session opened"
        );
        Ok(Session {
            driver: Some(driver),
        })
    }
}

/// One live browser session. Closed exactly once: explicitly through
/// [`Session::close`] or, failing that, when dropped.
pub struct Session {
    driver: Option<Box<dyn BrowserDriver>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id()).finish()
    }
}

impl Session {
    fn driver(&self) -> Result<&dyn BrowserDriver> {
        self.driver
            .as_deref()
            .ok_or_else(|| HarnessError::webdriver("session", "session already closed"))
    }

    pub fn id(&self) -> Option<&str> {
        self.driver.as_deref().map(|driver| driver.session_id())
    }

    pub fn navigate(&self, url: &Url) -> Result<()> {
        debug!(session = ?self.id(), %url, "navigating");
        self.driver()?.navigate(url.as_str())
    }

    pub fn find_element(&self, locator: &Locator) -> Result<ElementHandle> {
        self.driver()?.find_element(locator)
    }

    pub fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>> {
        self.driver()?.find_elements(locator)
    }

    pub fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.driver()?.execute(script, args)
    }

    pub fn execute_async(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.driver()?.execute_async(script, args)
    }

    pub fn switch_to_frame(&self, frame: Option<&ElementHandle>) -> Result<()> {
        self.driver()?.switch_to_frame(frame)
    }

    pub fn switch_to_parent_frame(&self) -> Result<()> {
        self.driver()?.switch_to_parent_frame()
    }

    /// Ends the session. Never fails; termination errors are logged.
    pub fn close(mut self) {
        self.terminate();
    }

    fn terminate(&mut self) {
        if let Some(driver) = self.driver.take() {
            let id = driver.session_id().to_string();
            match driver.quit() {
                Ok(()) => info!(session = %id, "browser session closed"),
                Err(err) => warn!(session = %id, "failed to close browser session: {err}"),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.terminate();
    }
}
