use crate::error::{HarnessError, Result};
use reqwest::blocking::{Client, Response};
use reqwest::Method;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// W3C identifier for serialized element references.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4a53061f0046";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    id: String,
}

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn to_json(&self) -> Value {
        json!({ ELEMENT_KEY: self.id })
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(ElementHandle::new)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    TagName(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn tag_name(tag: impl Into<String>) -> Self {
        Locator::TagName(tag.into())
    }

    fn strategy(&self) -> (&'static str, &str) {
        match self {
            Locator::Css(selector) => ("css selector", selector),
            Locator::TagName(tag) => ("tag name", tag),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (strategy, value) = self.strategy();
        write!(f, "{strategy}={value}")
    }
}

pub trait BrowserDriver: Send {
    fn session_id(&self) -> &str;
    fn navigate(&self, url: &str) -> Result<()>;
    fn find_element(&self, locator: &Locator) -> Result<ElementHandle>;
    fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>>;
    fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value>;
    fn execute_async(&self, script: &str, args: Vec<Value>) -> Result<Value>;
    /// `None` selects the top-level browsing context.
    fn switch_to_frame(&self, frame: Option<&ElementHandle>) -> Result<()>;
    fn switch_to_parent_frame(&self) -> Result<()>;
    fn quit(&self) -> Result<()>;
}

/// Blocking client for a W3C WebDriver endpoint.
pub struct WebDriverClient {
    http: Client,
    base_url: String,
    session_id: String,
}

impl fmt::Debug for WebDriverClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDriverClient")
            .field("base_url", &self.base_url)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl WebDriverClient {
    pub fn connect(base_url: &str, capabilities: Value, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| HarnessError::SessionStart(err.to_string()))?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let response = http
            .post(format!("{base_url}/session"))
            .json(&json!({ "capabilities": { "alwaysMatch": capabilities } }))
            .send()
            .map_err(|err| {
                HarnessError::SessionStart(format!("webdriver at {base_url} unreachable: {err}"))
            })?;
        let value = unwrap_response(response).map_err(HarnessError::SessionStart)?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                HarnessError::SessionStart("new session response carried no sessionId".to_string())
            })?
            .to_string();

        debug!(%session_id, %base_url, "webdriver session created");
        Ok(Self {
            http,
            base_url,
            session_id,
        })
    }

    fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = if path.is_empty() {
            format!("{}/session/{}", self.base_url, self.session_id)
        } else {
            format!("{}/session/{}/{}", self.base_url, self.session_id, path)
        };
        let command = format!("{method} /{}", if path.is_empty() { "session" } else { path });

        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .map_err(|err| HarnessError::webdriver(command.clone(), err.to_string()))?;
        unwrap_response(response).map_err(|message| HarnessError::webdriver(command, message))
    }
}

/// Extracts `value` from a WebDriver response, turning error payloads into
/// their message.
fn unwrap_response(response: Response) -> std::result::Result<Value, String> {
    let status = response.status();
    let body: Value = response
        .json()
        .map_err(|err| format!("unreadable response ({status}): {err}"))?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Err(format!("{error} ({status}): {message}"))
}

impl BrowserDriver for WebDriverClient {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn navigate(&self, url: &str) -> Result<()> {
        self.command(Method::POST, "url", Some(json!({ "url": url })))
            .map(|_| ())
    }

    fn find_element(&self, locator: &Locator) -> Result<ElementHandle> {
        let (using, value) = locator.strategy();
        let found = self.command(
            Method::POST,
            "element",
            Some(json!({ "using": using, "value": value })),
        )?;
        ElementHandle::from_json(&found).ok_or_else(|| {
            HarnessError::webdriver("POST /element", format!("no element reference for {locator}"))
        })
    }

    fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>> {
        let (using, value) = locator.strategy();
        let found = self.command(
            Method::POST,
            "elements",
            Some(json!({ "using": using, "value": value })),
        )?;
        Ok(found
            .as_array()
            .map(|items| items.iter().filter_map(ElementHandle::from_json).collect())
            .unwrap_or_default())
    }

    fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.command(
            Method::POST,
            "execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
    }

    fn execute_async(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.command(
            Method::POST,
            "execute/async",
            Some(json!({ "script": script, "args": args })),
        )
    }

    fn switch_to_frame(&self, frame: Option<&ElementHandle>) -> Result<()> {
        let id = frame.map(ElementHandle::to_json).unwrap_or(Value::Null);
        self.command(Method::POST, "frame", Some(json!({ "id": id })))
            .map(|_| ())
    }

    fn switch_to_parent_frame(&self) -> Result<()> {
        self.command(Method::POST, "frame/parent", Some(json!({})))
            .map(|_| ())
    }

    fn quit(&self) -> Result<()> {
        self.command(Method::DELETE, "", None).map(|_| ())
    }
}
