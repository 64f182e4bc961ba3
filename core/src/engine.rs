use crate::driver::Locator;
use crate::error::{HarnessError, Result};
use crate::request::ScanRequest;
use crate::result::ScanResult;
use crate::session::Session;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs an accessibility scan against a live session.
pub trait AccessibilityEngine: Send + Sync {
    fn analyze(&self, request: &ScanRequest<'_>) -> Result<ScanResult>;
}

const MAX_FRAME_DEPTH: usize = 16;

const CONFIGURE_SCRIPT: &str = r#"
;if (typeof window.axe === 'object' && typeof window.axe.configure === 'function') {
    window.axe.configure({ allowedOrigins: ['<unsafe_all_origins>'] });
    return true;
}
return false;
"#;

const RUN_SCRIPT: &str = r#"
var callback = arguments[arguments.length - 1];
var context = arguments[0];
var options = arguments[1] || {};
var targets = arguments[2];
if (typeof window.axe !== 'object') {
    callback({ axeError: 'axe-core is not loaded in this document' });
    return;
}
if (targets && targets.length) {
    context = { include: targets };
}
window.axe.run(context || document, options).then(function (results) {
    callback(JSON.parse(JSON.stringify(results)));
}).catch(function (err) {
    callback({ axeError: String((err && err.message) || err) });
});
"#;

/// axe-core driven through the session's script execution.
#[derive(Clone)]
pub struct AxeEngine {
    source: Arc<str>,
    origin: String,
}

impl fmt::Debug for AxeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AxeEngine")
            .field("origin", &self.origin)
            .field("source_bytes", &self.source.len())
            .finish()
    }
}

impl AxeEngine {
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: Arc::from(source.into()),
            origin: "<inline>".to_string(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path).map_err(|err| HarnessError::EngineLoad {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        if source.trim().is_empty() {
            return Err(HarnessError::EngineLoad {
                path: path.display().to_string(),
                message: "file is empty".to_string(),
            });
        }
        Ok(Self {
            source: Arc::from(source),
            origin: path.display().to_string(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn injection_script(&self) -> String {
        format!("{}\n{}", self.source, CONFIGURE_SCRIPT)
    }

    fn inject_current(&self, session: &Session, script: &str) -> Result<()> {
        match session.execute(script, Vec::new())? {
            Value::Bool(true) => Ok(()),
            other => Err(HarnessError::ScanExecution(format!(
                "axe-core did not initialise (script returned {other})"
            ))),
        }
    }

    /// Injects into every nested frame below the current browsing context.
    /// Frames that refuse injection are skipped with a warning.
    fn inject_frames(&self, session: &Session, script: &str, depth: usize) -> Result<usize> {
        if depth >= MAX_FRAME_DEPTH {
            warn!(depth, "frame nesting too deep; not injecting further");
            return Ok(0);
        }

        let frames = session.find_elements(&Locator::css("frame, iframe"))?;
        let mut injected = 0;
        for frame in frames {
            if let Err(err) = session.switch_to_frame(Some(&frame)) {
                warn!(frame = frame.id(), "failed to enter frame: {err}");
                continue;
            }
            let nested = self
                .inject_current(session, script)
                .and_then(|_| self.inject_frames(session, script, depth + 1));
            session.switch_to_parent_frame()?;
            match nested {
                Ok(count) => injected += count + 1,
                Err(err) => warn!(frame = frame.id(), "skipping frame: {err}"),
            }
        }
        Ok(injected)
    }

    fn inject(&self, session: &Session) -> Result<()> {
        let script = self.injection_script();
        session.switch_to_frame(None)?;
        self.inject_current(session, &script)?;
        let frames = self.inject_frames(session, &script, 0)?;
        session.switch_to_frame(None)?;
        debug!(frames, "axe-core injected");
        Ok(())
    }
}

impl AccessibilityEngine for AxeEngine {
    fn analyze(&self, request: &ScanRequest<'_>) -> Result<ScanResult> {
        let session = request.session();
        let started = Instant::now();

        self.inject(session).map_err(into_scan_error)?;

        let payload = session
            .execute_async(
                RUN_SCRIPT,
                vec![
                    request.context(),
                    request.options(),
                    request.target_arguments(),
                ],
            )
            .map_err(into_scan_error)?;

        if let Some(message) = payload.get("axeError") {
            let message = message.as_str().unwrap_or("unknown axe error");
            return Err(HarnessError::ScanExecution(message.to_string()));
        }
        if !payload.is_object() {
            return Err(HarnessError::ScanExecution(format!(
                "axe returned {payload} instead of a results object"
            )));
        }

        let result: ScanResult = serde_json::from_value(payload)
            .map_err(|err| HarnessError::ScanExecution(format!("unreadable axe results: {err}")))?;

        info!(
            violations = result.violation_count(),
            nodes = result.affected_node_count(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "axe scan finished"
        );
        Ok(result)
    }
}

fn into_scan_error(err: HarnessError) -> HarnessError {
    match err {
        HarnessError::ScanExecution(_) => err,
        other => HarnessError::ScanExecution(other.to_string()),
    }
}
