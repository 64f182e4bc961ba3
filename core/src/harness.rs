use crate::assertion::{self, ViolationRef};
use crate::config::HarnessConfig;
use crate::driver::{ElementHandle, Locator};
use crate::engine::{AccessibilityEngine, AxeEngine};
use crate::error::Result;
use crate::fixture::FixtureRegistry;
use crate::report::Reporter;
use crate::request::ScanRequest;
use crate::result::ScanResult;
use crate::session::{Session, SessionConfig, SessionManager};
use crate::suite::CaseSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn};

/// Progress marker for a single audit, in order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuditStage {
    Idle,
    SessionOpen,
    Navigated,
    RequestBuilt,
    Scanned,
    Reported,
    Asserted,
    SessionClosed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditStatus {
    Passed,
    Failed,
    Errored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub name: String,
    pub status: AuditStatus,
    /// Last stage the audit body reached. `SessionClosed` once teardown ran.
    pub stage: AuditStage,
    /// Stage reached before teardown, kept for failure reports.
    pub reached: AuditStage,
    pub message: Option<String>,
    pub violations: Option<usize>,
    pub artifact: Option<String>,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditReport {
    pub outcomes: Vec<AuditOutcome>,
}

impl AuditReport {
    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.status != AuditStatus::Passed)
    }

    pub fn count(&self, status: AuditStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.outcomes.is_empty() {
            writeln!(f, "No cases to run.")?;
            return Ok(());
        }

        writeln!(f, "Audit results:")?;
        for outcome in &self.outcomes {
            let status = match outcome.status {
                AuditStatus::Passed => "passed",
                AuditStatus::Failed => "failed",
                AuditStatus::Errored => "error",
            };
            let violations = outcome
                .violations
                .map(|n| format!(", {n} violation(s)"))
                .unwrap_or_default();
            writeln!(
                f,
                "  - [{}] {} (reached {:?}{}, {} ms)",
                status, outcome.name, outcome.reached, violations, outcome.duration_ms
            )?;
            if let Some(message) = &outcome.message {
                for line in message.lines() {
                    writeln!(f, "      {}", line)?;
                }
            }
            if let Some(artifact) = &outcome.artifact {
                writeln!(f, "      artifact: {}", artifact)?;
            }
        }
        writeln!(
            f,
            "{} passed, {} failed, {} errored",
            self.count(AuditStatus::Passed),
            self.count(AuditStatus::Failed),
            self.count(AuditStatus::Errored)
        )
    }
}

/// Per-audit view handed to the audit body. Holds the session for the
/// duration of the body only.
pub struct AuditContext<'a> {
    name: &'a str,
    session: &'a Session,
    registry: &'a FixtureRegistry,
    engine: &'a dyn AccessibilityEngine,
    reporter: &'a Reporter,
    stage: AuditStage,
    artifact: Option<PathBuf>,
    violations: Option<usize>,
}

impl<'a> AuditContext<'a> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn session(&self) -> &'a Session {
        self.session
    }

    pub fn stage(&self) -> AuditStage {
        self.stage
    }

    fn advance(&mut self, stage: AuditStage) {
        if stage > self.stage {
            self.stage = stage;
        }
    }

    pub fn open_fixture(&mut self, fixture: &str) -> Result<()> {
        let url = self.registry.resolve(fixture)?;
        self.session.navigate(&url)?;
        self.advance(AuditStage::Navigated);
        Ok(())
    }

    pub fn find_element(&self, locator: &Locator) -> Result<ElementHandle> {
        self.session.find_element(locator)
    }

    pub fn request(&mut self) -> ScanRequest<'a> {
        self.advance(AuditStage::RequestBuilt);
        ScanRequest::new(self.session)
    }

    /// Runs the scan and persists its result under the audit's name.
    pub fn scan(&mut self, request: &ScanRequest<'_>) -> Result<ScanResult> {
        self.advance(AuditStage::RequestBuilt);
        let result = self.engine.analyze(request)?;
        self.violations = Some(result.violation_count());
        self.advance(AuditStage::Scanned);

        self.artifact = self.reporter.report(self.name, &result);
        self.advance(AuditStage::Reported);
        Ok(result)
    }

    pub fn expect_violation_count(&mut self, result: &ScanResult, expected: usize) -> Result<()> {
        assertion::expect_violation_count(result, expected)?;
        self.advance(AuditStage::Asserted);
        Ok(())
    }

    pub fn expect_node_count(
        &mut self,
        result: &ScanResult,
        violation: &ViolationRef,
        expected: usize,
    ) -> Result<()> {
        assertion::expect_node_count(result, violation, expected)?;
        self.advance(AuditStage::Asserted);
        Ok(())
    }
}

pub struct Auditor {
    registry: FixtureRegistry,
    sessions: SessionManager,
    engine: Arc<dyn AccessibilityEngine>,
    reporter: Reporter,
}

impl fmt::Debug for Auditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auditor")
            .field("registry", &self.registry)
            .field("sessions", &self.sessions)
            .field("reporter", &self.reporter)
            .finish_non_exhaustive()
    }
}

impl Auditor {
    pub fn new(
        registry: FixtureRegistry,
        sessions: SessionManager,
        engine: Arc<dyn AccessibilityEngine>,
        reporter: Reporter,
    ) -> Self {
        Self {
            registry,
            sessions,
            engine,
            reporter,
        }
    }

    /// WebDriver sessions, axe-core loaded from `axe_source`, default fixtures.
    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        let engine = AxeEngine::from_file(&config.axe_source)?;
        Ok(Self::new(
            FixtureRegistry::with_default_fixtures(&config.fixtures_dir),
            SessionManager::new(SessionConfig::from(config)),
            Arc::new(engine),
            Reporter::new(&config.artifacts_dir),
        ))
    }

    pub fn with_registry(self, registry: FixtureRegistry) -> Self {
        Self { registry, ..self }
    }

    pub fn registry(&self) -> &FixtureRegistry {
        &self.registry
    }

    /// Runs `body` against a fresh session and closes the session afterwards,
    /// on every path.
    pub fn run<F>(&self, name: &str, body: F) -> AuditOutcome
    where
        F: FnOnce(&mut AuditContext<'_>) -> Result<()>,
    {
        self.execute(name, body).0
    }

    /// Like [`Auditor::run`], but hands back the underlying error so a
    /// `#[test]` can propagate it.
    pub fn audit<F>(&self, name: &str, body: F) -> Result<()>
    where
        F: FnOnce(&mut AuditContext<'_>) -> Result<()>,
    {
        self.execute(name, body).1
    }

    pub fn run_case(&self, case: &CaseSpec) -> AuditOutcome {
        self.run(&case.name, |ctx| run_case_body(ctx, case))
    }

    pub fn run_cases<'c, I>(&self, cases: I) -> AuditReport
    where
        I: IntoIterator<Item = &'c CaseSpec>,
    {
        AuditReport {
            outcomes: cases.into_iter().map(|case| self.run_case(case)).collect(),
        }
    }

    fn execute<F>(&self, name: &str, body: F) -> (AuditOutcome, Result<()>)
    where
        F: FnOnce(&mut AuditContext<'_>) -> Result<()>,
    {
        let span = info_span!("audit", name);
        let _guard = span.enter();
        let started = Instant::now();

        let session = match self.sessions.open() {
            Ok(session) => session,
            Err(err) => {
                warn!("audit could not start: {err}");
                let outcome = AuditOutcome {
                    name: name.to_string(),
                    status: AuditStatus::Errored,
                    stage: AuditStage::Idle,
                    reached: AuditStage::Idle,
                    message: Some(err.to_string()),
                    violations: None,
                    artifact: None,
                    duration_ms: started.elapsed().as_millis(),
                };
                return (outcome, Err(err));
            }
        };

        let (result, stage, artifact, violations) = {
            let mut ctx = AuditContext {
                name,
                session: &session,
                registry: &self.registry,
                engine: self.engine.as_ref(),
                reporter: &self.reporter,
                stage: AuditStage::SessionOpen,
                artifact: None,
                violations: None,
            };
            let result = body(&mut ctx);
            (result, ctx.stage, ctx.artifact, ctx.violations)
        };

        session.close();

        let (status, message) = match &result {
            Ok(()) => (AuditStatus::Passed, None),
            Err(err) if err.is_assertion() => (AuditStatus::Failed, Some(err.to_string())),
            Err(err) => (AuditStatus::Errored, Some(err.to_string())),
        };
        match status {
            AuditStatus::Passed => info!(?stage, "audit passed"),
            _ => warn!(?stage, "audit {:?}: {}", status, message.as_deref().unwrap_or_default()),
        }

        let outcome = AuditOutcome {
            name: name.to_string(),
            status,
            stage: AuditStage::SessionClosed,
            reached: stage,
            message,
            violations,
            artifact: artifact.map(|path| path.to_string_lossy().to_string()),
            duration_ms: started.elapsed().as_millis(),
        };
        (outcome, result)
    }
}

fn run_case_body(ctx: &mut AuditContext<'_>, case: &CaseSpec) -> Result<()> {
    ctx.open_fixture(&case.fixture)?;

    let mut request = ctx.request().with_rule_filter(case.rules.iter().cloned());
    if let Some(overrides) = case.overrides()? {
        request = request.with_overrides(overrides);
    }
    for rule in &case.disable {
        request = request.with_rule_enabled(rule.clone(), false);
    }
    request = request
        .with_include(case.include.iter().cloned())?
        .with_exclude(case.exclude.iter().cloned())?;

    if !case.targets.is_empty() {
        let mut elements = Vec::with_capacity(case.targets.len());
        for target in &case.targets {
            elements.push(ctx.find_element(&target.locator()?)?);
        }
        request = request.with_targets(elements)?;
    }

    let result = ctx.scan(&request)?;

    if let Some(expect) = &case.expect {
        if let Some(expected) = expect.violations {
            ctx.expect_violation_count(&result, expected)?;
        }
        for node in &expect.nodes {
            ctx.expect_node_count(&result, &node.violation_ref()?, node.count)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use crate::session::testing::{session_config, DriverLog, ScriptedConnector, ScriptedDriver};
    use crate::suite::parse_suite;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Harness {
        auditor: Auditor,
        log: Arc<Mutex<DriverLog>>,
        _artifacts: tempfile::TempDir,
    }

    fn auditor_with<F>(factory: F) -> Harness
    where
        F: Fn(Arc<Mutex<DriverLog>>) -> ScriptedDriver + Send + Sync + 'static,
    {
        let connector = Arc::new(ScriptedConnector::with_factory(factory));
        let log = Arc::clone(&connector.log);
        let artifacts = tempfile::tempdir().expect("tempdir");
        let auditor = Auditor::new(
            FixtureRegistry::with_default_fixtures("/srv/fixtures"),
            SessionManager::with_connector(session_config(), connector),
            Arc::new(AxeEngine::from_source("window.axe = {};")),
            Reporter::new(artifacts.path()),
        );
        Harness {
            auditor,
            log,
            _artifacts: artifacts,
        }
    }

    fn image_alt_payload() -> Value {
        json!({
            "violations": [{
                "id": "image-alt",
                "impact": "critical",
                "nodes": [{ "html": "<img src=\"logo.png\">", "target": ["img"] }]
            }]
        })
    }

    fn single_case(yaml: &str) -> CaseSpec {
        let suite = parse_suite(yaml).expect("suite parses");
        suite.cases.into_iter().next().expect("one case")
    }

    #[test]
    fn passing_audit_reports_and_closes_session() {
        let fx = auditor_with(ScriptedDriver::new);

        let outcome = fx.auditor.run("testAccessibility", |ctx| {
            ctx.open_fixture("normal")?;
            let request = ctx.request();
            let result = ctx.scan(&request)?;
            ctx.expect_violation_count(&result, 0)
        });

        assert_eq!(outcome.status, AuditStatus::Passed);
        assert_eq!(outcome.reached, AuditStage::Asserted);
        assert_eq!(outcome.stage, AuditStage::SessionClosed);
        assert_eq!(outcome.violations, Some(0));
        let artifact = outcome.artifact.expect("artifact path");
        assert!(artifact.ends_with("testAccessibility.json"));

        let log = fx.log.lock().unwrap();
        assert_eq!(log.navigations, vec!["file:///srv/fixtures/normal.html".to_string()]);
        assert_eq!(log.quits, 1);
    }

    #[test]
    fn failed_expectation_still_persists_and_closes() {
        let fx = auditor_with(|log| ScriptedDriver {
            async_results: Mutex::new(VecDeque::from(vec![Ok(image_alt_payload())])),
            ..ScriptedDriver::new(log)
        });

        let err = fx
            .auditor
            .audit("testAccessibilityWithFewerRules", |ctx| {
                ctx.open_fixture("violation")?;
                let request = ctx.request().with_rule_filter(["image-alt"]);
                let result = ctx.scan(&request)?;
                ctx.expect_violation_count(&result, 0)
            })
            .expect_err("one violation found");

        assert!(err.is_assertion());
        assert!(err.to_string().contains("expected 0, found 1"));
        assert!(fx
            .auditor
            .reporter
            .artifact_path("testAccessibilityWithFewerRules")
            .exists());
        assert_eq!(fx.log.lock().unwrap().quits, 1);
    }

    #[test]
    fn navigation_failure_is_an_error_not_a_failure() {
        let fx = auditor_with(|log| ScriptedDriver {
            fail_navigation: true,
            ..ScriptedDriver::new(log)
        });

        let outcome = fx.auditor.run("missing", |ctx| ctx.open_fixture("normal"));

        assert_eq!(outcome.status, AuditStatus::Errored);
        assert_eq!(outcome.reached, AuditStage::SessionOpen);
        assert!(outcome.artifact.is_none());
        assert_eq!(fx.log.lock().unwrap().quits, 1);
    }

    #[test]
    fn unknown_fixture_fails_before_navigation() {
        let fx = auditor_with(ScriptedDriver::new);

        let err = fx
            .auditor
            .audit("unknown", |ctx| ctx.open_fixture("does-not-exist"))
            .expect_err("fixture unknown");

        assert!(matches!(err, HarnessError::FixtureNotFound(name) if name == "does-not-exist"));
        let log = fx.log.lock().unwrap();
        assert!(log.navigations.is_empty());
        assert_eq!(log.quits, 1);
    }

    #[test]
    fn refused_session_never_runs_the_body() {
        let connector = Arc::new(ScriptedConnector::refusing());
        let auditor = Auditor::new(
            FixtureRegistry::with_default_fixtures("/srv/fixtures"),
            SessionManager::with_connector(session_config(), connector),
            Arc::new(AxeEngine::from_source("window.axe = {};")),
            Reporter::new("/nonexistent"),
        );

        let mut ran = false;
        let outcome = auditor.run("refused", |_ctx| {
            ran = true;
            Ok(())
        });

        assert!(!ran);
        assert_eq!(outcome.status, AuditStatus::Errored);
        assert_eq!(outcome.stage, AuditStage::Idle);
        assert!(outcome.message.unwrap_or_default().contains("connection refused"));
    }

    #[test]
    fn case_with_targets_scans_located_elements() {
        let fx = auditor_with(ScriptedDriver::new);
        let case = single_case(
            r#"
cases:
  - name: testAccessibilityWithSpecificElement
    fixture: include-exclude
    targets:
      - tag: p
      - tag: h1
    expect:
      violations: 0
"#,
        );

        let outcome = fx.auditor.run_case(&case);
        assert_eq!(outcome.status, AuditStatus::Passed, "{:?}", outcome.message);

        let log = fx.log.lock().unwrap();
        let (_, args) = log.scripts.last().expect("run script recorded");
        assert_eq!(
            args[2],
            json!([
                ElementHandle::new("el:tag name=p").to_json(),
                ElementHandle::new("el:tag name=h1").to_json()
            ])
        );
    }

    #[test]
    fn case_options_and_disabled_rules_reach_the_engine() {
        let fx = auditor_with(ScriptedDriver::new);
        let case = single_case(
            r#"
cases:
  - name: testAccessibilityWithOptions
    fixture: violation
    options: '{"rules":{"object-alt":{"enabled":false}}}'
    disable: [image-alt]
    include: [main]
"#,
        );

        let outcome = fx.auditor.run_case(&case);
        assert_eq!(outcome.status, AuditStatus::Passed);

        let log = fx.log.lock().unwrap();
        let (_, args) = log.scripts.last().expect("run script recorded");
        assert_eq!(args[0], json!({ "include": [["main"]] }));
        assert_eq!(
            args[1]["rules"],
            json!({
                "image-alt": { "enabled": false },
                "object-alt": { "enabled": false }
            })
        );
    }

    #[test]
    fn suite_report_counts_statuses() {
        // One scan payload per session, in case order.
        let payloads = Arc::new(Mutex::new(VecDeque::from(vec![
            json!({ "violations": [] }),
            image_alt_payload(),
        ])));
        let fx = auditor_with(move |log| {
            let next = payloads.lock().unwrap().pop_front();
            ScriptedDriver {
                async_results: Mutex::new(next.map(Ok).into_iter().collect()),
                ..ScriptedDriver::new(log)
            }
        });
        let suite = parse_suite(
            r#"
cases:
  - name: clean
    fixture: normal
    expect: { violations: 0 }
  - name: dirty
    fixture: violation
    expect: { violations: 0 }
  - name: lost
    fixture: nowhere
"#,
        )
        .expect("suite parses");

        let report = fx.auditor.run_cases(&suite.cases);
        assert!(report.has_failures());
        assert_eq!(report.count(AuditStatus::Passed), 1);
        assert_eq!(report.count(AuditStatus::Failed), 1);
        assert_eq!(report.count(AuditStatus::Errored), 1);

        let rendered = report.to_string();
        assert!(rendered.contains("[failed] dirty"));
        assert!(rendered.contains("1 passed, 1 failed, 1 errored"));
        assert_eq!(fx.log.lock().unwrap().quits, 3);
    }

    #[test]
    fn concurrent_audits_on_one_auditor_stay_independent() {
        let fx = auditor_with(ScriptedDriver::new);
        let auditor = &fx.auditor;

        let (clean, failing) = std::thread::scope(|scope| {
            let clean = scope.spawn(|| {
                auditor.run("parallel clean", |ctx| {
                    ctx.open_fixture("normal")?;
                    let request = ctx.request();
                    let result = ctx.scan(&request)?;
                    ctx.expect_violation_count(&result, 0)
                })
            });
            let failing = scope.spawn(|| {
                auditor.run("parallel failing", |ctx| {
                    ctx.open_fixture("violation")?;
                    let request = ctx.request();
                    let result = ctx.scan(&request)?;
                    ctx.expect_violation_count(&result, 1)
                })
            });
            (
                clean.join().expect("clean audit thread"),
                failing.join().expect("failing audit thread"),
            )
        });

        assert_eq!(clean.status, AuditStatus::Passed, "{:?}", clean.message);
        assert_eq!(failing.status, AuditStatus::Failed);
        assert_eq!(clean.stage, AuditStage::SessionClosed);
        assert_eq!(failing.stage, AuditStage::SessionClosed);

        let clean_artifact = clean.artifact.expect("clean artifact");
        let failing_artifact = failing.artifact.expect("failing artifact");
        assert_ne!(clean_artifact, failing_artifact);
        assert!(std::path::Path::new(&clean_artifact).is_file());
        assert!(std::path::Path::new(&failing_artifact).is_file());

        let log = fx.log.lock().unwrap();
        assert_eq!(log.quits, 2);
        assert_eq!(log.navigations.len(), 2);
    }
}
