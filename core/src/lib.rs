pub mod assertion;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod fixture;
pub mod harness;
pub mod junit;
pub mod report;
pub mod request;
pub mod result;
pub mod session;
pub mod suite;

pub use assertion::{
    expect_no_violations, expect_node_count, expect_violation_count, ViolationRef,
};
pub use config::{BrowserKind, HarnessConfig};
pub use driver::{BrowserDriver, ElementHandle, Locator, WebDriverClient};
pub use engine::{AccessibilityEngine, AxeEngine};
pub use error::{AssertionFailure, HarnessError, Result};
pub use fixture::{Fixture, FixtureRegistry, DEFAULT_FIXTURES};
pub use harness::{AuditContext, AuditOutcome, AuditReport, AuditStage, AuditStatus, Auditor};
pub use junit::write_junit;
pub use report::{artifact_stem, render_violation_table, Reporter, ScanArtifact};
pub use request::{RuleOverrides, RuleToggle, ScanRequest};
pub use result::{NodeResult, RuleResult, ScanResult, TestEngine, Violation};
pub use session::{Connector, Session, SessionConfig, SessionManager, WebDriverConnector};
pub use suite::{
    load_suite, parse_suite, validate_suite, CaseSpec, CaseSummary, Diagnostic, DiagnosticLevel,
    Expectation, NodeExpectation, Suite, SuiteSummary, TargetSpec,
};
