use crate::assertion::ViolationRef;
use crate::driver::Locator;
use crate::error::{HarnessError, Result};
use crate::fixture::FixtureRegistry;
use crate::report::artifact_stem;
use crate::request::RuleOverrides;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A declarative set of audit cases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Suite {
    #[serde(default)]
    pub name: Option<String>,
    /// Directory fixture paths are relative to; relative to the suite file.
    #[serde(default)]
    pub fixtures_dir: Option<PathBuf>,
    #[serde(default)]
    pub fixtures: BTreeMap<String, String>,
    #[serde(default)]
    pub cases: Vec<CaseSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSpec {
    pub name: String,
    pub fixture: String,
    #[serde(default)]
    pub rules: Vec<String>,
    /// Rule overrides as a JSON string or an inline mapping.
    #[serde(default)]
    pub options: Option<Value>,
    #[serde(default)]
    pub disable: Vec<String>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
    #[serde(default)]
    pub expect: Option<Expectation>,
}

/// An element to scan, located by tag name or CSS selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
}

impl TargetSpec {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            css: None,
        }
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            tag: None,
            css: Some(selector.into()),
        }
    }

    pub fn locator(&self) -> Result<Locator> {
        match (&self.tag, &self.css) {
            (Some(tag), None) => Ok(Locator::tag_name(tag.clone())),
            (None, Some(selector)) => Ok(Locator::css(selector.clone())),
            _ => Err(HarnessError::Suite(
                "target needs exactly one of 'tag' or 'css'".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Expectation {
    #[serde(default)]
    pub violations: Option<usize>,
    #[serde(default)]
    pub nodes: Vec<NodeExpectation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExpectation {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub rule: Option<String>,
    pub count: usize,
}

impl NodeExpectation {
    pub fn violation_ref(&self) -> Result<ViolationRef> {
        match (&self.index, &self.rule) {
            (Some(index), None) => Ok(ViolationRef::Index(*index)),
            (None, Some(rule)) => Ok(ViolationRef::Rule(rule.clone())),
            _ => Err(HarnessError::Suite(
                "node expectation needs exactly one of 'index' or 'rule'".to_string(),
            )),
        }
    }
}

impl CaseSpec {
    pub fn overrides(&self) -> Result<Option<RuleOverrides>> {
        match &self.options {
            None => Ok(None),
            Some(Value::String(raw)) => RuleOverrides::parse(raw).map(Some),
            Some(value) => RuleOverrides::from_value(value.clone()).map(Some),
        }
    }
}

pub fn parse_suite(source: &str) -> Result<Suite> {
    serde_yaml::from_str(source)
        .map_err(|err| HarnessError::Suite(err.to_string()))
}

/// Reads a suite file; a relative `fixtures_dir` is anchored at the file's
/// directory.
pub fn load_suite(path: &Path) -> Result<Suite> {
    let content = fs::read_to_string(path)
        .map_err(|err| HarnessError::Suite(format!("failed to read {}: {err}", path.display())))?;
    let mut suite = parse_suite(&content)?;
    if let Some(dir) = &suite.fixtures_dir {
        if dir.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            suite.fixtures_dir = Some(base.join(dir));
        }
    }
    Ok(suite)
}

impl Suite {
    /// Default fixtures plus the suite's own entries, rooted at the suite's
    /// fixture directory or `default_dir`.
    pub fn registry(&self, default_dir: &Path) -> FixtureRegistry {
        let base = self
            .fixtures_dir
            .clone()
            .unwrap_or_else(|| default_dir.to_path_buf());
        let defaults = FixtureRegistry::with_default_fixtures(base);
        self.fixtures.iter().fold(defaults, |registry, (name, path)| {
            registry.with_fixture(name.clone(), path.clone())
        })
    }

    pub fn summary(&self) -> SuiteSummary {
        SuiteSummary {
            name: self.name.clone(),
            fixtures: self.fixtures.clone(),
            cases: self
                .cases
                .iter()
                .map(|case| CaseSummary {
                    name: case.name.clone(),
                    fixture: case.fixture.clone(),
                    scope: describe_scope(case),
                    expected_violations: case.expect.as_ref().and_then(|e| e.violations),
                })
                .collect(),
        }
    }
}

fn describe_scope(case: &CaseSpec) -> String {
    let mut parts = Vec::new();
    if !case.rules.is_empty() {
        parts.push(format!("rules={}", case.rules.join(",")));
    }
    if case.options.is_some() {
        parts.push("options".to_string());
    }
    if !case.disable.is_empty() {
        parts.push(format!("disable={}", case.disable.join(",")));
    }
    if !case.include.is_empty() {
        parts.push(format!("include={}", case.include.join(",")));
    }
    if !case.exclude.is_empty() {
        parts.push(format!("exclude={}", case.exclude.join(",")));
    }
    if !case.targets.is_empty() {
        let targets: Vec<String> = case
            .targets
            .iter()
            .map(|target| match target.locator() {
                Ok(locator) => locator.to_string(),
                Err(_) => "<invalid>".to_string(),
            })
            .collect();
        parts.push(format!("targets={}", targets.join(",")));
    }
    if parts.is_empty() {
        "full page".to_string()
    } else {
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub name: Option<String>,
    pub fixtures: BTreeMap<String, String>,
    pub cases: Vec<CaseSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSummary {
    pub name: String,
    pub fixture: String,
    pub scope: String,
    pub expected_violations: Option<usize>,
}

impl fmt::Display for SuiteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            writeln!(f, "Suite: {name}")?;
        }
        writeln!(f, "Cases: {}", self.cases.len())?;
        if !self.fixtures.is_empty() {
            writeln!(f, "Fixtures:")?;
            for (name, path) in &self.fixtures {
                writeln!(f, "  - {name} = {path}")?;
            }
        }
        for case in &self.cases {
            let expected = case
                .expected_violations
                .map(|n| n.to_string())
                .unwrap_or_else(|| "<any>".to_string());
            writeln!(
                f,
                "  - {} on {} [{}] -> {} violation(s)",
                case.name, case.fixture, case.scope, expected
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

/// A validation finding, tied to a case and the field that caused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.level == DiagnosticLevel::Error
    }

    /// `case <name> > <field>`, or `None` for suite-wide findings.
    pub fn location(&self) -> Option<String> {
        match (&self.case, &self.field) {
            (Some(case), Some(field)) => Some(format!("case {case} > {field}")),
            (Some(case), None) => Some(format!("case {case}")),
            (None, Some(field)) => Some(field.clone()),
            (None, None) => None,
        }
    }
}

struct CaseFindings<'a> {
    case: &'a str,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl CaseFindings<'_> {
    fn record(&mut self, level: DiagnosticLevel, field: String, message: String) {
        self.diagnostics.push(Diagnostic {
            level,
            case: Some(self.case.to_string()),
            field: Some(field),
            message,
        });
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.record(DiagnosticLevel::Error, field.into(), message.into());
    }

    fn warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.record(DiagnosticLevel::Warning, field.into(), message.into());
    }
}

pub fn validate_suite(suite: &Suite, registry: &FixtureRegistry) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if suite.cases.is_empty() {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Warning,
            case: None,
            field: Some("cases".to_string()),
            message: "suite does not define any cases".to_string(),
        });
    }

    let mut seen = HashSet::new();
    let mut stems: HashMap<String, &str> = HashMap::new();
    for case in &suite.cases {
        let mut findings = CaseFindings {
            case: &case.name,
            diagnostics: &mut diagnostics,
        };
        if case.name.trim().is_empty() {
            findings.error("name", "case name cannot be empty");
        } else if !seen.insert(case.name.as_str()) {
            findings.error(
                "name",
                "duplicate case name; artifacts would overwrite each other",
            );
        } else {
            let stem = artifact_stem(&case.name);
            match stems.get(&stem) {
                Some(other) => findings.error(
                    "name",
                    format!("artifact file '{stem}.json' is also used by case '{other}'"),
                ),
                None => {
                    stems.insert(stem, &case.name);
                }
            }
        }
        validate_case(case, registry, &mut findings);
    }

    diagnostics
}

fn validate_case(case: &CaseSpec, registry: &FixtureRegistry, findings: &mut CaseFindings<'_>) {
    if !registry.contains(&case.fixture) {
        findings.error("fixture", format!("unknown fixture '{}'", case.fixture));
    }

    if let Err(err) = case.overrides() {
        findings.error("options", err.to_string());
    }

    if !case.targets.is_empty() && (!case.include.is_empty() || !case.exclude.is_empty()) {
        findings.error(
            "targets",
            "targets cannot be combined with include/exclude selectors",
        );
    }

    for (field, ids) in [("rules", &case.rules), ("disable", &case.disable)] {
        for (i, rule) in ids.iter().enumerate() {
            if rule.trim().is_empty() {
                findings.error(format!("{field}[{i}]"), "rule identifiers cannot be empty");
            }
        }
    }

    for (i, disabled) in case.disable.iter().enumerate() {
        if case.rules.contains(disabled) {
            findings.warning(
                format!("disable[{i}]"),
                format!("rule '{disabled}' is both selected and disabled; the override wins"),
            );
        }
    }

    for (i, target) in case.targets.iter().enumerate() {
        if let Err(err) = target.locator() {
            findings.error(format!("targets[{i}]"), err.to_string());
        }
    }

    match &case.expect {
        None => findings.warning(
            "expect",
            "case has no expectations; it only records an artifact",
        ),
        Some(expect) => {
            if expect.violations.is_none() && expect.nodes.is_empty() {
                findings.warning("expect", "expectation block is empty");
            }
            for (i, node) in expect.nodes.iter().enumerate() {
                if let Err(err) = node.violation_ref() {
                    findings.error(format!("expect.nodes[{i}]"), err.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITE: &str = r#"
name: fixtures
fixtures:
  landing: pages/landing.html
cases:
  - name: testAccessibility
    fixture: normal
    expect:
      violations: 0
  - name: testAccessibilityWithFrames
    fixture: nested-iframes
    rules: [frame-title]
    expect:
      violations: 1
      nodes:
        - index: 0
          count: 3
  - name: testAccessibilityWithOptions
    fixture: violation
    options: '{ "rules": { "image-alt": { "enabled": false } } }'
    expect:
      violations: 0
  - name: inlineOptions
    fixture: violation
    options:
      rules:
        object-alt:
          enabled: false
    expect:
      violations: 1
  - name: testAccessibilityWithWebElement
    fixture: include-exclude
    targets:
      - tag: p
      - css: h1
    expect:
      violations: 1
"#;

    #[test]
    fn parses_cases_and_options_in_both_forms() {
        let suite = parse_suite(SUITE).expect("suite parses");
        assert_eq!(suite.cases.len(), 5);

        let string_form = suite.cases[2].overrides().expect("valid").expect("present");
        assert!(!string_form.rules["image-alt"].enabled);

        let inline = suite.cases[3].overrides().expect("valid").expect("present");
        assert!(!inline.rules["object-alt"].enabled);

        assert_eq!(
            suite.cases[4].targets,
            vec![TargetSpec::tag("p"), TargetSpec::css("h1")]
        );
        assert_eq!(
            suite.cases[1].expect.as_ref().unwrap().nodes[0]
                .violation_ref()
                .expect("index set"),
            ViolationRef::Index(0)
        );
    }

    #[test]
    fn valid_suite_has_no_errors() {
        let suite = parse_suite(SUITE).expect("suite parses");
        let registry = suite.registry(Path::new("/srv/fixtures"));
        let diagnostics = validate_suite(&suite, &registry);
        assert!(diagnostics.iter().all(|d| !d.is_error()), "{diagnostics:?}");
        assert!(registry.contains("landing"));
    }

    #[test]
    fn validation_flags_broken_cases() {
        let suite = parse_suite(
            r#"
cases:
  - name: dup
    fixture: nowhere
    options: '{ "rules": { "image-alt": "off" } }'
    include: [main]
    targets:
      - tag: p
        css: p.lead
  - name: dup
    fixture: normal
    expect:
      nodes:
        - count: 1
"#,
        )
        .expect("suite parses");
        let registry = suite.registry(Path::new("/srv/fixtures"));
        let diagnostics = validate_suite(&suite, &registry);
        let errors: Vec<String> = diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| format!("{}: {}", d.location().unwrap_or_default(), d.message))
            .collect();

        assert!(errors.iter().any(|e| e.contains("unknown fixture 'nowhere'")));
        assert!(errors.iter().any(|e| e.contains("malformed rule overrides")));
        assert!(errors.iter().any(|e| e.contains("targets cannot be combined")));
        assert!(errors.iter().any(|e| e.contains("duplicate case name")));
        assert!(errors.iter().any(|e| e.starts_with("case dup > expect.nodes[0]: ")
            && e.ends_with("exactly one of 'index' or 'rule'")));
        assert!(errors.iter().any(|e| e.starts_with("case dup > targets[0]: ")
            && e.ends_with("exactly one of 'tag' or 'css'")));
        assert!(errors.iter().any(|e| e.starts_with("case dup > fixture: unknown fixture")));
        assert!(diagnostics
            .iter()
            .any(|d| !d.is_error() && d.message.contains("no expectations")));
    }

    #[test]
    fn rule_findings_point_at_the_list_entry() {
        let suite = parse_suite(
            r#"
cases:
  - name: rules
    fixture: normal
    rules: [image-alt, ""]
    disable: [image-alt]
    expect:
      violations: 0
"#,
        )
        .expect("suite parses");
        let registry = suite.registry(Path::new("/srv/fixtures"));
        let diagnostics = validate_suite(&suite, &registry);

        let empty = diagnostics
            .iter()
            .find(|d| d.is_error())
            .expect("empty rule id");
        assert_eq!(empty.case.as_deref(), Some("rules"));
        assert_eq!(empty.field.as_deref(), Some("rules[1]"));
        let both = diagnostics
            .iter()
            .find(|d| d.level == DiagnosticLevel::Warning)
            .expect("selected and disabled");
        assert_eq!(both.location().as_deref(), Some("case rules > disable[0]"));
    }

    #[test]
    fn empty_suite_warning_has_no_case() {
        let suite = parse_suite("cases: []\n").expect("suite parses");
        let registry = suite.registry(Path::new("/srv/fixtures"));
        let diagnostics = validate_suite(&suite, &registry);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].case, None);
        assert_eq!(diagnostics[0].location().as_deref(), Some("cases"));
    }

    #[test]
    fn artifact_name_collisions_are_errors() {
        let spaced = "case a";
        let clashing = artifact_stem(spaced);
        let suite = Suite {
            cases: vec![spaced, "case_a", clashing.as_str()]
                .into_iter()
                .map(|name| CaseSpec {
                    name: name.to_string(),
                    fixture: "normal".to_string(),
                    rules: Vec::new(),
                    options: None,
                    disable: Vec::new(),
                    include: Vec::new(),
                    exclude: Vec::new(),
                    targets: Vec::new(),
                    expect: Some(Expectation {
                        violations: Some(0),
                        nodes: Vec::new(),
                    }),
                })
                .collect(),
            ..Suite::default()
        };
        let registry = suite.registry(Path::new("/srv/fixtures"));
        let errors: Vec<Diagnostic> = validate_suite(&suite, &registry)
            .into_iter()
            .filter(Diagnostic::is_error)
            .collect();

        assert_eq!(errors.len(), 1, "{errors:?}");
        assert_eq!(errors[0].case.as_deref(), Some(clashing.as_str()));
        assert_eq!(errors[0].field.as_deref(), Some("name"));
        assert!(errors[0].message.contains("also used by case 'case a'"));
    }

    #[test]
    fn load_suite_anchors_fixture_dir_at_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("suite.yaml");
        fs::write(&path, "fixtures_dir: html\ncases: []\n").expect("write suite");

        let suite = load_suite(&path).expect("suite loads");
        assert_eq!(suite.fixtures_dir, Some(dir.path().join("html")));
    }

    #[test]
    fn malformed_yaml_is_a_suite_error() {
        let err = parse_suite("cases: [ {name: 1").expect_err("broken yaml");
        assert!(matches!(err, HarnessError::Suite(_)));
    }

    #[test]
    fn summary_describes_scope() {
        let suite = parse_suite(SUITE).expect("suite parses");
        let rendered = suite.summary().to_string();
        assert!(rendered.contains("Suite: fixtures"));
        assert!(rendered.contains("testAccessibility on normal [full page] -> 0 violation(s)"));
        assert!(rendered.contains("rules=frame-title"));
        assert!(rendered.contains("targets=tag name=p,css selector=h1"));
    }
}
