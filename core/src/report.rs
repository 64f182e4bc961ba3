use crate::result::ScanResult;
use comfy_table::{presets::ASCII_FULL, Table};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{debug, warn};

/// What gets written to disk for each scanned test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanArtifact {
    pub name: String,
    pub generated_at: String,
    pub violation_count: usize,
    pub result: ScanResult,
}

#[derive(Debug, Clone)]
pub struct Reporter {
    artifacts_dir: PathBuf,
}

impl Reporter {
    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
        }
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    pub fn artifact_path(&self, test_name: &str) -> PathBuf {
        self.artifacts_dir
            .join(format!("{}.json", artifact_stem(test_name)))
    }

    /// Persists `result` under `test_name`. Failures are logged and yield
    /// `None`; they never fail the calling test.
    pub fn report(&self, test_name: &str, result: &ScanResult) -> Option<PathBuf> {
        let path = self.artifact_path(test_name);

        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!("failed to create artifact directory {:?}: {err}", parent);
                return None;
            }
        }

        let artifact = ScanArtifact {
            name: test_name.to_string(),
            generated_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| "unknown".to_string()),
            violation_count: result.violation_count(),
            result: result.clone(),
        };

        match serde_json::to_vec_pretty(&artifact) {
            Ok(bytes) => match fs::File::create(&path) {
                Ok(mut file) => {
                    if let Err(err) = file.write_all(&bytes) {
                        warn!("failed to write artifact {:?}: {err}", path);
                        None
                    } else {
                        debug!(test = test_name, path = %path.display(), "artifact written");
                        Some(path)
                    }
                }
                Err(err) => {
                    warn!("failed to create artifact {:?}: {err}", path);
                    None
                }
            },
            Err(err) => {
                warn!("failed to serialize artifact '{}': {err}", test_name);
                None
            }
        }
    }

    pub fn load(path: &Path) -> std::io::Result<ScanArtifact> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}

/// One row per violation: rule, impact, node count, first target.
pub fn render_violation_table(result: &ScanResult) -> String {
    let mut display = Table::new();
    display.load_preset(ASCII_FULL);
    display.set_header(vec!["rule", "impact", "nodes", "first target", "help"]);

    for violation in &result.violations {
        let first_target = violation
            .nodes
            .first()
            .map(|node| node.target_display())
            .unwrap_or_default();
        display.add_row(vec![
            violation.id.clone(),
            violation.impact.clone().unwrap_or_default(),
            violation.nodes.len().to_string(),
            first_target,
            violation.help.clone(),
        ]);
    }

    display.to_string()
}

/// File stem for a test name's artifact. Names that need sanitizing get a
/// digest suffix so distinct names never share a file.
pub fn artifact_stem(test_name: &str) -> String {
    let sanitized = sanitize_label(test_name);
    if sanitized == test_name {
        sanitized
    } else {
        format!("{}-{}", sanitized, short_digest(test_name))
    }
}

fn sanitize_label(label: &str) -> String {
    let sanitized: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.trim_matches('.').is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

fn short_digest(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{NodeResult, RuleResult};
    use serde_json::json;

    fn sample_result() -> ScanResult {
        ScanResult {
            url: Some("file:///fixtures/violation.html".to_string()),
            violations: vec![RuleResult {
                id: "image-alt".to_string(),
                impact: Some("critical".to_string()),
                tags: vec!["wcag2a".to_string()],
                help: "Images must have alternate text".to_string(),
                nodes: vec![NodeResult {
                    html: "<img src=\"logo.png\">".to_string(),
                    target: vec![json!("img")],
                    impact: Some("critical".to_string()),
                    failure_summary: Some("Fix any of the following".to_string()),
                    ..NodeResult::default()
                }],
                ..RuleResult::default()
            }],
            ..ScanResult::default()
        }
    }

    #[test]
    fn report_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reporter = Reporter::new(dir.path().join("artifacts"));
        let result = sample_result();

        let path = reporter
            .report("testAccessibilityWithOptions", &result)
            .expect("artifact written");
        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some("testAccessibilityWithOptions.json")
        );

        let artifact = Reporter::load(&path).expect("artifact readable");
        assert_eq!(artifact.name, "testAccessibilityWithOptions");
        assert_eq!(artifact.violation_count, 1);
        assert_eq!(artifact.result, result);
    }

    #[test]
    fn test_names_are_sanitized() {
        let reporter = Reporter::new("/tmp/axecheck");
        assert_eq!(
            reporter.artifact_path("testAccessibilityWithFrames"),
            PathBuf::from("/tmp/axecheck/testAccessibilityWithFrames.json")
        );

        let spaced = reporter.artifact_path("suite/with spaces:1");
        let spaced_name = spaced.file_name().and_then(|n| n.to_str()).unwrap();
        assert!(spaced_name.starts_with("suite_with_spaces_1-"));
        assert!(spaced_name.ends_with(".json"));
        assert_eq!(spaced, reporter.artifact_path("suite/with spaces:1"));

        let dots = reporter.artifact_path("..");
        let dots_name = dots.file_name().and_then(|n| n.to_str()).unwrap();
        assert!(dots_name.starts_with("unnamed-"));
    }

    #[test]
    fn distinct_names_never_share_an_artifact() {
        let reporter = Reporter::new("/tmp/axecheck");
        assert_ne!(
            reporter.artifact_path("case a"),
            reporter.artifact_path("case_a")
        );
        assert_ne!(
            reporter.artifact_path("case a"),
            reporter.artifact_path("case:a")
        );
        assert_eq!(artifact_stem("case_a"), "case_a");
    }

    #[test]
    fn artifact_keeps_every_axe_field() {
        let payload = json!({
            "testEngine": { "name": "axe-core", "version": "4.10.2" },
            "testRunner": { "name": "axe" },
            "toolOptions": { "runOnly": { "type": "rule", "values": ["image-alt"] } },
            "violations": [{
                "id": "image-alt",
                "impact": "critical",
                "nodes": [{
                    "html": "<img src=\"logo.png\">",
                    "target": ["img"],
                    "xpath": ["/html/body/main/img"],
                    "any": [{
                        "id": "has-alt",
                        "impact": "critical",
                        "message": "Element does not have an alt attribute",
                        "data": null,
                        "relatedNodes": []
                    }],
                    "all": [],
                    "none": []
                }]
            }]
        });
        let result: ScanResult = serde_json::from_value(payload).expect("axe payload");

        let dir = tempfile::tempdir().expect("tempdir");
        let reporter = Reporter::new(dir.path());
        let path = reporter.report("full payload", &result).expect("written");

        let bytes = fs::read(&path).expect("artifact on disk");
        let raw: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        let stored = &raw["result"];
        assert_eq!(stored["testRunner"], json!({ "name": "axe" }));
        assert_eq!(stored["toolOptions"]["runOnly"]["values"], json!(["image-alt"]));
        let node = &stored["violations"][0]["nodes"][0];
        assert_eq!(node["any"][0]["id"], "has-alt");
        assert_eq!(
            node["any"][0]["message"],
            "Element does not have an alt attribute"
        );
        assert_eq!(node["xpath"], json!(["/html/body/main/img"]));
        assert_eq!(node["all"], json!([]));

        let artifact = Reporter::load(&path).expect("artifact readable");
        assert_eq!(artifact.result, result);
    }

    #[test]
    fn persistence_failure_is_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file in the way").expect("write blocker");

        let reporter = Reporter::new(&blocker);
        assert!(reporter.report("anything", &sample_result()).is_none());
    }

    #[test]
    fn table_lists_each_violation() {
        let rendered = render_violation_table(&sample_result());
        assert!(rendered.contains("image-alt"));
        assert!(rendered.contains("critical"));
        assert!(rendered.contains("Images must have alternate text"));
    }
}
