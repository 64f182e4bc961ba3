use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured outcome of one axe-core run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_engine: Option<TestEngine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub violations: Vec<Violation>,
    #[serde(default)]
    pub passes: Vec<RuleResult>,
    #[serde(default)]
    pub incomplete: Vec<RuleResult>,
    #[serde(default)]
    pub inapplicable: Vec<RuleResult>,
    /// `testRunner`, `toolOptions` and anything newer axe versions add.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestEngine {
    pub name: String,
    pub version: String,
}

/// A rule with the nodes it matched. In `violations` the rule failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub id: String,
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub help_url: String,
    #[serde(default)]
    pub nodes: Vec<NodeResult>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub type Violation = RuleResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    #[serde(default)]
    pub html: String,
    /// Selector path; nested arrays cross frame and shadow boundaries.
    #[serde(default)]
    pub target: Vec<Value>,
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_summary: Option<String>,
    /// Check lists (`any`, `all`, `none`) and other per-node detail.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScanResult {
    pub fn violation_count(&self) -> usize {
        self.violations.len()
    }

    pub fn violation(&self, rule_id: &str) -> Option<&Violation> {
        self.violations
            .iter()
            .find(|violation| violation.id == rule_id)
    }

    pub fn violated_rules(&self) -> Vec<&str> {
        self.violations
            .iter()
            .map(|violation| violation.id.as_str())
            .collect()
    }

    pub fn affected_node_count(&self) -> usize {
        self.violations
            .iter()
            .map(|violation| violation.nodes.len())
            .sum()
    }
}

impl NodeResult {
    /// Target rendered as a single selector string, frames joined by ` >> `.
    pub fn target_display(&self) -> String {
        self.target
            .iter()
            .map(|segment| match segment {
                Value::String(selector) => selector.clone(),
                Value::Array(parts) => parts
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" >>> "),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" >> ")
    }
}
