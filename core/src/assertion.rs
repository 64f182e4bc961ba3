use crate::error::AssertionFailure;
use crate::result::{ScanResult, Violation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Picks a violation either by its position or by rule id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationRef {
    Index(usize),
    Rule(String),
}

impl ViolationRef {
    fn find<'a>(&self, result: &'a ScanResult) -> Option<&'a Violation> {
        match self {
            ViolationRef::Index(index) => result.violations.get(*index),
            ViolationRef::Rule(rule) => result.violation(rule),
        }
    }
}

impl fmt::Display for ViolationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationRef::Index(index) => write!(f, "violation #{index}"),
            ViolationRef::Rule(rule) => write!(f, "violation '{rule}'"),
        }
    }
}

pub fn expect_violation_count(
    result: &ScanResult,
    expected: usize,
) -> Result<(), AssertionFailure> {
    let actual = result.violation_count();
    if actual == expected {
        return Ok(());
    }
    Err(AssertionFailure {
        check: "violation count".to_string(),
        expected,
        actual,
        detail: violated_rules_detail(result),
    })
}

pub fn expect_no_violations(result: &ScanResult) -> Result<(), AssertionFailure> {
    expect_violation_count(result, 0)
}

pub fn expect_node_count(
    result: &ScanResult,
    violation: &ViolationRef,
    expected: usize,
) -> Result<(), AssertionFailure> {
    let check = format!("affected nodes of {violation}");
    let Some(found) = violation.find(result) else {
        return Err(AssertionFailure {
            check,
            expected,
            actual: 0,
            detail: Some(match violated_rules_detail(result) {
                Some(rules) => format!("no such violation; {rules}"),
                None => "no such violation; scan reported none".to_string(),
            }),
        });
    };

    let actual = found.nodes.len();
    if actual == expected {
        return Ok(());
    }
    let targets: Vec<String> = found
        .nodes
        .iter()
        .map(|node| node.target_display())
        .collect();
    Err(AssertionFailure {
        check,
        expected,
        actual,
        detail: Some(format!("targets: {}", targets.join(", "))),
    })
}

fn violated_rules_detail(result: &ScanResult) -> Option<String> {
    if result.violations.is_empty() {
        None
    } else {
        Some(format!("violated rules: {}", result.violated_rules().join(", ")))
    }
}
