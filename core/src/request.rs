use crate::driver::ElementHandle;
use crate::error::{HarnessError, Result};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleToggle {
    pub enabled: bool,
}

/// Per-rule enable/disable map plus any other axe option keys, which are
/// passed through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleOverrides {
    #[serde(default)]
    pub rules: BTreeMap<String, RuleToggle>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RuleOverrides {
    /// Parses `{"rules": {"<id>": {"enabled": bool}}}`.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).map_err(|err| {
            HarnessError::InvalidConfiguration(format!("options are not JSON: {err}"))
        })?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(HarnessError::InvalidConfiguration(
                "options must be a JSON object".to_string(),
            ));
        }
        let overrides: RuleOverrides = serde_json::from_value(value).map_err(|err| {
            HarnessError::InvalidConfiguration(format!("malformed rule overrides: {err}"))
        })?;
        if let Some(id) = overrides.rules.keys().find(|id| id.trim().is_empty()) {
            return Err(HarnessError::InvalidConfiguration(format!(
                "rule identifier '{id}' is empty"
            )));
        }
        Ok(overrides)
    }

    fn merge(&self, other: RuleOverrides) -> RuleOverrides {
        let mut merged = self.clone();
        merged.rules.extend(other.rules);
        merged.extra.extend(other.extra);
        merged
    }
}

/// What to scan. Each `with_*` call returns a new request and leaves the
/// receiver untouched.
#[derive(Clone)]
pub struct ScanRequest<'s> {
    session: &'s Session,
    rule_filter: Option<Vec<String>>,
    rule_overrides: Option<RuleOverrides>,
    include: Vec<String>,
    exclude: Vec<String>,
    targets: Vec<ElementHandle>,
}

impl fmt::Debug for ScanRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanRequest")
            .field("session", &self.session.id())
            .field("rule_filter", &self.rule_filter)
            .field("rule_overrides", &self.rule_overrides)
            .field("include", &self.include)
            .field("exclude", &self.exclude)
            .field("targets", &self.targets)
            .finish()
    }
}

impl<'s> ScanRequest<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self {
            session,
            rule_filter: None,
            rule_overrides: None,
            include: Vec::new(),
            exclude: Vec::new(),
            targets: Vec::new(),
        }
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    pub fn rule_filter(&self) -> Option<&[String]> {
        self.rule_filter.as_deref()
    }

    pub fn rule_overrides(&self) -> Option<&RuleOverrides> {
        self.rule_overrides.as_ref()
    }

    pub fn include(&self) -> &[String] {
        &self.include
    }

    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    pub fn targets(&self) -> &[ElementHandle] {
        &self.targets
    }

    /// Runs exactly these rules. An empty list clears the filter.
    pub fn with_rule_filter<I, S>(&self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        ids.sort();
        ids.dedup();
        Self {
            rule_filter: (!ids.is_empty()).then_some(ids),
            ..self.clone()
        }
    }

    /// Applies a JSON rule-override document. Later overrides win per rule.
    pub fn with_rule_overrides(&self, raw: &str) -> Result<Self> {
        let parsed = RuleOverrides::parse(raw)?;
        Ok(self.with_overrides(parsed))
    }

    pub fn with_rule_enabled(&self, rule_id: impl Into<String>, enabled: bool) -> Self {
        let mut single = RuleOverrides::default();
        single.rules.insert(rule_id.into(), RuleToggle { enabled });
        self.with_overrides(single)
    }

    pub fn with_overrides(&self, overrides: RuleOverrides) -> Self {
        let merged = match &self.rule_overrides {
            Some(existing) => existing.merge(overrides),
            None => overrides,
        };
        Self {
            rule_overrides: Some(merged),
            ..self.clone()
        }
    }

    /// Limits the scan to these selectors. Fails when explicit targets are set.
    pub fn with_include<I, S>(&self, selectors: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let include = collect_selectors(selectors);
        if !include.is_empty() {
            self.ensure_no_targets("include")?;
        }
        Ok(Self {
            include,
            ..self.clone()
        })
    }

    /// Removes these selectors from the scan. Fails when explicit targets are
    /// set.
    pub fn with_exclude<I, S>(&self, selectors: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let exclude = collect_selectors(selectors);
        if !exclude.is_empty() {
            self.ensure_no_targets("exclude")?;
        }
        Ok(Self {
            exclude,
            ..self.clone()
        })
    }

    /// Scans only these elements. Selector scoping and explicit targets are
    /// mutually exclusive.
    pub fn with_targets<I>(&self, elements: I) -> Result<Self>
    where
        I: IntoIterator<Item = ElementHandle>,
    {
        let targets: Vec<ElementHandle> = elements.into_iter().collect();
        if targets.is_empty() {
            return Err(HarnessError::InvalidConfiguration(
                "explicit targets require at least one element".to_string(),
            ));
        }
        if !self.include.is_empty() || !self.exclude.is_empty() {
            return Err(HarnessError::ConflictingScope(
                "explicit targets cannot be combined with include/exclude selectors".to_string(),
            ));
        }
        Ok(Self {
            targets,
            ..self.clone()
        })
    }

    fn ensure_no_targets(&self, scope: &str) -> Result<()> {
        if self.targets.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::ConflictingScope(format!(
                "{scope} selectors cannot be combined with explicit targets"
            )))
        }
    }

    pub fn is_full_page(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.targets.is_empty()
    }

    /// The axe `context` argument; `null` means the whole document.
    /// Explicit targets are passed as script arguments instead, see
    /// [`ScanRequest::target_arguments`].
    pub fn context(&self) -> Value {
        if self.include.is_empty() && self.exclude.is_empty() {
            return Value::Null;
        }
        let mut context = Map::new();
        if !self.include.is_empty() {
            context.insert("include".to_string(), selector_list(&self.include));
        }
        if !self.exclude.is_empty() {
            context.insert("exclude".to_string(), selector_list(&self.exclude));
        }
        Value::Object(context)
    }

    pub fn target_arguments(&self) -> Value {
        Value::Array(self.targets.iter().map(ElementHandle::to_json).collect())
    }

    pub fn options(&self) -> Value {
        let mut options = Map::new();
        if let Some(overrides) = &self.rule_overrides {
            for (key, value) in &overrides.extra {
                options.insert(key.clone(), value.clone());
            }
            if !overrides.rules.is_empty() {
                let rules: Map<String, Value> = overrides
                    .rules
                    .iter()
                    .map(|(id, toggle)| (id.clone(), json!({ "enabled": toggle.enabled })))
                    .collect();
                options.insert("rules".to_string(), Value::Object(rules));
            }
        }
        if let Some(ids) = &self.rule_filter {
            options.insert(
                "runOnly".to_string(),
                json!({ "type": "rule", "values": ids }),
            );
        }
        Value::Object(options)
    }
}

fn collect_selectors<I, S>(selectors: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    selectors
        .into_iter()
        .map(Into::into)
        .filter(|selector| !selector.trim().is_empty())
        .collect()
}

fn selector_list(selectors: &[String]) -> Value {
    Value::Array(
        selectors
            .iter()
            .map(|selector| Value::Array(vec![Value::String(selector.clone())]))
            .collect(),
    )
}
