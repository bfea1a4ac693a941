use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use hookline_core::EngineConfig;
use hookline_correlation::{CorrelationRule, FieldCorrelationRule};
use hookline_dispatch::HttpChannel;
use hookline_rules::{Rule, RuleError, RuleIssue, Webhook};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::MemoryStores;

/// Webhooks, rules, correlation rules and channels loaded from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RuleBundle {
    pub webhooks: Vec<Webhook>,
    pub rules: Vec<Rule>,
    pub correlations: Vec<CorrelationRule>,
    pub field_correlations: Vec<FieldCorrelationRule>,
    pub channels: HashMap<String, HttpChannel>,
    pub engine: Option<EngineConfig>,
}

/// Loads a bundle from a YAML/JSON file or from every such file of a
/// directory. Identifiers must be unique across the whole bundle.
pub fn load_bundle(path: impl AsRef<Path>) -> Result<RuleBundle, RuleError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RuleError::MissingPath(path.display().to_string()));
    }

    let bundle = if path.is_dir() {
        load_from_directory(path)?
    } else {
        load_from_file(path)?
    };

    bundle.check_duplicates()?;
    debug!(
        path = %path.display(),
        webhooks = bundle.webhooks.len(),
        rules = bundle.rules.len(),
        correlations = bundle.correlations.len(),
        field_correlations = bundle.field_correlations.len(),
        "rule bundle loaded"
    );
    Ok(bundle)
}

fn load_from_directory(path: &Path) -> Result<RuleBundle, RuleError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(path).map_err(|err| RuleError::from_io(path, err))? {
        let entry = entry.map_err(|err| RuleError::from_io(path, err))?;
        let file_type = entry
            .file_type()
            .map_err(|err| RuleError::from_io(entry.path(), err))?;
        if file_type.is_dir() {
            continue;
        }

        if let Some(ext) = entry.path().extension().and_then(|value| value.to_str()) {
            if matches!(ext, "json" | "yaml" | "yml") {
                files.push(entry.path());
            }
        }
    }
    files.sort();

    let mut bundle = RuleBundle::default();
    for file in files {
        bundle.merge(load_from_file(&file)?)?;
    }
    Ok(bundle)
}

fn load_from_file(path: &Path) -> Result<RuleBundle, RuleError> {
    let raw = fs::read_to_string(path).map_err(|err| RuleError::from_io(path, err))?;
    parse_bundle(&raw, path)
}

/// Accepts a full bundle document, a plain list of rules or a single rule.
pub fn parse_bundle(raw: &str, path: &Path) -> Result<RuleBundle, RuleError> {
    let document_error = match serde_yaml::from_str::<RuleBundle>(raw) {
        Ok(bundle) => return Ok(bundle),
        Err(err) => err,
    };

    if let Ok(rules) = serde_yaml::from_str::<Vec<Rule>>(raw) {
        return Ok(RuleBundle {
            rules,
            ..RuleBundle::default()
        });
    }

    if let Ok(rule) = serde_yaml::from_str::<Rule>(raw) {
        return Ok(RuleBundle {
            rules: vec![rule],
            ..RuleBundle::default()
        });
    }

    Err(RuleError::parse_error(path, document_error.to_string()))
}

impl RuleBundle {
    /// Appends another bundle. Channel ids and engine sections may only be
    /// defined once.
    pub fn merge(&mut self, other: RuleBundle) -> Result<(), RuleError> {
        self.webhooks.extend(other.webhooks);
        self.rules.extend(other.rules);
        self.correlations.extend(other.correlations);
        self.field_correlations.extend(other.field_correlations);
        for (id, channel) in other.channels {
            if self.channels.contains_key(&id) {
                return Err(RuleError::DuplicateRule { id });
            }
            self.channels.insert(id, channel);
        }
        if let Some(engine) = other.engine {
            if self.engine.is_some() {
                return Err(RuleError::parse_error(
                    "bundle",
                    "engine section defined more than once",
                ));
            }
            self.engine = Some(engine);
        }
        Ok(())
    }

    fn check_duplicates(&self) -> Result<(), RuleError> {
        unique(self.webhooks.iter().map(|webhook| webhook.id.as_str()))?;
        unique(self.rules.iter().map(|rule| rule.id.as_str()))?;
        unique(
            self.correlations
                .iter()
                .map(|rule| rule.id.as_str())
                .chain(self.field_correlations.iter().map(|rule| rule.id.as_str()))
                .filter(|id| !id.is_empty()),
        )
    }

    pub fn engine_config(&self) -> EngineConfig {
        self.engine.clone().unwrap_or_default()
    }

    /// The declared webhook, or a first-match webhook when it is not declared.
    pub fn webhook(&self, id: &str) -> Webhook {
        self.webhooks
            .iter()
            .find(|webhook| webhook.id == id)
            .cloned()
            .unwrap_or_else(|| Webhook::new(id, Default::default()))
    }

    /// Parses every stored condition tree and validates correlation rules.
    /// Problems are collected rather than returned on the first failure.
    pub fn validate(&self, max_depth: usize) -> Vec<RuleIssue> {
        let mut issues = Vec::new();
        let mut push = |rule_id: &str, message: String| {
            issues.push(RuleIssue {
                rule_id: Some(rule_id.to_string()),
                message,
            })
        };

        for rule in &self.rules {
            if let Err(err) = rule.condition_group(max_depth) {
                push(&rule.id, err.to_string());
            }
            for channel in &rule.action.channels {
                if !self.channels.is_empty() && !self.channels.contains_key(channel) {
                    push(&rule.id, format!("unknown channel `{channel}`"));
                }
            }
        }
        for rule in &self.correlations {
            if let Err(err) = rule.validate() {
                push(&rule.id, err.to_string());
            }
        }
        for rule in &self.field_correlations {
            let mut normalized = rule.clone();
            if let Err(err) = normalized.normalize() {
                push(&rule.id, err.to_string());
            }
            if let Err(err) = rule.condition_group(max_depth) {
                push(&rule.id, err.to_string());
            }
        }
        issues
    }

    /// Copies every rule into the in-memory stores.
    pub fn install(&self, stores: &MemoryStores) -> Result<(), RuleError> {
        for rule in &self.rules {
            stores.rules.put_rule(rule.clone());
        }
        for rule in &self.correlations {
            stores
                .correlations
                .put_rule(rule.clone())
                .map_err(|err| RuleError::invalid_rule(&rule.id, err.to_string()))?;
        }
        for rule in &self.field_correlations {
            stores
                .field_correlations
                .put_rule(rule.clone())
                .map_err(|err| RuleError::invalid_rule(&rule.id, err.to_string()))?;
        }
        Ok(())
    }
}

fn unique<'a>(ids: impl Iterator<Item = &'a str>) -> Result<(), RuleError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(RuleError::DuplicateRule { id: id.to_string() });
        }
    }
    Ok(())
}
