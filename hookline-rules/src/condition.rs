use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use futures::future::join_all;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::entity::{EntityState, EntityStore};
use crate::error::RuleError;
use crate::path::FieldPath;

const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Comparison applied by a leaf [`Condition`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    IsEmpty,
    IsNotEmpty,
    IsTrue,
    IsFalse,
    RegexMatch,
    EntityIsOnline,
    EntityIsOffline,
}

impl Operator {
    /// Parses the stored operator name, ignoring case.
    pub fn parse(raw: &str) -> Option<Self> {
        let operator = match raw.trim().to_ascii_lowercase().as_str() {
            "equals" => Operator::Equals,
            "not_equals" => Operator::NotEquals,
            "contains" => Operator::Contains,
            "not_contains" => Operator::NotContains,
            "starts_with" => Operator::StartsWith,
            "ends_with" => Operator::EndsWith,
            "greater_than" => Operator::GreaterThan,
            "less_than" => Operator::LessThan,
            "greater_than_or_equal" => Operator::GreaterThanOrEqual,
            "less_than_or_equal" => Operator::LessThanOrEqual,
            "is_empty" => Operator::IsEmpty,
            "is_not_empty" => Operator::IsNotEmpty,
            "is_true" => Operator::IsTrue,
            "is_false" => Operator::IsFalse,
            "regex_match" => Operator::RegexMatch,
            "entity_is_online" => Operator::EntityIsOnline,
            "entity_is_offline" => Operator::EntityIsOffline,
            _ => return None,
        };
        Some(operator)
    }

    /// Whether the operator reads entity state instead of the payload.
    pub fn is_entity_operator(&self) -> bool {
        matches!(self, Operator::EntityIsOnline | Operator::EntityIsOffline)
    }
}

/// Boolean combinator of a [`ConditionGroup`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    #[default]
    And,
    Or,
}

/// Single `field operator value` test.
///
/// Build it with [`Condition::new`] so `regex_match` patterns are compiled
/// once.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Condition {
    pub field: FieldPath,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip)]
    pattern: CompiledPattern,
}

/// Pattern of a `regex_match` condition. `None` when the operator is not a
/// regex match or the pattern does not compile.
#[derive(Debug, Clone, Default)]
struct CompiledPattern(Option<Regex>);

impl CompiledPattern {
    fn for_condition(operator: Operator, value: Option<&Value>) -> Self {
        let pattern = match (operator, value) {
            (Operator::RegexMatch, Some(Value::String(pattern))) => pattern,
            _ => return Self::default(),
        };

        match RegexBuilder::new(pattern)
            .case_insensitive(true)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
        {
            Ok(regex) => Self(Some(regex)),
            Err(err) => {
                debug!(%pattern, error = %err, "invalid regex in condition");
                Self::default()
            }
        }
    }
}

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_ref().map(Regex::as_str) == other.0.as_ref().map(Regex::as_str)
    }
}

/// Node of a condition tree.
///
/// Trees are built with [`ConditionGroup::parse`], which tells groups and
/// leaves apart by the presence of a `conditions` key.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ConditionNode {
    Group(ConditionGroup),
    Leaf(Condition),
}

/// AND/OR combination of conditions and nested groups.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct ConditionGroup {
    pub logic: Logic,
    pub conditions: Vec<ConditionNode>,
}

impl ConditionGroup {
    pub fn all(conditions: Vec<ConditionNode>) -> Self {
        Self {
            logic: Logic::And,
            conditions,
        }
    }

    pub fn any(conditions: Vec<ConditionNode>) -> Self {
        Self {
            logic: Logic::Or,
            conditions,
        }
    }

    /// Parses a stored condition tree.
    ///
    /// Objects carrying a `conditions` key are groups, anything else must be
    /// a leaf. The root group sits at depth one; deeper trees than
    /// `max_depth` are rejected.
    pub fn parse(raw: &Value, max_depth: usize) -> Result<Self, RuleError> {
        parse_group(raw, 1, max_depth)
    }

    /// Evaluates the tree against a prepared context.
    ///
    /// An empty AND group is true, an empty OR group is false.
    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> bool {
        match self.logic {
            Logic::And => self.conditions.iter().all(|node| node.evaluate(ctx)),
            Logic::Or => self.conditions.iter().any(|node| node.evaluate(ctx)),
        }
    }

    /// Entity names referenced by entity operators anywhere in the tree.
    pub fn entity_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_entity_names(&mut names);
        names
    }

    fn collect_entity_names(&self, names: &mut BTreeSet<String>) {
        for node in &self.conditions {
            match node {
                ConditionNode::Group(group) => group.collect_entity_names(names),
                ConditionNode::Leaf(condition) if condition.operator.is_entity_operator() => {
                    names.insert(condition.field.as_str().to_string());
                }
                ConditionNode::Leaf(_) => {}
            }
        }
    }

    /// Snapshots the referenced entities and evaluates the tree.
    pub async fn evaluate_with(&self, payload: &Value, entities: &dyn EntityStore) -> bool {
        let ctx = EvaluationContext::load(self, payload, entities).await;
        self.evaluate(&ctx)
    }
}

impl ConditionNode {
    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> bool {
        match self {
            ConditionNode::Group(group) => group.evaluate(ctx),
            ConditionNode::Leaf(condition) => condition.evaluate(ctx),
        }
    }
}

fn parse_group(raw: &Value, depth: usize, max_depth: usize) -> Result<ConditionGroup, RuleError> {
    if depth > max_depth {
        return Err(RuleError::DepthExceeded { max: max_depth });
    }

    let map = raw
        .as_object()
        .ok_or_else(|| RuleError::InvalidCondition("condition group must be an object".into()))?;

    let logic = match map.get("logic") {
        None | Some(Value::Null) => Logic::And,
        Some(Value::String(text)) => match text.trim().to_ascii_uppercase().as_str() {
            "AND" => Logic::And,
            "OR" => Logic::Or,
            other => {
                return Err(RuleError::InvalidCondition(format!(
                    "unknown group logic `{other}`"
                )))
            }
        },
        Some(other) => {
            return Err(RuleError::InvalidCondition(format!(
                "group logic must be a string, got {other}"
            )))
        }
    };

    let children = match map.get("conditions") {
        Some(Value::Array(children)) => children,
        Some(Value::Null) | None => return Ok(ConditionGroup { logic, conditions: Vec::new() }),
        Some(_) => {
            return Err(RuleError::InvalidCondition(
                "group conditions must be an array".into(),
            ))
        }
    };

    let conditions = children
        .iter()
        .map(|child| parse_node(child, depth, max_depth))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ConditionGroup { logic, conditions })
}

fn parse_node(raw: &Value, depth: usize, max_depth: usize) -> Result<ConditionNode, RuleError> {
    match raw {
        Value::Object(map) if map.contains_key("conditions") => {
            parse_group(raw, depth + 1, max_depth).map(ConditionNode::Group)
        }
        Value::Object(map) => parse_leaf(map).map(ConditionNode::Leaf),
        other => Err(RuleError::InvalidCondition(format!(
            "condition must be an object, got {other}"
        ))),
    }
}

fn parse_leaf(map: &Map<String, Value>) -> Result<Condition, RuleError> {
    let field = map
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| RuleError::InvalidCondition("condition is missing `field`".into()))?;
    let operator = map
        .get("operator")
        .and_then(Value::as_str)
        .ok_or_else(|| RuleError::InvalidCondition("condition is missing `operator`".into()))?;
    let operator =
        Operator::parse(operator).ok_or_else(|| RuleError::UnknownOperator(operator.to_string()))?;

    Ok(Condition::new(field, operator, map.get("value").cloned()))
}

/// Payload plus a snapshot of the entity states a tree refers to.
#[derive(Debug, Clone)]
pub struct EvaluationContext<'a> {
    payload: &'a Value,
    entities: HashMap<String, EntityState>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(payload: &'a Value) -> Self {
        Self {
            payload,
            entities: HashMap::new(),
        }
    }

    pub fn with_entity(mut self, state: EntityState) -> Self {
        self.entities.insert(state.name.clone(), state);
        self
    }

    /// Fetches every entity referenced by `group` concurrently.
    ///
    /// Lookup failures are logged and treated as an absent record.
    pub async fn load(
        group: &ConditionGroup,
        payload: &'a Value,
        store: &dyn EntityStore,
    ) -> EvaluationContext<'a> {
        let names = group.entity_names();
        let lookups = names.iter().map(|name| async move {
            match store.get(name).await {
                Ok(state) => state,
                Err(err) => {
                    warn!(entity = %name, error = %err, "entity lookup failed");
                    None
                }
            }
        });

        let entities = join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .map(|state| (state.name.clone(), state))
            .collect();

        EvaluationContext { payload, entities }
    }

    pub fn payload(&self) -> &Value {
        self.payload
    }

    /// Absent records are offline.
    pub fn entity_online(&self, name: &str) -> bool {
        self.entities
            .get(name)
            .map(|state| state.is_online)
            .unwrap_or(false)
    }
}

impl Condition {
    pub fn new(field: impl Into<FieldPath>, operator: Operator, value: Option<Value>) -> Self {
        let pattern = CompiledPattern::for_condition(operator, value.as_ref());
        Self {
            field: field.into(),
            operator,
            value,
            pattern,
        }
    }

    /// Evaluates the condition. Unsupported operand types yield `false`.
    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> bool {
        let actual = self.field.resolve(ctx.payload);
        let expected = self.value.as_ref();

        match self.operator {
            Operator::Equals => equals(actual, expected),
            Operator::NotEquals => !equals(actual, expected),
            Operator::Contains => contains(actual, expected).unwrap_or(false),
            Operator::NotContains => contains(actual, expected).map(|found| !found).unwrap_or(false),
            Operator::StartsWith => string_pair(actual, expected)
                .map(|(value, prefix)| value.starts_with(&prefix))
                .unwrap_or(false),
            Operator::EndsWith => string_pair(actual, expected)
                .map(|(value, suffix)| value.ends_with(&suffix))
                .unwrap_or(false),
            Operator::GreaterThan => compare(actual, expected) == Some(Ordering::Greater),
            Operator::LessThan => compare(actual, expected) == Some(Ordering::Less),
            Operator::GreaterThanOrEqual => matches!(
                compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::LessThanOrEqual => matches!(
                compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::IsEmpty => is_empty(actual),
            Operator::IsNotEmpty => !is_empty(actual),
            Operator::IsTrue => truthiness(actual) == Some(true),
            Operator::IsFalse => truthiness(actual) == Some(false),
            Operator::RegexMatch => match (actual, &self.pattern.0) {
                (Some(Value::String(text)), Some(regex)) => regex.is_match(text),
                _ => false,
            },
            Operator::EntityIsOnline => ctx.entity_online(self.field.as_str()),
            Operator::EntityIsOffline => !ctx.entity_online(self.field.as_str()),
        }
    }
}

fn equals(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    match actual {
        Some(actual) => values_equal(actual, expected.unwrap_or(&Value::Null)),
        None => false,
    }
}

/// Type-aware equality: strings ignore case, numbers compare numerically.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(lhs), Value::String(rhs)) => lhs.to_lowercase() == rhs.to_lowercase(),
        (Value::Number(lhs), Value::Number(rhs)) => numbers_equal(lhs, rhs),
        _ => left == right,
    }
}

/// Integers compare exactly; a float on either side compares as `f64`.
fn numbers_equal(lhs: &Number, rhs: &Number) -> bool {
    if lhs.is_f64() || rhs.is_f64() {
        return match (lhs.as_f64(), rhs.as_f64()) {
            (Some(l), Some(r)) => l == r,
            _ => false,
        };
    }
    if let (Some(l), Some(r)) = (lhs.as_i64(), rhs.as_i64()) {
        return l == r;
    }
    if let (Some(l), Some(r)) = (lhs.as_u64(), rhs.as_u64()) {
        return l == r;
    }
    false
}

fn contains(actual: Option<&Value>, expected: Option<&Value>) -> Option<bool> {
    let expected = expected?;
    match actual? {
        Value::String(haystack) => expected
            .as_str()
            .map(|needle| haystack.to_lowercase().contains(&needle.to_lowercase())),
        Value::Array(items) => Some(items.iter().any(|item| values_equal(item, expected))),
        _ => None,
    }
}

fn string_pair(actual: Option<&Value>, expected: Option<&Value>) -> Option<(String, String)> {
    let actual = actual?.as_str()?;
    let expected = expected?.as_str()?;
    Some((actual.to_lowercase(), expected.to_lowercase()))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn compare(actual: Option<&Value>, expected: Option<&Value>) -> Option<Ordering> {
    let lhs = as_number(actual?)?;
    let rhs = as_number(expected?)?;
    lhs.partial_cmp(&rhs)
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn truthiness(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        Value::Number(number) => match number.as_f64()? {
            n if n == 1.0 => Some(true),
            n if n == 0.0 => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::json;
    use test_case::test_case;

    fn leaf(field: &str, operator: Operator, value: Option<Value>) -> ConditionNode {
        ConditionNode::Leaf(Condition::new(field, operator, value))
    }

    fn check(payload: &Value, field: &str, operator: Operator, value: Option<Value>) -> bool {
        Condition::new(field, operator, value).evaluate(&EvaluationContext::new(payload))
    }

    #[test_case(json!("Down"), json!("down"), true ; "strings ignore case")]
    #[test_case(json!(1), json!(1.0), true ; "numbers compare numerically")]
    #[test_case(json!("1"), json!(1), false ; "no cross type coercion")]
    #[test_case(json!(true), json!("true"), false ; "bool is not string")]
    #[test_case(json!(null), json!(null), true ; "null equals null")]
    #[test_case(json!(9007199254740993u64), json!(9007199254740992u64), false ; "large integers are exact")]
    #[test_case(json!(-9007199254740993i64), json!(-9007199254740992i64), false ; "large negatives are exact")]
    #[test_case(json!(u64::MAX), json!(-1), false ; "unsigned never equals negative")]
    #[test_case(json!(0.1 + 0.2), json!(0.3), false ; "floats compare exactly")]
    fn equals_is_type_aware(actual: Value, expected: Value, outcome: bool) {
        let payload = json!({"v": actual});
        assert_eq!(check(&payload, "v", Operator::Equals, Some(expected.clone())), outcome);
        assert_eq!(check(&payload, "v", Operator::NotEquals, Some(expected)), !outcome);
    }

    #[test_case(Operator::Equals ; "equals")]
    #[test_case(Operator::Contains ; "contains")]
    #[test_case(Operator::NotContains ; "not contains")]
    #[test_case(Operator::StartsWith ; "starts with")]
    #[test_case(Operator::EndsWith ; "ends with")]
    #[test_case(Operator::GreaterThan ; "greater than")]
    #[test_case(Operator::LessThan ; "less than")]
    #[test_case(Operator::GreaterThanOrEqual ; "greater or equal")]
    #[test_case(Operator::LessThanOrEqual ; "less or equal")]
    #[test_case(Operator::IsTrue ; "is true")]
    #[test_case(Operator::IsFalse ; "is false")]
    #[test_case(Operator::RegexMatch ; "regex")]
    fn absent_field_is_false(operator: Operator) {
        assert!(!check(&json!({}), "missing", operator, Some(json!("0"))));
    }

    #[test]
    fn absent_field_is_empty() {
        let payload = json!({});
        assert!(check(&payload, "missing", Operator::IsEmpty, None));
        assert!(!check(&payload, "missing", Operator::IsNotEmpty, None));
        assert!(check(&payload, "missing", Operator::NotEquals, Some(json!("x"))));
    }

    #[test_case(json!(null), true ; "null")]
    #[test_case(json!(""), true ; "empty string")]
    #[test_case(json!([]), true ; "empty array")]
    #[test_case(json!({}), false ; "empty object")]
    #[test_case(json!(0), false ; "zero")]
    #[test_case(json!(" "), false ; "whitespace")]
    fn emptiness(value: Value, empty: bool) {
        let payload = json!({"v": value});
        assert_eq!(check(&payload, "v", Operator::IsEmpty, None), empty);
        assert_eq!(check(&payload, "v", Operator::IsNotEmpty, None), !empty);
    }

    #[test]
    fn contains_handles_strings_and_arrays() {
        let payload = json!({"msg": "Disk FULL on db-1", "tags": ["Prod", "db"], "n": 5});
        assert!(check(&payload, "msg", Operator::Contains, Some(json!("full"))));
        assert!(check(&payload, "msg", Operator::NotContains, Some(json!("cpu"))));
        assert!(check(&payload, "tags", Operator::Contains, Some(json!("prod"))));
        assert!(!check(&payload, "tags", Operator::Contains, Some(json!("staging"))));
        assert!(!check(&payload, "n", Operator::Contains, Some(json!("5"))));
        assert!(!check(&payload, "n", Operator::NotContains, Some(json!("5"))));
    }

    #[test]
    fn prefix_and_suffix_ignore_case() {
        let payload = json!({"host": "PROD-web-01", "n": 10});
        assert!(check(&payload, "host", Operator::StartsWith, Some(json!("prod-"))));
        assert!(check(&payload, "host", Operator::EndsWith, Some(json!("WEB-01"))));
        assert!(!check(&payload, "n", Operator::StartsWith, Some(json!("1"))));
        assert!(!check(&payload, "host", Operator::StartsWith, Some(json!(1))));
    }

    #[test]
    fn numeric_comparisons() {
        let payload = json!({"cpu": 91.5, "disk": "80", "name": "db"});
        assert!(check(&payload, "cpu", Operator::GreaterThan, Some(json!(90))));
        assert!(check(&payload, "cpu", Operator::LessThanOrEqual, Some(json!("91.5"))));
        assert!(check(&payload, "disk", Operator::GreaterThanOrEqual, Some(json!(80))));
        assert!(!check(&payload, "name", Operator::GreaterThan, Some(json!(1))));
        assert!(!check(&payload, "cpu", Operator::LessThan, Some(json!("lots"))));
    }

    #[test_case(json!(true), Some(true) ; "bool true")]
    #[test_case(json!("TRUE"), Some(true) ; "string true")]
    #[test_case(json!(1), Some(true) ; "one")]
    #[test_case(json!(false), Some(false) ; "bool false")]
    #[test_case(json!("false"), Some(false) ; "string false")]
    #[test_case(json!(0), Some(false) ; "zero")]
    #[test_case(json!(2), None ; "two")]
    #[test_case(json!("yes"), None ; "yes")]
    fn truthiness_table(value: Value, expected: Option<bool>) {
        let payload = json!({"v": value});
        assert_eq!(check(&payload, "v", Operator::IsTrue, None), expected == Some(true));
        assert_eq!(check(&payload, "v", Operator::IsFalse, None), expected == Some(false));
    }

    #[test]
    fn regex_is_case_insensitive_and_never_panics() {
        let payload = json!({"msg": "Connection REFUSED by upstream", "n": 3});
        assert!(check(&payload, "msg", Operator::RegexMatch, Some(json!("refused\\s+by"))));
        assert!(!check(&payload, "msg", Operator::RegexMatch, Some(json!("(unclosed"))));
        assert!(!check(&payload, "n", Operator::RegexMatch, Some(json!("3"))));
    }

    #[test]
    fn regex_patterns_compile_when_the_condition_is_built() {
        let condition = Condition::new("msg", Operator::RegexMatch, Some(json!("^disk")));
        assert_eq!(condition.pattern.0.as_ref().map(Regex::as_str), Some("^disk"));
        assert!(Condition::new("msg", Operator::RegexMatch, Some(json!("(")))
            .pattern
            .0
            .is_none());
        assert!(Condition::new("msg", Operator::Equals, Some(json!("^disk")))
            .pattern
            .0
            .is_none());

        let group = ConditionGroup::parse(
            &json!({"conditions": [{"field": "msg", "operator": "regex_match", "value": "full$"}]}),
            10,
        )
        .unwrap();
        assert!(group.evaluate(&EvaluationContext::new(&json!({"msg": "Disk FULL"}))));
    }

    #[test]
    fn large_integer_ids_are_matched_exactly_in_arrays() {
        let payload = json!({"ids": [9007199254740993u64, 42]});
        assert!(!check(&payload, "ids", Operator::Contains, Some(json!(9007199254740992u64))));
        assert!(check(&payload, "ids", Operator::Contains, Some(json!(9007199254740993u64))));
    }

    #[test]
    fn entity_operators_default_to_offline() {
        let payload = json!({});
        let ctx = EvaluationContext::new(&payload).with_entity(EntityState {
            name: "web-1".into(),
            is_online: true,
            last_seen: Utc::now(),
            metadata: Value::Null,
        });
        let online = |name: &str| Condition::new(name, Operator::EntityIsOnline, None).evaluate(&ctx);
        let offline =
            |name: &str| Condition::new(name, Operator::EntityIsOffline, None).evaluate(&ctx);

        assert!(online("web-1"));
        assert!(!offline("web-1"));
        assert!(!online("web-2"));
        assert!(offline("web-2"));
    }

    #[test]
    fn empty_groups() {
        let payload = json!({});
        let ctx = EvaluationContext::new(&payload);
        assert!(ConditionGroup::all(vec![]).evaluate(&ctx));
        assert!(!ConditionGroup::any(vec![]).evaluate(&ctx));
    }

    #[test]
    fn nested_groups_evaluate_recursively() {
        let payload = json!({"severity": "critical", "env": "prod", "cpu": 40});
        let group = ConditionGroup::all(vec![
            leaf("env", Operator::Equals, Some(json!("prod"))),
            ConditionNode::Group(ConditionGroup::any(vec![
                leaf("cpu", Operator::GreaterThan, Some(json!(90))),
                leaf("severity", Operator::Equals, Some(json!("CRITICAL"))),
            ])),
        ]);
        assert!(group.evaluate(&EvaluationContext::new(&payload)));
    }

    #[test]
    fn parses_stored_tree() {
        let raw = json!({
            "logic": "or",
            "conditions": [
                {"field": "status", "operator": "EQUALS", "value": "down"},
                {"logic": "AND", "conditions": [
                    {"field": "db-1", "operator": "entity_is_offline"}
                ]}
            ]
        });
        let group = ConditionGroup::parse(&raw, 10).expect("parse");
        assert_eq!(group.logic, Logic::Or);
        assert_eq!(group.conditions.len(), 2);
        assert_eq!(group.entity_names().into_iter().collect::<Vec<_>>(), vec!["db-1"]);
    }

    #[test]
    fn rejects_unknown_operator_and_bad_shapes() {
        let unknown = json!({"conditions": [{"field": "a", "operator": "sounds_like"}]});
        assert!(matches!(
            ConditionGroup::parse(&unknown, 10),
            Err(RuleError::UnknownOperator(_))
        ));
        assert!(ConditionGroup::parse(&json!("AND"), 10).is_err());
        assert!(ConditionGroup::parse(&json!({"logic": "XOR", "conditions": []}), 10).is_err());
        assert!(ConditionGroup::parse(&json!({"conditions": [42]}), 10).is_err());
    }

    #[test]
    fn enforces_depth_limit() {
        let mut raw = json!({"field": "a", "operator": "is_empty"});
        for _ in 0..4 {
            raw = json!({"logic": "AND", "conditions": [raw]});
        }
        assert!(ConditionGroup::parse(&raw, 4).is_ok());
        assert!(matches!(
            ConditionGroup::parse(&raw, 3),
            Err(RuleError::DepthExceeded { max: 3 })
        ));
    }

    #[test]
    fn parsed_tree_serializes_back_to_the_stored_shape() {
        let raw = json!({
            "logic": "AND",
            "conditions": [{"field": "a", "operator": "equals", "value": 1}]
        });
        let group = ConditionGroup::parse(&raw, 10).unwrap();
        assert_eq!(serde_json::to_value(&group).unwrap(), raw);
    }

    proptest! {
        #[test]
        fn and_or_agree_with_their_children(flags in prop::collection::vec(any::<bool>(), 0..12)) {
            let payload = json!({});
            let ctx = EvaluationContext::new(&payload);
            let children: Vec<ConditionNode> = flags
                .iter()
                .map(|flag| {
                    let operator = if *flag { Operator::IsEmpty } else { Operator::IsNotEmpty };
                    leaf("missing", operator, None)
                })
                .collect();

            let all = ConditionGroup::all(children.clone()).evaluate(&ctx);
            let any = ConditionGroup::any(children).evaluate(&ctx);
            prop_assert_eq!(all, flags.iter().all(|flag| *flag));
            prop_assert_eq!(any, flags.iter().any(|flag| *flag));
        }
    }
}
