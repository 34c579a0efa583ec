/// Condition node predicates
///
/// A condition reads one value out of the execution context, compares it
/// against the configured operand and picks the label of the outgoing branch
/// to follow.

use crate::error::NodeExecutionError;
use crate::workflow::types::{lookup_path, Node};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    Exists,
    Truthy,
}

impl Operator {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "equals" | "eq" => Some(Self::Equals),
            "not_equals" | "ne" => Some(Self::NotEquals),
            "greater_than" | "gt" => Some(Self::GreaterThan),
            "less_than" | "lt" => Some(Self::LessThan),
            "contains" => Some(Self::Contains),
            "exists" => Some(Self::Exists),
            "truthy" => Some(Self::Truthy),
            _ => None,
        }
    }
}

/// Parsed condition node configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: String,
    pub operator: Operator,
    pub value: Value,
    pub true_branch: String,
    pub false_branch: String,
}

impl Condition {
    pub fn from_node(node: &Node) -> Result<Self, NodeExecutionError> {
        let path = node.config_str("path").ok_or_else(|| NodeExecutionError::MissingConfig {
            node_id: node.id.clone(),
            key: "path".to_string(),
        })?;

        let operator_name = node.config_str("operator").unwrap_or("truthy");
        let operator = Operator::parse(operator_name).ok_or_else(|| NodeExecutionError::InvalidConfig {
            node_id: node.id.clone(),
            reason: format!("unknown operator '{}'", operator_name),
        })?;

        Ok(Self {
            path: path.to_string(),
            operator,
            value: node.config.get("value").cloned().unwrap_or(Value::Null),
            true_branch: node.config_str("true_branch").unwrap_or("true").to_string(),
            false_branch: node.config_str("false_branch").unwrap_or("false").to_string(),
        })
    }

    /// Resolve the path: JSONPath when it starts with `$`, dot path otherwise
    fn resolve(&self, context: &Value) -> Result<Option<Value>, String> {
        if self.path.starts_with('$') {
            let matches = jsonpath_lib::select(context, &self.path).map_err(|e| format!("invalid JSONPath '{}': {:?}", self.path, e))?;
            Ok(matches.first().map(|v| (*v).clone()))
        } else {
            Ok(lookup_path(context, &self.path).cloned())
        }
    }

    pub fn evaluate(&self, context: &Value) -> Result<bool, String> {
        let actual = self.resolve(context)?;
        let actual = match actual {
            Some(value) => value,
            None => return Ok(false),
        };

        let result = match self.operator {
            Operator::Exists => !actual.is_null(),
            Operator::Truthy => is_truthy(&actual),
            Operator::Equals => loosely_equal(&actual, &self.value),
            Operator::NotEquals => !loosely_equal(&actual, &self.value),
            Operator::GreaterThan => compare(&actual, &self.value) == Some(std::cmp::Ordering::Greater),
            Operator::LessThan => compare(&actual, &self.value) == Some(std::cmp::Ordering::Less),
            Operator::Contains => contains(&actual, &self.value),
        };
        Ok(result)
    }

    pub fn branch_for(&self, result: bool) -> &str {
        if result {
            &self.true_branch
        } else {
            &self.false_branch
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Numbers compare by value, so `1` equals `1.0`
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}
