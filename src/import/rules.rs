//! Field rules for imported and submitted rows
//!
//! Rules are keyed by dotted path and checked against either a flat row
//! (`{"data.x": 1}`) or a nested one (`{"data": {"x": 1}}`). Messages follow
//! the `The {field} field ...` wording callers already display.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Result, TableStoreError};
use crate::import::dotted::get_path;
use crate::query::descriptor::is_numeric;
use crate::types::{parse_timestamp, value_to_text};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

/// One validation rule
#[derive(Debug, Clone)]
pub enum FieldRule {
    /// Present, not null and not blank
    Required,
    /// Null is accepted; other rules are skipped for null values anyway
    Nullable,
    String,
    Numeric,
    Integer,
    Boolean,
    Email,
    /// A timestamp in one of the accepted formats
    Date,
    /// Minimum string length or numeric value
    Min(f64),
    /// Maximum string length or numeric value
    Max(f64),
    In(Vec<String>),
    Regex(Regex),
}

impl FieldRule {
    /// Build a regex rule, rejecting invalid patterns
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|e| TableStoreError::validation(format!("Invalid rule pattern: {}", e)))
    }

    /// Message for `field` when `value` breaks this rule, `None` when it holds
    fn check(&self, field: &str, value: Option<&Value>) -> Option<String> {
        let value = match value {
            None | Some(Value::Null) => {
                return matches!(self, Self::Required)
                    .then(|| format!("The {} field is required.", field));
            }
            Some(value) => value,
        };

        let holds = match self {
            Self::Required => value.as_str().is_none_or(|s| !s.trim().is_empty()),
            Self::Nullable => true,
            Self::String => value.is_string(),
            Self::Numeric => match value {
                Value::Number(_) => true,
                Value::String(s) => is_numeric(s),
                _ => false,
            },
            Self::Integer => match value {
                Value::Number(n) => n.is_i64() || n.is_u64(),
                Value::String(s) => s.trim().parse::<i64>().is_ok(),
                _ => false,
            },
            Self::Boolean => match value {
                Value::Bool(_) => true,
                Value::Number(n) => n.as_i64().is_some_and(|n| n == 0 || n == 1),
                Value::String(s) => matches!(s.as_str(), "0" | "1" | "true" | "false"),
                _ => false,
            },
            Self::Email => value.as_str().is_some_and(|s| EMAIL_RE.is_match(s)),
            Self::Date => value.as_str().is_some_and(|s| parse_timestamp(s).is_some()),
            Self::Min(min) => size(value).is_some_and(|size| size >= *min),
            Self::Max(max) => size(value).is_some_and(|size| size <= *max),
            Self::In(allowed) => {
                value_to_text(value).is_some_and(|text| allowed.iter().any(|a| *a == text))
            }
            Self::Regex(re) => value_to_text(value).is_some_and(|text| re.is_match(&text)),
        };

        if holds {
            return None;
        }

        let message = match self {
            Self::Required => format!("The {} field is required.", field),
            Self::Nullable => return None,
            Self::String => format!("The {} must be a string.", field),
            Self::Numeric => format!("The {} must be a number.", field),
            Self::Integer => format!("The {} must be an integer.", field),
            Self::Boolean => format!("The {} field must be true or false.", field),
            Self::Email => format!("The {} must be a valid email address.", field),
            Self::Date => format!("The {} is not a valid date.", field),
            Self::Min(min) => format!("The {} must be at least {}.", field, min),
            Self::Max(max) => format!("The {} may not be greater than {}.", field, max),
            Self::In(_) => format!("The selected {} is invalid.", field),
            Self::Regex(_) => format!("The {} format is invalid.", field),
        };
        Some(message)
    }
}

/// Size used by min/max: numeric value, string length or array length
fn size(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(items) => Some(items.len() as f64),
        _ => None,
    }
}

/// Parses the pipe syntax, e.g. `required|max:50|in:a,b`
impl FromStr for FieldRule {
    type Err = TableStoreError;

    fn from_str(token: &str) -> Result<Self> {
        let (name, arg) = match token.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg)),
            None => (token.trim(), None),
        };
        let number = |arg: Option<&str>| {
            arg.and_then(|a| a.trim().parse::<f64>().ok()).ok_or_else(|| {
                TableStoreError::validation(format!("Rule '{}' needs a numeric argument", name))
            })
        };

        let rule = match name {
            "required" => Self::Required,
            "nullable" => Self::Nullable,
            "string" => Self::String,
            "numeric" => Self::Numeric,
            "integer" => Self::Integer,
            "boolean" => Self::Boolean,
            "email" => Self::Email,
            "date" => Self::Date,
            "min" => Self::Min(number(arg)?),
            "max" => Self::Max(number(arg)?),
            "in" => Self::In(
                arg.unwrap_or_default()
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .collect(),
            ),
            "regex" => Self::regex(arg.unwrap_or_default())?,
            other => {
                return Err(TableStoreError::validation(format!(
                    "Unknown rule '{}'",
                    other
                )));
            }
        };
        Ok(rule)
    }
}

/// Rules per dotted field path, checked in declaration order
#[derive(Debug, Clone, Default)]
pub struct FieldRules {
    fields: Vec<(String, Vec<FieldRule>)>,
}

impl FieldRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rules for a field
    pub fn field(mut self, path: impl Into<String>, rules: impl IntoIterator<Item = FieldRule>) -> Self {
        self.fields.push((path.into(), rules.into_iter().collect()));
        self
    }

    /// Add rules for a field from the pipe syntax
    pub fn parse_field(self, path: impl Into<String>, rules: &str) -> Result<Self> {
        let rules = rules
            .split('|')
            .filter(|r| !r.trim().is_empty())
            .map(FieldRule::from_str)
            .collect::<Result<Vec<_>>>()?;
        Ok(self.field(path, rules))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Messages per failing field; empty when the row passes
    pub fn validate(&self, row: &Map<String, Value>) -> BTreeMap<String, Vec<String>> {
        let mut errors = BTreeMap::new();
        for (path, rules) in &self.fields {
            let value = get_path(row, path);
            let messages: Vec<String> = rules
                .iter()
                .filter_map(|rule| rule.check(path, value))
                .collect();
            if !messages.is_empty() {
                errors.insert(path.clone(), messages);
            }
        }
        errors
    }

    /// Validate and turn failures into [`TableStoreError::FieldErrors`]
    pub fn check(&self, row: &Map<String, Value>) -> Result<()> {
        let errors = self.validate(row);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TableStoreError::FieldErrors(errors))
        }
    }
}
