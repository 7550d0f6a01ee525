//! Declarative validation rules.
//!
//! Each store may carry a [`RuleSet`]: a table mapping field name to the
//! rules that field must satisfy. Rules are evaluated generically against
//! a record's fields; nothing here knows what a "user" or "message" is.

use crate::record::json_type_name;
use crate::{error::Result, Error, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field types a rule can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

impl FieldType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
            FieldType::Json => true,
        }
    }
}

/// A single predicate on a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "arg", rename_all = "camelCase")]
pub enum Rule {
    /// Field must be present and non-null.
    Required,
    /// If present, field must have this type.
    Type(FieldType),
    /// If present, field must look like an email address.
    Email,
    /// If present, string length (in chars) must be at least this.
    MinLength(usize),
    /// If present, string length (in chars) must be at most this.
    MaxLength(usize),
    /// If present, field must equal one of these values.
    OneOf(Vec<Value>),
}

impl Rule {
    /// Check `value` (the field's value, `None` when absent).
    pub fn check(&self, field: &str, value: Option<&Value>) -> Result<()> {
        let value = match value {
            None | Some(Value::Null) => {
                return match self {
                    Rule::Required => Err(Error::validation(field, "is required")),
                    _ => Ok(()),
                };
            }
            Some(v) => v,
        };

        match self {
            Rule::Required => Ok(()),
            Rule::Type(expected) if expected.accepts(value) => Ok(()),
            Rule::Type(expected) => Err(Error::validation(
                field,
                format!("expected {}, got {}", expected, json_type_name(value)),
            )),
            Rule::Email => match value.as_str() {
                Some(s) if is_email(s) => Ok(()),
                _ => Err(Error::validation(field, "must be a valid email address")),
            },
            Rule::MinLength(min) => match value.as_str() {
                Some(s) if s.chars().count() >= *min => Ok(()),
                _ => Err(Error::validation(
                    field,
                    format!("must be at least {} characters", min),
                )),
            },
            Rule::MaxLength(max) => match value.as_str() {
                Some(s) if s.chars().count() <= *max => Ok(()),
                _ => Err(Error::validation(
                    field,
                    format!("must be at most {} characters", max),
                )),
            },
            Rule::OneOf(allowed) if allowed.contains(value) => Ok(()),
            Rule::OneOf(_) => Err(Error::validation(field, "is not an allowed value")),
        }
    }
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !s.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}

/// Field name → rules, evaluated in field-name order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: BTreeMap<String, Vec<Rule>>,
}

impl RuleSet {
    /// Create an empty rule set (accepts everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule for a field.
    pub fn rule(mut self, field: impl Into<String>, rule: Rule) -> Self {
        self.rules.entry(field.into()).or_default().push(rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Validate a record; the first failing rule is reported.
    pub fn validate(&self, record: &Record) -> Result<()> {
        for (field, rules) in &self.rules {
            let value = record.get(field);
            for rule in rules {
                rule.check(field, value)?;
            }
        }
        Ok(())
    }
}
