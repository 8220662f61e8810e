//! Condition grammar.
//!
//! A condition is a single comparison of one context field against a JSON
//! literal:
//!
//! ```text
//! field == literal
//! field != literal
//! field in [literal, ...]
//! field not in [literal, ...]
//! ```
//!
//! `field` is a dotted path into the execution context (`employee.department`).
//! Literals are JSON; single-quoted strings are accepted as well.  A missing
//! field reads as `null`.  Two numbers compare by value, so `1 == 1.0`.
//! There is deliberately nothing else: no arithmetic, no boolean
//! connectives, no function calls.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use nodes::template::lookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    In,
    NotIn,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::In => "in",
            Self::NotIn => "not in",
        })
    }
}

/// A parsed comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionExpr {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

fn grammar() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*(==|!=|\bnot\s+in\b|\bin\b)\s*(.+?)\s*$")
            .expect("condition grammar regex")
    })
}

fn parse_literal(raw: &str) -> Result<Value, String> {
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Ok(Value::String(raw[1..raw.len() - 1].to_string()));
    }
    serde_json::from_str(raw).map_err(|e| format!("invalid literal `{raw}`: {e}"))
}

impl FromStr for ConditionExpr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = grammar()
            .captures(s)
            .ok_or_else(|| format!("expected `field <op> literal`, got `{s}`"))?;

        let op = match &caps[2] {
            "==" => Operator::Eq,
            "!=" => Operator::Ne,
            "in" => Operator::In,
            _ => Operator::NotIn,
        };
        let value = parse_literal(&caps[3])?;

        if matches!(op, Operator::In | Operator::NotIn) && !value.is_array() {
            return Err(format!("`{op}` needs an array literal, got `{}`", &caps[3]));
        }

        Ok(Self { field: caps[1].to_string(), op, value })
    }
}

impl fmt::Display for ConditionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op, self.value)
    }
}

fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

impl ConditionExpr {
    /// Evaluate against the context.  Pure: the same context always yields
    /// the same answer.
    pub fn evaluate(&self, context: &Map<String, Value>) -> bool {
        let actual = lookup(context, &self.field).unwrap_or(&Value::Null);
        let member = || {
            self.value
                .as_array()
                .map(|items| items.iter().any(|item| same(actual, item)))
                .unwrap_or(false)
        };

        match self.op {
            Operator::Eq => same(actual, &self.value),
            Operator::Ne => !same(actual, &self.value),
            Operator::In => member(),
            Operator::NotIn => !member(),
        }
    }
}
