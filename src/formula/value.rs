use crate::error::EvalError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref NUMERIC_REGEX: Regex = Regex::new(r"^[+-]?[0-9]+(\.[0-9]+)?$").unwrap();
}

/// Result of evaluating a cell or an expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
    /// An unset cell. Reads as `0` in arithmetic and as `""` in text.
    Blank,
}

impl Value {
    /// Interprets a raw literal term the way a cell holding it reads.
    pub fn from_term(term: &str) -> Value {
        let trimmed = term.trim();
        if trimmed.is_empty() {
            Value::Blank
        } else if let Some(n) = parse_number(trimmed) {
            Value::Number(n)
        } else {
            Value::Text(term.to_string())
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Value::Blank)
    }

    /// Numeric reading used by operators, IF, MIN and MAX: numbers pass
    /// through, blanks are zero and numeric-looking text is parsed.
    pub fn coerce_number(&self, context: &str) -> Result<f64, EvalError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Blank => Ok(0.0),
            Value::Text(s) => parse_number(s.trim()).ok_or_else(|| EvalError::NotNumeric {
                function: context.to_string(),
                found: s.clone(),
            }),
        }
    }

    pub fn truthy(&self, context: &str) -> Result<bool, EvalError> {
        Ok(self.coerce_number(context)? != 0.0)
    }

    /// `=` semantics: numbers compare numerically, anything else by its
    /// rendered text.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            _ => self.to_string() == other.to_string(),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Number(if b { 1.0 } else { 0.0 })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
            Value::Blank => Ok(()),
        }
    }
}

pub(crate) fn parse_number(text: &str) -> Option<f64> {
    if NUMERIC_REGEX.is_match(text) {
        text.parse::<f64>().ok()
    } else {
        None
    }
}
