//! Row predicates
//!
//! Conditions are plain data. Stores translate them into their own filter language;
//! in-process stores evaluate them with [`Condition::matches`].

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::QueryOperator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Compare {
        column: String,
        operator: QueryOperator,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    IsNull(String),
    IsNotNull(String),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn compare(column: &str, operator: QueryOperator, value: impl Into<Value>) -> Self {
        Condition::Compare {
            column: column.to_string(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, QueryOperator::Equal, value)
    }

    pub fn ne(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, QueryOperator::NotEqual, value)
    }

    pub fn gt(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, QueryOperator::GreaterThan, value)
    }

    pub fn gte(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, QueryOperator::GreaterThanOrEqual, value)
    }

    pub fn lt(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, QueryOperator::LessThan, value)
    }

    pub fn lte(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, QueryOperator::LessThanOrEqual, value)
    }

    /// SQL LIKE with `%` and `_` wildcards
    pub fn like(column: &str, pattern: &str) -> Self {
        Self::compare(column, QueryOperator::Like, pattern)
    }

    pub fn is_in<I, V>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Condition::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(column: &str) -> Self {
        Condition::IsNull(column.to_string())
    }

    pub fn is_not_null(column: &str) -> Self {
        Condition::IsNotNull(column.to_string())
    }

    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::And(mut all) => {
                all.push(other);
                Condition::And(all)
            }
            first => Condition::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Condition) -> Self {
        match self {
            Condition::Or(mut any) => {
                any.push(other);
                Condition::Or(any)
            }
            first => Condition::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// Evaluate against a row. Comparisons involving NULL or a missing column are false.
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        match self {
            Condition::Compare { column, operator, value } => {
                let Some(actual) = row.get(column).filter(|v| !v.is_null()) else {
                    return false;
                };
                match operator {
                    QueryOperator::Like => match (actual, value) {
                        (Value::String(text), Value::String(pattern)) => like_match(text, pattern),
                        _ => false,
                    },
                    QueryOperator::Equal => compare_json(actual, value) == Some(Ordering::Equal),
                    QueryOperator::NotEqual => {
                        matches!(compare_json(actual, value), Some(o) if o != Ordering::Equal)
                    }
                    QueryOperator::GreaterThan => compare_json(actual, value) == Some(Ordering::Greater),
                    QueryOperator::GreaterThanOrEqual => {
                        matches!(compare_json(actual, value), Some(Ordering::Greater | Ordering::Equal))
                    }
                    QueryOperator::LessThan => compare_json(actual, value) == Some(Ordering::Less),
                    QueryOperator::LessThanOrEqual => {
                        matches!(compare_json(actual, value), Some(Ordering::Less | Ordering::Equal))
                    }
                }
            }
            Condition::In { column, values } => match row.get(column).filter(|v| !v.is_null()) {
                Some(actual) => values
                    .iter()
                    .any(|candidate| compare_json(actual, candidate) == Some(Ordering::Equal)),
                None => false,
            },
            Condition::IsNull(column) => row.get(column).map_or(true, Value::is_null),
            Condition::IsNotNull(column) => row.get(column).is_some_and(|v| !v.is_null()),
            Condition::And(all) => all.iter().all(|c| c.matches(row)),
            Condition::Or(any) => any.iter().any(|c| c.matches(row)),
            Condition::Not(inner) => !inner.matches(row),
        }
    }
}

/// Order two scalar JSON values. Values of different kinds, and non-scalars, are incomparable.
pub fn compare_json(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// SQL `LIKE` with `%` and `_`, matched greedily with a single backtrack point
fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut t, mut p) = (0, 0);
    // pattern index after the last `%` and the text index it is retried from
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                p += 1;
                backtrack = Some((p, t));
            }
            Some(c) if *c == '_' || *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star_p, star_t)) => {
                    p = star_p;
                    t = star_t + 1;
                    backtrack = Some((star_p, t));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Compare { column, operator, value } => {
                write!(f, "{} {} {}", column, operator, value)
            }
            Condition::In { column, values } => {
                let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
                write!(f, "{} IN ({})", column, rendered.join(", "))
            }
            Condition::IsNull(column) => write!(f, "{} IS NULL", column),
            Condition::IsNotNull(column) => write!(f, "{} IS NOT NULL", column),
            Condition::And(all) => join(f, all, " AND "),
            Condition::Or(any) => join(f, any, " OR "),
            Condition::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, parts: &[Condition], separator: &str) -> fmt::Result {
    let rendered: Vec<String> = parts.iter().map(|c| format!("({})", c)).collect();
    write!(f, "{}", rendered.join(separator))
}
