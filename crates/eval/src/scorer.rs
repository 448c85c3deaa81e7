use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Problems with the expected output. These mean the fixtures are corrupt,
/// so the whole evaluation is unreliable.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("expected output is not valid JSON: {0}")]
    MalformedExpected(#[source] serde_json::Error),

    #[error("expected output must be a non-empty JSON object")]
    InvalidExpected,
}

/// Equality rules for field comparison.
///
/// Numbers compare by value, so `1` and `1.0` match; `numeric_tolerance`
/// is an absolute bound (0.0 = exact). Strings, booleans and null compare
/// exactly with no coercion: `"5"` never matches `5`. Arrays and objects
/// compare element-wise under the same rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    #[serde(default)]
    pub numeric_tolerance: f64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            numeric_tolerance: 0.0,
        }
    }
}

impl MatchPolicy {
    pub fn with_tolerance(numeric_tolerance: f64) -> Self {
        Self { numeric_tolerance }
    }

    pub fn values_match(&self, expected: &Value, actual: &Value) -> bool {
        match (expected, actual) {
            (Value::Number(a), Value::Number(b)) => self.numbers_match(a, b),
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.values_match(x, y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| self.values_match(v, w)))
            }
            _ => expected == actual,
        }
    }

    fn numbers_match(&self, a: &Number, b: &Number) -> bool {
        if a == b {
            return true;
        }
        match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() <= self.numeric_tolerance,
            _ => false,
        }
    }
}

/// Parse and validate the expected output of a dataset item.
pub fn parse_expected(expected: &str) -> Result<Map<String, Value>, ScoreError> {
    match serde_json::from_str::<Value>(expected).map_err(ScoreError::MalformedExpected)? {
        Value::Object(map) if !map.is_empty() => Ok(map),
        _ => Err(ScoreError::InvalidExpected),
    }
}

/// Fraction of expected fields reproduced by `candidate`, with the default
/// exact-value policy.
///
/// A candidate that is not a JSON object scores `0.0`; a malformed expected
/// output is an error.
pub fn exact_match_score(candidate: &str, expected: &str) -> Result<f64, ScoreError> {
    score_with_policy(candidate, expected, &MatchPolicy::default())
}

pub fn score_with_policy(
    candidate: &str,
    expected: &str,
    policy: &MatchPolicy,
) -> Result<f64, ScoreError> {
    let expected = parse_expected(expected)?;

    let candidate = match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => map,
        _ => return Ok(0.0),
    };

    let matched = expected
        .iter()
        .filter(|(key, value)| {
            candidate
                .get(key.as_str())
                .is_some_and(|actual| policy.values_match(value, actual))
        })
        .count();

    Ok(matched as f64 / expected.len() as f64)
}

pub fn score_comment(model: &str, image_id: &str) -> String {
    format!("Exact match model={model}, image={image_id}")
}
