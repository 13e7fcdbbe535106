//! Payload transforms
//!
//! The bridge treats the expression language as a capability: anything
//! implementing [`TransformEvaluator`] can be plugged in. [`JsonPathEvaluator`]
//! is the built-in one and delegates to `serde_json_path` (RFC 9535 JSONPath).
//! Expressions without a leading `$` are rooted first:
//!
//! ```text
//! $                       whole document
//! temperature             $.temperature
//! sensor.values[0]        $.sensor.values[0]
//! [2].name                $[2].name
//! meta['unit name']       $.meta['unit name']
//! ```

use serde_json::Value;
use serde_json_path::JsonPath;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),
}

/// Evaluates a transform expression against a parsed payload
pub trait TransformEvaluator: Send + Sync {
    fn evaluate(&self, document: &Value, expression: &str) -> Result<Value, TransformError>;
}

/// Parses a raw payload as JSON
pub fn parse_payload(raw: &str) -> Result<Value, TransformError> {
    serde_json::from_str(raw).map_err(|e| TransformError::InvalidJson(e.to_string()))
}

/// JSONPath evaluator.
///
/// No match yields `null`, a single match yields that value and several
/// matches yield an array in document order.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPathEvaluator;

impl TransformEvaluator for JsonPathEvaluator {
    fn evaluate(&self, document: &Value, expression: &str) -> Result<Value, TransformError> {
        let path = JsonPath::parse(&rooted(expression)?)
            .map_err(|e| TransformError::InvalidExpression(e.to_string()))?;

        let mut nodes = path.query(document).all();
        Ok(match nodes.len() {
            0 => Value::Null,
            1 => nodes.remove(0).clone(),
            _ => Value::Array(nodes.into_iter().cloned().collect()),
        })
    }
}

fn rooted(expression: &str) -> Result<String, TransformError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(TransformError::InvalidExpression("empty expression".to_string()));
    }
    Ok(if expression.starts_with('$') {
        expression.to_string()
    } else if expression.starts_with('[') {
        format!("${}", expression)
    } else {
        format!("$.{}", expression)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(document: Value, expression: &str) -> Result<Value, TransformError> {
        JsonPathEvaluator.evaluate(&document, expression)
    }

    #[test]
    fn test_field_and_nested_paths() {
        let doc = json!({"a": 1, "sensor": {"values": [10, 20], "unit": "C"}});
        assert_eq!(eval(doc.clone(), "a").unwrap(), json!(1));
        assert_eq!(eval(doc.clone(), "sensor.unit").unwrap(), json!("C"));
        assert_eq!(eval(doc.clone(), "sensor.values[1]").unwrap(), json!(20));
        assert_eq!(eval(doc, "$.sensor.values[0]").unwrap(), json!(10));
    }

    #[test]
    fn test_root_and_top_level_index() {
        let doc = json!([{"name": "x"}, {"name": "y"}]);
        assert_eq!(eval(doc.clone(), "$").unwrap(), doc);
        assert_eq!(eval(doc.clone(), "[1].name").unwrap(), json!("y"));
        assert_eq!(eval(doc, "$[0].name").unwrap(), json!("x"));
    }

    #[test]
    fn test_bracketed_field_name() {
        let doc = json!({"meta": {"unit name": "kelvin"}});
        assert_eq!(eval(doc, "meta['unit name']").unwrap(), json!("kelvin"));
    }

    #[test]
    fn test_missing_path_is_null() {
        let doc = json!({"a": {"b": 1}});
        assert_eq!(eval(doc.clone(), "a.c").unwrap(), Value::Null);
        assert_eq!(eval(doc.clone(), "a.b.c").unwrap(), Value::Null);
        assert_eq!(eval(doc, "a[3]").unwrap(), Value::Null);
    }

    #[test]
    fn test_several_matches_become_array() {
        let doc = json!({"sensors": [{"t": 1}, {"t": 2}, {"h": 3}]});
        assert_eq!(eval(doc, "sensors[*].t").unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_invalid_expressions() {
        let doc = json!({"a": 1});
        for expression in ["", "   ", "a..[", "a[", "a[?", "a['unclosed"] {
            assert!(
                matches!(eval(doc.clone(), expression), Err(TransformError::InvalidExpression(_))),
                "expected {:?} to be rejected",
                expression
            );
        }
    }

    #[test]
    fn test_parse_payload_rejects_non_json() {
        assert!(matches!(parse_payload("on"), Err(TransformError::InvalidJson(_))));
        assert_eq!(parse_payload("{\"a\":1}").unwrap(), json!({"a": 1}));
    }
}
