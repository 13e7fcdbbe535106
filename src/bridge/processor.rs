//! Receive path
//!
//! Turns raw transport payloads into [`LastReceived`] records and keeps the
//! echo status up to date. A payload that is not JSON, or a transform that
//! fails, falls back to the raw text so the latest message is always shown.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

use super::echo;
use crate::mqtt::message_manager::{LastReceived, PublishRecord};
use crate::transform::{parse_payload, TransformError, TransformEvaluator};

/// What happened while processing one message
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    /// Set when a transform was configured but could not be applied
    pub transform_error: Option<TransformError>,
    /// Whether the echo status was re-evaluated for this message
    pub echo_evaluated: bool,
}

pub struct MessageProcessor {
    evaluator: Arc<dyn TransformEvaluator>,
    expression: Option<String>,
    last_received: Option<LastReceived>,
    echoed: bool,
}

impl MessageProcessor {
    pub fn new(evaluator: Arc<dyn TransformEvaluator>, expression: Option<String>) -> Self {
        Self {
            evaluator,
            expression,
            last_received: None,
            echoed: false,
        }
    }

    pub fn set_expression(&mut self, expression: Option<String>) {
        self.expression = expression;
    }

    pub fn last_received(&self) -> Option<&LastReceived> {
        self.last_received.as_ref()
    }

    pub fn echoed(&self) -> bool {
        self.echoed
    }

    /// Clears the echo status; called whenever a new publish goes out
    pub fn reset_echo(&mut self) {
        self.echoed = false;
    }

    /// Processes one message received on the current connection
    pub fn process(
        &mut self,
        topic: &str,
        payload: &[u8],
        publish_topic: &str,
        last_sent: Option<&PublishRecord>,
    ) -> ProcessOutcome {
        let raw = String::from_utf8_lossy(payload).into_owned();
        let (transformed, transform_error) = self.transform(&raw);

        let echo_evaluated = echo::is_relevant(topic, publish_topic);
        if echo_evaluated {
            self.echoed = echo::evaluate(topic, &raw, publish_topic, last_sent);
            trace!("Echo status for {}: {}", topic, self.echoed);
        }

        self.last_received = Some(LastReceived::new(topic.to_string(), raw, transformed));

        ProcessOutcome {
            transform_error,
            echo_evaluated,
        }
    }

    fn transform(&self, raw: &str) -> (Value, Option<TransformError>) {
        let Some(expression) = self.expression.as_deref() else {
            return (Value::String(raw.to_string()), None);
        };

        let result = parse_payload(raw).and_then(|document| self.evaluator.evaluate(&document, expression));
        match result {
            Ok(Value::Null) => (Value::String(String::new()), None),
            Ok(value) => (value, None),
            Err(e) => {
                debug!("Transform '{}' failed, showing raw payload: {}", expression, e);
                (Value::String(raw.to_string()), Some(e))
            }
        }
    }
}
