use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use super::transport::HandleId;

const PREVIEW_LEN: usize = 32;

/// Last successfully published payload; the echo comparison key
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PublishRecord {
    pub topic: String,
    pub raw_payload: String,
    /// Connection the payload went out on
    #[serde(skip)]
    pub handle: HandleId,
    pub timestamp: DateTime<Local>,
}

impl PublishRecord {
    pub fn new(handle: HandleId, topic: String, raw_payload: String) -> Self {
        PublishRecord {
            topic,
            raw_payload,
            handle,
            timestamp: Local::now(),
        }
    }
}

impl fmt::Display for PublishRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} -> {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.topic,
            preview(&self.raw_payload)
        )
    }
}

/// Most recent message seen on the subscription
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LastReceived {
    pub topic: String,
    pub raw_payload: String,
    pub transformed_value: Value,
    pub timestamp: DateTime<Local>,
}

impl LastReceived {
    pub fn new(topic: String, raw_payload: String, transformed_value: Value) -> Self {
        LastReceived {
            topic,
            raw_payload,
            transformed_value,
            timestamp: Local::now(),
        }
    }

    /// Transformed value as display text; strings are shown without quotes
    pub fn display_value(&self) -> String {
        match &self.transformed_value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for LastReceived {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} <- {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.topic,
            preview(&self.display_value())
        )
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_LEN {
        content.to_string()
    } else {
        let head: String = content.chars().take(PREVIEW_LEN).collect();
        format!("{}…", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_value_unquotes_strings() {
        let received = LastReceived::new("t".to_string(), "x".to_string(), json!("on"));
        assert_eq!(received.display_value(), "on");

        let received = LastReceived::new("t".to_string(), "x".to_string(), json!(21.5));
        assert_eq!(received.display_value(), "21.5");
    }

    #[test]
    fn test_display_truncates_long_payloads() {
        let record = PublishRecord::new(HandleId(1), "t/out".to_string(), "a".repeat(100));
        let rendered = record.to_string();
        assert!(rendered.contains("t/out"));
        assert!(rendered.ends_with('…'));
        assert!(rendered.len() < 100);
    }

    #[test]
    fn test_short_payload_is_not_truncated() {
        let record = PublishRecord::new(HandleId(1), "t/out".to_string(), "1".to_string());
        assert!(record.to_string().ends_with(": 1"));
    }
}
