//! Echo detection
//!
//! A message counts as the echo of the last publish when it arrives on the
//! publish topic and its raw payload is byte-for-byte the payload that was
//! sent. Transformed values never take part in the comparison.

use crate::mqtt::message_manager::PublishRecord;

/// Whether `topic` can carry an echo at all
pub fn is_relevant(topic: &str, publish_topic: &str) -> bool {
    !publish_topic.is_empty() && topic == publish_topic
}

/// Echo status for a message received on `topic` with raw payload `raw`.
///
/// Only meaningful when [`is_relevant`] holds; callers keep the previous
/// status for every other message.
pub fn evaluate(topic: &str, raw: &str, publish_topic: &str, last_sent: Option<&PublishRecord>) -> bool {
    is_relevant(topic, publish_topic)
        && last_sent.is_some_and(|record| record.topic == topic && record.raw_payload == raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::transport::HandleId;

    fn sent(topic: &str, payload: &str) -> PublishRecord {
        PublishRecord::new(HandleId(1), topic.to_string(), payload.to_string())
    }

    #[test]
    fn test_matching_payload_is_echo() {
        let record = sent("t/out", "1");
        assert!(evaluate("t/out", "1", "t/out", Some(&record)));
    }

    #[test]
    fn test_payload_mismatch_is_not_echo() {
        let record = sent("t/out", "1");
        assert!(!evaluate("t/out", "0", "t/out", Some(&record)));
        assert!(!evaluate("t/out", "1 ", "t/out", Some(&record)));
    }

    #[test]
    fn test_nothing_sent_is_not_echo() {
        assert!(!evaluate("t/out", "1", "t/out", None));
    }

    #[test]
    fn test_other_topic_is_not_relevant() {
        let record = sent("t/out", "1");
        assert!(!is_relevant("t/in", "t/out"));
        assert!(!evaluate("t/in", "1", "t/out", Some(&record)));
    }

    #[test]
    fn test_record_for_old_topic_does_not_match() {
        let record = sent("t/old", "1");
        assert!(!evaluate("t/out", "1", "t/out", Some(&record)));
    }

    #[test]
    fn test_empty_publish_topic_never_relevant() {
        assert!(!is_relevant("", ""));
    }
}
