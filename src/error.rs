//! Error definitions for the control bridge
//!
//! Every failure the bridge can observe is typed here. Transform failures
//! live in [`crate::transform::TransformError`] because they never leave the
//! message path; everything else surfaces through [`BridgeError`].

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::bridge::staging::ControlMode;

/// Reason a publish request was refused before anything reached the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishRejection {
    /// No live connection (state is not `Connected`)
    NotConnected,
    /// Publish topic is empty after trimming
    NoPublishTopic,
    /// Bridge is configured as receive-only
    ReceiveOnly,
}

impl fmt::Display for PublishRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishRejection::NotConnected => write!(f, "not connected"),
            PublishRejection::NoPublishTopic => write!(f, "no publish topic configured"),
            PublishRejection::ReceiveOnly => write!(f, "bridge is receive-only"),
        }
    }
}

/// Errors produced by the bridge, its transports and its runtime
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Connection setup failed synchronously (bad config or transport init)
    #[error("Connection init error: {0}")]
    ConnectionInit(String),

    /// Asynchronous or send-time failure reported by the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Publish preconditions were not met; nothing was sent
    #[error("Publish rejected: {0}")]
    PublishRejected(PublishRejection),

    /// Staged value does not fit the active control mode
    #[error("Staged value rejected in {mode} mode: {reason}")]
    StagedRejected { mode: ControlMode, reason: String },

    /// Settings could not be turned into a usable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Runtime command or response channel closed
    #[error("Channel error: {0}")]
    Channel(String),
}

impl BridgeError {
    /// Short machine-readable kind, used as diagnostics payload
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::ConnectionInit(_) => "connection_init",
            BridgeError::Transport(_) => "transport",
            BridgeError::PublishRejected(_) => "publish_rejected",
            BridgeError::StagedRejected { .. } => "staged_rejected",
            BridgeError::Config(_) => "config",
            BridgeError::Channel(_) => "channel",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_init_display() {
        let error = BridgeError::ConnectionInit("host is empty".to_string());
        assert_eq!(error.to_string(), "Connection init error: host is empty");
        assert_eq!(error.kind(), "connection_init");
    }

    #[test]
    fn test_publish_rejected_display() {
        let error = BridgeError::PublishRejected(PublishRejection::ReceiveOnly);
        assert_eq!(error.to_string(), "Publish rejected: bridge is receive-only");
    }

    #[test]
    fn test_staged_rejected_display() {
        let error = BridgeError::StagedRejected {
            mode: ControlMode::Switch,
            reason: "expected a boolean".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Staged value rejected in Switch mode: expected a boolean"
        );
    }

    #[test]
    fn test_rejection_serializes_snake_case() {
        let json = serde_json::to_string(&PublishRejection::NoPublishTopic).unwrap();
        assert_eq!(json, "\"no_publish_topic\"");
    }
}
