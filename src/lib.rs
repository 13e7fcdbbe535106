//! # control-bridge
//!
//! Staged publish/subscribe control bridge. Keeps one live MQTT-over-websocket
//! connection, shows the latest message on the subscribed topic, and publishes
//! a separately staged value only when asked to, reporting when that value has
//! echoed back from the broker.
//!
//! ```text
//! src/
//! ├── bridge/        - connection lifecycle, receive path, echo, staging, ControlBridge
//! ├── mqtt/          - connection config, transport trait, rumqttc and loopback transports
//! ├── transform.rs   - transform evaluator capability and the JSONPath evaluator
//! ├── diagnostics.rs - console / HTTP diagnostics sinks
//! ├── runtime.rs     - async driver and command handle
//! ├── config.rs      - TOML settings file
//! ├── cli.rs         - clap arguments and console commands
//! └── error.rs       - BridgeError
//! ```

pub mod bridge;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod mqtt;
pub mod runtime;
pub mod transform;

pub use bridge::{BridgeSnapshot, ConnectionState, ControlBridge, ControlMode, StagedValue};
pub use error::{BridgeError, PublishRejection};
pub use runtime::{BridgeHandle, BridgeRuntime};
