//! # Control Bridge
//!
//! Staged publish/subscribe core. One live broker connection, one subscription,
//! a receive path that records the latest message, and a staged value that is
//! only published on explicit request.
//!
//! ```text
//! bridge/
//! ├── connection.rs  - ConnectionManager, ConnectionState, stale event rejection
//! ├── processor.rs   - MessageProcessor (decode, transform, fallback)
//! ├── echo.rs        - echo detection against the last publish
//! ├── staging.rs     - PublishStaging per-mode state machine
//! └── control.rs     - ControlBridge composition root, BridgeSnapshot
//! ```
//!
//! Everything here is synchronous and single-owner. The async driver in
//! [`crate::runtime`] feeds transport events and user commands in one at a time.

pub mod connection;
pub mod control;
pub mod echo;
pub mod processor;
pub mod staging;

pub use connection::{ConnectionManager, ConnectionState, Delivery};
pub use control::{BridgeSnapshot, ControlBridge};
pub use processor::{MessageProcessor, ProcessOutcome};
pub use staging::{ControlMode, PublishStaging, SliderRange, StagedValue};
