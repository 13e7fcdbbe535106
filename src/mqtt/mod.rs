//! # Broker Connectivity
//!
//! Everything the bridge knows about the broker side lives here: the
//! normalized connection configuration, the transport capability the bridge
//! talks to, the concrete transports, and the records kept about traffic.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - ConnectionConfig, connection identity, publish options
//! ├── transport.rs        - Transport / TransportHandle traits, tagged events
//! ├── mqtt_handler.rs     - rumqttc websocket transport (statum session lifecycle)
//! ├── loopback.rs         - in-memory loopback broker
//! └── message_manager.rs  - PublishRecord / LastReceived
//! ```

pub mod config;
pub mod loopback;
pub mod message_manager;
pub mod mqtt_handler;
pub mod transport;

pub use config::{ConnectionConfig, ConnectionIdentity, Credentials, PublishOptions, Scheme};
pub use loopback::{LoopbackBroker, LoopbackTransport, PublishedFrame};
pub use message_manager::{LastReceived, PublishRecord};
pub use mqtt_handler::MqttTransport;
pub use transport::{
    event_channel, EventReceiver, EventSender, HandleId, TaggedEvent, Transport, TransportEvent,
    TransportHandle,
};
