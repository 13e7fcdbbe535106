//! Transport capability seen by the bridge
//!
//! A transport opens one broker connection per [`HandleId`] and reports what
//! happens on it as [`TaggedEvent`]s through a bounded queue. The bridge
//! never receives callbacks; it drains the queue and drops every event whose
//! handle is no longer the active one.

use std::fmt;
use tokio::sync::mpsc;

use super::config::{ConnectionConfig, PublishOptions};
use crate::error::BridgeError;

/// Identity of one opened connection; never reused within a process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Event reported by a transport for one connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Reconnecting,
    Closed,
    Error(String),
    Message { topic: String, payload: Vec<u8> },
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::Connected => "connected",
            TransportEvent::Reconnecting => "reconnecting",
            TransportEvent::Closed => "closed",
            TransportEvent::Error(_) => "error",
            TransportEvent::Message { .. } => "message",
        }
    }
}

/// Transport event together with the handle that produced it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaggedEvent {
    pub handle: HandleId,
    pub event: TransportEvent,
}

pub type EventSender = mpsc::Sender<TaggedEvent>;
pub type EventReceiver = mpsc::Receiver<TaggedEvent>;

/// Creates the bounded queue transports report into
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Factory for broker connections
pub trait Transport: Send + 'static {
    /// Opens a connection for `handle`. Failure to initialize is reported
    /// synchronously as [`BridgeError::ConnectionInit`]; everything after
    /// that arrives through `events`.
    fn open(
        &mut self,
        handle: HandleId,
        config: &ConnectionConfig,
        events: EventSender,
    ) -> Result<Box<dyn TransportHandle>, BridgeError>;
}

/// One live connection
pub trait TransportHandle: Send {
    fn id(&self) -> HandleId;

    fn subscribe(&mut self, topic: &str) -> Result<(), BridgeError>;

    /// Queues a publish without waiting for the broker
    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        options: PublishOptions,
    ) -> Result<(), BridgeError>;

    /// Tears the connection down. No event tagged with this handle may be
    /// applied once this returns.
    fn close(self: Box<Self>);
}
