//! Connection lifecycle
//!
//! Owns the transport and at most one live [`TransportHandle`]. Every event
//! drained from the queue goes through [`ConnectionManager::accept`], which
//! drops events from handles that are no longer active and applies the
//! lifecycle transitions:
//!
//! ```text
//!                 Connected
//!   Disconnected ───────────► Connected
//!        ▲                        │ Reconnecting / Closed
//!        └────────────────────────┘
//!
//!   any state ──Error──► Errored ──Connected──► Connected
//! ```
//!
//! `Errored` is sticky: reconnect attempts and close notices do not clear it,
//! only the next `Connected` does.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::mqtt::config::{ConnectionConfig, PublishOptions};
use crate::mqtt::transport::{EventSender, HandleId, TaggedEvent, Transport, TransportEvent, TransportHandle};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Errored(String),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Errored(message) => write!(f, "errored ({})", message),
        }
    }
}

/// Result of routing one queued event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Event from the active handle; lifecycle transitions already applied
    Current(TransportEvent),
    /// Event from a handle that has been replaced or closed
    Stale(HandleId),
}

pub struct ConnectionManager {
    transport: Box<dyn Transport>,
    events: EventSender,
    active: Option<Box<dyn TransportHandle>>,
    next_handle: u64,
    state: ConnectionState,
}

impl ConnectionManager {
    pub fn new(transport: Box<dyn Transport>, events: EventSender) -> Self {
        Self {
            transport,
            events,
            active: None,
            next_handle: 1,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn active_handle(&self) -> Option<HandleId> {
        self.active.as_ref().map(|handle| handle.id())
    }

    /// Opens a connection for `config`, closing any existing one first.
    ///
    /// A synchronous failure leaves no active handle and moves the state to
    /// `Errored`. A failed subscription keeps the connection but marks it
    /// errored.
    pub fn open(&mut self, config: &ConnectionConfig) -> Result<HandleId, BridgeError> {
        self.close();

        let id = HandleId(self.next_handle);
        self.next_handle += 1;

        let opened = config
            .validate()
            .and_then(|_| self.transport.open(id, config, self.events.clone()));
        let mut handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to open connection {} to {}: {}", id, config.url(), e);
                self.state = ConnectionState::Errored(e.to_string());
                return Err(e);
            }
        };

        if !config.subscribe_topic.is_empty() {
            if let Err(e) = handle.subscribe(&config.subscribe_topic) {
                warn!("Subscription on connection {} failed: {}", id, e);
                self.state = ConnectionState::Errored(e.to_string());
            }
        }

        info!("Connection {} opened to {}", id, config.url());
        self.active = Some(handle);
        Ok(id)
    }

    /// Closes the active connection, if any, and resets the state to
    /// `Disconnected`
    pub fn close(&mut self) -> Option<HandleId> {
        let closed = self.active.take().map(|handle| {
            let id = handle.id();
            handle.close();
            debug!("Connection {} closed", id);
            id
        });
        self.state = ConnectionState::Disconnected;
        closed
    }

    /// Routes one queued event
    pub fn accept(&mut self, tagged: TaggedEvent) -> Delivery {
        if self.active_handle() != Some(tagged.handle) {
            debug!(
                "Dropping stale {} event from connection {}",
                tagged.event.name(),
                tagged.handle
            );
            return Delivery::Stale(tagged.handle);
        }

        match &tagged.event {
            TransportEvent::Connected => {
                self.state = ConnectionState::Connected;
            }
            TransportEvent::Reconnecting | TransportEvent::Closed => {
                if self.state == ConnectionState::Connected {
                    self.state = ConnectionState::Disconnected;
                }
            }
            TransportEvent::Error(message) => {
                self.state = ConnectionState::Errored(message.clone());
            }
            TransportEvent::Message { .. } => {}
        }
        Delivery::Current(tagged.event)
    }

    /// Publishes through the active connection; returns the handle used
    pub fn send(
        &mut self,
        topic: &str,
        payload: &str,
        options: PublishOptions,
    ) -> Result<HandleId, BridgeError> {
        options.validate()?;
        let handle = self
            .active
            .as_mut()
            .ok_or_else(|| BridgeError::Transport("no active connection".to_string()))?;
        handle.publish(topic, payload, options)?;
        Ok(handle.id())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}
