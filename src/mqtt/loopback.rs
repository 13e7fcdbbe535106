//! In-memory loopback broker
//!
//! Reflects every publish to each live session whose subscription filter
//! matches, which is exactly what a real broker does when the panel
//! subscribes to its own publish topic. Used for offline runs of the binary
//! and as the transport behind the integration tests.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::config::{ConnectionConfig, PublishOptions};
use super::transport::{EventSender, HandleId, TaggedEvent, Transport, TransportEvent, TransportHandle};
use crate::error::BridgeError;

/// Frame accepted by the loopback broker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedFrame {
    pub handle: HandleId,
    pub topic: String,
    pub payload: String,
    pub options: PublishOptions,
}

struct Session {
    handle: HandleId,
    filter: Option<String>,
    events: EventSender,
}

struct BrokerState {
    auto_connect: bool,
    fail_next_open: Option<String>,
    sessions: Vec<Session>,
    opened: Vec<HandleId>,
    closed: Vec<HandleId>,
    published: Vec<PublishedFrame>,
}

/// Shared broker state; clones observe the same broker
#[derive(Clone)]
pub struct LoopbackBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for LoopbackBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                auto_connect: true,
                fail_next_open: None,
                sessions: Vec::new(),
                opened: Vec::new(),
                closed: Vec::new(),
                published: Vec::new(),
            })),
        }
    }

    /// Whether `Connected` is emitted as soon as a session opens
    pub fn set_auto_connect(&self, auto_connect: bool) {
        self.lock().auto_connect = auto_connect;
    }

    /// Makes the next `open` fail with a connection init error
    pub fn fail_next_open(&self, message: impl Into<String>) {
        self.lock().fail_next_open = Some(message.into());
    }

    /// Delivers a message from an outside publisher
    pub fn inject(&self, topic: &str, payload: &[u8]) {
        self.lock().deliver(topic, payload);
    }

    /// Sends an arbitrary event on a live session. Returns false when the
    /// session is gone or its queue is full.
    pub fn emit(&self, handle: HandleId, event: TransportEvent) -> bool {
        let state = self.lock();
        match state.sessions.iter().find(|s| s.handle == handle) {
            Some(session) => session.events.try_send(TaggedEvent { handle, event }).is_ok(),
            None => false,
        }
    }

    pub fn live_sessions(&self) -> Vec<HandleId> {
        self.lock().sessions.iter().map(|s| s.handle).collect()
    }

    pub fn opened(&self) -> Vec<HandleId> {
        self.lock().opened.clone()
    }

    pub fn closed(&self) -> Vec<HandleId> {
        self.lock().closed.clone()
    }

    pub fn published(&self) -> Vec<PublishedFrame> {
        self.lock().published.clone()
    }

    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            broker: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // A poisoned lock only means a test thread panicked mid-update
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BrokerState {
    fn deliver(&self, topic: &str, payload: &[u8]) {
        for session in &self.sessions {
            let Some(filter) = &session.filter else {
                continue;
            };
            if !topic_matches(filter, topic) {
                continue;
            }
            let tagged = TaggedEvent {
                handle: session.handle,
                event: TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                },
            };
            if session.events.try_send(tagged).is_err() {
                warn!("Loopback queue full for session {}, dropping message", session.handle);
            }
        }
    }
}

/// [`Transport`] backed by a [`LoopbackBroker`]
#[derive(Clone)]
pub struct LoopbackTransport {
    broker: LoopbackBroker,
}

impl Transport for LoopbackTransport {
    fn open(
        &mut self,
        handle: HandleId,
        config: &ConnectionConfig,
        events: EventSender,
    ) -> Result<Box<dyn TransportHandle>, BridgeError> {
        let mut state = self.broker.lock();
        if let Some(message) = state.fail_next_open.take() {
            return Err(BridgeError::ConnectionInit(message));
        }
        config.validate()?;

        if state.auto_connect {
            let connected = TaggedEvent {
                handle,
                event: TransportEvent::Connected,
            };
            if events.try_send(connected).is_err() {
                warn!("Loopback queue full, session {} will not see Connected", handle);
            }
        }
        state.sessions.push(Session {
            handle,
            filter: None,
            events,
        });
        state.opened.push(handle);
        debug!("Loopback session {} opened for {}", handle, config.url());

        Ok(Box::new(LoopbackHandle {
            handle,
            broker: self.broker.clone(),
        }))
    }
}

struct LoopbackHandle {
    handle: HandleId,
    broker: LoopbackBroker,
}

impl TransportHandle for LoopbackHandle {
    fn id(&self) -> HandleId {
        self.handle
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BridgeError> {
        let mut state = self.broker.lock();
        match state.sessions.iter_mut().find(|s| s.handle == self.handle) {
            Some(session) => {
                session.filter = Some(topic.to_string());
                Ok(())
            }
            None => Err(BridgeError::Transport(format!(
                "session {} is closed",
                self.handle
            ))),
        }
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        options: PublishOptions,
    ) -> Result<(), BridgeError> {
        let mut state = self.broker.lock();
        if !state.sessions.iter().any(|s| s.handle == self.handle) {
            return Err(BridgeError::Transport(format!(
                "session {} is closed",
                self.handle
            )));
        }
        state.published.push(PublishedFrame {
            handle: self.handle,
            topic: topic.to_string(),
            payload: payload.to_string(),
            options,
        });
        state.deliver(topic, payload.as_bytes());
        Ok(())
    }

    fn close(self: Box<Self>) {
        let mut state = self.broker.lock();
        state.sessions.retain(|s| s.handle != self.handle);
        state.closed.push(self.handle);
        debug!("Loopback session {} closed", self.handle);
    }
}

/// MQTT topic filter matching with `+` and `#` wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerSettings;
    use crate::mqtt::transport::event_channel;

    fn config() -> ConnectionConfig {
        ConnectionConfig::from_settings(&BrokerSettings::default()).unwrap()
    }

    #[test]
    fn test_topic_matches_exact_and_wildcards() {
        assert!(topic_matches("t/out", "t/out"));
        assert!(!topic_matches("t/out", "t/in"));
        assert!(topic_matches("t/+", "t/out"));
        assert!(!topic_matches("t/+", "t/out/x"));
        assert!(topic_matches("t/#", "t/out/x"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("t/out/x", "t/out"));
    }

    #[test]
    fn test_open_emits_connected() {
        let broker = LoopbackBroker::new();
        let mut transport = broker.transport();
        let (tx, mut rx) = event_channel(8);

        let _handle = transport.open(HandleId(1), &config(), tx).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.handle, HandleId(1));
        assert_eq!(event.event, TransportEvent::Connected);
        assert_eq!(broker.live_sessions(), vec![HandleId(1)]);
    }

    #[test]
    fn test_publish_reflects_to_matching_subscription() {
        let broker = LoopbackBroker::new();
        broker.set_auto_connect(false);
        let mut transport = broker.transport();
        let (tx, mut rx) = event_channel(8);

        let mut handle = transport.open(HandleId(1), &config(), tx).unwrap();
        handle.subscribe("t/#").unwrap();
        handle
            .publish("t/out", "1", PublishOptions::default())
            .unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event.event,
            TransportEvent::Message {
                topic: "t/out".to_string(),
                payload: b"1".to_vec(),
            }
        );
        assert_eq!(broker.published().len(), 1);
    }

    #[test]
    fn test_fail_next_open() {
        let broker = LoopbackBroker::new();
        broker.fail_next_open("boom");
        let mut transport = broker.transport();
        let (tx, _rx) = event_channel(8);

        let result = transport.open(HandleId(1), &config(), tx.clone());
        assert!(matches!(result, Err(BridgeError::ConnectionInit(ref m)) if m == "boom"));
        assert!(transport.open(HandleId(2), &config(), tx).is_ok());
    }

    #[test]
    fn test_closed_session_stops_receiving() {
        let broker = LoopbackBroker::new();
        broker.set_auto_connect(false);
        let mut transport = broker.transport();
        let (tx, mut rx) = event_channel(8);

        let mut handle = transport.open(HandleId(1), &config(), tx).unwrap();
        handle.subscribe("t/in").unwrap();
        handle.close();

        broker.inject("t/in", b"late");
        assert!(rx.try_recv().is_err());
        assert!(!broker.emit(HandleId(1), TransportEvent::Connected));
        assert_eq!(broker.closed(), vec![HandleId(1)]);
    }
}
