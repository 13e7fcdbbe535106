//! rumqttc-backed transport with a statum session lifecycle
//!
//! # State Machine
//!
//! ```text
//! Configured ──start()──► Running ──close()──► Closed
//! ```
//!
//! `Configured` holds the client and an unstarted event loop. `start` spawns
//! the event pump on the current tokio runtime; `close` cancels the pump and
//! aborts its task, so nothing tagged with the session's handle is produced
//! afterwards. A `Closed` session only reports whether its pump is stopped.
//!
//! # Event Pump
//!
//! ```text
//! EventLoop::poll ──► ConnAck / Publish / Disconnect / Err ──► TaggedEvent queue
//!                                         │
//!                             (Err) wait reconnect period
//!                                         ▼
//!                                   Reconnecting
//! ```

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use statum::{machine, state};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{ConnectionConfig, PublishOptions, Scheme};
use super::transport::{EventSender, HandleId, TaggedEvent, Transport, TransportEvent, TransportHandle};
use crate::config::TransportSettings;
use crate::error::BridgeError;

const REQUEST_CAPACITY: usize = 100;
const MIN_KEEP_ALIVE_SECS: u64 = 5;
const DEFAULT_CLIENT_PREFIX: &str = "control-bridge";

/// Lifecycle states of one broker session
#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Configured,
    Running,
    Closed,
}

#[machine]
pub struct MqttSession<S: SessionState> {
    handle: HandleId,
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    subscription: watch::Sender<Option<String>>,
    reconnect_period: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<S: SessionState> MqttSession<S> {
    pub fn handle(&self) -> HandleId {
        self.handle
    }
}

impl MqttSession<Configured> {
    /// Builds client options for `config`
    pub fn create(
        handle: HandleId,
        config: &ConnectionConfig,
        settings: &TransportSettings,
    ) -> Result<Self, BridgeError> {
        config.validate()?;

        let client_id = client_id(&settings.client_id_prefix, handle);
        info!("Configuring MQTT session {} for {}", handle, config.url());

        let mut options = MqttOptions::new(client_id, config.url(), config.port);
        options.set_keep_alive(Duration::from_secs(
            settings.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS),
        ));
        if let Some(credentials) = &config.credentials {
            options.set_credentials(
                credentials.username.clone(),
                credentials.password.clone().unwrap_or_default(),
            );
        }
        match config.scheme {
            Scheme::Ws => options.set_transport(rumqttc::Transport::Ws),
            Scheme::Wss => options.set_transport(rumqttc::Transport::wss_with_default_config()),
        };

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (subscription, _) = watch::channel(None);

        Ok(Self::new(
            handle,
            client,
            Some(eventloop),
            subscription,
            Duration::from_millis(settings.reconnect_period_ms),
            CancellationToken::new(),
            None, // task
        ))
    }

    /// Spawns the event pump and transitions to Running
    pub fn start(mut self, events: EventSender) -> Result<MqttSession<Running>, BridgeError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            BridgeError::ConnectionInit(format!("no async runtime available: {}", e))
        })?;
        let eventloop = self.eventloop.take().ok_or_else(|| {
            BridgeError::ConnectionInit("event loop already taken".to_string())
        })?;

        let pump = EventPump {
            handle: self.handle,
            client: self.client.clone(),
            subscription: self.subscription.subscribe(),
            reconnect_period: self.reconnect_period,
            cancel: self.cancel.clone(),
            events,
        };
        self.task = Some(runtime.spawn(pump.run(eventloop)));

        debug!("Event pump spawned for session {}", self.handle);
        Ok(self.transition())
    }
}

impl MqttSession<Running> {
    /// Cancels the pump and aborts its task
    pub fn close(mut self) -> MqttSession<Closed> {
        info!("Closing MQTT session {}", self.handle);
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request for session {} not queued: {}", self.handle, e);
        }
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.transition()
    }
}

impl MqttSession<Closed> {
    /// True once the pump was cancelled and its task released
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() && self.task.is_none()
    }
}

impl TransportHandle for MqttSession<Running> {
    fn id(&self) -> HandleId {
        self.handle
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BridgeError> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| BridgeError::Transport(format!("subscribe to {} failed: {}", topic, e)))?;
        self.subscription.send_replace(Some(topic.to_string()));
        debug!("Session {} subscribed to {}", self.handle, topic);
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        options: PublishOptions,
    ) -> Result<(), BridgeError> {
        let qos = qos_level(options.qos)?;
        self.client
            .try_publish(topic, qos, options.retain, payload.as_bytes().to_vec())
            .map_err(|e| BridgeError::Transport(format!("publish to {} failed: {}", topic, e)))
    }

    fn close(self: Box<Self>) {
        let closed = (*self).close();
        if !closed.is_stopped() {
            warn!("Session {} closed without a running pump", closed.handle());
        }
    }
}

/// Forwards event loop activity of one session into the bridge queue
struct EventPump {
    handle: HandleId,
    client: AsyncClient,
    subscription: watch::Receiver<Option<String>>,
    reconnect_period: Duration,
    cancel: CancellationToken,
    events: EventSender,
}

impl EventPump {
    async fn run(self, mut eventloop: EventLoop) {
        let mut connected_once = false;

        loop {
            let polled = tokio::select! {
                _ = self.cancel.cancelled() => break,
                polled = eventloop.poll() => polled,
            };

            let event = match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    if connected_once {
                        self.resubscribe();
                    }
                    connected_once = true;
                    Some(TransportEvent::Connected)
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => Some(TransportEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                }),
                Ok(Event::Incoming(Packet::Disconnect)) => Some(TransportEvent::Closed),
                Ok(_) => None,
                Err(e) => {
                    warn!("Session {} connection error: {}", self.handle, e);
                    if !self.forward(TransportEvent::Error(e.to_string())).await {
                        break;
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_period) => {}
                    }
                    Some(TransportEvent::Reconnecting)
                }
            };

            if let Some(event) = event {
                if !self.forward(event).await {
                    break;
                }
            }
        }

        debug!("Event pump for session {} stopped", self.handle);
    }

    async fn forward(&self, event: TransportEvent) -> bool {
        let tagged = TaggedEvent {
            handle: self.handle,
            event,
        };
        if self.events.send(tagged).await.is_err() {
            error!("Event queue closed, stopping session {}", self.handle);
            return false;
        }
        true
    }

    fn resubscribe(&self) {
        let topic = self.subscription.borrow().clone();
        if let Some(topic) = topic {
            if let Err(e) = self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                warn!("Resubscribe to {} failed: {}", topic, e);
            }
        }
    }
}

/// Transport opening one [`MqttSession`] per handle
#[derive(Debug, Clone, Default)]
pub struct MqttTransport {
    settings: TransportSettings,
}

impl MqttTransport {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }
}

impl Transport for MqttTransport {
    fn open(
        &mut self,
        handle: HandleId,
        config: &ConnectionConfig,
        events: EventSender,
    ) -> Result<Box<dyn TransportHandle>, BridgeError> {
        let session = MqttSession::create(handle, config, &self.settings)?.start(events)?;
        Ok(Box::new(session))
    }
}

fn client_id(prefix: &str, handle: HandleId) -> String {
    let prefix = prefix.trim();
    let prefix = if prefix.is_empty() {
        DEFAULT_CLIENT_PREFIX
    } else {
        prefix
    };
    format!("{}-{}-{}", prefix, std::process::id(), handle.0)
}

fn qos_level(level: u8) -> Result<QoS, BridgeError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BridgeError::Config(format!("invalid QoS level {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerSettings;
    use crate::mqtt::transport::event_channel;

    fn unreachable_config() -> ConnectionConfig {
        ConnectionConfig::from_settings(&BrokerSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..BrokerSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn test_client_id_uses_prefix_and_handle() {
        let id = client_id("panel", HandleId(7));
        assert!(id.starts_with("panel-"));
        assert!(id.ends_with("-7"));

        let id = client_id("  ", HandleId(1));
        assert!(id.starts_with("control-bridge-"));
    }

    #[test]
    fn test_qos_level_mapping() {
        assert_eq!(qos_level(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_level(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_level(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(qos_level(3), Err(BridgeError::Config(_))));
        assert!(matches!(qos_level(7), Err(BridgeError::Config(_))));
    }

    #[tokio::test]
    async fn test_publish_refuses_unknown_qos() {
        let (tx, _rx) = event_channel(16);
        let mut session =
            MqttSession::create(HandleId(4), &unreachable_config(), &TransportSettings::default())
                .unwrap()
                .start(tx)
                .unwrap();

        let options = PublishOptions { qos: 7, retain: false };
        let result = TransportHandle::publish(&mut session, "t/out", "x", options);
        assert!(matches!(result, Err(BridgeError::Config(_))));

        let closed = session.close();
        assert!(closed.is_stopped());
    }

    #[tokio::test]
    async fn test_close_stops_pump() {
        let (tx, _rx) = event_channel(16);
        let session =
            MqttSession::create(HandleId(5), &unreachable_config(), &TransportSettings::default())
                .unwrap()
                .start(tx)
                .unwrap();
        assert!(!session.cancel.is_cancelled());

        let closed = session.close();
        assert_eq!(closed.handle(), HandleId(5));
        assert!(closed.is_stopped());
    }

    #[test]
    fn test_create_rejects_invalid_config() {
        let mut config = unreachable_config();
        config.host.clear();
        let result = MqttSession::create(HandleId(1), &config, &TransportSettings::default());
        assert!(matches!(result, Err(BridgeError::ConnectionInit(_))));
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let session =
            MqttSession::create(HandleId(1), &unreachable_config(), &TransportSettings::default())
                .unwrap();
        let (tx, _rx) = event_channel(4);
        let result = session.start(tx);
        assert!(matches!(result, Err(BridgeError::ConnectionInit(_))));
    }

    #[tokio::test]
    async fn test_unreachable_broker_reports_error_event() {
        let settings = TransportSettings {
            reconnect_period_ms: 50,
            ..TransportSettings::default()
        };
        let mut transport = MqttTransport::new(settings);
        let (tx, mut rx) = event_channel(16);

        let handle = transport
            .open(HandleId(3), &unreachable_config(), tx)
            .unwrap();
        assert_eq!(handle.id(), HandleId(3));

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.handle, HandleId(3));
        assert!(matches!(first.event, TransportEvent::Error(_)));

        handle.close();
    }
}
