//! ControlBridge composition root
//!
//! Wires the connection manager, receive path and publish staging together
//! and exposes the operations a control surface calls. All methods run to
//! completion without blocking; transport activity is fed back through
//! [`ControlBridge::handle_event`].
//!
//! ```text
//! reconfigure ──► ConnectionManager::close ──► ConnectionManager::open
//!
//! TaggedEvent ──► accept (stale check) ──► MessageProcessor ──► LastReceived / echo
//!
//! set_staged ──► PublishStaging
//! publish    ──► preconditions ──► encode ──► send ──► PublishRecord, echo reset
//! ```

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionManager, ConnectionState, Delivery};
use super::processor::MessageProcessor;
use super::staging::{ControlMode, PublishStaging, SliderRange, StagedValue};
use crate::config::ControlSettings;
use crate::diagnostics::{DiagnosticsSink, NullSink};
use crate::error::{BridgeError, PublishRejection};
use crate::mqtt::config::ConnectionConfig;
use crate::mqtt::message_manager::{LastReceived, PublishRecord};
use crate::mqtt::transport::{EventSender, HandleId, TaggedEvent, Transport, TransportEvent};
use crate::transform::{JsonPathEvaluator, TransformEvaluator};

/// Observable bridge state, as rendered by a control surface
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BridgeSnapshot {
    pub connection_state: ConnectionState,
    pub handle: Option<u64>,
    pub mode: ControlMode,
    pub label: String,
    /// Slider bounds, `None` outside Slider mode
    pub range: Option<SliderRange>,
    pub staged: StagedValue,
    /// Payload the staged value would publish as
    pub staged_payload: String,
    pub last_sent: Option<PublishRecord>,
    pub last_received: Option<LastReceived>,
    pub echoed: bool,
    pub last_error: Option<String>,
    pub last_rejection: Option<PublishRejection>,
    pub subscribe_topic: String,
    pub publish_topic: String,
    pub receive_only: bool,
}

pub struct ControlBridge {
    config: ConnectionConfig,
    connection: ConnectionManager,
    processor: MessageProcessor,
    staging: PublishStaging,
    diagnostics: Arc<dyn DiagnosticsSink>,
    last_sent: Option<PublishRecord>,
    last_error: Option<String>,
    last_rejection: Option<PublishRejection>,
}

impl ControlBridge {
    /// Creates a bridge that is not connected yet; call [`ControlBridge::connect`]
    pub fn new(
        config: ConnectionConfig,
        control: ControlSettings,
        transport: Box<dyn Transport>,
        events: EventSender,
    ) -> Self {
        let processor = MessageProcessor::new(Arc::new(JsonPathEvaluator), config.transform.clone());
        Self {
            connection: ConnectionManager::new(transport, events),
            processor,
            staging: PublishStaging::new(control),
            diagnostics: Arc::new(NullSink),
            last_sent: None,
            last_error: None,
            last_rejection: None,
            config,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn TransformEvaluator>) -> Self {
        self.processor = MessageProcessor::new(evaluator, self.config.transform.clone());
        self
    }

    /// Opens the connection unless one is already active
    pub fn connect(&mut self) -> Result<HandleId, BridgeError> {
        match self.connection.active_handle() {
            Some(handle) => Ok(handle),
            None => self.open(),
        }
    }

    /// Applies a new connection configuration.
    ///
    /// A change of connection identity tears the old connection down and
    /// opens a new one, returning its handle. Publish topic, QoS, retain and
    /// receive-only changes apply in place and return `None`. Without an
    /// active connection a new one is opened even if the identity is the
    /// same. Invalid publish options are refused and the current
    /// configuration stays in effect.
    pub fn reconfigure(&mut self, config: ConnectionConfig) -> Result<Option<HandleId>, BridgeError> {
        if let Err(e) = config.publish.validate() {
            warn!("Configuration for {} refused: {}", config.url(), e);
            return Err(e);
        }

        let identity_changed = config.identity() != self.config.identity();
        self.config = config;

        if !identity_changed && self.connection.active_handle().is_some() {
            debug!("Connection identity unchanged, keeping current connection");
            return Ok(None);
        }

        if identity_changed {
            info!("Connection identity changed, reconnecting to {}", self.config.url());
        } else {
            info!("No active connection, connecting to {}", self.config.url());
        }
        self.diagnostics
            .log("reconfigure", Some(json!({ "url": self.config.url() })));

        self.connection.close();
        self.last_error = None;
        self.processor.set_expression(self.config.transform.clone());
        self.open().map(Some)
    }

    /// Applies new control settings; returns whether the staged value was re-seeded
    pub fn set_control(&mut self, settings: ControlSettings) -> bool {
        self.staging.reconfigure(settings)
    }

    pub fn set_staged(&mut self, value: StagedValue) -> Result<(), BridgeError> {
        self.staging.stage(value).map_err(|e| {
            debug!("{}", e);
            e
        })
    }

    /// Publishes the staged value.
    ///
    /// Unmet preconditions send nothing, leave the last publish record as it
    /// was and are reported as [`BridgeError::PublishRejected`].
    pub fn publish(&mut self) -> Result<PublishRecord, BridgeError> {
        if let Err(rejection) = self.check_publish() {
            info!("Publish rejected: {}", rejection);
            self.last_rejection = Some(rejection);
            self.diagnostics
                .log("publish_rejected", Some(json!({ "reason": rejection })));
            return Err(BridgeError::PublishRejected(rejection));
        }

        let topic = self.config.publish_topic.clone();
        let payload = self.staging.encode();

        match self.connection.send(&topic, &payload, self.config.publish) {
            Ok(handle) => {
                let record = PublishRecord::new(handle, topic, payload);
                info!("Published {}", record);
                self.diagnostics.log(
                    "publish",
                    Some(json!({
                        "topic": record.topic,
                        "payload": record.raw_payload,
                        "qos": self.config.publish.qos,
                        "retain": self.config.publish.retain,
                    })),
                );
                self.processor.reset_echo();
                self.last_rejection = None;
                self.last_sent = Some(record.clone());
                Ok(record)
            }
            Err(e) => {
                warn!("Publish to {} failed: {}", topic, e);
                self.last_error = Some(e.to_string());
                self.diagnostics.log(
                    "publish_error",
                    Some(json!({ "topic": topic, "kind": e.kind(), "error": e.to_string() })),
                );
                Err(e)
            }
        }
    }

    /// Applies one event drained from the transport queue
    pub fn handle_event(&mut self, tagged: TaggedEvent) {
        let event = match self.connection.accept(tagged) {
            Delivery::Current(event) => event,
            Delivery::Stale(handle) => {
                self.diagnostics
                    .log("stale_event", Some(json!({ "handle": handle.0 })));
                return;
            }
        };

        match event {
            TransportEvent::Connected => {
                info!("Connected to {}", self.config.url());
                self.last_error = None;
                self.diagnostics
                    .log("connected", Some(json!({ "url": self.config.url() })));
            }
            TransportEvent::Reconnecting => {
                info!("Reconnecting to {}", self.config.url());
                self.diagnostics.log("reconnecting", None);
            }
            TransportEvent::Closed => {
                info!("Connection to {} closed", self.config.url());
                self.diagnostics.log("closed", None);
            }
            TransportEvent::Error(message) => {
                warn!("Transport error: {}", message);
                self.diagnostics
                    .log("transport_error", Some(json!({ "error": message })));
                self.last_error = Some(message);
            }
            TransportEvent::Message { topic, payload } => self.on_message(&topic, &payload),
        }
    }

    /// Closes the live connection
    pub fn disconnect(&mut self) {
        if let Some(handle) = self.connection.close() {
            info!("Bridge disconnected from connection {}", handle);
        }
    }

    pub fn connection_state(&self) -> &ConnectionState {
        self.connection.state()
    }

    pub fn active_handle(&self) -> Option<HandleId> {
        self.connection.active_handle()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn mode(&self) -> ControlMode {
        self.staging.mode()
    }

    pub fn staged(&self) -> &StagedValue {
        self.staging.staged()
    }

    pub fn last_sent(&self) -> Option<&PublishRecord> {
        self.last_sent.as_ref()
    }

    pub fn last_received(&self) -> Option<&LastReceived> {
        self.processor.last_received()
    }

    pub fn echoed(&self) -> bool {
        self.processor.echoed()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_rejection(&self) -> Option<PublishRejection> {
        self.last_rejection
    }

    pub fn snapshot(&self) -> BridgeSnapshot {
        BridgeSnapshot {
            connection_state: self.connection.state().clone(),
            handle: self.connection.active_handle().map(|handle| handle.0),
            mode: self.staging.mode(),
            label: self.staging.settings().label.clone(),
            range: self.staging.range(),
            staged: self.staging.staged().clone(),
            staged_payload: self.staging.encode(),
            last_sent: self.last_sent.clone(),
            last_received: self.processor.last_received().cloned(),
            echoed: self.processor.echoed(),
            last_error: self.last_error.clone(),
            last_rejection: self.last_rejection,
            subscribe_topic: self.config.subscribe_topic.clone(),
            publish_topic: self.config.publish_topic.clone(),
            receive_only: self.config.receive_only,
        }
    }

    fn open(&mut self) -> Result<HandleId, BridgeError> {
        self.diagnostics
            .log("connect", Some(json!({ "url": self.config.url() })));
        self.connection.open(&self.config).map_err(|e| {
            error!("Connection to {} failed: {}", self.config.url(), e);
            self.last_error = Some(e.to_string());
            self.diagnostics.log(
                "connect_error",
                Some(json!({
                    "url": self.config.url(),
                    "kind": e.kind(),
                    "error": e.to_string(),
                })),
            );
            e
        })
    }

    fn check_publish(&self) -> Result<(), PublishRejection> {
        if self.config.receive_only {
            return Err(PublishRejection::ReceiveOnly);
        }
        if self.config.publish_topic.is_empty() {
            return Err(PublishRejection::NoPublishTopic);
        }
        if self.connection.state() != &ConnectionState::Connected {
            return Err(PublishRejection::NotConnected);
        }
        Ok(())
    }

    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        let current = self.connection.active_handle();
        let last_sent = self
            .last_sent
            .as_ref()
            .filter(|record| Some(record.handle) == current);

        let outcome = self
            .processor
            .process(topic, payload, &self.config.publish_topic, last_sent);

        if let Some(e) = outcome.transform_error {
            self.diagnostics.log(
                "transform_error",
                Some(json!({ "topic": topic, "error": e.to_string() })),
            );
        }

        if let Some(received) = self.processor.last_received() {
            debug!("Received {}", received);
            if self.staging.follow(&received.transformed_value) {
                debug!("Staged value now {:?}", self.staging.staged());
            }
            self.diagnostics.log(
                "message",
                Some(json!({
                    "topic": received.topic,
                    "raw": received.raw_payload,
                    "value": received.transformed_value,
                    "echoed": self.processor.echoed(),
                })),
            );
        }
    }
}
