//! Shared fixture for the integration tests: a bridge wired to a loopback
//! broker, with diagnostics captured in memory.

#![allow(dead_code)]

use std::sync::Arc;

use control_bridge::bridge::{ControlBridge, ControlMode};
use control_bridge::config::{BrokerSettings, ControlSettings};
use control_bridge::diagnostics::MemorySink;
use control_bridge::mqtt::{event_channel, ConnectionConfig, EventReceiver, LoopbackBroker};

pub struct Harness {
    pub broker: LoopbackBroker,
    pub bridge: ControlBridge,
    pub events: EventReceiver,
    pub diagnostics: Arc<MemorySink>,
}

impl Harness {
    pub fn new(broker: BrokerSettings, control: ControlSettings) -> Self {
        let loopback = LoopbackBroker::new();
        let (tx, events) = event_channel(256);
        let diagnostics = Arc::new(MemorySink::default());
        let bridge = ControlBridge::new(
            ConnectionConfig::from_settings(&broker).unwrap(),
            control,
            Box::new(loopback.transport()),
            tx,
        )
        .with_diagnostics(diagnostics.clone());

        Self {
            broker: loopback,
            bridge,
            events,
            diagnostics,
        }
    }

    /// Connects and applies the resulting `Connected` event
    pub fn connected(broker: BrokerSettings, control: ControlSettings) -> Self {
        let mut harness = Self::new(broker, control);
        harness
            .bridge
            .connect()
            .expect("loopback connection should open");
        harness.drain();
        harness
    }

    /// Applies every queued transport event; returns how many were applied
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.bridge.handle_event(event);
            applied += 1;
        }
        applied
    }
}

pub fn topics(subscribe: &str, publish: &str) -> BrokerSettings {
    BrokerSettings {
        subscribe_topic: subscribe.to_string(),
        publish_topic: publish.to_string(),
        ..BrokerSettings::default()
    }
}

pub fn switch_control(on: &str, off: &str) -> ControlSettings {
    ControlSettings {
        mode: ControlMode::Switch,
        on_value: on.to_string(),
        off_value: off.to_string(),
        ..ControlSettings::default()
    }
}
