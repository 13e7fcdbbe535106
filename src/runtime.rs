//! Async driver for a [`ControlBridge`]
//!
//! The bridge itself is synchronous. [`BridgeRuntime`] owns it inside one
//! tokio task and applies user commands and transport events one at a time in
//! arrival order. After every step the current [`BridgeSnapshot`] is
//! published on a watch channel.
//!
//! ```text
//! BridgeHandle ──BridgeCommand──┐
//!                               ├──► select! ──► ControlBridge ──► watch<BridgeSnapshot>
//! Transport ─────TaggedEvent────┘
//! ```

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeSnapshot, ControlBridge, StagedValue};
use crate::config::ControlSettings;
use crate::error::BridgeError;
use crate::mqtt::config::ConnectionConfig;
use crate::mqtt::message_manager::PublishRecord;
use crate::mqtt::transport::EventReceiver;

const COMMAND_CAPACITY: usize = 32;

macro_rules! respond {
    ($result:expr, $response_tx:expr) => {
        if $response_tx.send($result).is_err() {
            warn!("Command caller went away before the response");
        }
    };
}

#[derive(Debug)]
pub enum BridgeCommand {
    SetStaged {
        value: StagedValue,
        response_tx: oneshot::Sender<Result<(), BridgeError>>,
    },
    Publish {
        response_tx: oneshot::Sender<Result<PublishRecord, BridgeError>>,
    },
    Reconfigure {
        config: ConnectionConfig,
    },
    SetControl {
        settings: ControlSettings,
    },
    Shutdown,
}

pub struct BridgeRuntime {
    bridge: ControlBridge,
    events: EventReceiver,
    commands: mpsc::Receiver<BridgeCommand>,
    state_tx: watch::Sender<BridgeSnapshot>,
}

impl BridgeRuntime {
    /// Spawns the driver task. The bridge is connected first unless it
    /// already holds a live connection.
    pub fn spawn(bridge: ControlBridge, events: EventReceiver) -> BridgeHandle {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(bridge.snapshot());

        let runtime = BridgeRuntime {
            bridge,
            events,
            commands,
            state_tx,
        };
        let task = tokio::spawn(runtime.run());

        BridgeHandle {
            commands: commands_tx,
            state: state_rx,
            task: Some(task),
        }
    }

    async fn run(mut self) {
        info!("Bridge runtime started");
        if let Err(e) = self.bridge.connect() {
            error!("Initial connection failed: {}", e);
        }
        self.publish_state();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(BridgeCommand::Shutdown) | None => break,
                    Some(command) => self.apply(command),
                },
                Some(event) = self.events.recv() => self.bridge.handle_event(event),
            }
            self.publish_state();
        }

        self.bridge.disconnect();
        self.publish_state();
        info!("Bridge runtime stopped");
    }

    fn apply(&mut self, command: BridgeCommand) {
        match command {
            BridgeCommand::SetStaged { value, response_tx } => {
                respond!(self.bridge.set_staged(value), response_tx);
            }
            BridgeCommand::Publish { response_tx } => {
                respond!(self.bridge.publish(), response_tx);
            }
            BridgeCommand::Reconfigure { config } => {
                if let Err(e) = self.bridge.reconfigure(config) {
                    warn!("Reconfigure left the bridge errored: {}", e);
                }
            }
            BridgeCommand::SetControl { settings } => {
                if self.bridge.set_control(settings) {
                    debug!("Control settings re-seeded the staged value");
                }
            }
            BridgeCommand::Shutdown => {}
        }
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.bridge.snapshot());
    }
}

/// Caller side of a running [`BridgeRuntime`]
#[derive(Debug)]
pub struct BridgeHandle {
    commands: mpsc::Sender<BridgeCommand>,
    state: watch::Receiver<BridgeSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    pub async fn set_staged(&self, value: StagedValue) -> Result<(), BridgeError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(BridgeCommand::SetStaged { value, response_tx })
            .await?;
        response_rx
            .await
            .map_err(|e| BridgeError::Channel(format!("no response to set_staged: {}", e)))?
    }

    pub async fn publish(&self) -> Result<PublishRecord, BridgeError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(BridgeCommand::Publish { response_tx }).await?;
        response_rx
            .await
            .map_err(|e| BridgeError::Channel(format!("no response to publish: {}", e)))?
    }

    pub async fn reconfigure(&self, config: ConnectionConfig) -> Result<(), BridgeError> {
        self.send(BridgeCommand::Reconfigure { config }).await
    }

    pub async fn set_control(&self, settings: ControlSettings) -> Result<(), BridgeError> {
        self.send(BridgeCommand::SetControl { settings }).await
    }

    /// Latest published snapshot
    pub fn state(&self) -> BridgeSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<BridgeSnapshot> {
        self.state.clone()
    }

    /// Stops the driver, closing the live connection, and waits for it
    pub async fn shutdown(&mut self) -> Result<(), BridgeError> {
        debug!("Sending shutdown to bridge runtime");
        if self.commands.send(BridgeCommand::Shutdown).await.is_err() {
            warn!("Bridge runtime already stopped");
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| BridgeError::Channel(format!("bridge task failed: {}", e)))?;
        }
        Ok(())
    }

    async fn send(&self, command: BridgeCommand) -> Result<(), BridgeError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BridgeError::Channel("bridge runtime is not running".to_string()))
    }
}
