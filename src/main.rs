use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use control_bridge::bridge::{BridgeSnapshot, ControlBridge};
use control_bridge::cli::{Args, ConsoleCommand, HELP};
use control_bridge::config::Settings;
use control_bridge::diagnostics::Diagnostics;
use control_bridge::mqtt::{
    event_channel, ConnectionConfig, LoopbackBroker, MqttTransport, Transport,
};
use control_bridge::runtime::{BridgeHandle, BridgeRuntime};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;
    let args = Args::parse();

    let path = args.config.clone().unwrap_or_else(Settings::default_path);
    Settings::ensure_default(&path).await?;
    if args.write_default {
        info!("Settings file ready at {}", path.display());
        return Ok(());
    }
    let mut settings = Settings::load(&path).await?;
    info!("Loaded settings from {}", path.display());

    let diagnostics = Arc::new(Diagnostics::from_settings(&settings.diagnostics));
    let (event_tx, event_rx) = event_channel(settings.transport.event_capacity);

    let transport: Box<dyn Transport> = if args.loopback {
        info!("Using in-memory loopback broker");
        Box::new(LoopbackBroker::new().transport())
    } else {
        Box::new(MqttTransport::new(settings.transport.clone()))
    };

    let bridge = ControlBridge::new(
        ConnectionConfig::from_settings(&settings.broker)?,
        settings.control.clone(),
        transport,
        event_tx,
    )
    .with_diagnostics(diagnostics);

    let mut handle = BridgeRuntime::spawn(bridge, event_rx);
    let _state_logger = tokio::spawn(log_state_changes(handle.subscribe_state()));

    info!("Ready, type help for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.map_err(|e| eyre!("Failed to read stdin: {}", e))?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Quit) => break,
            Ok(command) => {
                if let Err(e) = run_command(command, &handle, &path, &mut settings).await {
                    warn!("{}", e);
                }
            }
            Err(e) => warn!("{}", e),
        }
    }

    handle
        .shutdown()
        .await
        .map_err(|e| eyre!("Failed to stop bridge: {}", e))?;
    Ok(())
}

async fn run_command(
    command: ConsoleCommand,
    handle: &BridgeHandle,
    path: &Path,
    settings: &mut Settings,
) -> Result<()> {
    match command {
        ConsoleCommand::Stage(value) => handle.set_staged(value).await?,
        ConsoleCommand::Mode(mode) => {
            settings.control.mode = mode;
            handle.set_control(settings.control.clone()).await?;
        }
        ConsoleCommand::Publish => {
            let record = handle.publish().await?;
            info!("Sent {}", record);
        }
        ConsoleCommand::Status => {
            println!("{}", serde_json::to_string_pretty(&handle.state())?);
        }
        ConsoleCommand::Reload => {
            *settings = Settings::load(path).await?;
            debug!("Transport and diagnostics settings apply after restart");
            handle
                .reconfigure(ConnectionConfig::from_settings(&settings.broker)?)
                .await?;
            handle.set_control(settings.control.clone()).await?;
            info!("Settings reloaded from {}", path.display());
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

async fn log_state_changes(mut state: watch::Receiver<BridgeSnapshot>) {
    let mut previous = state.borrow().clone();
    while state.changed().await.is_ok() {
        let current = state.borrow_and_update().clone();
        if current.connection_state != previous.connection_state {
            info!("Connection {}", current.connection_state);
        }
        if current.echoed && !previous.echoed {
            info!("Last publish echoed back");
        }
        if let Some(received) = &current.last_received {
            if previous.last_received.as_ref() != Some(received) {
                info!("Received {}", received);
            }
        }
        previous = current;
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
