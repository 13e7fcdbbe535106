//! Command line and console commands
//!
//! `Args` is parsed once at startup with clap. Afterwards the binary reads
//! one [`ConsoleCommand`] per stdin line; these stand in for the controls of
//! a panel (text box, slider, switch, button).

use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

use crate::bridge::{ControlMode, StagedValue};

#[derive(Parser, Debug)]
#[command(name = "control-bridge")]
#[command(about = "Staged publish/subscribe control bridge over MQTT websockets")]
#[command(version)]
pub struct Args {
    /// Settings file, defaults to the user config directory
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Use the in-memory loopback broker instead of a real one
    #[arg(long, default_value = "false")]
    pub loopback: bool,

    /// Write a default settings file if missing and exit
    #[arg(long, default_value = "false")]
    pub write_default: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// Stage a value for the active mode
    Stage(StagedValue),
    /// Switch the control mode
    Mode(ControlMode),
    Publish,
    Status,
    /// Re-read the settings file and apply it
    Reload,
    Quit,
    Help,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word.to_ascii_lowercase().as_str() {
            // text keeps inner whitespace of its argument
            "text" => Ok(ConsoleCommand::Stage(StagedValue::Text(rest.to_string()))),
            "number" => rest
                .parse::<f64>()
                .map(|n| ConsoleCommand::Stage(StagedValue::Numeric(n)))
                .map_err(|_| format!("'{}' is not a number", rest)),
            "switch" => match rest.to_ascii_lowercase().as_str() {
                "on" | "true" | "1" => Ok(ConsoleCommand::Stage(StagedValue::Boolean(true))),
                "off" | "false" | "0" => Ok(ConsoleCommand::Stage(StagedValue::Boolean(false))),
                other => Err(format!("switch expects on or off, got '{}'", other)),
            },
            "mode" => rest.parse::<ControlMode>().map(ConsoleCommand::Mode),
            "publish" | "send" => Ok(ConsoleCommand::Publish),
            "status" => Ok(ConsoleCommand::Status),
            "reload" => Ok(ConsoleCommand::Reload),
            "quit" | "exit" => Ok(ConsoleCommand::Quit),
            "help" | "?" => Ok(ConsoleCommand::Help),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command '{}', try help", other)),
        }
    }
}

pub const HELP: &str = "\
commands:
  text <s>          stage text
  number <n>        stage a slider value
  switch on|off     stage a switch value
  mode <m>          text | slider | switch | button
  publish           publish the staged value
  status            print bridge state as JSON
  reload            re-read the settings file
  quit";
