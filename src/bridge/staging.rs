//! Staged value state machine
//!
//! One state per control mode. Each mode seeds its staged value from the
//! control settings, accepts edits of its own shape only, and encodes the
//! staged value into the wire payload:
//!
//! | Mode   | Seed                     | Encode                          |
//! |--------|--------------------------|---------------------------------|
//! | Text   | empty string             | verbatim                        |
//! | Slider | `default_number` or min  | number as string                |
//! | Switch | `default_switch`         | `on_value` / `off_value`        |
//! | Button | `button_payload` (fixed) | the fixed literal               |
//!
//! Edits never publish. Incoming messages only reach the staged value when
//! `live_follow` is enabled, and then only for Slider and Switch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::ControlSettings;
use crate::error::BridgeError;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    #[default]
    Text,
    Slider,
    Switch,
    Button,
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMode::Text => write!(f, "Text"),
            ControlMode::Slider => write!(f, "Slider"),
            ControlMode::Switch => write!(f, "Switch"),
            ControlMode::Button => write!(f, "Button"),
        }
    }
}

impl FromStr for ControlMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(ControlMode::Text),
            "slider" => Ok(ControlMode::Slider),
            "switch" => Ok(ControlMode::Switch),
            "button" => Ok(ControlMode::Button),
            other => Err(format!("unknown control mode '{}'", other)),
        }
    }
}

/// User-side value waiting to be published; its variant always matches the mode
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum StagedValue {
    Text(String),
    Numeric(f64),
    Boolean(bool),
    /// Button payload, not user-editable
    Fixed(String),
}

impl StagedValue {
    pub fn kind(&self) -> &'static str {
        match self {
            StagedValue::Text(_) => "text",
            StagedValue::Numeric(_) => "numeric",
            StagedValue::Boolean(_) => "boolean",
            StagedValue::Fixed(_) => "fixed",
        }
    }
}

/// Settings that determine the seed of the active mode
#[derive(Clone, Debug, PartialEq)]
enum SeedKey {
    Text,
    Slider { seed: f64, min: f64, max: f64 },
    Switch { seed: bool },
    Button { payload: String },
}

impl SeedKey {
    fn of(settings: &ControlSettings) -> Self {
        match settings.mode {
            ControlMode::Text => SeedKey::Text,
            ControlMode::Slider => SeedKey::Slider {
                seed: settings.default_number.unwrap_or(settings.min),
                min: settings.min,
                max: settings.max,
            },
            ControlMode::Switch => SeedKey::Switch {
                seed: settings.default_switch,
            },
            ControlMode::Button => SeedKey::Button {
                payload: settings.button_payload.clone(),
            },
        }
    }

    fn seed(&self) -> StagedValue {
        match self {
            SeedKey::Text => StagedValue::Text(String::new()),
            SeedKey::Slider { seed, min, max } => StagedValue::Numeric(bound(*seed, *min, *max)),
            SeedKey::Switch { seed } => StagedValue::Boolean(*seed),
            SeedKey::Button { payload } => StagedValue::Fixed(payload.clone()),
        }
    }
}

/// Slider bounds as a control surface renders them
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SliderRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

#[derive(Debug, Clone)]
pub struct PublishStaging {
    settings: ControlSettings,
    staged: StagedValue,
}

impl PublishStaging {
    pub fn new(settings: ControlSettings) -> Self {
        let staged = SeedKey::of(&settings).seed();
        debug!("Staging seeded for {} mode: {:?}", settings.mode, staged);
        Self { settings, staged }
    }

    pub fn mode(&self) -> ControlMode {
        self.settings.mode
    }

    pub fn staged(&self) -> &StagedValue {
        &self.staged
    }

    pub fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    /// Slider bounds, only in Slider mode
    pub fn range(&self) -> Option<SliderRange> {
        (self.settings.mode == ControlMode::Slider).then_some(SliderRange {
            min: self.settings.min,
            max: self.settings.max,
            step: self.settings.step,
        })
    }

    /// Applies new control settings. The staged value is re-seeded when the
    /// mode or its seed-relevant defaults changed; returns whether it was.
    pub fn reconfigure(&mut self, settings: ControlSettings) -> bool {
        let old_key = SeedKey::of(&self.settings);
        let new_key = SeedKey::of(&settings);
        let mode_changed = self.settings.mode != settings.mode;
        self.settings = settings;

        if mode_changed || old_key != new_key {
            self.staged = new_key.seed();
            info!(
                "Staged value re-seeded for {} mode: {:?}",
                self.settings.mode, self.staged
            );
            true
        } else {
            false
        }
    }

    /// Replaces the staged value with a user edit of the active mode's shape
    pub fn stage(&mut self, value: StagedValue) -> Result<(), BridgeError> {
        let mode = self.settings.mode;
        let accepted = match (mode, value) {
            (ControlMode::Text, StagedValue::Text(text)) => StagedValue::Text(text),
            (ControlMode::Slider, StagedValue::Numeric(number)) => {
                self.check_range(number)?;
                StagedValue::Numeric(number)
            }
            (ControlMode::Switch, StagedValue::Boolean(on)) => StagedValue::Boolean(on),
            (ControlMode::Button, other) => {
                return Err(BridgeError::StagedRejected {
                    mode,
                    reason: format!("button payload is fixed, got {} value", other.kind()),
                })
            }
            (_, other) => {
                return Err(BridgeError::StagedRejected {
                    mode,
                    reason: format!("expected {} value, got {}", expected_kind(mode), other.kind()),
                })
            }
        };
        debug!("Staged value set: {:?}", accepted);
        self.staged = accepted;
        Ok(())
    }

    /// Wire payload for the current staged value
    pub fn encode(&self) -> String {
        match &self.staged {
            StagedValue::Text(text) => text.clone(),
            StagedValue::Numeric(number) => number.to_string(),
            StagedValue::Boolean(true) => self.settings.on_value.clone(),
            StagedValue::Boolean(false) => self.settings.off_value.clone(),
            StagedValue::Fixed(payload) => payload.clone(),
        }
    }

    /// Lets an incoming transformed value overwrite the staged value when
    /// `live_follow` is enabled. Returns whether the staged value changed.
    pub fn follow(&mut self, transformed: &Value) -> bool {
        if !self.settings.live_follow {
            return false;
        }
        let followed = match self.settings.mode {
            ControlMode::Slider => numeric(transformed)
                .filter(|n| self.check_range(*n).is_ok())
                .map(StagedValue::Numeric),
            ControlMode::Switch => {
                Some(StagedValue::Boolean(display(transformed) == self.settings.on_value))
            }
            ControlMode::Text | ControlMode::Button => None,
        };
        match followed {
            Some(value) if value != self.staged => {
                debug!("Staged value follows incoming message: {:?}", value);
                self.staged = value;
                true
            }
            _ => false,
        }
    }

    fn check_range(&self, number: f64) -> Result<(), BridgeError> {
        let mode = self.settings.mode;
        if !number.is_finite() {
            return Err(BridgeError::StagedRejected {
                mode,
                reason: format!("{} is not a finite number", number),
            });
        }
        let (min, max) = (self.settings.min, self.settings.max);
        if min <= max && (number < min || number > max) {
            return Err(BridgeError::StagedRejected {
                mode,
                reason: format!("{} is outside [{}, {}]", number, min, max),
            });
        }
        Ok(())
    }
}

fn expected_kind(mode: ControlMode) -> &'static str {
    match mode {
        ControlMode::Text => "text",
        ControlMode::Slider => "numeric",
        ControlMode::Switch => "boolean",
        ControlMode::Button => "fixed",
    }
}

fn bound(value: f64, min: f64, max: f64) -> f64 {
    if min > max {
        value
    } else if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
