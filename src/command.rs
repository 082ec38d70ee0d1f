//! Device commands received from the broker.
//!
//! Commands arrive on [`TOPIC_COMMANDS`] either as JSON
//! (`{"command":"pin_4_digital","value":"HIGH"}`) or as `command=value`
//! text (`led=on`).
//!
//! | command           | value                          |
//! |-------------------|--------------------------------|
//! | `pin_<n>_digital` | `1`, `true`, `HIGH` (else low) |
//! | `pin_<n>_pwm`     | duty 0-255                     |
//! | `pin_<n>_analog`  | 0-255                          |
//! | `led`             | `1`, `true`, `on`              |

use serde::Deserialize;
use std::fmt;

/// Topic commands are received on.
pub const TOPIC_COMMANDS: &str = "device/commands";
/// Topic the periodic status report goes to.
pub const TOPIC_STATUS: &str = "device/status";

/// On-board LED.
pub const LED_PIN: u8 = 2;

/// Highest GPIO number on the ESP32.
pub const MAX_PIN: u8 = 39;

/// A parsed GPIO command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    DigitalWrite { pin: u8, high: bool },
    /// 8-bit LEDC duty cycle.
    PwmWrite { pin: u8, duty: u8 },
    AnalogWrite { pin: u8, value: u8 },
    Led { on: bool },
}

#[derive(Deserialize)]
struct JsonCommand {
    command: String,
    #[serde(default)]
    value: serde_json::Value,
}

impl DeviceCommand {
    /// Parse a command name and its value.
    pub fn parse(command: &str, value: &str) -> Result<Self, CommandError> {
        let command = command.trim();
        let value = value.trim();

        if command.eq_ignore_ascii_case("led") {
            return Ok(Self::Led {
                on: parse_switch(value, "on")?,
            });
        }

        let rest = command
            .strip_prefix("pin_")
            .ok_or_else(|| CommandError::UnknownCommand(command.to_string()))?;
        let (pin, kind) = rest
            .split_once('_')
            .ok_or_else(|| CommandError::UnknownCommand(command.to_string()))?;
        let pin: u8 = pin
            .parse()
            .map_err(|_| CommandError::UnknownCommand(command.to_string()))?;
        if pin > MAX_PIN {
            return Err(CommandError::InvalidPin(pin));
        }

        match kind {
            "digital" => Ok(Self::DigitalWrite {
                pin,
                high: parse_switch(value, "high")?,
            }),
            "pwm" => Ok(Self::PwmWrite {
                pin,
                duty: parse_level(value)?,
            }),
            "analog" => Ok(Self::AnalogWrite {
                pin,
                value: parse_level(value)?,
            }),
            _ => Err(CommandError::UnknownCommand(command.to_string())),
        }
    }

    /// Parse a broker payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, CommandError> {
        let text = std::str::from_utf8(payload).map_err(|_| CommandError::Malformed)?;
        let text = text.trim();

        if text.starts_with('{') {
            let json: JsonCommand =
                serde_json::from_str(text).map_err(|_| CommandError::Malformed)?;
            let value = match &json.value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            return Self::parse(&json.command, &value);
        }

        let (command, value) = text.split_once('=').ok_or(CommandError::Malformed)?;
        Self::parse(command, value)
    }

    /// GPIO the command drives.
    pub fn pin(&self) -> u8 {
        match *self {
            Self::DigitalWrite { pin, .. }
            | Self::PwmWrite { pin, .. }
            | Self::AnalogWrite { pin, .. } => pin,
            Self::Led { .. } => LED_PIN,
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DigitalWrite { pin, high } => {
                write!(f, "pin {} {}", pin, if *high { "HIGH" } else { "LOW" })
            }
            Self::PwmWrite { pin, duty } => write!(f, "pin {} pwm {}", pin, duty),
            Self::AnalogWrite { pin, value } => write!(f, "pin {} analog {}", pin, value),
            Self::Led { on } => write!(f, "led {}", if *on { "on" } else { "off" }),
        }
    }
}

/// Keyword or integer; integers of 1 and above switch on.
fn parse_switch(value: &str, word: &str) -> Result<bool, CommandError> {
    let lower = value.to_ascii_lowercase();
    match lower.as_str() {
        "true" => return Ok(true),
        "false" | "" => return Ok(false),
        _ if lower == word => return Ok(true),
        "low" | "off" => return Ok(false),
        _ => {}
    }
    lower
        .parse::<i64>()
        .map(|n| n >= 1)
        .map_err(|_| CommandError::InvalidValue(value.to_string()))
}

/// Integer or decimal, truncated and clamped to 0-255.
fn parse_level(value: &str) -> Result<u8, CommandError> {
    let level: f64 = value
        .parse()
        .map_err(|_| CommandError::InvalidValue(value.to_string()))?;
    if !level.is_finite() {
        return Err(CommandError::InvalidValue(value.to_string()));
    }
    Ok(level.clamp(0.0, 255.0) as u8)
}

/// Command parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    UnknownCommand(String),
    InvalidPin(u8),
    InvalidValue(String),
    /// Payload is neither JSON nor `command=value`.
    Malformed,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand(c) => write!(f, "unknown command: {}", c),
            Self::InvalidPin(p) => write!(f, "GPIO {} out of range (max {})", p, MAX_PIN),
            Self::InvalidValue(v) => write!(f, "invalid value: {}", v),
            Self::Malformed => write!(f, "malformed command payload"),
        }
    }
}

impl std::error::Error for CommandError {}
