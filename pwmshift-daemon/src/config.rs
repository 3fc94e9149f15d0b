use std::path::Path;

use derive_more::{Display, Error};
use log::{debug, info, warn, LevelFilter};
use pwmshift_engine::PinMap;
use pwmshift_protocol::{ProtocolVariant, DEFAULT_PORT, MAX_TARGET_ID};
use serde::{Deserialize, Serialize};

/// Crazy mode delay limits and step size for the console keys.
pub const MIN_CRAZY_DELAY_MS: u32 = 50;
pub const MAX_CRAZY_DELAY_MS: u32 = 1000;
pub const CRAZY_DELAY_STEP_MS: u32 = 50;

/// Configurable log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub const fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
        }
    }
}

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[display("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[display("target id {id} outside 0..={}", MAX_TARGET_ID)]
    InvalidTargetId { id: u8 },
}

/// GPIO numbers for the three channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinsConfig {
    #[serde(default = "default_red_pin")]
    pub red: u8,
    #[serde(default = "default_green_pin")]
    pub green: u8,
    #[serde(default = "default_blue_pin")]
    pub blue: u8,
}

const fn default_red_pin() -> u8 {
    23
}

const fn default_green_pin() -> u8 {
    24
}

const fn default_blue_pin() -> u8 {
    25
}

impl Default for PinsConfig {
    fn default() -> Self {
        Self {
            red: default_red_pin(),
            green: default_green_pin(),
            blue: default_blue_pin(),
        }
    }
}

impl From<PinsConfig> for PinMap {
    fn from(pins: PinsConfig) -> Self {
        Self {
            red: pins.red,
            green: pins.green,
            blue: pins.blue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Identity for remote targeting, 0 = listen to broadcasts (or everything with a mask)
    #[serde(default)]
    pub target_id: u8,
    /// UDP port for remote commands
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default)]
    pub protocol: ProtocolVariant,
    /// Device file the pi-blaster daemon reads
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default)]
    pub pins: PinsConfig,
    /// Fade back to the base color after auto mode is disabled (ms)
    #[serde(default = "default_recovery_ramp_ms")]
    pub recovery_ramp_ms: u32,
    /// Initial crazy mode ramp per color (ms)
    #[serde(default = "default_crazy_delay_ms")]
    pub crazy_delay_ms: u32,
    #[serde(default)]
    pub log_level: LogLevel,
}

const fn default_listen_port() -> u16 {
    DEFAULT_PORT
}

fn default_device() -> String {
    "/dev/pi-blaster".to_string()
}

const fn default_recovery_ramp_ms() -> u32 {
    pwmshift_engine::DEFAULT_RECOVERY_RAMP_MS
}

const fn default_crazy_delay_ms() -> u32 {
    250
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_id: 0,
            listen_port: default_listen_port(),
            protocol: ProtocolVariant::default(),
            device: default_device(),
            pins: PinsConfig::default(),
            recovery_ramp_ms: default_recovery_ramp_ms(),
            crazy_delay_ms: default_crazy_delay_ms(),
            log_level: LogLevel::default(),
        }
    }
}

impl Config {
    /// Reject values that cannot be used and clamp the ones that can.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.target_id > MAX_TARGET_ID {
            return Err(ConfigError::InvalidTargetId { id: self.target_id });
        }
        let clamped = self
            .crazy_delay_ms
            .clamp(MIN_CRAZY_DELAY_MS, MAX_CRAZY_DELAY_MS);
        if clamped != self.crazy_delay_ms {
            warn!(
                "Clamping crazy_delay_ms from {} to {clamped}",
                self.crazy_delay_ms
            );
            self.crazy_delay_ms = clamped;
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        debug!("Loading config from {display}");

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let config = Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: display.clone(),
            source,
        })?;

        info!("Loaded config from {display}");
        Ok(config)
    }

    fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
