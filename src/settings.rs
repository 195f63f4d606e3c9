use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use mobile_bgb_core::clock::{DEFAULT_DRIFT_WINDOW, DEFAULT_RESET_THRESHOLD};
use mobile_bgb_core::{ClockConfig, ClockMode, HandshakeMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HandshakeSetting {
    #[default]
    Immediate,
    AwaitStatus,
}

impl From<HandshakeSetting> for HandshakeMode {
    fn from(value: HandshakeSetting) -> Self {
        match value {
            HandshakeSetting::Immediate => HandshakeMode::Immediate,
            HandshakeSetting::AwaitStatus => HandshakeMode::AwaitStatus,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ClockSetting {
    #[default]
    ResetAware,
    ClampOnly,
}

impl From<ClockSetting> for ClockMode {
    fn from(value: ClockSetting) -> Self {
        match value {
            ClockSetting::ResetAware => ClockMode::ResetAware,
            ClockSetting::ClampOnly => ClockMode::ClampOnly,
        }
    }
}

/// Link tuning read from the optional settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub handshake: HandshakeSetting,
    pub clock: ClockSetting,
    pub drift_window: u32,
    pub reset_threshold: u32,
    pub poll_interval_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            handshake: HandshakeSetting::default(),
            clock: ClockSetting::default(),
            drift_window: DEFAULT_DRIFT_WINDOW,
            reset_threshold: DEFAULT_RESET_THRESHOLD,
            poll_interval_ms: 100,
        }
    }
}

impl LinkSettings {
    pub fn clock_config(&self) -> ClockConfig {
        ClockConfig {
            mode: self.clock.into(),
            drift_window: self.drift_window,
            reset_threshold: self.reset_threshold,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

pub fn parse(text: &str) -> Result<LinkSettings, toml::de::Error> {
    toml::from_str(text)
}

pub fn load_from_file(path: &Path) -> LinkSettings {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return LinkSettings::default(),
    };

    match parse(&text) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(
                "Bridge: failed to parse link settings {}: {e}; using defaults",
                path.display()
            );
            LinkSettings::default()
        }
    }
}
