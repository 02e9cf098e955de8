//! Bridge configuration
//!
//! Everything the bridge needs is read from one TOML file. Missing sections
//! fall back to defaults so a fresh file only has to name the serial port and
//! the bindings.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyACM0"
//!
//! [simulator]
//! host = "localhost"
//! port = 5403
//!
//! [axes.0]
//! variable = "controls/flight/flaps"
//! remap = [0.0, 1.0, 1.0, 0.0]
//!
//! [buttons.0]
//! press = { "controls/switches/magnetos" = 3 }
//! release = { "controls/switches/magnetos" = 0 }
//!
//! [buttons.1]
//! state = "controls/switches/starter"
//!
//! [radios.0]
//! active = "instrumentation/comm[0]/frequencies/selected-mhz"
//! standby = "instrumentation/comm[0]/frequencies/standby-mhz"
//!
//! [[display.variables]]
//! variable = "velocities/airspeed-kt"
//! lcd = 0
//! row = 1
//! col = 0
//! format = "{value:.2} kt  "
//! ```

use crate::link::{LinkSettings, PanelCommand};
use crate::router::{Deadzone, Remap, RouterSettings};
use crate::simulator::ClientSettings;
use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "simpit-bridge";
const CONFIG_FILE: &str = "bridge.toml";

/// Upper bounds for the loop frequencies; out-of-range values fall back to these
const MAX_UPDATE_HZ: f64 = 50.0;
const MAX_DISPLAY_HZ: f64 = 10.0;

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub simulator: ClientSettings,
    pub timing: TimingConfig,
    pub router: RouterSettings,
    pub axes: BTreeMap<String, AxisConfig>,
    pub buttons: BTreeMap<String, ButtonConfig>,
    pub radios: BTreeMap<String, RadioConfig>,
    pub display: DisplayConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    #[serde(flatten)]
    pub link: LinkSettings,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            link: LinkSettings::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Packet routing and axis flush rate
    pub update_frequency_hz: f64,
    /// Display variable refresh rate
    pub display_frequency_hz: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            update_frequency_hz: 10.0,
            display_frequency_hz: 1.0,
        }
    }
}

impl TimingConfig {
    pub fn update_period(&self) -> Duration {
        period(self.update_frequency_hz, MAX_UPDATE_HZ)
    }

    pub fn display_period(&self) -> Duration {
        period(self.display_frequency_hz, MAX_DISPLAY_HZ)
    }
}

fn period(frequency_hz: f64, max_hz: f64) -> Duration {
    if frequency_hz > 0.0 && frequency_hz < max_hz {
        Duration::from_secs_f64(1.0 / frequency_hz)
    } else {
        warn!(
            "Frequency {} Hz outside (0, {}) Hz, using {} Hz",
            frequency_hz, max_hz, max_hz
        );
        Duration::from_secs_f64(1.0 / max_hz)
    }
}

/// `[axes.<index>]`
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct AxisConfig {
    pub variable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remap: Option<Remap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadzone: Option<Deadzone>,
}

/// `[buttons.<index>]`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ButtonConfig {
    /// Property that follows the button level (`true`/`false`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub press: Option<ButtonTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<ButtonTarget>,
}

/// What a press or release writes
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ButtonTarget {
    /// A single boolean property: `true` on press, `false` on release
    Variable(String),
    /// Explicit `path = value` assignments
    Assignments(BTreeMap<String, toml::Value>),
}

/// `[radios.<index>]`
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct RadioConfig {
    pub active: String,
    pub standby: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    /// Commands sent once after the link opens
    pub setup: Vec<PanelCommand>,
    /// Properties mirrored onto the displays
    pub variables: Vec<DisplayVariable>,
}

/// `[[display.variables]]`
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct DisplayVariable {
    pub variable: String,
    pub lcd: u8,
    pub row: u8,
    pub col: u8,
    /// Message template; `{value}` or `{value:.N}` is replaced by the reading
    pub format: String,
}

impl BridgeConfig {
    /// `<config dir>/simpit-bridge/bridge.toml`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| eyre!("Failed to parse bridge config: {}", e))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        debug!("Loading bridge config from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

        let config = Self::from_toml(&content)?;
        info!(
            "Loaded config: {} axes, {} buttons, {} radios, {} display variables",
            config.axes.len(),
            config.buttons.len(),
            config.radios.len(),
            config.display.variables.len()
        );
        Ok(config)
    }

    /// Writes a default config file if none exists yet
    pub async fn ensure_default(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write default config file: {}", e))?;

        warn!("No config found, wrote defaults to {}", path.display());
        Ok(())
    }
}
