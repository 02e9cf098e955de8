//! Typed mapping tables
//!
//! The configuration names panel channels by string keys and leaves values
//! loosely typed. [`MappingTables::from_config`] validates all of it once at
//! start-up and produces the tables the bridge works from:
//!
//! ```text
//! [axes.n]     ──► AxisChannel        (bound on the router, flushed per tick)
//! [buttons.n]  ──► state / press / release  ──► Vec<Action>
//! [radios.n]   ──► RadioTarget        ──► two SetVariable actions per sample
//! [display]    ──► DisplaySlot        (template parsed up front)
//! ```
//!
//! [`MappingTables::install`] registers router callbacks that push the
//! resulting [`Action`]s into a channel drained by the bridge loop.

use super::display::DisplayTemplate;
use crate::config::{BridgeConfig, ButtonTarget, DisplayVariable, RadioConfig};
use crate::link::PanelCommand;
use crate::router::{AxisChannel, AxisTransform, Deadzone, EventRouter, Remap};
use crate::simulator::{ClientError, VariableValue, VariableWriter};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid {section} index {key:?}: expected a non-negative integer")]
    InvalidIndex { section: &'static str, key: String },

    #[error("Invalid transform on axis {axis}: {reason}")]
    InvalidTransform { axis: u16, reason: String },

    #[error("Unsupported value for {path}: {value}")]
    UnsupportedValue { path: String, value: String },
}

/// One property write
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SetVariable { path: String, value: String },
    SetBoolean { path: String, value: bool },
}

impl Action {
    pub fn path(&self) -> &str {
        match self {
            Action::SetVariable { path, .. } | Action::SetBoolean { path, .. } => path,
        }
    }

    pub async fn execute<W: VariableWriter>(&self, writer: &mut W) -> Result<(), ClientError> {
        match self {
            Action::SetVariable { path, value } => writer.write_variable(path, value).await,
            Action::SetBoolean { path, value } => {
                writer
                    .write_variable(path, if *value { "true" } else { "false" })
                    .await
            }
        }
    }
}

/// Active and standby frequency properties of one radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioTarget {
    pub active: String,
    pub standby: String,
}

impl RadioTarget {
    fn actions(&self, active: f64, standby: f64) -> [Action; 2] {
        [
            Action::SetVariable {
                path: self.active.clone(),
                value: active.to_string(),
            },
            Action::SetVariable {
                path: self.standby.clone(),
                value: standby.to_string(),
            },
        ]
    }
}

/// A property mirrored onto an LCD position
#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySlot {
    pub variable: String,
    pub lcd: u8,
    pub row: u8,
    pub col: u8,
    pub template: DisplayTemplate,
}

impl DisplaySlot {
    pub fn message(&self, value: &VariableValue) -> PanelCommand {
        PanelCommand::Message {
            lcd: self.lcd,
            row: self.row,
            col: self.col,
            text: self.template.render(value),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MappingTables {
    axes: BTreeMap<u16, AxisChannel>,
    states: HashMap<u16, String>,
    presses: HashMap<u16, Vec<Action>>,
    releases: HashMap<u16, Vec<Action>>,
    radios: HashMap<u16, RadioTarget>,
    displays: Vec<DisplaySlot>,
}

impl MappingTables {
    pub fn from_config(config: &BridgeConfig) -> Result<Self, MappingError> {
        let mut tables = Self::default();

        let full_scale = config.router.axis_full_scale;
        if !(full_scale.is_finite() && full_scale > 0.0) {
            return Err(MappingError::Config(format!(
                "axis_full_scale must be a positive number, got {}",
                full_scale
            )));
        }

        for (key, axis) in &config.axes {
            let index = parse_index("axis", key)?;
            require_path(&axis.variable)?;
            let transform = AxisTransform {
                remap: axis.remap.map(|remap| validate_remap(index, remap)).transpose()?,
                deadzone: axis
                    .deadzone
                    .map(|deadzone| validate_deadzone(index, deadzone))
                    .transpose()?,
            };
            tables.axes.insert(
                index,
                AxisChannel {
                    variable: axis.variable.clone(),
                    transform,
                },
            );
        }

        for (key, button) in &config.buttons {
            let index = parse_index("button", key)?;
            if let Some(path) = &button.state {
                require_path(path)?;
                tables.states.insert(index, path.clone());
            }
            if let Some(target) = &button.press {
                tables.presses.insert(index, target_actions(target, true)?);
            }
            if let Some(target) = &button.release {
                tables.releases.insert(index, target_actions(target, false)?);
            }
        }

        for (key, RadioConfig { active, standby }) in &config.radios {
            let index = parse_index("radio", key)?;
            require_path(active)?;
            require_path(standby)?;
            tables.radios.insert(
                index,
                RadioTarget {
                    active: active.clone(),
                    standby: standby.clone(),
                },
            );
        }

        tables.displays = config
            .display
            .variables
            .iter()
            .map(display_slot)
            .collect::<Result<_, _>>()?;

        info!(
            "Mapping tables ready: {} axes, {} state buttons, {} press, {} release, {} radios, {} display slots",
            tables.axes.len(),
            tables.states.len(),
            tables.presses.len(),
            tables.releases.len(),
            tables.radios.len(),
            tables.displays.len()
        );
        Ok(tables)
    }

    pub fn axes(&self) -> impl Iterator<Item = (u16, &AxisChannel)> {
        self.axes.iter().map(|(index, channel)| (*index, channel))
    }

    pub fn displays(&self) -> &[DisplaySlot] {
        &self.displays
    }

    pub fn state_action(&self, button: u16, level: bool) -> Option<Action> {
        self.states.get(&button).map(|path| Action::SetBoolean {
            path: path.clone(),
            value: level,
        })
    }

    pub fn press_actions(&self, button: u16) -> &[Action] {
        self.presses.get(&button).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn release_actions(&self, button: u16) -> &[Action] {
        self.releases.get(&button).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn radio_actions(&self, radio: u16, active: f64, standby: f64) -> Vec<Action> {
        self.radios
            .get(&radio)
            .map(|target| target.actions(active, standby).to_vec())
            .unwrap_or_default()
    }

    /// Binds the axes on `router` and registers callbacks that forward button
    /// and radio events as actions into `sender`
    pub fn install(&self, router: &mut EventRouter, sender: mpsc::UnboundedSender<Action>) {
        for (index, channel) in &self.axes {
            router.bind_axis(*index, channel.variable.clone(), channel.transform);
        }

        let tables = self.clone();
        let tx = sender.clone();
        router.on_button_state(move |button, level| {
            if let Some(action) = tables.state_action(button, level) {
                forward(&tx, action);
            }
        });

        let tables = self.clone();
        let tx = sender.clone();
        router.on_button_press(move |button| {
            for action in tables.press_actions(button) {
                forward(&tx, action.clone());
            }
        });

        let tables = self.clone();
        let tx = sender.clone();
        router.on_button_release(move |button| {
            for action in tables.release_actions(button) {
                forward(&tx, action.clone());
            }
        });

        let tables = self.clone();
        router.on_radio(move |radio, active, standby| {
            for action in tables.radio_actions(radio, active, standby) {
                forward(&sender, action);
            }
        });

        debug!("Mapping callbacks installed on event router");
    }
}

fn forward(sender: &mpsc::UnboundedSender<Action>, action: Action) {
    trace!("Queueing {:?}", action);
    if sender.send(action).is_err() {
        warn!("Action channel closed, dropping action");
    }
}

fn parse_index(section: &'static str, key: &str) -> Result<u16, MappingError> {
    key.trim()
        .parse()
        .map_err(|_| MappingError::InvalidIndex {
            section,
            key: key.to_string(),
        })
}

fn require_path(path: &str) -> Result<(), MappingError> {
    if path.trim().is_empty() {
        return Err(MappingError::Config("empty property path".to_string()));
    }
    Ok(())
}

fn validate_remap(axis: u16, remap: Remap) -> Result<Remap, MappingError> {
    if remap.input_min >= remap.input_max {
        return Err(MappingError::InvalidTransform {
            axis,
            reason: format!(
                "remap input range {}..{} is empty",
                remap.input_min, remap.input_max
            ),
        });
    }
    Ok(remap)
}

fn validate_deadzone(axis: u16, deadzone: Deadzone) -> Result<Deadzone, MappingError> {
    if deadzone.start > deadzone.end {
        return Err(MappingError::InvalidTransform {
            axis,
            reason: format!(
                "deadzone start {} is above end {}",
                deadzone.start, deadzone.end
            ),
        });
    }
    Ok(deadzone)
}

fn target_actions(target: &ButtonTarget, pressed: bool) -> Result<Vec<Action>, MappingError> {
    match target {
        ButtonTarget::Variable(path) => {
            require_path(path)?;
            Ok(vec![Action::SetBoolean {
                path: path.clone(),
                value: pressed,
            }])
        }
        ButtonTarget::Assignments(assignments) => assignments
            .iter()
            .map(|(path, value)| {
                require_path(path)?;
                assignment(path, value)
            })
            .collect(),
    }
}

fn assignment(path: &str, value: &toml::Value) -> Result<Action, MappingError> {
    let value = match value {
        toml::Value::Boolean(flag) => {
            return Ok(Action::SetBoolean {
                path: path.to_string(),
                value: *flag,
            })
        }
        toml::Value::String(text) => text.clone(),
        toml::Value::Integer(number) => number.to_string(),
        toml::Value::Float(number) => number.to_string(),
        other => {
            return Err(MappingError::UnsupportedValue {
                path: path.to_string(),
                value: other.to_string(),
            })
        }
    };
    Ok(Action::SetVariable {
        path: path.to_string(),
        value,
    })
}

fn display_slot(variable: &DisplayVariable) -> Result<DisplaySlot, MappingError> {
    require_path(&variable.variable)?;
    Ok(DisplaySlot {
        variable: variable.variable.clone(),
        lcd: variable.lcd,
        row: variable.row,
        col: variable.col,
        template: DisplayTemplate::parse(&variable.format)?,
    })
}
