//! Event router
//!
//! Turns decoded panel packets into application events:
//!
//! ```text
//! Packet ──► axis   ──► normalise ──► [transform] ──► axis callbacks
//!                                                └──► pending axis state ──► flush_axes()
//!        ──► btn    ──► level ──► state callbacks
//!                             └─► edge detection ──► press / release callbacks
//!        ──► rad    ──► radio callbacks
//! ```
//!
//! Axis samples arrive far faster than the simulator needs them, so bound
//! axes are coalesced per channel and written once per tick by
//! [`EventRouter::flush_axes`].

use super::transform::AxisTransform;
use crate::link::{Packet, SerialLink};
use crate::simulator::{ClientError, VariableWriter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

pub type AxisCallback = Box<dyn FnMut(u16, f64) + Send>;
pub type ButtonStateCallback = Box<dyn FnMut(u16, bool) + Send>;
pub type ButtonEdgeCallback = Box<dyn FnMut(u16) + Send>;
pub type RadioCallback = Box<dyn FnMut(u16, f64, f64) + Send>;

/// Poll rate of [`EventRouter::run_until_cancelled`]
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// When press/release callbacks fire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    /// Only when the level differs from the previous sample of that button.
    /// The first sample of a button counts as a change.
    #[default]
    Transition,
    /// On every sample: press for a high level, release for a low one
    EverySample,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// Raw value that maps to 1.0 (10-bit ADC on the panel)
    pub axis_full_scale: f64,
    pub edge_mode: EdgeMode,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            axis_full_scale: 1023.0,
            edge_mode: EdgeMode::Transition,
        }
    }
}

/// An axis wired to a simulator property
#[derive(Debug, Clone, PartialEq)]
pub struct AxisChannel {
    pub variable: String,
    pub transform: AxisTransform,
}

/// Source of decoded packets; never blocks
pub trait PacketSource {
    fn next_packet(&self) -> Option<Packet>;
}

impl PacketSource for SerialLink {
    fn next_packet(&self) -> Option<Packet> {
        self.dequeue()
    }
}

/// Routes panel samples to registered callbacks
pub struct EventRouter {
    settings: RouterSettings,
    axis_channels: HashMap<u16, AxisChannel>,
    pending_axes: BTreeMap<u16, f64>,
    button_levels: HashMap<u16, bool>,
    axis_callbacks: Vec<AxisCallback>,
    state_callbacks: Vec<ButtonStateCallback>,
    press_callbacks: Vec<ButtonEdgeCallback>,
    release_callbacks: Vec<ButtonEdgeCallback>,
    radio_callbacks: Vec<RadioCallback>,
}

impl EventRouter {
    pub fn new(settings: RouterSettings) -> Self {
        debug!("Creating event router with settings: {:?}", settings);
        Self {
            settings,
            axis_channels: HashMap::new(),
            pending_axes: BTreeMap::new(),
            button_levels: HashMap::new(),
            axis_callbacks: Vec::new(),
            state_callbacks: Vec::new(),
            press_callbacks: Vec::new(),
            release_callbacks: Vec::new(),
            radio_callbacks: Vec::new(),
        }
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Wires an axis to a property; its samples are then transformed and
    /// buffered for [`EventRouter::flush_axes`]
    pub fn bind_axis(&mut self, axis: u16, variable: impl Into<String>, transform: AxisTransform) {
        let variable = variable.into();
        debug!("Binding axis {} to {}", axis, variable);
        self.axis_channels
            .insert(axis, AxisChannel { variable, transform });
    }

    pub fn on_axis(&mut self, callback: impl FnMut(u16, f64) + Send + 'static) {
        self.axis_callbacks.push(Box::new(callback));
    }

    pub fn on_button_state(&mut self, callback: impl FnMut(u16, bool) + Send + 'static) {
        self.state_callbacks.push(Box::new(callback));
    }

    pub fn on_button_press(&mut self, callback: impl FnMut(u16) + Send + 'static) {
        self.press_callbacks.push(Box::new(callback));
    }

    pub fn on_button_release(&mut self, callback: impl FnMut(u16) + Send + 'static) {
        self.release_callbacks.push(Box::new(callback));
    }

    pub fn on_radio(&mut self, callback: impl FnMut(u16, f64, f64) + Send + 'static) {
        self.radio_callbacks.push(Box::new(callback));
    }

    /// Drains the source and routes every packet; returns how many were routed
    pub fn poll(&mut self, source: &impl PacketSource) -> usize {
        let mut routed = 0;
        while let Some(packet) = source.next_packet() {
            self.route(&packet);
            routed += 1;
        }
        if routed > 0 {
            trace!("Routed {} packets", routed);
        }
        routed
    }

    /// Routes one packet
    pub fn route(&mut self, packet: &Packet) {
        for (axis, raw) in packet.axes() {
            self.route_axis(axis, raw);
        }
        for (button, raw) in packet.buttons() {
            self.route_button(button, raw);
        }
        for (radio, frequencies) in packet.radios() {
            trace!(
                "Radio {}: {:.3} / {:.3}",
                radio,
                frequencies.active,
                frequencies.standby
            );
            for callback in &mut self.radio_callbacks {
                callback(radio, frequencies.active, frequencies.standby);
            }
        }
    }

    fn route_axis(&mut self, axis: u16, raw: i64) {
        let mut value = raw as f64 / self.settings.axis_full_scale;

        if let Some(channel) = self.axis_channels.get(&axis) {
            value = channel.transform.apply(value);
            // Replaces any value not yet flushed
            self.pending_axes.insert(axis, value);
        }

        trace!("Axis {}: raw {} -> {:.4}", axis, raw, value);
        for callback in &mut self.axis_callbacks {
            callback(axis, value);
        }
    }

    fn route_button(&mut self, button: u16, raw: i64) {
        let level = raw != 0;

        for callback in &mut self.state_callbacks {
            callback(button, level);
        }

        let previous = self.button_levels.insert(button, level);
        let edge = match self.settings.edge_mode {
            EdgeMode::Transition => previous != Some(level),
            EdgeMode::EverySample => true,
        };
        if !edge {
            return;
        }

        if level {
            debug!("Button {} pressed", button);
            for callback in &mut self.press_callbacks {
                callback(button);
            }
        } else {
            debug!("Button {} released", button);
            for callback in &mut self.release_callbacks {
                callback(button);
            }
        }
    }

    /// Number of axes waiting for the next flush
    pub fn pending_axes(&self) -> usize {
        self.pending_axes.len()
    }

    /// Writes the latest value of every pending axis and clears the buffer
    ///
    /// The buffer is cleared even when a write fails; the first error is
    /// returned after the remaining values are dropped.
    pub async fn flush_axes<W: VariableWriter>(&mut self, writer: &mut W) -> Result<usize, ClientError> {
        let pending = std::mem::take(&mut self.pending_axes);
        let mut written = 0;

        for (axis, value) in pending {
            let Some(channel) = self.axis_channels.get(&axis) else {
                continue;
            };
            writer
                .write_variable(&channel.variable, &value.to_string())
                .await?;
            written += 1;
        }

        if written > 0 {
            trace!("Flushed {} axes", written);
        }
        Ok(written)
    }

    /// Polls the link at 100 Hz until the token is cancelled, then closes
    /// the link
    pub async fn run_until_cancelled(&mut self, link: &mut SerialLink, token: CancellationToken) {
        info!("Event router polling every {:?}", POLL_INTERVAL);
        let mut interval = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Event router stopped, closing serial link");
                    link.close();
                    break;
                }
                _ = interval.tick() => {
                    self.poll(&*link);
                }
            }
        }
    }
}
