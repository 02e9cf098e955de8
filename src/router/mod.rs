//! Event routing from panel samples to application callbacks
//!
//! - [`transform`] - Remap and deadzone stages for axis values
//! - [`event_router`] - Per-channel state, edge detection and dispatch

pub mod event_router;
pub mod transform;

pub use event_router::{AxisChannel, EdgeMode, EventRouter, PacketSource, RouterSettings};
pub use transform::{AxisTransform, Deadzone, Remap};
