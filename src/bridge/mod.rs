//! Panel ↔ simulator bridge
//!
//! - [`mapping`] - Validated tables turning panel events into property writes
//! - [`display`] - LCD message templates
//! - [`runner`] - The bridge state machine and its update loop

pub mod display;
pub mod mapping;
pub mod runner;

pub use display::DisplayTemplate;
pub use mapping::{Action, DisplaySlot, MappingError, MappingTables, RadioTarget};
pub use runner::{Bridge, BridgeError, BridgeState, BridgeStats, Connecting, Running, Stopped};
