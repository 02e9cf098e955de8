//! Simulator side of the bridge
//!
//! A line-based client for the flight simulator's telnet property console:
//!
//! - [`client`] - Connection, `set`/`get` requests, bounded reads
//! - [`response`] - Parsing of `name = 'value' (type)` replies
//! - [`binding`] - A property path with its last read value
//!
//! The simulator has to be started with its telnet server enabled, e.g.
//! `--telnet=5403`.

pub mod binding;
pub mod client;
pub mod response;

pub use binding::VariableBinding;
pub use client::{ClientError, ClientSettings, PropertyClient, VariableValue, VariableWriter};
