//! Serial link subsystem for the panel
//!
//! Implements the panel side of the bridge:
//!
//! 1. [`packet`] - Line decoding and protocol flags
//! 2. [`serial_link`] - Transport ownership, reader thread and packet queue
//! 3. [`command`] - Outbound display/servo command lines
//! 4. [`transport`] - Byte transport abstraction over `serialport`
//!
//! # Architecture
//!
//! ```text
//! Panel ──► Transport ──► Reader Thread ──► Packet Queue ──► Router
//!                          (decode_line)     (FIFO, mutex)
//! ```

pub mod command;
pub mod packet;
pub mod serial_link;
pub mod transport;

pub use command::PanelCommand;
pub use packet::{decode_line, ControlMessage, FlagKind, Packet, ProtocolFlags, RadioFrequencies};
pub use serial_link::{LinkError, LinkSettings, SerialLink};
pub use transport::{SerialPortTransport, Transport};
