//! Serial link to the panel
//!
//! Owns the transport and a dedicated reader thread. The reader splits the byte
//! stream on `\n`, decodes every complete line and appends the resulting packets
//! to a queue. The foreground side pops packets without ever blocking and sends
//! newline-terminated commands.
//!
//! # Threading Model
//!
//! ```text
//! Transport ──► reader thread ──► [queue + flags] ──► dequeue() (foreground)
//!                                    (one mutex)
//! Transport clone ◄── send() / send_async() (foreground)
//! ```
//!
//! The queue/flags mutex is only ever held for a single push, pop, flag read or
//! flag write. The reader owns its transport handle outright; writes go through
//! a cloned handle behind a separate mutex, so a send never waits on a read.

use super::packet::{decode_line, FlagKind, Packet, ProtocolFlags};
use super::transport::{SerialPortTransport, Transport};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const LINE_TERMINATOR: u8 = b'\n';
const READ_CHUNK: usize = 256;
/// Longest line kept while waiting for a terminator
const MAX_LINE_BYTES: usize = 4096;

/// Timing and port settings for the serial link
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub baud_rate: u32,

    /// Wait after opening before the first command. Most boards reset when the
    /// port is opened and ignore input until the bootloader hands over.
    pub settle_delay_ms: u64,

    /// Minimum spacing between two commands so the board's input buffer
    /// is not overrun
    pub command_spacing_ms: u64,

    /// Upper bound for one blocking transport read
    pub read_timeout_ms: u64,

    pub flag_wait_attempts: u32,
    pub flag_wait_interval_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            settle_delay_ms: 2500,
            command_spacing_ms: 2,
            read_timeout_ms: 10,
            flag_wait_attempts: 20,
            flag_wait_interval_ms: 100,
        }
    }
}

/// Errors reported by the serial link
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Command issued on a link that is closed or was never opened
    #[error("Serial link is not connected")]
    NotConnected,

    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A thread panicked while holding the transport lock
    #[error("Serial transport lock poisoned")]
    Poisoned,
}

/// State shared with the reader thread
#[derive(Debug, Default)]
struct LinkShared {
    queue: VecDeque<Packet>,
    flags: ProtocolFlags,
}

struct Connection {
    writer: Mutex<Box<dyn Transport>>,
    shutdown: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// Serial link to the panel
///
/// Closes itself when dropped, so a link owned by a scope is released on
/// every exit path of that scope.
pub struct SerialLink {
    settings: LinkSettings,
    shared: Arc<Mutex<LinkShared>>,
    connection: Option<Connection>,
}

impl SerialLink {
    pub fn new(settings: LinkSettings) -> Self {
        Self {
            settings,
            shared: Arc::new(Mutex::new(LinkShared::default())),
            connection: None,
        }
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Opens the serial port and starts the reader thread
    ///
    /// Returns whether the link ended up open. A port that cannot be opened is
    /// logged and reported as `false`; retry policy is up to the caller.
    /// Blocks for the settle delay after a successful open.
    pub fn open(&mut self, port: &str) -> bool {
        info!("Opening serial link on {}", port);
        let read_timeout = Duration::from_millis(self.settings.read_timeout_ms);

        match SerialPortTransport::open(port, self.settings.baud_rate, read_timeout) {
            Ok(transport) => self.open_with(Box::new(transport)),
            Err(e) => {
                warn!("Failed to open serial port {}: {}", port, e);
                false
            }
        }
    }

    /// Starts the link on an already opened transport
    pub fn open_with(&mut self, transport: Box<dyn Transport>) -> bool {
        if self.is_open() {
            debug!("Serial link already open, restarting on new transport");
            self.close();
        }

        let writer = match transport.try_clone() {
            Ok(writer) => writer,
            Err(e) => {
                error!("Failed to clone serial transport for writing: {}", e);
                return false;
            }
        };
        let shutdown = Arc::new(AtomicBool::new(false));

        let reader = {
            let shutdown = Arc::clone(&shutdown);
            let shared = Arc::clone(&self.shared);
            thread::Builder::new()
                .name("serial-reader".to_string())
                .spawn(move || reader_loop(transport, shutdown, shared))
        };

        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to spawn serial reader thread: {}", e);
                return false;
            }
        };

        self.connection = Some(Connection {
            writer: Mutex::new(writer),
            shutdown,
            reader: Some(reader),
        });
        info!("Serial reader thread started");

        if self.settings.settle_delay_ms > 0 {
            debug!(
                "Waiting {} ms for the board to settle",
                self.settings.settle_delay_ms
            );
            thread::sleep(Duration::from_millis(self.settings.settle_delay_ms));
        }

        true
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Stops the reader thread and releases the transport. Safe to call on a
    /// closed link.
    pub fn close(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            trace!("Serial link already closed");
            return;
        };

        info!("Closing serial link");
        connection.shutdown.store(true, Ordering::Relaxed);
        if let Some(reader) = connection.reader.take() {
            if reader.join().is_err() {
                error!("Serial reader thread panicked");
            }
        }
        debug!("Serial link closed");
    }

    /// Sends one command line to the panel
    ///
    /// Appends the line terminator and then waits the command spacing. Does not
    /// wait for a response; pair with [`SerialLink::wait_for_flag`] when a
    /// confirmation is needed.
    pub fn send(&self, command: &str) -> Result<(), LinkError> {
        self.write_line(command)?;
        if self.settings.command_spacing_ms > 0 {
            thread::sleep(Duration::from_millis(self.settings.command_spacing_ms));
        }
        Ok(())
    }

    /// [`SerialLink::send`] for async callers; the spacing is awaited instead
    /// of slept
    pub async fn send_async(&self, command: &str) -> Result<(), LinkError> {
        self.write_line(command)?;
        if self.settings.command_spacing_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.command_spacing_ms)).await;
        }
        Ok(())
    }

    fn write_line(&self, command: &str) -> Result<(), LinkError> {
        let connection = self.connection.as_ref().ok_or(LinkError::NotConnected)?;

        debug!("Sending: {}", command);
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(LINE_TERMINATOR);

        let mut writer = connection.writer.lock().map_err(|_| LinkError::Poisoned)?;
        writer.write_all(&line)?;
        Ok(())
    }

    /// Pops the oldest received packet. Never blocks.
    pub fn dequeue(&self) -> Option<Packet> {
        match self.shared.lock() {
            Ok(mut shared) => shared.queue.pop_front(),
            Err(_) => {
                error!("Packet queue mutex poisoned");
                None
            }
        }
    }

    /// Number of packets waiting in the queue
    pub fn pending(&self) -> usize {
        self.shared.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    /// Polls a protocol flag until it is observed or the attempts run out
    ///
    /// An observed flag is cleared in the same critical section, so a later
    /// wait only succeeds on a new response.
    pub fn wait_for_flag(&self, kind: FlagKind) -> bool {
        let interval = Duration::from_millis(self.settings.flag_wait_interval_ms);

        for attempt in 0..self.settings.flag_wait_attempts {
            let observed = match self.shared.lock() {
                Ok(mut shared) => shared.flags.take(kind),
                Err(_) => {
                    error!("Protocol flag mutex poisoned");
                    return false;
                }
            };

            if observed {
                debug!("Flag {:?} observed after {} attempts", kind, attempt + 1);
                return true;
            }
            thread::sleep(interval);
        }

        debug!("Timed out waiting for flag {:?}", kind);
        false
    }

    /// Reads a protocol flag without consuming it
    pub fn flag_observed(&self, kind: FlagKind) -> bool {
        self.shared
            .lock()
            .map(|shared| shared.flags.is_set(kind))
            .unwrap_or(false)
    }

    pub fn reset_flags(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.flags.clear();
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Accumulates bytes and hands out complete lines
#[derive(Debug, Default)]
struct LineSplitter {
    partial: Vec<u8>,
    /// Set after an overlong fragment was dropped; cleared at the next terminator
    overflowed: bool,
}

impl LineSplitter {
    fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == LINE_TERMINATOR {
                if std::mem::take(&mut self.overflowed) {
                    continue;
                }
                lines.push(std::mem::take(&mut self.partial));
            } else if !self.overflowed {
                if self.partial.len() >= MAX_LINE_BYTES {
                    trace!("Dropping {} bytes without a line terminator", self.partial.len());
                    self.partial.clear();
                    self.overflowed = true;
                } else {
                    self.partial.push(byte);
                }
            }
        }
        lines
    }
}

/// Decodes a line and queues the packet; flags and queue are updated together
fn ingest_line(shared: &Mutex<LinkShared>, line: &[u8]) {
    let Some(packet) = decode_line(line) else {
        return;
    };

    trace!("Received: {}", String::from_utf8_lossy(line));
    match shared.lock() {
        Ok(mut shared) => {
            shared.flags.observe(&packet);
            shared.queue.push_back(packet);
        }
        Err(_) => error!("Packet queue mutex poisoned, dropping packet"),
    }
}

/// Reader thread body
fn reader_loop(
    mut transport: Box<dyn Transport>,
    shutdown: Arc<AtomicBool>,
    shared: Arc<Mutex<LinkShared>>,
) {
    debug!("Serial reader running");
    let mut splitter = LineSplitter::default();
    let mut buffer = [0u8; READ_CHUNK];

    while !shutdown.load(Ordering::Relaxed) {
        match transport.read(&mut buffer) {
            Ok(0) => {
                // Keeps a transport without a read timeout from spinning
                thread::sleep(Duration::from_millis(1));
            }
            Ok(n) => {
                for line in splitter.push(&buffer[..n]) {
                    ingest_line(&shared, &line);
                }
            }
            Err(e) => {
                warn!("Serial connection lost: {}", e);
                break;
            }
        }
    }

    info!("Serial reader thread exiting");
}
