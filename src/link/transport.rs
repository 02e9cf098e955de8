//! Byte transport underneath the serial link

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::info;

/// Byte-level transport the serial link reads from and writes to
///
/// `read` must return within a short timeout; a timeout with no data is
/// reported as `Ok(0)` so the reader thread can check its shutdown flag.
pub trait Transport: Send {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Second handle on the same device, so writes never wait on a read
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;
}

/// Serial port transport (8N1, no flow control)
pub struct SerialPortTransport {
    port: Box<dyn SerialPort>,
}

impl SerialPortTransport {
    /// Opens a serial port
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g. "/dev/ttyACM0" or "COM7")
    /// * `baud_rate` - Baud rate (the panel firmware uses 115200)
    /// * `read_timeout` - Upper bound for a single blocking read
    pub fn open(
        path: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()?;

        info!("Opened serial port: {} at {} baud", path, baud_rate);
        Ok(Self { port })
    }
}

impl Transport for SerialPortTransport {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        let port = self.port.try_clone()?;
        Ok(Box::new(Self { port }))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::Transport;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory panel: queued inbound chunks, captured outbound bytes
    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        inbound: Arc<Mutex<VecDeque<Vec<u8>>>>,
        outbound: Arc<Mutex<Vec<u8>>>,
        fail_reads: Arc<AtomicBool>,
    }

    impl MockTransport {
        pub(crate) fn feed(&self, bytes: &[u8]) {
            self.inbound.lock().unwrap().push_back(bytes.to_vec());
        }

        pub(crate) fn written(&self) -> String {
            String::from_utf8(self.outbound.lock().unwrap().clone()).unwrap()
        }

        pub(crate) fn unplug(&self) {
            self.fail_reads.store(true, Ordering::Relaxed);
        }
    }

    impl Transport for MockTransport {
        fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
            if self.fail_reads.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            let Some(chunk) = self.inbound.lock().unwrap().pop_front() else {
                return Ok(0);
            };
            buffer[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }

        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.outbound.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
            Ok(Box::new(self.clone()))
        }
    }
}
