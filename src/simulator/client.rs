//! Property console client
//!
//! Talks to the simulator's telnet property server. The console has no framing
//! beyond its `/>` prompt, so every `get` is bounded by a read timeout.

use super::response::parse_reply;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

const LINE_END: &str = "\r\n";
const PROMPT: &[u8] = b"/>";
const READ_CHUNK: usize = 512;

/// Connection settings for the property server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    /// Upper bound for waiting on the prompt after a `get`
    pub read_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5403,
            read_timeout_ms: 1000,
        }
    }
}

/// Errors from the property client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection closed by simulator")]
    ConnectionClosed,

    #[error("Simulator I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Typed value of a property
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    /// Reported type `double`
    Number(f64),
    /// Any other reported type, kept verbatim
    Text(String),
}

impl VariableValue {
    /// Builds a value from the reply text and its reported type
    pub fn from_reply(value: &str, kind: &str) -> Option<Self> {
        match kind {
            "double" => match value.trim().parse::<f64>() {
                Ok(number) => Some(VariableValue::Number(number)),
                Err(e) => {
                    warn!("Property reported as double but {:?} is not: {}", value, e);
                    None
                }
            },
            _ => Some(VariableValue::Text(value.to_string())),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            VariableValue::Number(number) => Some(*number),
            VariableValue::Text(text) => text.trim().parse().ok(),
        }
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableValue::Number(number) => write!(f, "{}", number),
            VariableValue::Text(text) => f.write_str(text),
        }
    }
}

/// Anything that accepts property writes
///
/// Implemented by [`PropertyClient`]; the router and the bridge only depend on
/// this seam so they can be driven without a simulator.
pub trait VariableWriter {
    fn write_variable(
        &mut self,
        path: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// Client for the simulator's property console
pub struct PropertyClient {
    stream: TcpStream,
    read_timeout: Duration,
}

impl PropertyClient {
    /// Opens the connection
    pub async fn connect(settings: &ClientSettings) -> Result<Self, ClientError> {
        let address = format!("{}:{}", settings.host, settings.port);
        info!("Connecting to simulator property server at {}", address);

        let stream = TcpStream::connect(&address)
            .await
            .map_err(|source| ClientError::Connect {
                address: address.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;

        info!("Connected to simulator at {}", address);
        Ok(Self {
            stream,
            read_timeout: Duration::from_millis(settings.read_timeout_ms),
        })
    }

    /// Writes `set <path> <value>`. No confirmation is read back.
    pub async fn set_variable(
        &mut self,
        path: &str,
        value: impl fmt::Display,
    ) -> Result<(), ClientError> {
        let request = format!("set {} {}{}", path, value, LINE_END);
        trace!("Sending: {}", request.trim_end());
        self.stream.write_all(request.as_bytes()).await?;
        Ok(())
    }

    /// Reads a property
    ///
    /// Returns `Ok(None)` when the reply does not contain the requested
    /// property or the prompt did not arrive within the read timeout. Logging
    /// an unreadable property is left to the caller.
    pub async fn get_variable(&mut self, path: &str) -> Result<Option<VariableValue>, ClientError> {
        self.discard_unread()?;

        let request = format!("get {}{}", path, LINE_END);
        trace!("Sending: {}", request.trim_end());
        self.stream.write_all(request.as_bytes()).await?;

        let reply = self.read_until_prompt().await?;
        let text = String::from_utf8_lossy(&reply);

        let Some(reading) = parse_reply(&text) else {
            debug!("No property line in reply to get {}: {:?}", path, text);
            return Ok(None);
        };

        if reading.name != path {
            debug!(
                "Reply names {} instead of requested {}",
                reading.name, path
            );
            return Ok(None);
        }

        Ok(VariableValue::from_reply(&reading.value, &reading.kind))
    }

    /// Drops bytes left over from an earlier exchange without waiting
    fn discard_unread(&mut self) -> Result<(), ClientError> {
        let mut buffer = [0u8; READ_CHUNK];
        let mut discarded = 0;
        loop {
            match self.stream.try_read(&mut buffer) {
                Ok(0) => return Err(ClientError::ConnectionClosed),
                Ok(n) => discarded += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        if discarded > 0 {
            trace!("Discarded {} stale bytes", discarded);
        }
        Ok(())
    }

    /// Reads until the prompt shows up or the read timeout elapses
    async fn read_until_prompt(&mut self) -> Result<Vec<u8>, ClientError> {
        let deadline = Instant::now() + self.read_timeout;
        let mut reply = Vec::new();
        let mut buffer = [0u8; READ_CHUNK];

        while !contains(&reply, PROMPT) {
            match timeout_at(deadline, self.stream.read(&mut buffer)).await {
                Err(_) => {
                    debug!("Timed out waiting for prompt after {:?}", self.read_timeout);
                    break;
                }
                Ok(Ok(0)) if reply.is_empty() => return Err(ClientError::ConnectionClosed),
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => reply.extend_from_slice(&buffer[..n]),
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        Ok(reply)
    }
}

impl VariableWriter for PropertyClient {
    async fn write_variable(&mut self, path: &str, value: &str) -> Result<(), ClientError> {
        self.set_variable(path, value).await
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    const COMM_PATH: &str = "instrumentation/comm[0]/frequencies/selected-mhz";

    async fn server() -> (TcpListener, ClientSettings) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let settings = ClientSettings {
            host: "127.0.0.1".to_string(),
            port,
            read_timeout_ms: 1000,
        };
        (listener, settings)
    }

    #[tokio::test]
    async fn get_parses_double() {
        let (listener, settings) = server().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let request = lines.next_line().await.unwrap().unwrap();
            assert_eq!(request, format!("get {}", COMM_PATH));
            write
                .write_all(format!("{} = '121.500' (double)\r\n/> ", COMM_PATH).as_bytes())
                .await
                .unwrap();
            // Keep the connection open until the client is done
            let _ = lines.next_line().await;
        });

        let mut client = PropertyClient::connect(&settings).await.unwrap();
        let value = client.get_variable(COMM_PATH).await.unwrap();
        assert_eq!(value, Some(VariableValue::Number(121.5)));
        drop(client);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn get_keeps_non_double_as_text() {
        let (listener, settings) = server().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = [0u8; 128];
            let _ = socket.read(&mut buffer).await.unwrap();
            socket
                .write_all(b"sim/aircraft = 'c172p' (string)\r\n/> ")
                .await
                .unwrap();
            let _ = socket.read(&mut buffer).await;
        });

        let mut client = PropertyClient::connect(&settings).await.unwrap();
        let value = client.get_variable("sim/aircraft").await.unwrap();
        assert_eq!(value, Some(VariableValue::Text("c172p".into())));
    }

    #[tokio::test]
    async fn silent_server_yields_none_after_timeout() {
        let (listener, settings) = server().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = [0u8; 128];
            // Read requests, never answer
            while let Ok(n) = socket.read(&mut buffer).await {
                if n == 0 {
                    break;
                }
            }
        });

        let mut client = PropertyClient::connect(&settings).await.unwrap();
        let start = std::time::Instant::now();
        let value = client.get_variable(COMM_PATH).await.unwrap();
        let elapsed = start.elapsed();
        assert_eq!(value, None);
        assert!(elapsed >= Duration::from_millis(900), "returned too early: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(3), "blocked too long: {:?}", elapsed);
    }

    #[tokio::test]
    async fn mismatched_name_yields_none() {
        let (listener, settings) = server().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = [0u8; 128];
            let _ = socket.read(&mut buffer).await.unwrap();
            socket
                .write_all(b"velocities/airspeed-kt = '88.1' (double)\r\n/> ")
                .await
                .unwrap();
            let _ = socket.read(&mut buffer).await;
        });

        let mut client = PropertyClient::connect(&settings).await.unwrap();
        assert_eq!(client.get_variable(COMM_PATH).await.unwrap(), None);
    }

    #[tokio::test]
    async fn stale_output_is_discarded_before_get() {
        let (listener, settings) = server().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Unsolicited output from an earlier exchange
            socket
                .write_all(b"controls/flight/flaps = '1' (double)\r\n/> ")
                .await
                .unwrap();
            let mut buffer = [0u8; 128];
            let _ = socket.read(&mut buffer).await.unwrap();
            socket
                .write_all(b"controls/flight/flaps = '0.5' (double)\r\n/> ")
                .await
                .unwrap();
            let _ = socket.read(&mut buffer).await;
        });

        let mut client = PropertyClient::connect(&settings).await.unwrap();
        // Give the stale bytes time to arrive in the socket buffer
        tokio::time::sleep(Duration::from_millis(100)).await;
        let value = client.get_variable("controls/flight/flaps").await.unwrap();
        assert_eq!(value, Some(VariableValue::Number(0.5)));
    }

    #[tokio::test]
    async fn set_writes_one_line() {
        let (listener, settings) = server().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(socket).lines();
            let first = lines.next_line().await.unwrap().unwrap();
            let second = lines.next_line().await.unwrap().unwrap();
            (first, second)
        });

        let mut client = PropertyClient::connect(&settings).await.unwrap();
        client.set_variable("controls/flight/flaps", 0.25).await.unwrap();
        client
            .write_variable("controls/switches/starter", "true")
            .await
            .unwrap();

        let (first, second) = server.await.unwrap();
        assert_eq!(first, "set controls/flight/flaps 0.25");
        assert_eq!(second, "set controls/switches/starter true");
    }

    #[tokio::test]
    async fn closed_connection_is_an_error() {
        let (listener, settings) = server().await;
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut client = PropertyClient::connect(&settings).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client.get_variable(COMM_PATH).await.is_err());
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let (listener, settings) = server().await;
        drop(listener);
        assert!(matches!(
            PropertyClient::connect(&settings).await,
            Err(ClientError::Connect { .. })
        ));
    }

    #[test]
    fn value_parsing() {
        assert_eq!(
            VariableValue::from_reply("121.500", "double"),
            Some(VariableValue::Number(121.5))
        );
        assert_eq!(VariableValue::from_reply("abc", "double"), None);
        assert_eq!(
            VariableValue::from_reply("true", "bool"),
            Some(VariableValue::Text("true".into()))
        );
        assert_eq!(VariableValue::Text("3".into()).as_f64(), Some(3.0));
    }
}
