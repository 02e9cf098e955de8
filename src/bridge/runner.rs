//! Bridge lifecycle with a statum state machine
//!
//! # State Machine
//!
//! ```text
//! Connecting ──► Running ──► Stopped
//!   (connect)      (run_until_shutdown)
//! ```
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────── update tick ────────────┐
//! SerialLink ──► EventRouter ──► callbacks ──► Action channel ──► PropertyClient
//!                     └──── pending axes ──► flush_axes ─────────────┘
//!
//!              ┌──────────── display tick ───────────┐
//! PropertyClient ──► VariableBinding ──► DisplaySlot ──► PanelCommand ──► SerialLink
//! ```
//!
//! Opening the serial link blocks for the board's settle delay, so it runs on
//! the blocking pool.

use super::mapping::{Action, MappingError, MappingTables};
use crate::config::BridgeConfig;
use crate::link::{LinkError, SerialLink, Transport};
use crate::router::EventRouter;
use crate::simulator::{ClientError, PropertyClient, VariableBinding};
use chrono::Local;
use statum::{machine, state};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Seconds between two stats log lines
const STATS_INTERVAL_SECS: i64 = 30;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Serial link error: {0}")]
    Link(#[from] LinkError),

    #[error("Simulator error: {0}")]
    Client(#[from] ClientError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Serial port {0} could not be opened")]
    SerialUnavailable(String),

    #[error("Simulator connection not established")]
    NotConnected,

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Counters since the last stats log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub packets: usize,
    pub actions: usize,
    pub axis_writes: usize,
    pub display_updates: usize,
}

#[state]
#[derive(Debug, Clone)]
pub enum BridgeState {
    Connecting, // Tables built, nothing opened yet
    Running,    // Link and simulator connected, loop may run
    Stopped,    // Link closed
}

#[machine]
pub struct Bridge<S: BridgeState> {
    config: BridgeConfig,
    tables: MappingTables,
    link: SerialLink,
    client: Option<PropertyClient>,
    router: EventRouter,
    actions: mpsc::UnboundedReceiver<Action>,
    bindings: Vec<Option<VariableBinding>>,
    stats: BridgeStats,
}

impl<S: BridgeState> Bridge<S> {
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }
}

impl Bridge<Connecting> {
    /// Validates the mapping tables and wires them into a fresh router
    pub fn create(config: BridgeConfig) -> Result<Self, BridgeError> {
        info!("Creating bridge for serial port {}", config.serial.port);

        let tables = MappingTables::from_config(&config)?;
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let mut router = EventRouter::new(config.router.clone());
        tables.install(&mut router, action_tx);

        let link = SerialLink::new(config.serial.link.clone());
        let bindings = vec![None; tables.displays().len()];

        Ok(Self::new(
            config,
            tables,
            link,
            None, // client
            router,
            action_rx,
            bindings,
            BridgeStats::default(),
        ))
    }

    /// Connects to the simulator and opens the configured serial port
    pub async fn connect(self) -> Result<Bridge<Running>, BridgeError> {
        let port = self.config.serial.port.clone();
        self.start(move |link| link.open(&port)).await
    }

    /// Like [`Bridge::connect`], on an already opened panel transport
    pub async fn connect_with(
        self,
        transport: Box<dyn Transport>,
    ) -> Result<Bridge<Running>, BridgeError> {
        self.start(move |link| link.open_with(transport)).await
    }

    async fn start<F>(mut self, open: F) -> Result<Bridge<Running>, BridgeError>
    where
        F: FnOnce(&mut SerialLink) -> bool + Send + 'static,
    {
        let mut client = PropertyClient::connect(&self.config.simulator).await?;

        let placeholder = SerialLink::new(self.config.serial.link.clone());
        let mut link = std::mem::replace(&mut self.link, placeholder);
        let (link, opened) = tokio::task::spawn_blocking(move || {
            let opened = open(&mut link);
            (link, opened)
        })
        .await?;
        self.link = link;

        if !opened {
            error!("Serial link on {} did not open", self.config.serial.port);
            return Err(BridgeError::SerialUnavailable(self.config.serial.port.clone()));
        }

        for command in &self.config.display.setup {
            self.link.send_async(&command.to_string()).await?;
        }
        debug!("Sent {} display setup commands", self.config.display.setup.len());

        for (slot, binding) in self.tables.displays().iter().zip(self.bindings.iter_mut()) {
            *binding = VariableBinding::fetch(&mut client, &slot.variable).await?;
            if binding.is_none() {
                warn!("Display variable {} not readable yet", slot.variable);
            }
        }

        self.client = Some(client);
        info!("Bridge connected");
        Ok(self.transition())
    }
}

impl Bridge<Running> {
    /// Main loop with graceful shutdown support
    ///
    /// Routes packets and flushes axes every update period, refreshes display
    /// variables every display period and stops when `token` is cancelled.
    /// A simulator or link failure ends the loop with an error.
    pub async fn run_until_shutdown(
        mut self,
        token: CancellationToken,
    ) -> Result<Bridge<Stopped>, BridgeError> {
        let update_period = self.config.timing.update_period();
        let display_period = self.config.timing.display_period();
        info!(
            "Bridge running: update every {:?}, displays every {:?}",
            update_period, display_period
        );

        let mut update = tokio::time::interval(update_period);
        update.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut display = tokio::time::interval(display_period);
        display.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_stats = Local::now();
        let stats_interval = chrono::Duration::seconds(STATS_INTERVAL_SECS);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = update.tick() => {
                    if let Err(e) = self.update().await {
                        error!("Update failed: {}", e);
                        return Err(e);
                    }
                }
                _ = display.tick() => {
                    if let Err(e) = self.refresh_displays().await {
                        error!("Display refresh failed: {}", e);
                        return Err(e);
                    }
                }
            }

            let now = Local::now();
            if now - last_stats > stats_interval {
                self.log_stats(stats_interval.num_seconds());
                last_stats = now;
            }
        }

        Ok(self.stop())
    }

    /// Closes the link and drops the simulator connection
    pub fn stop(mut self) -> Bridge<Stopped> {
        info!("Stopping bridge");
        self.link.close();
        self.client = None;
        self.transition()
    }

    async fn update(&mut self) -> Result<(), BridgeError> {
        self.stats.packets += self.router.poll(&self.link);

        let client = self.client.as_mut().ok_or(BridgeError::NotConnected)?;
        while let Ok(action) = self.actions.try_recv() {
            action.execute(client).await?;
            self.stats.actions += 1;
        }
        self.stats.axis_writes += self.router.flush_axes(client).await?;
        Ok(())
    }

    async fn refresh_displays(&mut self) -> Result<(), BridgeError> {
        let client = self.client.as_mut().ok_or(BridgeError::NotConnected)?;

        for (slot, binding) in self.tables.displays().iter().zip(self.bindings.iter_mut()) {
            let readable = if let Some(existing) = binding.as_mut() {
                existing.refresh(client).await?
            } else {
                *binding = VariableBinding::fetch(client, &slot.variable).await?;
                binding.is_some()
            };
            if !readable {
                debug!("Display variable {} unreadable, skipping", slot.variable);
                continue;
            }
            let Some(current) = binding.as_ref() else {
                continue;
            };

            self.link
                .send_async(&slot.message(current.value()).to_string())
                .await?;
            self.stats.display_updates += 1;
        }
        Ok(())
    }

    fn log_stats(&mut self, seconds: i64) {
        info!(
            "Bridge stats: {} packets, {} actions, {} axis writes, {} display updates in last {} seconds",
            self.stats.packets,
            self.stats.actions,
            self.stats.axis_writes,
            self.stats.display_updates,
            seconds
        );
        self.stats = BridgeStats::default();
    }
}

impl Bridge<Stopped> {
    pub fn is_link_open(&self) -> bool {
        self.link.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::transport::mock::MockTransport;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Answers every `get` with a fixed airspeed and records all lines
    async fn fake_simulator() -> (u16, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&received);
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(path) = line.strip_prefix("get ") {
                    let reply = format!("{} = '87.456' (double)\r\n/> ", path);
                    if write.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
                log.lock().unwrap().push(line);
            }
        });

        (port, received)
    }

    fn bridge_config(simulator_port: u16) -> BridgeConfig {
        let mut config = BridgeConfig::from_toml(
            r#"
            [serial]
            port = "mock"
            settle_delay_ms = 0
            command_spacing_ms = 0

            [timing]
            update_frequency_hz = 40.0
            display_frequency_hz = 5.0

            [axes.0]
            variable = "controls/flight/flaps"
            remap = [0.0, 1.0, 1.0, 0.0]

            [buttons.0]
            press = { "controls/switches/magnetos" = 3 }

            [[display.setup]]
            command = "clear"
            lcd = 0

            [[display.variables]]
            variable = "velocities/airspeed-kt"
            lcd = 0
            row = 1
            col = 0
            format = "{value:.2} kt"
            "#,
        )
        .unwrap();
        config.simulator.host = "127.0.0.1".to_string();
        config.simulator.port = simulator_port;
        config
    }

    #[tokio::test]
    async fn routes_panel_input_and_refreshes_displays() {
        let (port, received) = fake_simulator().await;
        let panel = MockTransport::default();
        panel.feed(b"{\"btn\":{\"0\":1}}\n{\"axis\":{\"0\":1023}}\n");

        let bridge = Bridge::create(bridge_config(port)).unwrap();
        let bridge = bridge.connect_with(Box::new(panel.clone())).await.unwrap();

        let token = CancellationToken::new();
        let run = tokio::spawn(bridge.run_until_shutdown(token.clone()));
        tokio::time::sleep(Duration::from_millis(600)).await;
        token.cancel();
        let stopped = run.await.unwrap().unwrap();
        assert!(!stopped.is_link_open());

        let lines = received.lock().unwrap().clone();
        assert!(lines.contains(&"set controls/switches/magnetos 3".to_string()), "{:?}", lines);
        assert!(lines.contains(&"set controls/flight/flaps 0".to_string()), "{:?}", lines);
        assert!(lines.contains(&"get velocities/airspeed-kt".to_string()), "{:?}", lines);

        let written = panel.written();
        assert!(written.starts_with("!LCC=0\n"), "{:?}", written);
        assert!(written.contains("!LC=0,1,0,87.46 kt\n"), "{:?}", written);
    }

    #[tokio::test]
    async fn connect_fails_without_simulator() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let bridge = Bridge::create(bridge_config(port)).unwrap();
        let result = bridge.connect_with(Box::new(MockTransport::default())).await;
        assert!(matches!(result, Err(BridgeError::Client(_))));
    }

    #[test]
    fn create_rejects_bad_mapping() {
        let config = BridgeConfig::from_toml("[axes.x]\nvariable = \"a\"\n").unwrap();
        assert!(matches!(
            Bridge::create(config),
            Err(BridgeError::Mapping(MappingError::InvalidIndex { .. }))
        ));
    }
}
