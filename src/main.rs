use color_eyre::{eyre::eyre, Result};
use simpit_bridge::bridge::Bridge;
use simpit_bridge::config::BridgeConfig;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(BridgeConfig::default_path);
    BridgeConfig::ensure_default(&path).await?;
    let config = BridgeConfig::load(&path).await?;

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        signal_token.cancel();
    });

    let bridge = Bridge::create(config).map_err(|e| eyre!("Failed to create bridge: {}", e))?;
    let bridge = tokio::select! {
        connected = bridge.connect() => connected.map_err(|e| eyre!("Failed to connect: {}", e))?,
        _ = token.cancelled() => {
            info!("Cancelled while connecting");
            return Ok(());
        }
    };

    let stopped = bridge
        .run_until_shutdown(token)
        .await
        .map_err(|e| eyre!("Bridge stopped with error: {}", e))?;

    info!("Bridge stopped, final stats: {:?}", stopped.stats());
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
