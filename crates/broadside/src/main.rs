//! Broadside server binary.
//!
//! Serves WebSocket clients, relays every inbound message to all of them and
//! broadcasts the server time on a fixed interval until SIGINT or SIGTERM.
//!
//! ```text
//! broadside [OPTIONS]
//!
//! Options:
//!   -c, --config <PATH>              TOML or JSON configuration file
//!       --host <HOST>                Address to bind
//!   -p, --port <PORT>                Port to bind
//!       --broadcast-interval <SECS>  Seconds between time broadcasts, 0 disables
//! ```
//!
//! Precedence, highest first: flags, `BROADSIDE__*` environment variables,
//! the configuration file, built-in defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use broadside::config::{BroadsideConfig, ConfigLoader, ENV_PREFIX};
use broadside::server::{wait_for_os_signal, Server};
use chrono::{SecondsFormat, Utc};
use clap::Parser;
use tracing::{info, warn};

/// WebSocket broadcast server.
#[derive(Debug, Parser)]
#[command(name = "broadside", version, about)]
struct Cli {
    /// Configuration file (TOML or JSON).
    #[arg(short, long, env = "BROADSIDE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind.
    #[arg(short, long)]
    port: Option<u16>,

    /// Seconds between server-time broadcasts. 0 disables them.
    #[arg(long, value_name = "SECS")]
    broadcast_interval: Option<u64>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<BroadsideConfig> {
        let mut loader = ConfigLoader::new().with_dotenv();
        if let Some(path) = &self.config {
            loader = loader
                .with_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
        }

        let mut config = loader
            .with_env_prefix(ENV_PREFIX)
            .load_unvalidated()
            .context("failed to read environment overrides")?;

        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(secs) = self.broadcast_interval {
            config.broadcast.interval_secs = secs;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    broadside::telemetry::init_telemetry(&config.log_config(), &config.metrics_config())
        .context("failed to initialise telemetry")?;

    let server = Server::with_config(config.server_config());
    server.start().await.context("failed to start server")?;
    info!(
        version = broadside::VERSION,
        addr = ?server.local_addr(),
        "Broadside listening"
    );

    match config.broadcast_interval() {
        Some(every) => broadcast_time_until_signal(&server, every).await,
        None => wait_for_os_signal().await,
    }

    info!("Shutting down");
    server.stop().await.context("failed to stop server")?;
    Ok(())
}

async fn broadcast_time_until_signal(server: &Server, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let signal = wait_for_os_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            () = &mut signal => return,
            _ = ticker.tick() => {
                let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                match server.broadcast(format!("Server time: {now}")).await {
                    Ok(stats) if stats.failed > 0 => {
                        warn!(sent = stats.sent, failed = stats.failed, "Evicted clients during time broadcast");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Time broadcast failed");
                        return;
                    }
                }
            }
        }
    }
}
