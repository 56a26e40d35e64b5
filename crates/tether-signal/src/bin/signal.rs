//! Tether Signal Server
//!
//! WebSocket rendezvous relay for host/viewer discovery and session negotiation.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (port 8080, public STUN only)
//! tether-signal
//!
//! # With a TURN credential service
//! tether-signal --port 9000 --credentials-url https://turn.example.com/credentials
//!
//! # Print a sample config file
//! tether-signal --print-config > ~/.config/tether/config.toml
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tether_core::Config;
use tether_signal::SignalServer;

#[derive(Parser, Debug)]
#[command(name = "tether-signal")]
#[command(about = "Tether rendezvous and signaling relay")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "TETHER_PORT")]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long, env = "TETHER_BIND")]
    bind: Option<IpAddr>,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds a disconnected peer keeps its identifier and pairing
    #[arg(long, env = "TETHER_GRACE_PERIOD_SECS")]
    grace_period_secs: Option<u64>,

    /// HTTP endpoint returning TURN/STUN server descriptors
    #[arg(long, env = "TETHER_CREDENTIALS_URL")]
    credentials_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print a sample config file and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => Config::load(),
        };

        if let Some(port) = self.port {
            config.signal.port = port;
        }
        if let Some(bind) = self.bind {
            config.signal.bind = bind;
        }
        if let Some(secs) = self.grace_period_secs {
            config.signal.grace_period_secs = secs;
        }
        if let Some(url) = &self.credentials_url {
            config.ice.credentials_url = Some(url.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", Config::sample());
        return Ok(());
    }

    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    if args.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    let config = args.load_config()?;
    let addr = SocketAddr::new(config.signal.bind, config.signal.port);

    info!("Starting Tether Signal Server");
    info!(
        "Grace period {}s, ICE credentials from {}",
        config.signal.grace_period_secs,
        config
            .ice
            .credentials_url
            .as_deref()
            .unwrap_or("static fallback list")
    );
    if let Some(url) = &config.signal.public_url {
        info!("Advertised as {}", url);
    }

    let server = SignalServer::from_config(&config).context("building ICE credential client")?;
    server.serve(addr).await.context("signal server stopped")?;

    Ok(())
}
