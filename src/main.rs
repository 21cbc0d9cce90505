//! proxy-pass
//!
//! A reverse proxy that streams HTTP and WebSocket traffic to one of several
//! targets, chosen round-robin or by measured latency.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌──────────────────────────────────────────────────┐
//!                          │                   PROXY-PASS                      │
//!                          │                                                   │
//!     Client Request       │  ┌─────────┐    ┌─────────┐    ┌──────────────┐  │
//!     ─────────────────────┼─▶│  http   │───▶│  proxy  │───▶│load_balancer │  │
//!                          │  │ server  │    │ facade  │    │ RR / latency │  │
//!                          │  └─────────┘    └────┬────┘    └──────┬───────┘  │
//!                          │                      │                │ reads    │
//!                          │                      ▼                ▼          │
//!     Client Response      │               ┌─────────────┐   ┌───────────┐    │
//!     ◀────────────────────┼───────────────│  forward /  │   │  health   │    │
//!                          │               │  websocket  │   │  checker  │────┼──▶ probes
//!                          │               └──────┬──────┘   └───────────┘    │
//!                          │                      │                           │
//!                          └──────────────────────┼───────────────────────────┘
//!                                                 ▼
//!                                              Target
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use proxy_pass::config::{self, validation::validate_config, ProxyConfig, TargetSpec};
use proxy_pass::observability::{logging, metrics};
use proxy_pass::{ConfigError, HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "proxy-pass", version, about = "Health-aware streaming reverse proxy")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target host, repeatable. Replaces the targets of the config file.
    #[arg(short, long = "target")]
    targets: Vec<String>,

    /// Listen address, overriding the config
    #[arg(short, long)]
    bind: Option<String>,
}

fn load(args: &Args) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => ProxyConfig::default(),
    };

    if !args.targets.is_empty() {
        config.targets = args.targets.iter().map(|t| TargetSpec::from(t.as_str())).collect();
    }
    if let Some(bind) = &args.bind {
        config.listener.bind_address = bind.clone();
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load(&args)?;

    logging::init(&config.observability);
    tracing::info!("proxy-pass v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        mode = ?config.balancer.mode,
        targets = config.targets.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let stop = shutdown.subscribe();
    let _signals = shutdown.listen_for_signals();

    let server = HttpServer::new(config)?;
    server.run(listener, stop).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
