use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use panel_core::FileConfigStorage;
use panel_server::sim::{SimulatedBoard, SimulatedWifi};
use panel_server::{PanelContext, PanelServer, ServerConfig, WifiTiming};

/// Device control panel served over plain HTTP.
#[derive(Debug, Parser)]
#[command(name = "panel-server", version, about)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "PANEL_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Configuration document; created with defaults when missing.
    #[arg(long, env = "PANEL_CONFIG", default_value = "panel.json")]
    config: PathBuf,

    /// Upper bound on a single request in bytes.
    #[arg(long, env = "PANEL_MAX_REQUEST_BYTES", default_value_t = 4096)]
    max_request_bytes: usize,

    /// Budget for one station connect attempt.
    #[arg(long, env = "PANEL_CONNECT_TIMEOUT_SECS", default_value_t = 30)]
    connect_timeout_secs: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,panel_server=debug,panel_core=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("Control panel starting...");

    // Demo networks for the simulated radio
    let wifi = SimulatedWifi::new()
        .with_network(b"home", -48, 6, "WPA2", Some("correct-horse"))
        .with_network(b"cafe-guest", -71, 11, "OPEN", None)
        .with_network(&[0xC4, 0xE3, 0xBA, 0xC3], -80, 1, "WPA/WPA2", Some("12345678"));
    let board = SimulatedBoard::new(36.6).with_restart_hook(|| {
        tracing::info!("Restart requested, exiting");
        std::process::exit(0);
    });

    let timing = WifiTiming {
        connect_timeout: Duration::from_secs(args.connect_timeout_secs),
        ..WifiTiming::default()
    };
    let context = PanelContext::new(
        FileConfigStorage::new(args.config.clone()),
        Box::new(wifi),
        Arc::new(board),
        timing,
    );
    context.start();

    let config = ServerConfig {
        bind_addr: args.bind,
        max_request_bytes: args.max_request_bytes,
        ..ServerConfig::default()
    };
    let server = PanelServer::new(config, context);

    tracing::info!("Panel ready at http://{}/", args.bind);
    tracing::info!("   curl http://{}/show/get_temperature", args.bind);
    tracing::info!("   curl -d arg0=on http://{}/led", args.bind);

    server
        .run()
        .with_context(|| format!("serving on {}", args.bind))?;
    Ok(())
}
