//! Demo daemon: an echo RPC server driven by a TOML config file.

use std::path::PathBuf;

use bytes::Bytes;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rpc_shell::config::{load_config, ServerConfig};
use rpc_shell::{ConnectionContext, RpcService, ServerBuilder};

#[derive(Parser)]
#[command(name = "rpc-shell", about = "Echo RPC server")]
struct Args {
    /// Path to a TOML configuration file. Defaults are used if absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured port.
    #[arg(long)]
    port: Option<u16>,
}

struct EchoService;

impl RpcService for EchoService {
    async fn handle(&self, ctx: &ConnectionContext, request: Bytes) -> std::io::Result<Bytes> {
        tracing::debug!(
            connection_id = %ctx.connection_id(),
            bytes = request.len(),
            "echoing request"
        );
        Ok(request)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("rpc_shell={}", config.observability.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        name = %config.name,
        host = %config.host,
        port = config.port,
        transport = ?config.transport,
        max_connections = config.max_connections,
        "configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: std::net::SocketAddr = config.observability.metrics_address.parse()?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(address = %addr, "metrics exporter listening");
    }

    let server = ServerBuilder::from_config(&config, EchoService)?.build()?;
    server.start()?;
    tracing::info!(port = server.port(), "serving; press Ctrl+C to exit");
    server.join();

    tracing::info!("shutdown complete");
    Ok(())
}
