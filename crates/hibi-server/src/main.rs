//! hibi server binary
//!
//! ## Usage
//!
//! ```bash
//! # Run with defaults (127.0.0.1:4780, ~/.local/share/hibi/hibi.db)
//! hibi-server
//!
//! # Custom port, throwaway database
//! hibi-server --port 8080 --memory
//!
//! # Config file, overridden by flags or their HIBI_* env vars
//! HIBI_PORT=9000 hibi-server --config /etc/hibi.toml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use hibi_server::{AppState, ChangeNotifier, ConfigOverrides, ServerConfig};
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "hibi-server", version, about = "REST + event stream server for hibi")]
struct Args {
    /// TOML config file
    #[arg(long, short, env = "HIBI_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    #[cfg(feature = "telemetry")]
    let _otel_guard = if hibi_telemetry::otel_enabled() {
        match hibi_telemetry::otel_layer("hibi-server") {
            Some((otel_layer, guard)) => {
                registry.with(otel_layer).init();
                Some(guard)
            }
            None => {
                registry.init();
                None
            }
        }
    } else {
        registry.init();
        None
    };
    #[cfg(not(feature = "telemetry"))]
    registry.init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Server error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = ServerConfig::load(args.config.as_deref())?;
    config.apply(args.overrides);

    let addr = config.socket_addr()?;
    let store = hibi_server::open_store(&config).context("opening store")?;
    let state = AppState::new(store, ChangeNotifier::global().clone(), config.keepalive());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    hibi_server::serve(listener, state).await?;
    Ok(())
}
