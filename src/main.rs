//! Engine entry point: load configuration, assemble the engine, start the
//! pipeline, and serve the control surface until interrupted.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use polyarb::api;
use polyarb::config::EnvConfig;
use polyarb::engine::Engine;

#[derive(Debug, Parser)]
#[command(name = "polyarb", about = "Prediction-market trading engine")]
struct Args {
    /// Control-surface port; overrides the PORT env var.
    #[arg(long)]
    port: Option<u16>,

    /// Start with the scan loop idle; use the control surface to begin.
    #[arg(long)]
    no_autostart: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut env = EnvConfig::from_env()?;
    if let Some(port) = args.port {
        env.port = port;
    }
    let port = env.port;

    if env.private_key.is_none() {
        info!("PRIVATE_KEY not set: scanning and analysis only, execution disabled");
    }

    let engine = Engine::new(env)?;
    if args.no_autostart {
        // Consumers still come up so control-surface starts work later.
        engine.orders.start();
        engine.mint_split.start();
        engine.arb_long.start();
        engine.market_making.start();
        engine.storage.start();
    } else {
        engine.start();
    }

    let app = api::router(engine.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    info!(%addr, "control surface listening");

    let shutdown_engine = engine.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("interrupt received");
        })
        .await?;

    shutdown_engine.shutdown().await;
    Ok(())
}
