//! mintdrip faucet entry point.

mod app;
mod config;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Args;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if present.
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    // A panic in any task leaves the faucet in an unknown state; fail fast.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!(panic = %info, "unrecoverable task failure");
        default_hook(info);
        std::process::exit(1);
    }));

    let config = match args.validate() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoints = config.ws_urls.len(),
        chain_id = config.chain_id,
        "starting mintdrip faucet"
    );

    if let Err(e) = app::run(config).await {
        error!(error = %format!("{e:#}"), "faucet stopped");
        std::process::exit(1);
    }
}
