//! paintboard-server binary.
//!
//! Usage: `paintboard-server [OPTIONS] [CONFIG]`. Logging follows `RUST_LOG`
//! (default `info`, or `debug` with `--verbose`).

use std::sync::Arc;

use clap::Parser;
use paintboard_server::cli::Cli;
use paintboard_server::{PaintboardServer, PermissionCache, RocksDatabase, StoreConfig, TokenCache};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.default_log_filter()))
        .init();

    if let Err(e) = run(cli).await {
        log::error!("Fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli.load_config()?;

    let db = Arc::new(RocksDatabase::open(StoreConfig {
        path: config.storage_path.clone(),
        ..StoreConfig::default()
    })?);
    let tokens = Arc::new(TokenCache::load(db.as_ref())?);
    let permissions = Arc::new(PermissionCache::load(db.as_ref())?);

    let server = PaintboardServer::start(config, db, tokens, permissions).await?;
    server.run().await?;
    log::info!("Shutdown complete");
    Ok(())
}
