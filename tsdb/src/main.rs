//! TimeSeriesDB HTTP server binary entry point.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tsdb::server::{CliArgs, ServerConfig, TsdbServer};
use tsdb::Tsdb;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();
    let config = args.to_config();
    let server_config = ServerConfig::from(&args);

    tracing::info!("Opening database with config: {:?}", config);

    let db = Tsdb::open(config).expect("Failed to open database");

    // Create and run the server
    let server = TsdbServer::new(Arc::new(db), server_config);
    server.run().await;
}
