//! Server configuration and CLI arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::Config;

/// Command-line arguments for the server binary.
#[derive(Debug, Parser)]
#[command(name = "tsdb", about = "TimeSeriesDB HTTP query server")]
pub struct CliArgs {
    /// Directory holding the day files.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Seconds a sample stays "current" for /stats.
    #[arg(long, default_value_t = 60)]
    pub current_window_secs: u64,
}

impl CliArgs {
    /// Engine configuration derived from the CLI arguments.
    pub fn to_config(&self) -> Config {
        Config {
            data_dir: self.data_dir.clone(),
            current_value_window: Duration::from_secs(self.current_window_secs),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl From<&CliArgs> for ServerConfig {
    fn from(args: &CliArgs) -> Self {
        Self { port: args.port }
    }
}
