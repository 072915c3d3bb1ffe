// src/cli.rs

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "cachebreak-proxy",
    version,
    about = "Caching HTTP reverse proxy with LRU/TTL eviction and conditional revalidation"
)]
pub struct Cli {
    /// Path to the proxy configuration document.
    #[arg(short, long, value_name = "FILE", default_value = "cache_config.json")]
    pub config: PathBuf,

    /// Emit logs as JSON instead of the compact human-readable format.
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
