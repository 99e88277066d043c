use std::path::PathBuf;

use clap::Parser;

/// Shadow AI traffic detection engine
#[derive(Parser, Debug)]
#[command(name = "shadowhunter")]
#[command(author, version, about)]
pub struct Cli {
    /// Capture real packets instead of running the synthetic generator.
    /// Requires elevated privileges.
    #[arg(long)]
    pub live: bool,

    /// Capture interface (default: auto-detect)
    #[arg(long, value_name = "NAME")]
    pub interface: Option<String>,

    /// Delete the persistent graph before starting
    #[arg(long)]
    pub reset: bool,

    /// Use a non-persistent in-memory graph store
    #[arg(long)]
    pub inmemory: bool,

    /// HTTP/WebSocket bind port
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Deterministic seed for the synthetic generator
    #[arg(long)]
    pub seed: Option<u64>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}
