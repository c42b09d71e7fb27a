use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "allocator-governance")]
#[command(version)]
#[command(about = "Allocator application governance service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, default_value = "config", env = "GOVERNANCE_CONFIG_DIR")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and, when enabled, the approval poller
    Serve {
        /// Override api.port
        #[arg(short, long)]
        port: Option<u16>,
        /// Do not start the approval poller even if enabled in config
        #[arg(long)]
        no_poller: bool,
    },
    /// Run a single reconciliation tick and print its report
    PollOnce,
    /// Rebuild an application from its full event stream and compare it
    /// with the snapshot-backed load
    Replay {
        /// Application id
        id: String,
    },
    /// Apply pending database migrations
    Migrate,
}
