//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Arcade command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "arcade", about = "Live match sync demo")]
pub struct CliArgs {
    /// Pub/sub server address.
    #[arg(long)]
    pub server: Option<String>,

    /// Pub/sub server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Animation step dwell in milliseconds.
    #[arg(long)]
    pub dwell_ms: Option<u64>,

    /// Rejected updates tolerated before a snapshot refetch.
    #[arg(long)]
    pub staleness_budget: Option<u32>,

    /// Seed for initiator dice and wheel spins.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    ///
    /// A dwell override shorter than the configured jump also shortens the
    /// jump so the result still validates.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if let Some(dwell) = args.dwell_ms {
            self.animation.step_dwell_ms = dwell;
            self.animation.jump_ms = self.animation.jump_ms.min(dwell);
        }
        if let Some(budget) = args.staleness_budget {
            self.sync.staleness_budget = budget;
        }
        if let Some(seed) = args.seed {
            self.debug.rng_seed = Some(seed);
        }
    }
}
