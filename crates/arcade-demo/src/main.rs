//! Demo binary that plays one race, one battle and one wheel match between
//! clients connected through a local relay.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p arcade-demo` to watch the three matches in the log.
//! Run with `cargo run -p arcade-demo -- --dwell-ms 100` to speed up animation.
//! Run with `cargo run -p arcade-demo -- --port 9000` to host the relay elsewhere.

mod games;

use arcade_config::{CliArgs, Config, default_config_dir};
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    arcade_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    info!(
        dwell_ms = config.animation.step_dwell_ms,
        die_sides = config.race.die_sides,
        "arcade demo starting"
    );

    let wire = games::Wire::open(&config).await;
    if let Err(e) = games::play_race(&wire, &config).await {
        error!("race demo failed: {e}");
    }
    if let Err(e) = games::play_battle(&wire, &config).await {
        error!("battle demo failed: {e}");
    }
    if let Err(e) = games::play_wheel(&wire, &config).await {
        error!("wheel demo failed: {e}");
    }
    wire.close();

    info!("arcade demo finished");
}
