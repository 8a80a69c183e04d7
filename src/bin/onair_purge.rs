//! onair-purge: delete every song and reset the play counter
//!
//! Usage: `onair-purge [--config <path>] [--reset <value>]`
//!
//! `--reset` defaults to 0. Users, groups and votes are left in place.

use tracing::{error, info};

use onair::config::Config;
use onair::services::purge_songs;
use onair::storage::init_storage;
use onair::utils::bootstrap::{init_tracing, parse_config_path};

fn parse_reset() -> Result<i64, Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--reset" {
            let value = args.next().ok_or("--reset needs a value")?;
            return Ok(value.parse()?);
        }
        if let Some(value) = arg.strip_prefix("--reset=") {
            return Ok(value.parse()?);
        }
    }
    Ok(0)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let reset_to = parse_reset()?;
    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let store = init_storage(&config.storage).await?;
    let report = purge_songs(store, reset_to).await?;

    info!(
        deleted = report.deleted,
        counter = report.counter,
        "onair-purge finished"
    );
    Ok(())
}
