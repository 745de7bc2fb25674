// src/main.rs
mod api;
mod config;
mod engine;
mod intake;
mod model;
mod pool;
mod report;
mod scorer;
mod selector;
mod stacking;
mod types;

use config::AppConfig;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("coil_load_planner=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let dotenv_result = dotenvy::dotenv();
    init_tracing();
    if let Err(err) = dotenv_result {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            warn!("Could not load .env: {}", err);
        }
    }

    let app_config = AppConfig::from_env();
    let packing = app_config.planner.packing_config();
    info!(
        strategy = %packing.strategy,
        max_weight = packing.max_container_weight,
        min_weight = packing.min_acceptable_weight,
        "Coil load planner starting"
    );

    if let Err(err) = api::start_api_server(app_config.api, app_config.planner).await {
        error!("API server terminated with an error: {}", err);
        std::process::exit(1);
    }
}
