// Wayfarer intake server
// Binds the intake HTTP adapter over a config-assembled service.

use api_server::ApiServer;
use std::sync::Arc;
use wayfarer_engine::config::Config;
use wayfarer_engine::service::TravelService;
use wayfarer_engine::store::Database;
use wayfarer_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry();

    let config = Config::load_or_create()?;
    init_telemetry_with_level(&config.core.log_level);

    let db = Database::new(&config.db_path()).await?;
    let service = Arc::new(TravelService::from_config(&config, &db));

    let server = ApiServer::start(service, &config.api_server.bind_addr).await?;
    tracing::info!("wayfarer intake server started on http://{}", server.addr());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    server.shutdown();
    db.close().await?;
    Ok(())
}
