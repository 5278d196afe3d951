use anyhow::Context;
use dotenvy::dotenv;
use log::{error, info};
use std::sync::Arc;

use chatdesk::channels::{ChannelRegistry, WhatsAppCloudAdapter};
use chatdesk::core::config::AppConfig;
use chatdesk::core::shared::state::AppState;
use chatdesk::core::shared::utils::{create_conn, run_migrations};
use chatdesk::jobs::JobScheduler;
use chatdesk::main_module::run_axum_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env().context("loading configuration")?;
    let addr = config.bind_addr()?;

    let pool = create_conn(&config.database_url).context("connecting to database")?;
    if let Err(e) = run_migrations(&pool) {
        error!("Failed to run migrations: {e}");
        anyhow::bail!("migrations failed: {e}");
    }

    let mut channels = ChannelRegistry::new();
    channels.register(Arc::new(WhatsAppCloudAdapter::new(
        config.channels.whatsapp_api_base.clone(),
    )));
    info!("Channels ready: {channels:?}");

    let state = Arc::new(AppState::new(pool, config, channels));

    let scheduler = JobScheduler::with_default_jobs(state.clone())?;
    let jobs = scheduler.start();

    run_axum_server(state, addr).await?;

    jobs.abort();
    info!("Server stopped");
    Ok(())
}
