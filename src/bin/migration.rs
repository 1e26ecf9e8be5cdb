use anyhow::Context;
use storefront_core::{config, db};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config().context("loading configuration")?;
    config::init_tracing(&cfg.log_level, cfg.log_json);

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("connecting to database")?;
    db::run_migrations(&pool).await.context("applying migrations")?;
    db::close_pool(pool).await?;

    info!("Migrations applied");
    Ok(())
}
