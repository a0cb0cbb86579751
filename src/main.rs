use anyhow::Context;
use ballot_engine::config::Config;
use ballot_engine::handlers::{router, AppState};
use ballot_engine::{database, notifications};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ballot_engine=debug")),
        )
        .init();

    info!("Starting Ballot Engine...");

    let config = Config::from_env();
    config.log_config();

    let pool = database::create_pool(&config.database)
        .await
        .context("could not connect to the database")?;

    if config.database.run_migrations {
        database::run_migrations(&pool).await.context("schema migration failed")?;
    }

    let gateway = notifications::gateway_from_config(&config.notifications)?;

    let app = router(AppState {
        pool,
        gateway,
        leaderboard_limit: config.leaderboard.limit,
    });

    let addr = config.bind_addr();
    info!("Server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
