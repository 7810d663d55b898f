use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use problembank_api::{build_router, AppState};
use problembank_common::Config;
use problembank_pipeline::ProblemBank;
use problembank_store::PgProblemStore;

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("problembank=info,tower_http=info"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgProblemStore::new(pool));
    store.migrate().await?;
    info!("Migrations applied");

    let state = AppState {
        bank: ProblemBank::new(store.clone(), store),
        similarity_threshold: config.similarity_threshold,
    };
    let app = build_router(state, &config.allowed_origins);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("Problem bank API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
