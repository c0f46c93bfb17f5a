use std::sync::Arc;

use crm_messaging::{
    config::Config, dispatcher, handlers, provider::EvolutionClient, store::PgStore,
    types::AppState,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("crm_messaging=info,tower_http=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let store = PgStore::connect(&config.database_url, config.db_max_connections).await?;
    store.migrate().await?;

    let state = Arc::new(AppState {
        store: Arc::new(store),
        provider: EvolutionClient::new(config.provider_timeout)?,
        config: config.clone(),
    });
    let _ticker = dispatcher::spawn_ticker(state.clone());

    let app = handlers::router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(%addr, "crm messaging server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "server stopped");
        std::process::exit(1);
    }
}
