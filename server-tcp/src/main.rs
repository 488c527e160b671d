use server_tcp::serve;
use shared::config::Config;
use std::sync::Arc;
use storage_engine::MokaStore;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load environment variables from .env file (if exists)
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = Config::from_env();
    let store = Arc::new(MokaStore::new_unbounded());

    let listener = TcpListener::bind(config.address()).await?;

    info!("TCP Server listening on tcp://{}", config.address());

    serve(listener, store).await
}
