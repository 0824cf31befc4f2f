use std::path::PathBuf;

use tokio::net::TcpListener;
use tracing::info;

use oxbow::chat::server;
use oxbow::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let addr = std::env::var("OXBOW_ADDR").unwrap_or_else(|_| "0.0.0.0:1234".into());
    let db_path: PathBuf = std::env::var("OXBOW_DB")
        .unwrap_or_else(|_| "database.sqlite".into())
        .into();

    // Open the store and bind before serving, so misconfiguration fails
    // fast instead of surfacing on the first client.
    let store = Store::open(&db_path)?;
    let listener = TcpListener::bind(&addr).await?;
    info!("oxbow listening on {addr}");

    server::serve(listener, store).await?;
    Ok(())
}
