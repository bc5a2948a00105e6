//! Reviews service dispatcher.
//!
//! Consumes review requests from `RabbitMQ`, applies them to `PostgreSQL` and
//! replies to every request that carries a reply address.
//!
//! # Usage
//!
//! ```bash
//! docker compose up -d
//! cargo run --bin reviews-service
//! ```

use reviews_service::Config;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is not an error
    let _ = dotenvy::dotenv();
    reviews_service::init_tracing("info,reviews=debug,sqlx=warn,lapin=warn");

    let config = Config::from_env();
    info!(
        database_url = %config.database.url,
        amqp_url = %config.amqp.url,
        metrics_addr = ?config.metrics_addr,
        "Configuration loaded"
    );

    reviews_service::run(&config, shutdown_signal()).await?;

    info!("Service stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
