//! Reviews demo client.
//!
//! Walks one review through its lifecycle over the broker:
//! create, read, patch, list and delete.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin reviews-service &
//! cargo run --bin reviews-client
//! ```

use reviews_core::review::Review;
use reviews_runtime::RpcError;
use reviews_service::Config;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    reviews_service::init_tracing("info,reviews=debug,lapin=warn");

    let config = Config::from_env();
    let client = reviews_service::connect_client(&config).await?;

    let created = client
        .create(&Review::new(
            "example_mail@example.com",
            7,
            "Solid purchase",
            "Arrived on time and works as described.",
        ))
        .await?;
    info!(id = created.id, author = %created.author, "Created review");

    let loaded = client.get_one(created.id).await?;
    info!(id = loaded.id, rating = loaded.rating, title = %loaded.title, "Loaded review");

    // Only the rating changes; empty fields keep their stored values
    client
        .update(&Review {
            id: created.id,
            rating: 9,
            ..Review::default()
        })
        .await?;
    let patched = client.get_one(created.id).await?;
    info!(id = patched.id, rating = patched.rating, "Patched review");

    let all = client.get_all().await?;
    info!(count = all.len(), "Listed reviews");

    client.delete(created.id).await?;
    info!(id = created.id, "Deleted review");

    match client.get_one(created.id).await {
        Err(RpcError::Remote { code, message }) => {
            info!(code, %message, "Deleted review is gone");
        }
        Ok(review) => warn!(id = review.id, "Deleted review is still readable"),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
