//! `PostgreSQL` review repository for the reviews service.
//!
//! This crate provides [`PostgresReviewRepository`], which implements the
//! `ReviewRepository` trait from `reviews-core` on top of a sqlx connection
//! pool:
//!
//! - Identifiers assigned by a `BIGSERIAL` column
//! - Patch semantics in a single `UPDATE ... RETURNING` statement
//! - Embedded migrations (`migrations/`)
//!
//! # Example
//!
//! ```ignore
//! use reviews_postgres::PostgresReviewRepository;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let repository = PostgresReviewRepository::connect("postgres://localhost/reviews", 10).await?;
//!     repository.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use reviews_core::error::RepositoryError;
use reviews_core::repository::ReviewRepository;
use reviews_core::review::Review;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

/// Row shape shared by every query.
#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: i64,
    author: String,
    rating: i16,
    title: String,
    description: String,
}

impl From<ReviewRow> for Review {
    fn from(row: ReviewRow) -> Self {
        Self {
            id: row.id,
            author: row.author,
            rating: row.rating,
            title: row.title,
            description: row.description,
        }
    }
}

/// `PostgreSQL`-backed review repository.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct PostgresReviewRepository {
    pool: PgPool,
}

impl PostgresReviewRepository {
    /// Create a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if migrations fail.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }
}

fn storage(operation: &'static str) -> impl FnOnce(sqlx::Error) -> RepositoryError {
    move |e| {
        metrics::counter!("repository_errors_total", "operation" => operation).increment(1);
        RepositoryError::Storage(format!("Failed to {operation} review: {e}"))
    }
}

fn record_query(operation: &'static str, started: Instant) {
    metrics::histogram!("repository_query_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

impl ReviewRepository for PostgresReviewRepository {
    fn create(
        &self,
        review: &Review,
    ) -> Pin<Box<dyn Future<Output = Result<Review, RepositoryError>> + Send + '_>> {
        let review = review.clone();
        Box::pin(async move {
            let started = Instant::now();
            let (id,): (i64,) = sqlx::query_as(
                r"
                INSERT INTO reviews (author, rating, title, description)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                ",
            )
            .bind(&review.author)
            .bind(review.rating)
            .bind(&review.title)
            .bind(&review.description)
            .fetch_one(&self.pool)
            .await
            .map_err(storage("create"))?;
            record_query("create", started);

            tracing::debug!(id, "Review created");
            Ok(review.with_id(id))
        })
    }

    fn find_one(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Review, RepositoryError>> + Send + '_>> {
        Box::pin(async move {
            let started = Instant::now();
            let row: Option<ReviewRow> = sqlx::query_as(
                "SELECT id, author, rating, title, description FROM reviews WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("load"))?;
            record_query("find_one", started);

            row.map(Review::from).ok_or(RepositoryError::NotFound { id })
        })
    }

    fn find_all(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Review>, RepositoryError>> + Send + '_>> {
        Box::pin(async move {
            let started = Instant::now();
            let rows: Vec<ReviewRow> = sqlx::query_as(
                "SELECT id, author, rating, title, description FROM reviews ORDER BY id",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list"))?;
            record_query("find_all", started);

            Ok(rows.into_iter().map(Review::from).collect())
        })
    }

    fn update(
        &self,
        review: &Review,
    ) -> Pin<Box<dyn Future<Output = Result<Review, RepositoryError>> + Send + '_>> {
        let patch = review.clone();
        Box::pin(async move {
            if patch.id == 0 {
                return Err(RepositoryError::MissingField { fields: vec!["id"] });
            }

            // Empty strings and a zero rating keep the stored value.
            let started = Instant::now();
            let row: Option<ReviewRow> = sqlx::query_as(
                r"
                UPDATE reviews SET
                    author      = COALESCE(NULLIF($2::TEXT, ''), author),
                    rating      = COALESCE(NULLIF($3::SMALLINT, 0), rating),
                    title       = COALESCE(NULLIF($4::TEXT, ''), title),
                    description = COALESCE(NULLIF($5::TEXT, ''), description)
                WHERE id = $1
                RETURNING id, author, rating, title, description
                ",
            )
            .bind(patch.id)
            .bind(&patch.author)
            .bind(patch.rating)
            .bind(&patch.title)
            .bind(&patch.description)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("update"))?;
            record_query("update", started);

            row.map(Review::from)
                .ok_or(RepositoryError::NotFound { id: patch.id })
        })
    }

    fn delete(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
        Box::pin(async move {
            if id == 0 {
                return Err(RepositoryError::MissingField { fields: vec!["id"] });
            }

            let started = Instant::now();
            let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(storage("delete"))?;
            record_query("delete", started);

            if result.rows_affected() == 0 {
                return Err(RepositoryError::NotFound { id });
            }
            tracing::debug!(id, "Review deleted");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_convert_into_reviews() {
        let row = ReviewRow {
            id: 7,
            author: "a@example.com".to_string(),
            rating: 5,
            title: "Title".to_string(),
            description: "Description".to_string(),
        };

        assert_eq!(
            Review::from(row),
            Review::new("a@example.com", 5, "Title", "Description").with_id(7)
        );
    }

    #[test]
    fn repository_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresReviewRepository>();
    }
}
