//! Persistence capability consumed by the service layer.
//!
//! # Implementations
//!
//! - `PostgresReviewRepository` (`reviews-postgres`) - production storage
//! - `InMemoryReviewRepository` (`reviews-testing`) - fast, deterministic tests

use crate::error::RepositoryError;
use crate::review::Review;
use std::future::Future;
use std::pin::Pin;

/// Storage for reviews.
///
/// Implementations own their concurrency safety (connection pooling, locks);
/// a single instance is shared by every concurrently dispatched message.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the repository can be injected as
/// `Arc<dyn ReviewRepository>`.
pub trait ReviewRepository: Send + Sync {
    /// Persist a new review and return it with its freshly assigned identifier.
    ///
    /// Any identifier carried by `review` is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if the insert fails.
    fn create(
        &self,
        review: &Review,
    ) -> Pin<Box<dyn Future<Output = Result<Review, RepositoryError>> + Send + '_>>;

    /// Load one review.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if no review has this identifier.
    fn find_one(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Review, RepositoryError>> + Send + '_>>;

    /// Load every review, ordered by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if the query fails.
    fn find_all(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Review>, RepositoryError>> + Send + '_>>;

    /// Apply a patch and return the merged, persisted review.
    ///
    /// Zero and empty fields of `review` leave the stored value unchanged.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::MissingField`] if `review.id` is zero
    /// - [`RepositoryError::NotFound`] if no review has this identifier
    fn update(
        &self,
        review: &Review,
    ) -> Pin<Box<dyn Future<Output = Result<Review, RepositoryError>> + Send + '_>>;

    /// Delete one review.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::MissingField`] if `id` is zero
    /// - [`RepositoryError::NotFound`] if no review has this identifier
    fn delete(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>>;
}
