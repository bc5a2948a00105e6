//! In-memory repositories.
//!
//! - [`InMemoryReviewRepository`]: `BTreeMap`-based storage with sequential ids
//! - [`FailingReviewRepository`]: every call returns a storage error

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use reviews_core::error::RepositoryError;
use reviews_core::repository::ReviewRepository;
use reviews_core::review::Review;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory review repository for fast, deterministic testing.
///
/// Identifiers are assigned sequentially from 1 and never reused.
///
/// # Example
///
/// ```
/// use reviews_testing::{InMemoryReviewRepository, test_review};
/// use reviews_core::repository::ReviewRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let repository = InMemoryReviewRepository::new();
///
/// let created = repository.create(&test_review()).await?;
/// assert_eq!(created.id, 1);
/// assert_eq!(repository.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryReviewRepository {
    reviews: Arc<RwLock<BTreeMap<i64, Review>>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryReviewRepository {
    /// Create a new empty repository
    #[must_use]
    pub fn new() -> Self {
        Self {
            reviews: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Create a repository holding `reviews`, each assigned a fresh id
    #[must_use]
    pub fn with_reviews(reviews: impl IntoIterator<Item = Review>) -> Self {
        let repository = Self::new();
        for review in reviews {
            repository.insert(review);
        }
        repository
    }

    /// Number of stored reviews
    #[must_use]
    pub fn len(&self) -> usize {
        self.reviews.read().unwrap().len()
    }

    /// Check if the repository is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reviews.read().unwrap().is_empty()
    }

    /// Snapshot of one stored review, bypassing the async API
    #[must_use]
    pub fn get(&self, id: i64) -> Option<Review> {
        self.reviews.read().unwrap().get(&id).cloned()
    }

    fn insert(&self, review: Review) -> Review {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = review.with_id(id);
        self.reviews.write().unwrap().insert(id, stored.clone());
        stored
    }
}

impl Default for InMemoryReviewRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ReviewRepository for InMemoryReviewRepository {
    fn create(
        &self,
        review: &Review,
    ) -> Pin<Box<dyn Future<Output = Result<Review, RepositoryError>> + Send + '_>> {
        let review = review.clone();
        Box::pin(async move { Ok(self.insert(review)) })
    }

    fn find_one(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Review, RepositoryError>> + Send + '_>> {
        Box::pin(async move { self.get(id).ok_or(RepositoryError::NotFound { id }) })
    }

    fn find_all(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Review>, RepositoryError>> + Send + '_>> {
        Box::pin(async move { Ok(self.reviews.read().unwrap().values().cloned().collect()) })
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

            let mut reviews = self.reviews.write().unwrap();
            let stored = reviews
                .get_mut(&patch.id)
                .ok_or(RepositoryError::NotFound { id: patch.id })?;
            *stored = stored.clone().merged_with(&patch);
            Ok(stored.clone())
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

            self.reviews
                .write()
                .unwrap()
                .remove(&id)
                .map(drop)
                .ok_or(RepositoryError::NotFound { id })
        })
    }
}

/// Repository whose every operation fails with [`RepositoryError::Storage`].
///
/// Used to exercise the internal-error path of the dispatcher.
#[derive(Clone, Debug)]
pub struct FailingReviewRepository {
    reason: String,
}

impl FailingReviewRepository {
    /// Fail every call with `reason`
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T: Send + 'static>(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + '_>> {
        let err = RepositoryError::Storage(self.reason.clone());
        Box::pin(async move { Err(err) })
    }
}

impl Default for FailingReviewRepository {
    fn default() -> Self {
        Self::new("connection refused")
    }
}

impl ReviewRepository for FailingReviewRepository {
    fn create(
        &self,
        _review: &Review,
    ) -> Pin<Box<dyn Future<Output = Result<Review, RepositoryError>> + Send + '_>> {
        self.fail()
    }

    fn find_one(
        &self,
        _id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Review, RepositoryError>> + Send + '_>> {
        self.fail()
    }

    fn find_all(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Review>, RepositoryError>> + Send + '_>> {
        self.fail()
    }

    fn update(
        &self,
        _review: &Review,
    ) -> Pin<Box<dyn Future<Output = Result<Review, RepositoryError>> + Send + '_>> {
        self.fail()
    }

    fn delete(
        &self,
        _id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
        self.fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_review;

    #[tokio::test]
    async fn ids_are_sequential_and_not_reused() {
        let repository = InMemoryReviewRepository::new();

        let first = repository.create(&test_review()).await.unwrap();
        repository.delete(first.id).await.unwrap();
        let second = repository.create(&test_review()).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn create_ignores_supplied_id() {
        let repository = InMemoryReviewRepository::new();

        let created = repository.create(&test_review().with_id(99)).await.unwrap();

        assert_eq!(created.id, 1);
        assert!(repository.get(99).is_none());
    }

    #[tokio::test]
    async fn update_merges_non_empty_fields() {
        let repository = InMemoryReviewRepository::with_reviews([test_review()]);
        let patch = Review {
            id: 1,
            rating: 4,
            ..Review::default()
        };

        let updated = repository.update(&patch).await.unwrap();

        assert_eq!(updated.rating, 4);
        assert_eq!(updated.title, "Review Title");
        assert_eq!(repository.get(1), Some(updated));
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let repository = InMemoryReviewRepository::new();

        assert_eq!(
            repository.find_one(5).await.unwrap_err(),
            RepositoryError::NotFound { id: 5 }
        );
        assert_eq!(
            repository.update(&test_review().with_id(5)).await.unwrap_err(),
            RepositoryError::NotFound { id: 5 }
        );
        assert_eq!(
            repository.delete(5).await.unwrap_err(),
            RepositoryError::NotFound { id: 5 }
        );
    }

    #[tokio::test]
    async fn zero_id_is_missing_field() {
        let repository = InMemoryReviewRepository::new();

        assert_eq!(
            repository.delete(0).await.unwrap_err(),
            RepositoryError::MissingField { fields: vec!["id"] }
        );
    }

    #[tokio::test]
    async fn failing_repository_fails() {
        let repository = FailingReviewRepository::default();

        assert_eq!(
            repository.find_all().await.unwrap_err(),
            RepositoryError::Storage("connection refused".to_string())
        );
    }
}
