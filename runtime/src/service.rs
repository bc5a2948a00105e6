//! Operation service.
//!
//! Thin orchestration between the dispatcher and the repository. The service
//! owns the rules the repository cannot enforce on its own:
//!
//! - input is trimmed and validated before it reaches storage
//! - a review without identifier is validated in full, one with an
//!   identifier as a patch
//! - update, delete and read-one require a non-zero identifier
//! - repository failures are folded into the closed [`ServiceError`] set

use reviews_core::error::{ServiceError, ValidationError};
use reviews_core::repository::ReviewRepository;
use reviews_core::review::{Review, ReviewValidator, RuleValidator};
use std::sync::Arc;

/// Review CRUD with validation and existence checks.
#[derive(Clone)]
pub struct ReviewService {
    repository: Arc<dyn ReviewRepository>,
    validator: Arc<dyn ReviewValidator>,
}

impl ReviewService {
    /// Create a service over `repository` using the default rule set.
    #[must_use]
    pub fn new(repository: Arc<dyn ReviewRepository>) -> Self {
        Self {
            repository,
            validator: Arc::new(RuleValidator),
        }
    }

    /// Replace the validation rule set.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn ReviewValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Create a review and return it with its assigned identifier.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Validation`] if the review breaks a field rule
    /// - [`ServiceError::Internal`] if storage fails
    pub async fn create(&self, review: Review) -> Result<Review, ServiceError> {
        let review = review.trimmed();
        self.validator.validate(&review)?;

        Ok(self.repository.create(&review).await?)
    }

    /// Patch a review and return the merged, persisted record.
    ///
    /// Empty and zero fields leave the stored value unchanged.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Validation`] if `id` is zero or a field is invalid
    /// - [`ServiceError::NotFound`] if no review has this identifier
    /// - [`ServiceError::Internal`] if storage fails
    pub async fn update(&self, patch: Review) -> Result<Review, ServiceError> {
        require_id(patch.id)?;
        let patch = patch.trimmed();
        self.validator.validate(&patch)?;

        Ok(self.repository.update(&patch).await?)
    }

    /// Delete a review.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Validation`] if `id` is zero
    /// - [`ServiceError::NotFound`] if no review has this identifier
    /// - [`ServiceError::Internal`] if storage fails
    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        require_id(id)?;
        Ok(self.repository.delete(id).await?)
    }

    /// Read one review.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Validation`] if `id` is zero
    /// - [`ServiceError::NotFound`] if no review has this identifier
    /// - [`ServiceError::Internal`] if storage fails
    pub async fn read_one(&self, id: i64) -> Result<Review, ServiceError> {
        require_id(id)?;
        Ok(self.repository.find_one(id).await?)
    }

    /// Read every review.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Internal`] if storage fails.
    pub async fn read_all(&self) -> Result<Vec<Review>, ServiceError> {
        Ok(self.repository.find_all().await?)
    }
}

impl std::fmt::Debug for ReviewService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewService").finish_non_exhaustive()
    }
}

fn require_id(id: i64) -> Result<(), ValidationError> {
    if id == 0 {
        Err(ValidationError::missing("id"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use reviews_core::error::ErrorKind;
    use reviews_testing::{InMemoryReviewRepository, test_review};

    fn service() -> ReviewService {
        ReviewService::new(Arc::new(InMemoryReviewRepository::new()))
    }

    #[tokio::test]
    async fn create_assigns_identifier() {
        let service = service();

        let created = service.create(test_review()).await.unwrap();

        assert_eq!(created.id, 1);
        assert_eq!(created, test_review().with_id(1));
    }

    #[tokio::test]
    async fn create_trims_text_fields() {
        let service = service();
        let review = Review {
            title: "  Review Title  ".into(),
            ..test_review()
        };

        let created = service.create(review).await.unwrap();

        assert_eq!(created.title, "Review Title");
    }

    #[tokio::test]
    async fn create_rejects_invalid_email() {
        let service = service();
        let review = Review {
            author: "invalid".into(),
            ..test_review()
        };

        let err = service.create(review).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(service.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_empty_fields() {
        let service = service();
        let review = Review {
            title: String::new(),
            description: String::new(),
            ..test_review()
        };

        let err = service.create(review).await.unwrap_err();

        let ServiceError::Validation(err) = err else {
            panic!("expected validation error, got {err:?}");
        };
        let fields: Vec<_> = err.fields.iter().map(|f| f.field).collect();
        assert_eq!(fields, ["title", "description"]);
    }

    #[tokio::test]
    async fn create_with_identifier_validates_as_patch() {
        let service = service();
        let partial = Review {
            id: 5,
            author: "a@b.co".into(),
            ..Review::default()
        };

        let created = service.create(partial).await.unwrap();

        assert_eq!(created.id, 1);
        assert_eq!(created.author, "a@b.co");
        assert_eq!(created.rating, 0);
        assert_eq!(service.read_one(1).await.unwrap(), created);
    }

    #[tokio::test]
    async fn create_with_identifier_still_checks_provided_fields() {
        let service = service();
        let partial = Review {
            id: 5,
            rating: 11,
            ..Review::default()
        };

        let err = service.create(partial).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn update_replaces_provided_fields() {
        let service = service();
        let created = service.create(test_review()).await.unwrap();
        let patch = Review::new(
            "updated_mail@example.com",
            4,
            "updated Review Title",
            "updated Description of the review",
        )
        .with_id(created.id);

        let updated = service.update(patch.clone()).await.unwrap();

        assert_eq!(updated, patch);
        assert_eq!(service.read_one(created.id).await.unwrap(), patch);
    }

    #[tokio::test]
    async fn update_with_empty_fields_keeps_record() {
        let service = service();
        let created = service.create(test_review()).await.unwrap();

        let updated = service
            .update(Review::default().with_id(created.id))
            .await
            .unwrap();

        assert_eq!(updated, created);
    }

    #[tokio::test]
    async fn update_requires_identifier() {
        let service = service();
        service.create(test_review()).await.unwrap();

        let err = service.update(test_review()).await.unwrap_err();

        assert_eq!(err, ServiceError::Validation(ValidationError::missing("id")));
    }

    #[tokio::test]
    async fn update_unknown_identifier_is_not_found() {
        let service = service();

        let err = service
            .update(test_review().with_id(42))
            .await
            .unwrap_err();

        assert_eq!(err, ServiceError::NotFound { id: 42 });
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let service = service();
        let created = service.create(test_review()).await.unwrap();

        service.delete(created.id).await.unwrap();

        assert_eq!(
            service.read_one(created.id).await.unwrap_err(),
            ServiceError::NotFound { id: created.id }
        );
        assert_eq!(
            service.delete(created.id).await.unwrap_err(),
            ServiceError::NotFound { id: created.id }
        );
    }

    #[tokio::test]
    async fn zero_identifier_is_validation_error() {
        let service = service();
        service.create(test_review()).await.unwrap();

        assert_eq!(service.delete(0).await.unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(service.read_one(0).await.unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(service.read_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn read_all_returns_every_record() {
        for count in [0, 1, 3] {
            let service = service();
            for _ in 0..count {
                service.create(test_review()).await.unwrap();
            }

            assert_eq!(service.read_all().await.unwrap().len(), count);
        }
    }

    #[tokio::test]
    async fn custom_validator_is_used() {
        struct RejectAll;
        impl ReviewValidator for RejectAll {
            fn validate(&self, _review: &Review) -> Result<(), ValidationError> {
                Err(ValidationError::missing("anything"))
            }
        }

        let service = service().with_validator(Arc::new(RejectAll));

        assert_eq!(
            service.create(test_review()).await.unwrap_err().kind(),
            ErrorKind::Validation
        );
    }
}
