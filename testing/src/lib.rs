//! # Reviews Testing
//!
//! Testing utilities for the reviews service.
//!
//! This crate provides:
//! - [`InMemoryReviewRepository`]: a `BTreeMap`-backed repository
//! - [`FailingReviewRepository`]: a repository whose every call fails
//! - [`InMemoryMessageBus`]: a channel-backed bus with prefetch and recorded
//!   acknowledgements
//! - Fixtures and proptest strategies for reviews
//!
//! ## Example
//!
//! ```ignore
//! use reviews_testing::{InMemoryMessageBus, InMemoryReviewRepository, test_review};
//!
//! #[tokio::test]
//! async fn create_round_trip() {
//!     let bus = Arc::new(InMemoryMessageBus::new());
//!     let service = ReviewService::new(Arc::new(InMemoryReviewRepository::new()));
//!     tokio::spawn(Dispatcher::new(service, bus.clone()).run());
//!
//!     let client = ReviewsClient::new(RpcClient::connect(bus).await.unwrap());
//!     let created = client.create(&test_review()).await.unwrap();
//!     assert_eq!(client.get_one(created.id).await.unwrap(), created);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Channel-backed message bus
pub mod bus;

/// In-memory repositories
pub mod repository;

/// Review fixtures.
pub mod fixtures {
    use reviews_core::review::Review;

    /// A valid, already trimmed review without identifier.
    #[must_use]
    pub fn test_review() -> Review {
        Review::new(
            "example_mail@example.com",
            3,
            "Review Title",
            "Description of the review",
        )
    }

    /// `count` valid reviews with distinct authors and ratings.
    #[must_use]
    pub fn test_reviews(count: usize) -> Vec<Review> {
        (0..count)
            .map(|i| Review {
                author: format!("author{i}@example.com"),
                rating: i16::try_from(i % 10).unwrap_or(0) + 1,
                ..test_review()
            })
            .collect()
    }

    /// Install a `tracing` subscriber honouring `RUST_LOG`, once per process.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use reviews_core::review::{MAX_RATING, MIN_RATING, Review};

    /// Author addresses accepted by the default rules.
    pub fn valid_author() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_.]{0,15}@[a-z]{1,10}\\.[a-z]{2,4}"
    }

    /// New reviews (no identifier) that pass full validation.
    pub fn valid_review() -> impl Strategy<Value = Review> {
        (
            valid_author(),
            MIN_RATING..=MAX_RATING,
            "[A-Za-z][A-Za-z ]{1,40}[a-z]",
            "[A-Za-z][A-Za-z .,]{1,200}[a-z]",
        )
            .prop_map(|(author, rating, title, description)| {
                Review::new(author, rating, title, description)
            })
    }

    /// Ratings outside the accepted range, zero excluded.
    pub fn invalid_rating() -> impl Strategy<Value = i16> {
        prop_oneof![i16::MIN..MIN_RATING, (MAX_RATING + 1)..=i16::MAX]
            .prop_filter("zero means absent", |rating| *rating != 0)
    }
}

pub use bus::InMemoryMessageBus;
pub use fixtures::{init_tracing, test_review, test_reviews};
pub use repository::{FailingReviewRepository, InMemoryReviewRepository};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use reviews_core::review::{ReviewValidator, RuleValidator};

    #[test]
    fn fixture_passes_validation() {
        assert!(RuleValidator.validate(&test_review()).is_ok());
        assert_eq!(test_review().trimmed(), test_review());
    }

    #[test]
    fn fixtures_are_distinct() {
        let reviews = test_reviews(3);
        assert_eq!(reviews.len(), 3);
        assert_ne!(reviews[0], reviews[1]);
        assert!(reviews.iter().all(|r| RuleValidator.validate(r).is_ok()));
    }

    proptest! {
        #[test]
        fn generated_reviews_are_valid(review in properties::valid_review()) {
            prop_assert!(RuleValidator.validate(&review).is_ok());
        }

        #[test]
        fn generated_ratings_are_invalid(rating in properties::invalid_rating()) {
            let review = reviews_core::review::Review { rating, ..test_review() };
            prop_assert!(RuleValidator.validate(&review).is_err());
        }
    }
}
