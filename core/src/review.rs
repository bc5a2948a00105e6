//! The review record and its validation rules.
//!
//! A [`Review`] is validated in one of two modes, chosen by whether it
//! already carries an identifier:
//!
//! - **Full** (`id == 0`): a new record, every field is required.
//! - **Patch** (`id != 0`): a partial update, every field is optional. A
//!   zero or empty field means "leave the stored value unchanged".
//!
//! Validation is a pluggable capability ([`ReviewValidator`]); the service
//! ships with [`RuleValidator`], which implements the rules below.
//!
//! | Field         | Rule                                   |
//! |---------------|----------------------------------------|
//! | `author`      | e-mail address                         |
//! | `rating`      | `1..=10`                               |
//! | `title`       | 3 to 50 characters after trimming      |
//! | `description` | 3 to 500 characters after trimming     |

use crate::error::{FieldError, ValidationError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Lowest accepted rating.
pub const MIN_RATING: i16 = 1;
/// Highest accepted rating.
pub const MAX_RATING: i16 = 10;

const TITLE_LEN: (usize, usize) = (3, 50);
const DESCRIPTION_LEN: (usize, usize) = (3, 500);

#[allow(clippy::expect_used)]
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("hardcoded e-mail pattern should always compile")
});

/// A single review.
///
/// Every member defaults when absent from the wire, so `{"id": 5, "rating": 4}`
/// decodes into a patch that only touches the rating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Review {
    /// Identifier assigned by the repository (`0` = not yet persisted)
    pub id: i64,
    /// Author e-mail address
    pub author: String,
    /// Rating between [`MIN_RATING`] and [`MAX_RATING`]
    pub rating: i16,
    /// Short title
    pub title: String,
    /// Free-form description
    pub description: String,
}

impl Review {
    /// Create a new, not yet persisted review.
    #[must_use]
    pub fn new(
        author: impl Into<String>,
        rating: i16,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            author: author.into(),
            rating,
            title: title.into(),
            description: description.into(),
        }
    }

    /// Return the same review with the given identifier.
    #[must_use]
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    /// The validation mode this review is subject to.
    #[must_use]
    pub const fn validation_mode(&self) -> ValidationMode {
        if self.id == 0 {
            ValidationMode::Full
        } else {
            ValidationMode::Patch
        }
    }

    /// Trim surrounding whitespace from every text field.
    ///
    /// A whitespace-only field becomes empty, which patch semantics read as
    /// "unchanged" and full validation rejects as missing.
    #[must_use]
    pub fn trimmed(self) -> Self {
        Self {
            id: self.id,
            author: self.author.trim().to_string(),
            rating: self.rating,
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
        }
    }

    /// Overlay the non-empty fields of `patch` onto `self`.
    ///
    /// Zero and empty values in `patch` leave the current value in place.
    /// Note that this makes it impossible to clear a field on purpose.
    #[must_use]
    pub fn merged_with(mut self, patch: &Self) -> Self {
        if !patch.author.is_empty() {
            self.author.clone_from(&patch.author);
        }
        if patch.rating != 0 {
            self.rating = patch.rating;
        }
        if !patch.title.is_empty() {
            self.title.clone_from(&patch.title);
        }
        if !patch.description.is_empty() {
            self.description.clone_from(&patch.description);
        }
        self
    }
}

/// Which rule set applies to a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// New record: all fields are required
    Full,
    /// Partial update: all fields are optional
    Patch,
}

/// Pluggable validation capability.
pub trait ReviewValidator: Send + Sync {
    /// Validate a (trimmed) review.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] listing every offending field.
    fn validate(&self, review: &Review) -> Result<(), ValidationError>;
}

/// The default rule set (see the module documentation).
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleValidator;

impl ReviewValidator for RuleValidator {
    fn validate(&self, review: &Review) -> Result<(), ValidationError> {
        let required = review.validation_mode() == ValidationMode::Full;
        let mut errors = Vec::new();

        if review.author.is_empty() {
            if required {
                errors.push(FieldError::missing("author"));
            }
        } else if !EMAIL.is_match(&review.author) {
            errors.push(FieldError::new("author", "must be an e-mail address"));
        }

        if review.rating == 0 {
            if required {
                errors.push(FieldError::missing("rating"));
            }
        } else if !(MIN_RATING..=MAX_RATING).contains(&review.rating) {
            errors.push(FieldError::new(
                "rating",
                format!("must be between {MIN_RATING} and {MAX_RATING}"),
            ));
        }

        check_length(&mut errors, "title", &review.title, TITLE_LEN, required);
        check_length(
            &mut errors,
            "description",
            &review.description,
            DESCRIPTION_LEN,
            required,
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(errors))
        }
    }
}

fn check_length(
    errors: &mut Vec<FieldError>,
    field: &'static str,
    value: &str,
    (min, max): (usize, usize),
    required: bool,
) {
    let len = value.chars().count();
    if len == 0 {
        if required {
            errors.push(FieldError::missing(field));
        }
    } else if len < min || len > max {
        errors.push(FieldError::new(
            field,
            format!("length must be between {min} and {max}"),
        ));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn valid() -> Review {
        Review::new(
            "example_mail@example.com",
            3,
            "Title",
            "Description of the review",
        )
    }

    fn check(review: &Review) -> Result<(), ValidationError> {
        RuleValidator.validate(&review.clone().trimmed())
    }

    #[test]
    fn accepts_complete_review() {
        assert!(check(&valid()).is_ok());
    }

    #[test]
    fn new_review_requires_every_field() {
        let err = check(&Review::default()).unwrap_err();
        let fields: Vec<_> = err.fields.iter().map(|f| f.field).collect();
        assert_eq!(fields, ["author", "rating", "title", "description"]);
    }

    #[test]
    fn rejects_invalid_author() {
        let review = Review {
            author: "invalid".into(),
            ..valid()
        };
        let err = check(&review).unwrap_err();
        assert_eq!(err.fields[0].field, "author");
    }

    #[test]
    fn rejects_out_of_range_rating() {
        assert!(check(&Review { rating: 11, ..valid() }).is_err());
        assert!(check(&Review { rating: -1, ..valid() }).is_err());
    }

    #[test]
    fn whitespace_title_is_missing() {
        assert!(check(&Review { title: "   ".into(), ..valid() }).is_err());
        assert!(check(&Review { description: "   ".into(), ..valid() }).is_err());
    }

    #[test]
    fn rejects_short_and_long_text() {
        assert!(check(&Review { title: "ab".into(), ..valid() }).is_err());
        assert!(check(&Review { title: "a".repeat(51), ..valid() }).is_err());
        assert!(check(&Review { description: "ab".into(), ..valid() }).is_err());
        assert!(check(&Review { description: "a".repeat(501), ..valid() }).is_err());
    }

    #[test]
    fn patch_allows_empty_fields() {
        let patch = Review {
            id: 1,
            rating: 0,
            title: String::new(),
            description: String::new(),
            ..valid()
        };
        assert_eq!(patch.validation_mode(), ValidationMode::Patch);
        assert!(check(&patch).is_ok());
        assert!(check(&Review::default().with_id(1)).is_ok());
    }

    #[test]
    fn patch_still_checks_present_fields() {
        let patch = Review {
            id: 1,
            title: "as".into(),
            ..Review::default()
        };
        assert!(check(&patch).is_err());
    }

    #[test]
    fn merge_keeps_empty_fields() {
        let stored = Review {
            title: "Great".into(),
            ..valid()
        }
        .with_id(5);
        let patch = Review {
            id: 5,
            rating: 4,
            ..Review::default()
        };

        let merged = stored.clone().merged_with(&patch);

        assert_eq!(merged.rating, 4);
        assert_eq!(merged.title, "Great");
        assert_eq!(merged.author, stored.author);
        assert_eq!(merged.description, stored.description);
    }

    #[test]
    fn decodes_partial_json() {
        let review: Review = serde_json::from_str(r#"{"id": 5, "rating": 4}"#).unwrap();
        assert_eq!(review.id, 5);
        assert_eq!(review.rating, 4);
        assert!(review.title.is_empty());
    }

    proptest! {
        #[test]
        fn rating_in_range_is_accepted(rating in MIN_RATING..=MAX_RATING) {
            let review = Review { rating, ..valid() };
            prop_assert!(check(&review).is_ok());
        }

        #[test]
        fn rating_above_range_is_rejected(rating in (MAX_RATING + 1)..i16::MAX) {
            let review = Review { rating, ..valid() };
            prop_assert!(check(&review).is_err());
        }

        #[test]
        fn title_length_bounds(len in 0usize..80) {
            let review = Review { title: "t".repeat(len), ..valid() };
            let ok = (TITLE_LEN.0..=TITLE_LEN.1).contains(&len);
            prop_assert_eq!(check(&review).is_ok(), ok);
        }
    }
}
