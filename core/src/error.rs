//! Error taxonomy.
//!
//! Errors are typed at every layer so the dispatcher can classify them with an
//! exhaustive `match` instead of inspecting messages:
//!
//! ```text
//! RepositoryError ──► ServiceError ──► ErrorKind ──► reply status code
//!   NotFound            NotFound         NotFound        404
//!   MissingField        Validation       Validation      400
//!   Storage             Internal         Internal        500
//!                       (decode/routing) Malformed       400
//! ```

use std::fmt;
use thiserror::Error;

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Name of the offending field
    pub field: &'static str,
    /// Human-readable reason
    pub reason: String,
}

impl FieldError {
    /// Create a field error with a custom reason.
    #[must_use]
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }

    /// A required field was left empty.
    #[must_use]
    pub fn missing(field: &'static str) -> Self {
        Self::new(field, "is required")
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.reason)
    }
}

/// A review failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("validation failed: {}", join(.fields))]
pub struct ValidationError {
    /// Every offending field, in declaration order
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    /// Wrap a list of field errors.
    #[must_use]
    pub const fn new(fields: Vec<FieldError>) -> Self {
        Self { fields }
    }

    /// Shorthand for a single missing field.
    #[must_use]
    pub fn missing(field: &'static str) -> Self {
        Self::new(vec![FieldError::missing(field)])
    }
}

fn join(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors returned by a [`ReviewRepository`](crate::repository::ReviewRepository).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// No record with this identifier
    #[error("record {id} not found")]
    NotFound {
        /// The identifier that was looked up
        id: i64,
    },

    /// The request lacked fields the repository needs (e.g. an identifier)
    #[error("fields missing: {}", .fields.join(", "))]
    MissingField {
        /// Names of the missing fields
        fields: Vec<&'static str>,
    },

    /// Storage backend failure (connection, query, decoding)
    #[error("storage error: {0}")]
    Storage(String),
}

/// Closed set of failures returned by the service layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The request violated a field constraint
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The target record does not exist
    #[error("record {id} not found")]
    NotFound {
        /// The identifier that was looked up
        id: i64,
    },

    /// Anything else (storage or infrastructure failure)
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { id } => Self::NotFound { id },
            RepositoryError::MissingField { fields } => Self::Validation(ValidationError::new(
                fields.into_iter().map(FieldError::missing).collect(),
            )),
            RepositoryError::Storage(reason) => Self::Internal(reason),
        }
    }
}

/// Outcome class of a failed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Field constraint violation
    Validation,
    /// Operation target absent
    NotFound,
    /// Undecodable payload or unknown routing key
    Malformed,
    /// Storage or transport failure
    Internal,
}

impl ErrorKind {
    /// Reply status code for this kind.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::Validation | Self::Malformed => 400,
            Self::NotFound => 404,
            Self::Internal => 500,
        }
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Malformed => "malformed",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_errors_map_to_service_errors() {
        assert_eq!(
            ServiceError::from(RepositoryError::NotFound { id: 7 }),
            ServiceError::NotFound { id: 7 }
        );
        assert_eq!(
            ServiceError::from(RepositoryError::MissingField { fields: vec!["id"] }).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ServiceError::from(RepositoryError::Storage("boom".into())).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn status_codes() {
        assert_eq!(ErrorKind::Validation.status_code(), 400);
        assert_eq!(ErrorKind::Malformed.status_code(), 400);
        assert_eq!(ErrorKind::NotFound.status_code(), 404);
        assert_eq!(ErrorKind::Internal.status_code(), 500);
    }

    #[test]
    fn validation_error_lists_fields() {
        let err = ValidationError::new(vec![
            FieldError::missing("title"),
            FieldError::new("rating", "must be between 1 and 10"),
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: title is required, rating must be between 1 and 10"
        );
    }
}
