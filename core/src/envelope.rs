//! Wire-level message types.
//!
//! An [`Envelope`] is one delivery as received from (or handed to) the bus.
//! Its routing key selects the operation, its correlation id binds it to an
//! eventual [`Reply`], and its reply address says where that reply goes.
//!
//! # Routing keys
//!
//! | Routing key        | Payload                       | Reply body        |
//! |--------------------|-------------------------------|-------------------|
//! | `reviews-get-one`  | `{"id": 1}`                   | review            |
//! | `reviews-get-all`  | ignored                       | list of reviews   |
//! | `reviews-create`   | review                        | created review    |
//! | `reviews-update`   | review (patch, `id` required) | empty             |
//! | `reviews-delete`   | `{"id": 1}`                   | empty             |

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the reply header carrying the status code.
pub const CODE_HEADER: &str = "code";

/// Content type of every payload and reply body.
pub const CONTENT_TYPE: &str = "application/json";

/// One transport-level delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Selects the operation
    pub routing_key: String,
    /// Opaque token binding the request to its reply
    pub correlation_id: String,
    /// Where the reply should be published (`None` = fire-and-forget)
    pub reply_to: Option<String>,
    /// Raw JSON payload
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Create a fire-and-forget envelope.
    #[must_use]
    pub fn new(
        routing_key: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            correlation_id: correlation_id.into(),
            reply_to: None,
            payload,
        }
    }

    /// Ask for a reply on the given address.
    ///
    /// An empty address is treated as no address.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        let reply_to = reply_to.into();
        self.reply_to = (!reply_to.is_empty()).then_some(reply_to);
        self
    }

    /// The reply address, if the sender expects an answer.
    #[must_use]
    pub fn reply_address(&self) -> Option<&str> {
        self.reply_to.as_deref().filter(|address| !address.is_empty())
    }
}

/// The operations a message can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    /// Read a single review by id
    GetOne,
    /// Read every review
    GetAll,
    /// Create a review
    Create,
    /// Patch an existing review
    Update,
    /// Delete a review by id
    Delete,
}

impl RoutingKey {
    /// Every routing key, in binding order.
    pub const ALL: [Self; 5] = [
        Self::GetOne,
        Self::GetAll,
        Self::Create,
        Self::Update,
        Self::Delete,
    ];

    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetOne => "reviews-get-one",
            Self::GetAll => "reviews-get-all",
            Self::Create => "reviews-create",
            Self::Update => "reviews-update",
            Self::Delete => "reviews-delete",
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a routing key does not name an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid routing key: '{0}'")]
pub struct UnknownRoutingKey(pub String);

impl FromStr for RoutingKey {
    type Err = UnknownRoutingKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| UnknownRoutingKey(s.to_string()))
    }
}

/// Payload of `reviews-get-one` and `reviews-delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdPayload {
    /// Target identifier
    pub id: i64,
}

/// Outcome of one operation, as reported to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation succeeded
    Ok,
    /// The operation failed
    Failed(ErrorKind),
}

impl Status {
    /// Reply status code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Failed(kind) => kind.status_code(),
        }
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed(kind) => kind.as_str(),
        }
    }
}

/// Answer to a request, bound to it by correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Correlation id of the originating request
    pub correlation_id: String,
    /// 200, 400, 404 or 500
    pub code: u16,
    /// Serialized review, review list or error message
    pub body: Vec<u8>,
}

impl Reply {
    /// Build a reply.
    #[must_use]
    pub fn new(correlation_id: impl Into<String>, code: u16, body: Vec<u8>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            code,
            body,
        }
    }

    /// Whether the request succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code == 200
    }
}

/// Terminal disposition of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Processed, remove from the queue
    Ack,
    /// Processed with failure, discard without requeue
    Nack,
}

impl Acknowledgement {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Nack => "nack",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn routing_keys_round_trip_through_str() {
        for key in RoutingKey::ALL {
            assert_eq!(key.as_str().parse::<RoutingKey>().unwrap(), key);
        }
    }

    #[test]
    fn unknown_routing_key_is_rejected() {
        let err = "get-reviews".parse::<RoutingKey>().unwrap_err();
        assert_eq!(err.to_string(), "invalid routing key: 'get-reviews'");
    }

    #[test]
    fn empty_reply_address_means_no_reply() {
        let envelope = Envelope::new("reviews-get-all", "c-1", Vec::new()).with_reply_to("");
        assert_eq!(envelope.reply_address(), None);

        let envelope = Envelope {
            reply_to: Some(String::new()),
            ..envelope
        };
        assert_eq!(envelope.reply_address(), None);

        let envelope = envelope.with_reply_to("amq.gen-1");
        assert_eq!(envelope.reply_address(), Some("amq.gen-1"));
    }

    #[test]
    fn status_codes() {
        assert_eq!(Status::Ok.code(), 200);
        assert_eq!(Status::Failed(ErrorKind::NotFound).code(), 404);
        assert_eq!(Status::Failed(ErrorKind::Malformed).as_str(), "malformed");
    }
}
