//! Message router and dispatcher.
//!
//! The dispatcher turns every inbound [`Delivery`] into exactly one
//! acknowledgement and at most one reply:
//!
//! ```text
//! Received ──► Decoded ──► Executed ──► Replied (if reply_to) ──► Acknowledged
//!                 │                         ▲
//!                 └──── Malformed ──────────┘
//! ```
//!
//! # Decisions
//!
//! | Outcome                         | Reply code | Acknowledgement |
//! |---------------------------------|-----------:|-----------------|
//! | success                         | 200        | Ack             |
//! | unknown key / undecodable body  | 400        | Nack            |
//! | validation failure              | 400        | Nack            |
//! | record not found                | 404        | Nack            |
//! | storage failure                 | 500        | Nack            |
//! | any of the above + reply failed | -          | Nack            |
//!
//! Nack never requeues, so a poison message cannot loop.
//!
//! # Concurrency
//!
//! One consumer loop hands every delivery to its own tokio task. The broker's
//! prefetch bound is the only admission control: it never delivers more than
//! that many unacknowledged messages, and every task ends by settling its
//! delivery. The dispatcher itself keeps no state shared between messages.

use crate::metrics::DispatcherMetrics;
use crate::service::ReviewService;
use futures::StreamExt;
use reviews_core::envelope::{Acknowledgement, Envelope, IdPayload, Reply, RoutingKey, Status};
use reviews_core::error::{ErrorKind, ServiceError};
use reviews_core::message_bus::{BusError, Delivery, MessageBus};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

/// Result of executing one envelope, before it is replied to and settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    /// Success or error class
    pub status: Status,
    /// Serialized result, or a JSON string describing the failure
    pub body: Vec<u8>,
}

impl OperationResult {
    fn ok(body: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            body,
        }
    }

    fn failed(kind: ErrorKind, message: &str) -> Self {
        // Encoding a plain string cannot fail; fall back to raw bytes regardless.
        let body = serde_json::to_vec(message).unwrap_or_else(|_| message.as_bytes().to_vec());
        Self {
            status: Status::Failed(kind),
            body,
        }
    }
}

/// Why a message failed, before classification.
#[derive(Debug)]
enum Failure {
    Malformed(String),
    Service(ServiceError),
    Encode(String),
}

impl From<ServiceError> for Failure {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

impl Failure {
    fn into_result(self) -> OperationResult {
        match self {
            Self::Malformed(message) => OperationResult::failed(ErrorKind::Malformed, &message),
            Self::Service(err) => OperationResult::failed(err.kind(), &err.to_string()),
            Self::Encode(message) => OperationResult::failed(ErrorKind::Internal, &message),
        }
    }
}

/// Everything that happened to one delivery, for logging and metrics.
#[derive(Debug)]
struct Disposition {
    status: Status,
    decision: Acknowledgement,
    reply_error: Option<BusError>,
    settle_error: Option<BusError>,
}

/// Routes inbound messages to [`ReviewService`] operations.
///
/// # Example
///
/// ```ignore
/// let service = ReviewService::new(repository);
/// let dispatcher = Dispatcher::new(service, bus);
/// dispatcher.run_until(tokio::signal::ctrl_c()).await?;
/// ```
#[derive(Clone, Debug)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    service: ReviewService,
    bus: Arc<dyn MessageBus>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher over an explicitly injected service and bus.
    #[must_use]
    pub fn new(service: ReviewService, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            inner: Arc::new(Inner { service, bus }),
        }
    }

    /// Consume the request queue until the bus closes the stream.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if consuming cannot start.
    pub async fn run(&self) -> Result<(), BusError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Consume the request queue until `shutdown` resolves or the stream ends.
    ///
    /// In-flight messages are allowed to finish before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if consuming cannot start.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), BusError>
    where
        F: Future + Send,
    {
        let mut deliveries = self.inner.bus.consume().await?;
        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);

        tracing::info!("Dispatcher started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(in_flight = in_flight.len(), "Shutdown requested, draining");
                    break;
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        let dispatcher = self.clone();
                        in_flight.spawn(async move {
                            dispatcher.handle(delivery).await;
                        });
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Failed to receive delivery");
                    }
                    None => {
                        tracing::info!("Delivery stream closed");
                        break;
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Message task failed");
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Message task failed");
            }
        }

        tracing::info!("Dispatcher stopped");
        Ok(())
    }

    /// Process one delivery to its terminal acknowledgement.
    ///
    /// Returns the decision that was sent to the broker.
    pub async fn handle(&self, delivery: Delivery) -> Acknowledgement {
        let started = Instant::now();
        let envelope = delivery.envelope().clone();

        let result = self.execute(&envelope).await;
        let mut decision = match result.status {
            Status::Ok => Acknowledgement::Ack,
            Status::Failed(_) => Acknowledgement::Nack,
        };

        let mut reply_error = None;
        if let Some(reply_to) = envelope.reply_address() {
            let reply = Reply::new(
                envelope.correlation_id.clone(),
                result.status.code(),
                result.body,
            );
            if let Err(e) = self.inner.bus.publish_reply(reply_to, &reply).await {
                decision = Acknowledgement::Nack;
                reply_error = Some(e);
            }
        }

        let settle_error = delivery.settle(decision).await.err();

        let disposition = Disposition {
            status: result.status,
            decision,
            reply_error,
            settle_error,
        };
        log_disposition(&envelope, &disposition);
        DispatcherMetrics::record_message(
            &envelope.routing_key,
            disposition.status.as_str(),
            decision.as_str(),
            started.elapsed(),
        );
        if disposition.reply_error.is_some() {
            DispatcherMetrics::record_reply_failure();
        }

        decision
    }

    /// Decode and execute one envelope without replying or settling.
    pub async fn execute(&self, envelope: &Envelope) -> OperationResult {
        match self.route(envelope).await {
            Ok(body) => OperationResult::ok(body),
            Err(failure) => failure.into_result(),
        }
    }

    async fn route(&self, envelope: &Envelope) -> Result<Vec<u8>, Failure> {
        let key = envelope
            .routing_key
            .parse::<RoutingKey>()
            .map_err(|e| Failure::Malformed(e.to_string()))?;
        let service = &self.inner.service;

        match key {
            RoutingKey::GetOne => {
                let IdPayload { id } = decode(&envelope.payload)?;
                encode(&service.read_one(id).await?)
            }
            RoutingKey::GetAll => encode(&service.read_all().await?),
            RoutingKey::Create => {
                let review = decode(&envelope.payload)?;
                encode(&service.create(review).await?)
            }
            RoutingKey::Update => {
                let patch = decode(&envelope.payload)?;
                service.update(patch).await?;
                Ok(Vec::new())
            }
            RoutingKey::Delete => {
                let IdPayload { id } = decode(&envelope.payload)?;
                service.delete(id).await?;
                Ok(Vec::new())
            }
        }
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, Failure> {
    serde_json::from_slice(payload).map_err(|e| Failure::Malformed(format!("invalid payload: {e}")))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Failure> {
    serde_json::to_vec(value).map_err(|e| Failure::Encode(format!("failed to encode reply: {e}")))
}

fn log_disposition(envelope: &Envelope, disposition: &Disposition) {
    let routing_key = envelope.routing_key.as_str();
    let correlation_id = envelope.correlation_id.as_str();
    let outcome = disposition.status.as_str();
    let decision = disposition.decision.as_str();

    let internal = matches!(disposition.status, Status::Failed(ErrorKind::Internal));
    if internal || disposition.reply_error.is_some() || disposition.settle_error.is_some() {
        tracing::error!(
            routing_key,
            correlation_id,
            outcome,
            decision,
            reply_error = ?disposition.reply_error,
            settle_error = ?disposition.settle_error,
            "Message failed"
        );
    } else if disposition.decision == Acknowledgement::Nack {
        tracing::warn!(routing_key, correlation_id, outcome, decision, "Message rejected");
    } else {
        tracing::info!(routing_key, correlation_id, outcome, decision, "Message processed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reviews_testing::{InMemoryMessageBus, InMemoryReviewRepository, test_review};

    fn dispatcher() -> Dispatcher {
        let service = ReviewService::new(Arc::new(InMemoryReviewRepository::new()));
        Dispatcher::new(service, Arc::new(InMemoryMessageBus::new()))
    }

    fn envelope(key: RoutingKey, payload: &[u8]) -> Envelope {
        Envelope::new(key.as_str(), "corr-1", payload.to_vec())
    }

    #[tokio::test]
    async fn unknown_routing_key_is_malformed() {
        let result = dispatcher()
            .execute(&Envelope::new("get-reviews", "corr-1", Vec::new()))
            .await;

        assert_eq!(result.status, Status::Failed(ErrorKind::Malformed));
        let message: String = serde_json::from_slice(&result.body).unwrap();
        assert_eq!(message, "invalid routing key: 'get-reviews'");
    }

    #[tokio::test]
    async fn undecodable_payload_is_malformed() {
        let dispatcher = dispatcher();

        for key in [RoutingKey::GetOne, RoutingKey::Create, RoutingKey::Update, RoutingKey::Delete] {
            let result = dispatcher.execute(&envelope(key, b"not json")).await;
            assert_eq!(result.status, Status::Failed(ErrorKind::Malformed), "{key}");
        }
    }

    #[tokio::test]
    async fn get_all_ignores_payload() {
        let result = dispatcher()
            .execute(&envelope(RoutingKey::GetAll, b"garbage"))
            .await;

        assert_eq!(result.status, Status::Ok);
        assert_eq!(result.body, b"[]");
    }

    #[tokio::test]
    async fn create_returns_created_review() {
        let payload = serde_json::to_vec(&test_review()).unwrap();

        let result = dispatcher()
            .execute(&envelope(RoutingKey::Create, &payload))
            .await;

        assert_eq!(result.status, Status::Ok);
        let created: reviews_core::review::Review = serde_json::from_slice(&result.body).unwrap();
        assert_eq!(created, test_review().with_id(1));
    }

    #[tokio::test]
    async fn service_errors_are_classified() {
        let dispatcher = dispatcher();

        let missing = dispatcher
            .execute(&envelope(RoutingKey::GetOne, br#"{"id": 9}"#))
            .await;
        assert_eq!(missing.status.code(), 404);

        let invalid = dispatcher
            .execute(&envelope(RoutingKey::Create, br#"{"author": "invalid"}"#))
            .await;
        assert_eq!(invalid.status.code(), 400);

        let mutation = dispatcher
            .execute(&envelope(RoutingKey::Delete, br#"{"id": 0}"#))
            .await;
        assert_eq!(mutation.status, Status::Failed(ErrorKind::Validation));
    }
}
