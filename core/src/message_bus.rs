//! Message bus abstraction.
//!
//! The [`MessageBus`] trait is the transport seen by both ends of the
//! request/reply protocol:
//!
//! ```text
//!  RpcClient                     bus                        Dispatcher
//!  ─────────                     ───                        ──────────
//!  reply_queue() ──────────► exclusive queue
//!  publish_request(env) ───► exchange ──► service queue ──► consume()
//!                                                            │ execute
//!  ReplyQueue.replies ◄───── reply queue ◄───────────────── publish_reply()
//!                                                            │
//!                                                            ▼ Delivery::settle(Ack | Nack)
//! ```
//!
//! # Delivery Semantics
//!
//! - Every [`Delivery`] must be settled exactly once. [`Delivery::settle`]
//!   takes `self` by value, so a second acknowledgement does not compile.
//! - `Nack` never requeues: a message that failed once is discarded.
//! - The transport caps unacknowledged deliveries per consumer (prefetch);
//!   that cap is the dispatcher's only admission control.
//!
//! # Implementations
//!
//! - `RabbitMqBus` (`reviews-rabbitmq`) - AMQP 0-9-1 via lapin
//! - `InMemoryMessageBus` (`reviews-testing`) - for tests

use crate::envelope::{Acknowledgement, Envelope, Reply};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message
    #[error("Publish failed for '{destination}': {reason}")]
    PublishFailed {
        /// Exchange routing key or reply address
        destination: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to declare or consume a queue
    #[error("Subscription failed for queue '{queue}': {reason}")]
    SubscriptionFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to ack or nack a delivery
    #[error("Acknowledgement failed: {0}")]
    AcknowledgeFailed(String),

    /// Network or transport error on an open stream
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Stream of inbound deliveries for the service queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BusError>> + Send>>;

/// Stream of replies arriving on a reply queue.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<Reply, BusError>> + Send>>;

/// Transport-specific handle that settles one delivery.
pub trait Acknowledger: Send {
    /// Ack or nack (without requeue) the delivery this handle belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::AcknowledgeFailed`] if the broker rejects the call.
    fn settle(
        self: Box<Self>,
        decision: Acknowledgement,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send>>;
}

/// One inbound message together with the handle that settles it.
pub struct Delivery {
    envelope: Envelope,
    acknowledger: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Pair an envelope with its acknowledger.
    #[must_use]
    pub fn new(envelope: Envelope, acknowledger: Box<dyn Acknowledger>) -> Self {
        Self {
            envelope,
            acknowledger,
        }
    }

    /// The received envelope.
    #[must_use]
    pub const fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Settle the delivery, consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::AcknowledgeFailed`] if the broker rejects the call.
    pub async fn settle(self, decision: Acknowledgement) -> Result<(), BusError> {
        self.acknowledger.settle(decision).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .finish_non_exhaustive()
    }
}

/// An exclusive, auto-deleting reply queue.
pub struct ReplyQueue {
    /// Address to put in the `reply_to` of outgoing requests
    pub address: String,
    /// Replies published to that address
    pub replies: ReplyStream,
}

impl std::fmt::Debug for ReplyQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyQueue")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Trait for message bus implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: the dispatcher publishes replies
/// from many concurrently running tasks.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the bus can be shared as
/// `Arc<dyn MessageBus>`.
pub trait MessageBus: Send + Sync {
    /// Start consuming the service's request queue.
    ///
    /// The queue is bound to every [`RoutingKey`](crate::envelope::RoutingKey).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the queue cannot be
    /// declared, bound or consumed.
    fn consume(&self) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BusError>> + Send + '_>>;

    /// Publish a request to the exchange under its routing key.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the broker does not accept it.
    fn publish_request(
        &self,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Publish a reply directly to a reply address.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the broker does not accept it.
    fn publish_reply(
        &self,
        reply_to: &str,
        reply: &Reply,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Declare a fresh exclusive, auto-deleting reply queue and consume it.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the queue cannot be
    /// declared or consumed.
    fn reply_queue(&self) -> Pin<Box<dyn Future<Output = Result<ReplyQueue, BusError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingAcknowledger {
        decisions: Arc<Mutex<Vec<Acknowledgement>>>,
        fail: bool,
    }

    impl Acknowledger for RecordingAcknowledger {
        fn settle(
            self: Box<Self>,
            decision: Acknowledgement,
        ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send>> {
            self.decisions.lock().unwrap().push(decision);
            let result = if self.fail {
                Err(BusError::AcknowledgeFailed("channel closed".into()))
            } else {
                Ok(())
            };
            Box::pin(async move { result })
        }
    }

    fn delivery(fail: bool) -> (Delivery, Arc<Mutex<Vec<Acknowledgement>>>) {
        let decisions = Arc::new(Mutex::new(Vec::new()));
        let envelope = Envelope::new("create", "corr-1", b"{}".to_vec()).with_reply_to("amq.gen-1");
        let acknowledger = RecordingAcknowledger {
            decisions: Arc::clone(&decisions),
            fail,
        };
        (Delivery::new(envelope, Box::new(acknowledger)), decisions)
    }

    #[test]
    fn settle_forwards_the_decision_once() {
        let (delivery, decisions) = delivery(false);
        assert_eq!(delivery.envelope().correlation_id, "corr-1");

        tokio_test::block_on(delivery.settle(Acknowledgement::Nack)).unwrap();

        assert_eq!(*decisions.lock().unwrap(), vec![Acknowledgement::Nack]);
    }

    #[test]
    fn settle_surfaces_broker_rejections() {
        let (delivery, _) = delivery(true);

        let result = tokio_test::block_on(delivery.settle(Acknowledgement::Ack));

        assert_eq!(
            result,
            Err(BusError::AcknowledgeFailed("channel closed".into()))
        );
    }

    #[test]
    fn bus_errors_name_their_destination() {
        let err = BusError::PublishFailed {
            destination: "amq.gen-7".into(),
            reason: "channel closed".into(),
        };

        assert_eq!(err.to_string(), "Publish failed for 'amq.gen-7': channel closed");
    }
}
