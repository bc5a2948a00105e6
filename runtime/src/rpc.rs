//! Request/reply client over the message bus.
//!
//! [`RpcClient`] owns one exclusive reply queue. Every call publishes a request
//! carrying a fresh correlation id and that queue's address, then waits for
//! the reply with the same correlation id:
//!
//! ```text
//!  call() ──► pending[id] = tx ──► publish_request ──► wait(rx, timeout)
//!                                                           ▲
//!  router task: reply queue ──► pending.remove(reply.id) ───┘
//! ```
//!
//! Concurrent calls share the reply queue. A background router task hands
//! each reply to the caller waiting on its correlation id and discards
//! replies nobody is waiting for (late answers to timed-out calls).
//!
//! The client never retries. A timeout is terminal for that call.
//!
//! [`ReviewsClient`] wraps an [`RpcClient`] with one typed method per
//! routing key.

use crate::metrics::RpcMetrics;
use futures::StreamExt;
use reviews_core::envelope::{Envelope, IdPayload, Reply, RoutingKey};
use reviews_core::message_bus::{BusError, MessageBus, ReplyStream};
use reviews_core::review::Review;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Default time a call waits for its reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by RPC calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// No matching reply arrived in time
    #[error("No reply for '{routing_key}' within {timeout:?}")]
    Timeout {
        /// Routing key of the request
        routing_key: String,
        /// The bound that elapsed
        timeout: Duration,
    },

    /// The service answered with a non-200 code
    #[error("Request failed with code {code}: {message}")]
    Remote {
        /// Reply status code
        code: u16,
        /// Error message carried in the reply body
        message: String,
    },

    /// The bus rejected the request
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// The reply queue was closed by the broker
    #[error("Reply stream closed")]
    ReplyStreamClosed,

    /// The request payload could not be serialized
    #[error("Failed to encode request: {0}")]
    Encode(String),

    /// The reply body could not be deserialized
    #[error("Failed to decode reply: {0}")]
    Decode(String),
}

/// Waiters by correlation id. `None` once the reply stream has ended.
type Pending = Arc<Mutex<Option<HashMap<String, oneshot::Sender<Reply>>>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, Option<HashMap<String, oneshot::Sender<Reply>>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A call's entry in the pending map, removed when the call ends or is dropped.
struct Registration<'a> {
    pending: &'a Pending,
    correlation_id: String,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if let Some(pending) = lock(self.pending).as_mut() {
            pending.remove(&self.correlation_id);
        }
    }
}

/// Correlating request/reply client.
pub struct RpcClient {
    bus: Arc<dyn MessageBus>,
    address: String,
    pending: Pending,
    timeout: Duration,
    router: JoinHandle<()>,
}

impl RpcClient {
    /// Declare a reply queue on `bus` and start routing its replies.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the reply queue cannot be
    /// declared or consumed.
    pub async fn connect(bus: Arc<dyn MessageBus>) -> Result<Self, BusError> {
        let queue = bus.reply_queue().await?;
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let router = tokio::spawn(route_replies(queue.replies, Arc::clone(&pending)));

        tracing::debug!(address = %queue.address, "RPC client connected");

        Ok(Self {
            bus,
            address: queue.address,
            pending,
            timeout: DEFAULT_TIMEOUT,
            router,
        })
    }

    /// Set how long each call waits for its reply.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Address replies are published to.
    #[must_use]
    pub fn reply_address(&self) -> &str {
        &self.address
    }

    /// The configured reply timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a request and wait for the reply carrying its correlation id.
    ///
    /// Any reply code is returned as-is; only transport failures and the
    /// timeout are errors.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] if no reply arrives in time
    /// - [`RpcError::Bus`] if the request cannot be published
    /// - [`RpcError::ReplyStreamClosed`] if the reply queue is gone
    pub async fn call(&self, routing_key: RoutingKey, payload: Vec<u8>) -> Result<Reply, RpcError> {
        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = lock(&self.pending);
            let Some(pending) = pending.as_mut() else {
                return Err(RpcError::ReplyStreamClosed);
            };
            pending.insert(correlation_id.clone(), tx);
        }
        let _registration = Registration {
            pending: &self.pending,
            correlation_id: correlation_id.clone(),
        };

        let envelope = Envelope::new(routing_key.as_str(), correlation_id.as_str(), payload)
            .with_reply_to(self.address.as_str());

        RpcMetrics::record_request(routing_key.as_str());
        self.bus.publish_request(&envelope).await?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => {
                tracing::debug!(%routing_key, %correlation_id, code = reply.code, "Reply received");
                Ok(reply)
            }
            Ok(Err(_)) => Err(RpcError::ReplyStreamClosed),
            Err(_) => {
                RpcMetrics::record_timeout(routing_key.as_str());
                tracing::warn!(%routing_key, %correlation_id, timeout = ?self.timeout, "RPC call timed out");
                Err(RpcError::Timeout {
                    routing_key: routing_key.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Send a JSON request and decode a successful JSON reply.
    ///
    /// # Errors
    ///
    /// Everything [`call`](Self::call) returns, plus [`RpcError::Remote`] for
    /// non-200 replies and [`RpcError::Encode`]/[`RpcError::Decode`].
    pub async fn call_json<Req, Resp>(
        &self,
        routing_key: RoutingKey,
        request: &Req,
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = self.call_checked(routing_key, request).await?;
        serde_json::from_slice(&body).map_err(|e| RpcError::Decode(e.to_string()))
    }

    async fn call_checked<Req>(&self, routing_key: RoutingKey, request: &Req) -> Result<Vec<u8>, RpcError>
    where
        Req: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(request).map_err(|e| RpcError::Encode(e.to_string()))?;
        let reply = self.call(routing_key, payload).await?;

        if reply.is_success() {
            Ok(reply.body)
        } else {
            Err(RpcError::Remote {
                code: reply.code,
                message: error_message(&reply.body),
            })
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.router.abort();
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

async fn route_replies(mut replies: ReplyStream, pending: Pending) {
    while let Some(next) = replies.next().await {
        let reply = match next {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to receive reply");
                continue;
            }
        };

        let waiter = lock(&pending)
            .as_mut()
            .and_then(|pending| pending.remove(&reply.correlation_id));

        match waiter {
            Some(tx) => {
                if tx.send(reply).is_err() {
                    tracing::debug!("Caller stopped waiting before its reply arrived");
                }
            }
            None => {
                tracing::debug!(
                    correlation_id = %reply.correlation_id,
                    "Discarding reply with unknown correlation id"
                );
            }
        }
    }

    // Dropping the senders wakes every waiter with ReplyStreamClosed.
    lock(&pending).take();
    tracing::debug!("Reply stream closed");
}

/// Error replies carry a JSON string; fall back to the raw text.
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<String>(body)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned())
}

/// Typed client for the reviews service.
///
/// # Example
///
/// ```ignore
/// let client = ReviewsClient::new(RpcClient::connect(bus).await?);
/// let created = client.create(&Review::new("a@b.io", 7, "Title", "Text")).await?;
/// let loaded = client.get_one(created.id).await?;
/// ```
#[derive(Debug)]
pub struct ReviewsClient {
    rpc: RpcClient,
}

impl ReviewsClient {
    /// Wrap a connected RPC client.
    #[must_use]
    pub const fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    /// The underlying RPC client.
    #[must_use]
    pub const fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// Read one review.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Remote`] with code 404 if it does not exist.
    pub async fn get_one(&self, id: i64) -> Result<Review, RpcError> {
        self.rpc.call_json(RoutingKey::GetOne, &IdPayload { id }).await
    }

    /// Read every review.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call_json`].
    pub async fn get_all(&self) -> Result<Vec<Review>, RpcError> {
        self.rpc.call_json(RoutingKey::GetAll, &()).await
    }

    /// Create a review and return it with its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Remote`] with code 400 if validation fails.
    pub async fn create(&self, review: &Review) -> Result<Review, RpcError> {
        self.rpc.call_json(RoutingKey::Create, review).await
    }

    /// Patch a review. Empty and zero fields are left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Remote`] with code 404 if it does not exist.
    pub async fn update(&self, patch: &Review) -> Result<(), RpcError> {
        self.rpc.call_checked(RoutingKey::Update, patch).await.map(drop)
    }

    /// Delete a review.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Remote`] with code 404 if it does not exist.
    pub async fn delete(&self, id: i64) -> Result<(), RpcError> {
        self.rpc
            .call_checked(RoutingKey::Delete, &IdPayload { id })
            .await
            .map(drop)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use reviews_testing::InMemoryMessageBus;

    #[test]
    fn error_message_prefers_json_string() {
        assert_eq!(error_message(br#""review with id 3 not found""#), "review with id 3 not found");
        assert_eq!(error_message(b"plain text"), "plain text");
    }

    #[tokio::test]
    async fn unanswered_call_times_out() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let client = RpcClient::connect(bus)
            .await
            .unwrap()
            .with_timeout(Duration::from_millis(50));

        let err = client.call(RoutingKey::GetAll, Vec::new()).await.unwrap_err();

        assert_eq!(
            err,
            RpcError::Timeout {
                routing_key: "reviews-get-all".to_string(),
                timeout: Duration::from_millis(50),
            }
        );
        assert!(lock(&client.pending).as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn abandoned_calls_release_their_waiters() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let client = RpcClient::connect(bus).await.unwrap();

        for _ in 0..3 {
            let abandoned = tokio::time::timeout(
                Duration::from_millis(10),
                client.call(RoutingKey::GetAll, Vec::new()),
            )
            .await;
            assert!(abandoned.is_err());
        }

        assert!(lock(&client.pending).as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reply_with_unknown_correlation_id_is_discarded() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let client = RpcClient::connect(Arc::clone(&bus) as Arc<dyn MessageBus>)
            .await
            .unwrap();

        bus.publish_reply(client.reply_address(), &Reply::new("stranger", 200, Vec::new()))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        assert!(lock(&client.pending).as_ref().unwrap().is_empty());
    }
}
