//! Channel-backed message bus for testing.
//!
//! [`InMemoryMessageBus`] mirrors the broker semantics the dispatcher and the
//! RPC client rely on:
//!
//! - requests published before anyone consumes are buffered, like a durable queue
//! - at most `prefetch` deliveries are unsettled at a time
//! - replies go straight to the reply queue named by the address; unknown
//!   addresses drop the reply
//! - every acknowledgement is recorded for assertions

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use reviews_core::envelope::{Acknowledgement, Envelope, Reply};
use reviews_core::message_bus::{
    Acknowledger, BusError, Delivery, DeliveryStream, MessageBus, ReplyQueue,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};

/// Default number of unsettled deliveries.
pub const DEFAULT_PREFETCH: usize = 10;

/// In-memory message bus for fast, deterministic testing.
///
/// Cloning shares the underlying queues.
///
/// # Example
///
/// ```
/// use reviews_testing::InMemoryMessageBus;
/// use reviews_core::envelope::Envelope;
/// use reviews_core::message_bus::MessageBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryMessageBus::new();
///
/// bus.publish_request(&Envelope::new("reviews-get-all", "c-1", Vec::new())).await?;
/// assert_eq!(bus.published_requests().len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryMessageBus {
    state: Arc<BusState>,
}

#[derive(Debug)]
struct BusState {
    prefetch: Arc<Semaphore>,
    requests_tx: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    requests_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    reply_queues: Mutex<HashMap<String, mpsc::UnboundedSender<Reply>>>,
    published_requests: Mutex<Vec<Envelope>>,
    published_replies: Mutex<Vec<(String, Reply)>>,
    acknowledgements: Mutex<Vec<(String, Acknowledgement)>>,
    fail_replies: AtomicBool,
    next_queue: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryMessageBus {
    /// Create a bus with the default prefetch bound
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefetch(DEFAULT_PREFETCH)
    }

    /// Create a bus that hands out at most `prefetch` unsettled deliveries
    #[must_use]
    pub fn with_prefetch(prefetch: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(BusState {
                prefetch: Arc::new(Semaphore::new(prefetch)),
                requests_tx: Mutex::new(Some(tx)),
                requests_rx: Mutex::new(Some(rx)),
                reply_queues: Mutex::new(HashMap::new()),
                published_requests: Mutex::new(Vec::new()),
                published_replies: Mutex::new(Vec::new()),
                acknowledgements: Mutex::new(Vec::new()),
                fail_replies: AtomicBool::new(false),
                next_queue: AtomicU64::new(1),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Make every subsequent `publish_reply` fail
    pub fn set_fail_replies(&self, fail: bool) {
        self.state.fail_replies.store(fail, Ordering::SeqCst);
    }

    /// Close the request queue; the consumer's stream ends once it is drained
    pub fn close(&self) {
        self.state.requests_tx.lock().unwrap().take();
    }

    /// Close every reply queue
    pub fn close_reply_queues(&self) {
        self.state.reply_queues.lock().unwrap().clear();
    }

    /// Every request published so far
    #[must_use]
    pub fn published_requests(&self) -> Vec<Envelope> {
        self.state.published_requests.lock().unwrap().clone()
    }

    /// Every reply accepted so far, with its address
    #[must_use]
    pub fn published_replies(&self) -> Vec<(String, Reply)> {
        self.state.published_replies.lock().unwrap().clone()
    }

    /// Every settled delivery as `(correlation_id, decision)`
    #[must_use]
    pub fn acknowledgements(&self) -> Vec<(String, Acknowledgement)> {
        self.state.acknowledgements.lock().unwrap().clone()
    }

    /// The decision recorded for one correlation id
    #[must_use]
    pub fn acknowledgement(&self, correlation_id: &str) -> Option<Acknowledgement> {
        self.state
            .acknowledgements
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == correlation_id)
            .map(|(_, decision)| *decision)
    }

    /// Highest number of deliveries that were unsettled at the same time
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` deliveries have been settled.
    ///
    /// Returns `false` if that did not happen within `timeout`.
    pub async fn wait_for_acknowledgements(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.state.acknowledgements.lock().unwrap().len() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemoryAcknowledger {
    correlation_id: String,
    state: Arc<BusState>,
    _permit: OwnedSemaphorePermit,
}

impl Acknowledger for InMemoryAcknowledger {
    fn settle(
        self: Box<Self>,
        decision: Acknowledgement,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send>> {
        self.state
            .acknowledgements
            .lock()
            .unwrap()
            .push((self.correlation_id.clone(), decision));
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        // The permit is released when `self` drops here.
        Box::pin(async { Ok(()) })
    }
}

impl MessageBus for InMemoryMessageBus {
    fn consume(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, BusError>> + Send + '_>> {
        Box::pin(async move {
            let mut requests = self.state.requests_rx.lock().unwrap().take().ok_or_else(|| {
                BusError::SubscriptionFailed {
                    queue: "reviews_queue".to_string(),
                    reason: "queue already has a consumer".to_string(),
                }
            })?;
            let state = Arc::clone(&self.state);

            let stream = async_stream::stream! {
                while let Some(envelope) = requests.recv().await {
                    let Ok(permit) = Arc::clone(&state.prefetch).acquire_owned().await else {
                        break;
                    };
                    let in_flight = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    state.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

                    let acknowledger = InMemoryAcknowledger {
                        correlation_id: envelope.correlation_id.clone(),
                        state: Arc::clone(&state),
                        _permit: permit,
                    };
                    yield Ok::<_, BusError>(Delivery::new(envelope, Box::new(acknowledger)));
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }

    fn publish_request(
        &self,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let envelope = envelope.clone();
        Box::pin(async move {
            self.state
                .published_requests
                .lock()
                .unwrap()
                .push(envelope.clone());

            let sent = self
                .state
                .requests_tx
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|tx| tx.send(envelope.clone()).is_ok());
            if sent {
                Ok(())
            } else {
                Err(BusError::PublishFailed {
                    destination: envelope.routing_key,
                    reason: "request queue closed".to_string(),
                })
            }
        })
    }

    fn publish_reply(
        &self,
        reply_to: &str,
        reply: &Reply,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let reply_to = reply_to.to_string();
        let reply = reply.clone();
        Box::pin(async move {
            if self.state.fail_replies.load(Ordering::SeqCst) {
                return Err(BusError::PublishFailed {
                    destination: reply_to,
                    reason: "reply publishing disabled".to_string(),
                });
            }

            self.state
                .published_replies
                .lock()
                .unwrap()
                .push((reply_to.clone(), reply.clone()));

            if let Some(queue) = self.state.reply_queues.lock().unwrap().get(&reply_to) {
                // A closed reply queue silently drops the reply, as a broker would.
                let _ = queue.send(reply);
            }
            Ok(())
        })
    }

    fn reply_queue(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<ReplyQueue, BusError>> + Send + '_>> {
        Box::pin(async move {
            let n = self.state.next_queue.fetch_add(1, Ordering::SeqCst);
            let address = format!("amq.gen-{n}");
            let (tx, mut rx) = mpsc::unbounded_channel();
            self.state
                .reply_queues
                .lock()
                .unwrap()
                .insert(address.clone(), tx);

            let replies = async_stream::stream! {
                while let Some(reply) = rx.recv().await {
                    yield Ok::<_, BusError>(reply);
                }
            };

            Ok(ReplyQueue {
                address,
                replies: Box::pin(replies),
            })
        })
    }
}
