//! # Reviews Runtime
//!
//! Runtime for the message-driven reviews service.
//!
//! ## Core Components
//!
//! - **[`ReviewService`]**: validation, patch semantics and existence checks
//!   in front of a [`ReviewRepository`](reviews_core::ReviewRepository)
//! - **[`Dispatcher`]**: consumes the request queue, routes each message to
//!   the service, replies and acknowledges
//! - **[`RpcClient`]** / **[`ReviewsClient`]**: the requesting side, which
//!   correlates replies and bounds every wait with a timeout
//! - **[`metrics`]**: Prometheus counters and histograms for both sides
//!
//! ## Example
//!
//! ```ignore
//! use reviews_runtime::{Dispatcher, ReviewService};
//!
//! let service = ReviewService::new(repository);
//! let dispatcher = Dispatcher::new(service, bus.clone());
//! tokio::spawn(async move { dispatcher.run().await });
//!
//! let client = ReviewsClient::new(RpcClient::connect(bus).await?);
//! let review = client.get_one(1).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Message routing, replies and acknowledgements
pub mod dispatcher;

/// Prometheus metrics for observability
pub mod metrics;

/// Correlating request/reply client
pub mod rpc;

/// Review operations with validation
pub mod service;

pub use dispatcher::{Dispatcher, OperationResult};
pub use metrics::{MetricsError, MetricsServer};
pub use rpc::{ReviewsClient, RpcClient, RpcError};
pub use service::ReviewService;
