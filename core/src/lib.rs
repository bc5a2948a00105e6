//! # Reviews Core
//!
//! Core types and traits for the message-driven reviews service.
//!
//! Review CRUD is not exposed over HTTP. Requests travel over a message bus,
//! are routed by routing key to a service operation, and, when the sender
//! asked for one, answered with a correlated reply.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  request   ┌──────────────┐     ┌───────────────┐     ┌──────────────┐
//! │ RpcClient  │ ─────────► │  Dispatcher  │ ──► │ ReviewService │ ──► │  Repository  │
//! │            │ ◄───────── │ (ack / nack) │ ◄── │               │ ◄── │ (Postgres)   │
//! └────────────┘   reply    └──────────────┘     └───────────────┘     └──────────────┘
//!        ▲                         ▲
//!        └──────── MessageBus ─────┘
//! ```
//!
//! This crate holds everything the runtime and the adapters share:
//!
//! - [`review`]: the record type and its validation rules
//! - [`error`]: the error taxonomy and its mapping to reply status codes
//! - [`envelope`]: envelopes, routing keys, replies and acknowledgements
//! - [`repository`]: the persistence capability consumed by the service
//! - [`message_bus`]: the transport capability consumed by the dispatcher and the RPC client

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod error;
pub mod message_bus;
pub mod repository;
pub mod review;

// Re-export commonly used types
pub use envelope::{Acknowledgement, Envelope, IdPayload, Reply, RoutingKey, Status};
pub use error::{ErrorKind, FieldError, RepositoryError, ServiceError, ValidationError};
pub use message_bus::{
    Acknowledger, BusError, Delivery, DeliveryStream, MessageBus, ReplyQueue, ReplyStream,
};
pub use repository::ReviewRepository;
pub use review::{Review, ReviewValidator, RuleValidator, ValidationMode};
