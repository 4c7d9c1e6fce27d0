// Copyright (c) The Testwire Authors.
// Licensed under the MIT License.

//! Traits and types defining the boundary between the messaging engine and a
//! concrete transport.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::destination::Destination;
use crate::error::TransportError;

/// The message shape exchanged with a transport.
///
/// The engine inspects nothing beyond the transport-assigned identifier, the
/// correlation token and the reply address; headers and payload pass through
/// opaquely.
#[derive(Clone, Debug, Default)]
pub struct WireMessage {
    /// Transport-assigned message identifier. Empty until the message has
    /// been sent; [`MessageProducer::send`] returns the assigned value.
    pub message_id: String,
    /// Correlation token echoed by a responder so that selective consumers
    /// can match a reply to its request.
    pub correlation_id: Option<String>,
    /// Address the remote party should answer to.
    pub reply_to: Option<Destination>,
    /// Application headers, order preserved.
    pub headers: Vec<(String, String)>,
    /// Opaque payload.
    pub payload: Bytes,
}

/// Filter limiting a consumer to messages carrying a specific correlation
/// token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    correlation_id: String,
}

impl Selector {
    /// Creates a selector matching messages whose correlation token equals
    /// `correlation_id`.
    #[must_use]
    pub fn correlation_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
        }
    }

    /// Returns true if the message carries the selected correlation token.
    #[must_use]
    pub fn matches(&self, message: &WireMessage) -> bool {
        message
            .correlation_id
            .as_deref()
            .is_some_and(|id| id == self.correlation_id)
    }
}

/// Supplies a connected, ready-to-use transport session.
///
/// The engine calls this lazily and exactly once per producer lifetime
/// unless the producer is explicitly reset.
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    /// Session type produced by this provider.
    type Session: TransportSession;

    /// Connect and return a session.
    ///
    /// # Errors
    /// [`TransportError::Connection`] if the transport cannot be reached.
    async fn session(&self) -> Result<Self::Session, TransportError>;
}

/// A connected transport session: the factory for producers, consumers and
/// destinations.
///
/// Sessions are cheap handles over shared connection state; cloning one does
/// not open a new connection.
#[async_trait]
pub trait TransportSession: Clone + Send + Sync + 'static {
    /// Producer handle type.
    type Producer: MessageProducer;
    /// Consumer handle type.
    type Consumer: MessageConsumer;

    /// Opens a producer for the given destination.
    ///
    /// # Errors
    /// [`TransportError::DestinationUnavailable`] if the destination has
    /// been deleted.
    async fn create_producer(
        &self,
        destination: &Destination,
    ) -> Result<Self::Producer, TransportError>;

    /// Opens a consumer receiving every message on the given destination.
    ///
    /// # Errors
    /// [`TransportError::DestinationUnavailable`] if the destination has
    /// been deleted.
    async fn create_consumer(
        &self,
        destination: &Destination,
    ) -> Result<Self::Consumer, TransportError>;

    /// Opens a consumer receiving only messages matched by `selector`.
    ///
    /// Topic-shaped destinations require a durable `subscription` name so
    /// that messages published before the consumer existed are retained for
    /// it; queue-shaped destinations retain messages inherently and ignore
    /// the subscription name.
    ///
    /// # Errors
    /// [`TransportError::DestinationUnavailable`] if the destination has
    /// been deleted.
    async fn create_selective_consumer(
        &self,
        destination: &Destination,
        selector: &Selector,
        subscription: Option<&str>,
    ) -> Result<Self::Consumer, TransportError>;

    /// Allocates a temporary destination scoped to this transport, topic
    /// shaped if `pub_sub` is set and queue shaped otherwise.
    ///
    /// # Errors
    /// [`TransportError::Connection`] if the transport cannot allocate the
    /// destination.
    async fn create_temporary_destination(
        &self,
        pub_sub: bool,
    ) -> Result<Destination, TransportError>;

    /// Resolves a symbolic destination name into a destination handle,
    /// topic shaped if `pub_sub` is set and queue shaped otherwise.
    /// Resolution is deterministic: the same name and mode always yield the
    /// same destination.
    ///
    /// # Errors
    /// [`TransportError::Connection`] if the transport cannot resolve names.
    async fn resolve(&self, name: &str, pub_sub: bool) -> Result<Destination, TransportError>;

    /// Deletes a temporary destination. Idempotent: deleting a destination
    /// that is not temporary or that is already gone is a logged no-op.
    ///
    /// # Errors
    /// [`TransportError::Connection`] if the transport rejected the delete.
    async fn delete_destination(&self, destination: &Destination) -> Result<(), TransportError>;
}

/// Sends messages to a single destination.
#[async_trait]
pub trait MessageProducer: Send {
    /// Sends a message, returning the transport-assigned message identifier.
    ///
    /// # Errors
    /// [`TransportError::HandleClosed`] if the producer has been closed;
    /// [`TransportError::DestinationUnavailable`] if the destination has
    /// been deleted.
    async fn send(&mut self, message: WireMessage) -> Result<String, TransportError>;

    /// Closes the producer. Further sends fail with
    /// [`TransportError::HandleClosed`].
    ///
    /// # Errors
    /// Transport-specific close failures.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Receives messages from a single destination.
#[async_trait]
pub trait MessageConsumer: Send {
    /// Waits for the next message, up to `timeout` (`None` blocks
    /// indefinitely). Returns `Ok(None)` when the timeout elapses without a
    /// message; a timeout is a normal outcome, not an error.
    ///
    /// # Errors
    /// [`TransportError::HandleClosed`] if the consumer has been closed;
    /// [`TransportError::DestinationUnavailable`] if the destination is
    /// deleted while waiting.
    async fn receive(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<WireMessage>, TransportError>;

    /// Closes the consumer. Further receives fail with
    /// [`TransportError::HandleClosed`].
    ///
    /// # Errors
    /// Transport-specific close failures.
    async fn close(&mut self) -> Result<(), TransportError>;
}
