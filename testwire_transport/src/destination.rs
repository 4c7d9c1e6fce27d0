// Copyright (c) The Testwire Authors.
// Licensed under the MIT License.

//! Transport addressing.

use std::fmt;

/// A transport address a message can be sent to or consumed from.
///
/// Durable destinations ([`Destination::Queue`], [`Destination::Topic`]) are
/// named by configuration and outlive any single exchange. Temporary
/// destinations are created by a session for one exchange and must be
/// deleted when that exchange completes or fails.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A named point-to-point queue.
    Queue(String),
    /// A named publish/subscribe topic.
    Topic(String),
    /// An ephemeral queue owned by a single exchange.
    TemporaryQueue(String),
    /// An ephemeral topic owned by a single exchange.
    TemporaryTopic(String),
}

impl Destination {
    /// Returns the destination name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Destination::Queue(name)
            | Destination::Topic(name)
            | Destination::TemporaryQueue(name)
            | Destination::TemporaryTopic(name) => name,
        }
    }

    /// Returns true if this destination was created for a single exchange
    /// and must be deleted afterwards.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(
            self,
            Destination::TemporaryQueue(_) | Destination::TemporaryTopic(_)
        )
    }

    /// Returns true for topic-shaped (publish/subscribe) destinations.
    #[must_use]
    pub fn is_topic(&self) -> bool {
        matches!(
            self,
            Destination::Topic(_) | Destination::TemporaryTopic(_)
        )
    }

    /// Returns true if the destination shape agrees with the given
    /// publish/subscribe mode.
    #[must_use]
    pub fn matches_pub_sub(&self, pub_sub: bool) -> bool {
        self.is_topic() == pub_sub
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Queue(name) => write!(f, "queue:{name}"),
            Destination::Topic(name) => write!(f, "topic:{name}"),
            Destination::TemporaryQueue(name) => write!(f, "temp-queue:{name}"),
            Destination::TemporaryTopic(name) => write!(f, "temp-topic:{name}"),
        }
    }
}
