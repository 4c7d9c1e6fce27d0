// Copyright (c) The Testwire Authors.
// Licensed under the MIT License.

//! Transport abstractions for the testwire messaging engine.
//!
//! This crate defines the boundary between the synchronous request/reply
//! engine and whatever actually moves messages: [`Destination`] addressing,
//! the [`WireMessage`] exchanged with a broker, and the
//! [`interface`](crate::interface) traits a transport implements. It also
//! ships [`MemoryBroker`](crate::memory::MemoryBroker), a complete
//! in-process implementation of that boundary used by the workspace's own
//! tests and by test suites that do not want a real broker.

#![warn(missing_docs)]

pub mod destination;
pub mod error;
pub mod interface;
pub mod memory;

pub use destination::Destination;
pub use error::TransportError;
pub use interface::{
    MessageConsumer, MessageProducer, Selector, SessionProvider, TransportSession, WireMessage,
};
