// Copyright (c) The Testwire Authors.
// Licensed under the MIT License.

//! The engine's message model.

use bytes::Bytes;
use uuid::Uuid;

use testwire_transport::Destination;

/// A caller-supplied reply address: either a symbolic name to be resolved
/// under the endpoint's publish/subscribe mode, or an already-resolved
/// destination handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyAddress {
    /// A destination name, resolved at send time.
    Name(String),
    /// A resolved destination handle.
    Destination(Destination),
}

/// A message as the test framework sees it: an opaque payload, ordered
/// headers, and an optional reply address.
///
/// Every message carries a generated identity; the default correlation
/// strategy derives its key from it.
#[derive(Clone, Debug)]
pub struct Message {
    id: Uuid,
    headers: Vec<(String, String)>,
    reply_to: Option<ReplyAddress>,
    payload: Bytes,
}

impl Message {
    /// Creates a message with the given payload and no headers.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            headers: Vec::new(),
            reply_to: None,
            payload: payload.into(),
        }
    }

    /// The message identity.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Adds a header, replacing any existing header of the same name.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Sets a header, replacing any existing header of the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    /// Looks up a header value by name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// All headers, in insertion order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Sets the reply address.
    #[must_use]
    pub fn with_reply_to(mut self, address: ReplyAddress) -> Self {
        self.reply_to = Some(address);
        self
    }

    /// The caller-supplied reply address, if any.
    #[must_use]
    pub fn reply_to(&self) -> Option<&ReplyAddress> {
        self.reply_to.as_ref()
    }

    /// The message payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}
