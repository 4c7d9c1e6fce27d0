// Copyright (c) The Testwire Authors.
// Licensed under the MIT License.

//! Correlation key strategies.

use crate::common::message::Message;

/// Prefix of the context variable under which a correlation key is bound,
/// parameterized by endpoint name so endpoints sharing one context do not
/// collide.
pub const CORRELATION_KEY_NAME_PREFIX: &str = "testwire_correlation_key_";

/// Derives the correlation key for a request/reply exchange.
///
/// Implementations are pure: the same message always yields the same key,
/// and deriving a key never fails for a well-formed message. The same
/// strategy instance serves both the outbound key and any inbound selector
/// construction, so the two agree on format.
pub trait Correlator: Send + Sync {
    /// Names the context variable the key for `endpoint_name` is bound to.
    fn correlation_key_name(&self, endpoint_name: &str) -> String;

    /// Derives the correlation key for a message.
    fn correlation_key(&self, message: &Message) -> String;
}

/// Default strategy: the key is the message's own identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageIdCorrelator;

impl Correlator for MessageIdCorrelator {
    fn correlation_key_name(&self, endpoint_name: &str) -> String {
        format!("{CORRELATION_KEY_NAME_PREFIX}{endpoint_name}")
    }

    fn correlation_key(&self, message: &Message) -> String {
        message.id().to_string()
    }
}

/// Strategy deriving the key from a business header, for systems that carry
/// their own correlation identifier.
#[derive(Clone, Debug)]
pub struct HeaderCorrelator {
    header: String,
}

impl HeaderCorrelator {
    /// Creates a strategy keyed on the given header name.
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl Correlator for HeaderCorrelator {
    fn correlation_key_name(&self, endpoint_name: &str) -> String {
        format!("{CORRELATION_KEY_NAME_PREFIX}{endpoint_name}")
    }

    fn correlation_key(&self, message: &Message) -> String {
        match message.header(&self.header) {
            Some(value) => value.to_string(),
            None => {
                log::warn!(
                    "message {} carries no '{}' header, correlation key is empty",
                    message.id(),
                    self.header
                );
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_key_is_deterministic() {
        let correlator = MessageIdCorrelator;
        let message = Message::new("ping");
        assert_eq!(
            correlator.correlation_key(&message),
            correlator.correlation_key(&message)
        );
        assert_eq!(correlator.correlation_key(&message), message.id().to_string());
    }

    #[test]
    fn key_name_is_scoped_by_endpoint() {
        let correlator = MessageIdCorrelator;
        assert_eq!(
            correlator.correlation_key_name("orders"),
            "testwire_correlation_key_orders"
        );
        assert_ne!(
            correlator.correlation_key_name("orders"),
            correlator.correlation_key_name("billing")
        );
    }

    #[test]
    fn header_correlator_reads_business_header() {
        let correlator = HeaderCorrelator::new("order-id");
        let message = Message::new("ping").with_header("order-id", "A-17");
        assert_eq!(correlator.correlation_key(&message), "A-17");
    }

    #[test]
    fn header_correlator_degrades_to_empty_key() {
        let correlator = HeaderCorrelator::new("order-id");
        assert_eq!(correlator.correlation_key(&Message::new("ping")), "");
    }
}
