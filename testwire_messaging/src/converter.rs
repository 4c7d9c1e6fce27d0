// Copyright (c) The Testwire Authors.
// Licensed under the MIT License.

//! Conversion between the engine's message model and the transport wire
//! form.

use std::error::Error;

use testwire_transport::WireMessage;

use crate::common::message::Message;
use crate::context::TestContext;
use crate::endpoint::EndpointConfiguration;

/// Error raised when a message cannot be converted to or from wire form.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ConversionError {
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl ConversionError {
    /// Creates a conversion error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: Box<dyn Error + Send + Sync>) -> Self {
        self.source = Some(source);
        self
    }
}

/// Maps messages to and from their wire form.
///
/// The engine stamps the transport identifier and reply address itself;
/// converters are responsible for headers and payload only.
pub trait MessageConverter: Send + Sync {
    /// Builds the wire form of an outbound request.
    ///
    /// # Errors
    /// [`ConversionError`] if the message cannot be represented on the wire.
    fn to_wire(
        &self,
        message: &Message,
        configuration: &EndpointConfiguration,
        context: &TestContext,
    ) -> Result<WireMessage, ConversionError>;

    /// Builds the message model from a received reply.
    ///
    /// # Errors
    /// [`ConversionError`] if the wire message cannot be represented in the
    /// model.
    fn from_wire(
        &self,
        wire: WireMessage,
        configuration: &EndpointConfiguration,
        context: &TestContext,
    ) -> Result<Message, ConversionError>;
}

/// Converter copying headers and payload verbatim.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultMessageConverter;

impl MessageConverter for DefaultMessageConverter {
    fn to_wire(
        &self,
        message: &Message,
        _configuration: &EndpointConfiguration,
        _context: &TestContext,
    ) -> Result<WireMessage, ConversionError> {
        Ok(WireMessage {
            headers: message.headers().to_vec(),
            payload: message.payload().clone(),
            ..WireMessage::default()
        })
    }

    fn from_wire(
        &self,
        wire: WireMessage,
        _configuration: &EndpointConfiguration,
        _context: &TestContext,
    ) -> Result<Message, ConversionError> {
        let mut message = Message::new(wire.payload);
        for (name, value) in wire.headers {
            message.set_header(name, value);
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::endpoint::EndpointConfigurationBuilder;

    use super::*;

    #[test]
    fn headers_and_payload_survive_the_round_trip() {
        let configuration = EndpointConfigurationBuilder::default()
            .name("orders")
            .destination_name("orders.in".to_string())
            .build()
            .unwrap();
        let context = TestContext::new();
        let converter = DefaultMessageConverter;

        let message = Message::new("ping")
            .with_header("operation", "sayHello")
            .with_header("tenant", "acme");
        let wire = converter.to_wire(&message, &configuration, &context).unwrap();
        assert_eq!(wire.payload, Bytes::from_static(b"ping"));

        let back = converter.from_wire(wire, &configuration, &context).unwrap();
        assert_eq!(back.headers(), message.headers());
        assert_eq!(back.payload(), message.payload());
    }
}
