// Copyright (c) The Testwire Authors.
// Licensed under the MIT License.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use testwire_transport::TransportError;

/// Represents the kind of error raised by a request/reply exchange.
#[derive(Debug, PartialEq, Eq)]
pub enum ExchangeErrorKind {
    /// No reply arrived within the configured window.
    Timeout,
    /// A receive was attempted with no correlation key bound for the
    /// endpoint, i.e. without a prior matching send.
    CorrelationKeyMissing,
    /// The underlying transport failed. The nested error carries the cause.
    Transport,
    /// Converting a message to or from its wire form failed.
    Conversion,
    /// An endpoint configuration value is missing or invalid.
    ConfigurationInvalid,
}

/// An error raised by the request/reply engine.
///
/// Every transport-level failure is wrapped into this vocabulary at the
/// producer boundary; nothing transport-specific crosses the engine's public
/// operations.
#[derive(Debug)]
pub struct ExchangeError {
    /// The error message.
    pub message: Option<String>,
    /// The specific kind of error that occurred.
    pub kind: ExchangeErrorKind,
    /// Name of the endpoint the exchange ran on.
    pub endpoint_name: Option<String>,
    /// Name of the destination relevant to the error, if any.
    pub destination: Option<String>,
    /// The reply window that elapsed, for timeout errors.
    pub timeout: Option<Duration>,
    /// Name of the configuration property or correlation key slot involved.
    pub property_name: Option<String>,
    /// Error from a dependent component that caused this error.
    pub nested_error: Option<Box<dyn Error + Send + Sync>>,
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = &self.message {
            write!(f, "{message}")
        } else {
            match self.kind {
                ExchangeErrorKind::Timeout => write!(
                    f,
                    "reply wait on destination '{}' elapsed after {}",
                    self.destination.as_deref().unwrap_or("Not Specified"),
                    self.timeout.map_or_else(
                        || "an unbounded wait".to_string(),
                        |t| format!("{} ms", t.as_millis())
                    )
                ),
                ExchangeErrorKind::CorrelationKeyMissing => write!(
                    f,
                    "no correlation key bound under '{}'; a request must be sent before its reply can be received",
                    self.property_name.as_deref().unwrap_or("Not Specified")
                ),
                ExchangeErrorKind::Transport => write!(f, "transport communication error"),
                ExchangeErrorKind::Conversion => {
                    write!(f, "conversion of the message to or from wire form failed")
                }
                ExchangeErrorKind::ConfigurationInvalid => write!(
                    f,
                    "the endpoint property '{}' is missing or invalid",
                    self.property_name.as_deref().unwrap_or("Not Specified")
                ),
            }
        }
    }
}

impl Error for ExchangeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.nested_error
            .as_ref()
            .map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl ExchangeError {
    fn new(kind: ExchangeErrorKind) -> ExchangeError {
        ExchangeError {
            message: None,
            kind,
            endpoint_name: None,
            destination: None,
            timeout: None,
            property_name: None,
            nested_error: None,
        }
    }

    /// Creates a new [`ExchangeError`] for an elapsed reply window.
    #[must_use]
    pub fn new_timeout_error(
        destination: &str,
        timeout: Option<Duration>,
        message: Option<String>,
        endpoint_name: Option<String>,
    ) -> ExchangeError {
        let mut e = ExchangeError {
            message,
            destination: Some(destination.to_string()),
            timeout,
            endpoint_name,
            ..ExchangeError::new(ExchangeErrorKind::Timeout)
        };
        e.ensure_error_message();
        e
    }

    /// Creates a new [`ExchangeError`] for a receive without a prior send.
    #[must_use]
    pub fn new_correlation_key_missing_error(
        key_name: &str,
        endpoint_name: Option<String>,
    ) -> ExchangeError {
        let mut e = ExchangeError {
            property_name: Some(key_name.to_string()),
            endpoint_name,
            ..ExchangeError::new(ExchangeErrorKind::CorrelationKeyMissing)
        };
        e.ensure_error_message();
        e
    }

    /// Creates a new [`ExchangeError`] wrapping a transport failure.
    #[must_use]
    pub fn new_transport_error(
        nested_error: Box<dyn Error + Send + Sync>,
        message: Option<String>,
        endpoint_name: Option<String>,
    ) -> ExchangeError {
        let mut e = ExchangeError {
            message,
            endpoint_name,
            nested_error: Some(nested_error),
            ..ExchangeError::new(ExchangeErrorKind::Transport)
        };
        e.ensure_error_message();
        e
    }

    /// Creates a new [`ExchangeError`] for a failed message conversion.
    #[must_use]
    pub fn new_conversion_error(
        nested_error: Box<dyn Error + Send + Sync>,
        message: Option<String>,
        endpoint_name: Option<String>,
    ) -> ExchangeError {
        let mut e = ExchangeError {
            message,
            endpoint_name,
            nested_error: Some(nested_error),
            ..ExchangeError::new(ExchangeErrorKind::Conversion)
        };
        e.ensure_error_message();
        e
    }

    /// Creates a new [`ExchangeError`] for an invalid configuration value.
    #[must_use]
    pub fn new_configuration_invalid_error(
        property_name: &str,
        message: Option<String>,
        endpoint_name: Option<String>,
    ) -> ExchangeError {
        let mut e = ExchangeError {
            message,
            property_name: Some(property_name.to_string()),
            endpoint_name,
            ..ExchangeError::new(ExchangeErrorKind::ConfigurationInvalid)
        };
        e.ensure_error_message();
        e
    }

    /// Sets the error's message to a default value if a custom message is
    /// not already set.
    pub fn ensure_error_message(&mut self) {
        if self.message.is_none() {
            self.message = Some(self.to_string());
        }
    }
}

impl From<TransportError> for ExchangeError {
    fn from(error: TransportError) -> Self {
        ExchangeError::new_transport_error(Box::new(error), None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_destination_and_window() {
        let e = ExchangeError::new_timeout_error(
            "replies.orders",
            Some(Duration::from_millis(2000)),
            None,
            Some("orders".to_string()),
        );
        assert_eq!(e.kind, ExchangeErrorKind::Timeout);
        let rendered = e.to_string();
        assert!(rendered.contains("replies.orders"));
        assert!(rendered.contains("2000 ms"));
    }

    #[test]
    fn key_missing_is_not_a_timeout() {
        let e = ExchangeError::new_correlation_key_missing_error(
            "testwire_correlation_key_orders",
            None,
        );
        assert_eq!(e.kind, ExchangeErrorKind::CorrelationKeyMissing);
        assert!(e.to_string().contains("testwire_correlation_key_orders"));
    }

    #[test]
    fn transport_cause_is_preserved() {
        let e: ExchangeError =
            TransportError::DestinationUnavailable("tmp.queue.1".to_string()).into();
        assert_eq!(e.kind, ExchangeErrorKind::Transport);
        let source = std::error::Error::source(&e).expect("cause preserved");
        assert!(source.to_string().contains("tmp.queue.1"));
    }
}
