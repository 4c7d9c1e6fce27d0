// Copyright (c) The Testwire Authors.
// Licensed under the MIT License.

//! Endpoint configuration and the synchronous request/reply producer.

use std::sync::Arc;
use std::time::Duration;

use testwire_transport::Destination;

use crate::converter::{DefaultMessageConverter, MessageConverter};
use crate::correlation::correlator::{Correlator, MessageIdCorrelator};

/// This module contains the synchronous producer implementation.
pub mod sync_producer;

pub use sync_producer::SyncProducer;

/// Reply window applied when the builder is not given one.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Correlation store polling granularity applied when the builder is not
/// given one.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(500);

/// Immutable per-endpoint settings, shared read-only by every exchange on
/// the endpoint.
/// # Example
/// ```
/// # use std::time::Duration;
/// # use testwire_messaging::endpoint::EndpointConfigurationBuilder;
/// let configuration = EndpointConfigurationBuilder::default()
///     .name("orders")
///     .destination_name("orders.in".to_string())
///     .reply_timeout(Some(Duration::from_secs(2)))
///     .build()
///     .unwrap();
/// ```
#[derive(Builder, Clone)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EndpointConfiguration {
    /// Endpoint name; scopes correlation key slots and names durable topic
    /// subscriptions.
    name: String,
    /// Resolved destination requests are sent to. Takes precedence over
    /// [`destination_name`](EndpointConfigurationBuilder::destination_name).
    #[builder(default = "None")]
    destination: Option<Destination>,
    /// Symbolic name of the destination requests are sent to, resolved
    /// under the endpoint's publish/subscribe mode.
    #[builder(default = "None")]
    destination_name: Option<String>,
    /// Fixed, resolved reply destination.
    #[builder(default = "None")]
    reply_destination: Option<Destination>,
    /// Symbolic name of a fixed reply destination.
    #[builder(default = "None")]
    reply_destination_name: Option<String>,
    /// Publish/subscribe (topic) mode; point-to-point (queue) otherwise.
    #[builder(default = "false")]
    pub_sub_domain: bool,
    /// Reply window for each exchange. `None` blocks indefinitely.
    #[builder(default = "Some(DEFAULT_REPLY_TIMEOUT)")]
    reply_timeout: Option<Duration>,
    /// Polling granularity of the endpoint's correlation store.
    #[builder(default = "DEFAULT_POLLING_INTERVAL")]
    polling_interval: Duration,
    /// Correlation key strategy.
    #[builder(default = "Arc::new(MessageIdCorrelator)")]
    correlator: Arc<dyn Correlator>,
    /// Wire-form converter.
    #[builder(default = "Arc::new(DefaultMessageConverter)")]
    converter: Arc<dyn MessageConverter>,
}

impl EndpointConfigurationBuilder {
    /// Validate the endpoint configuration.
    ///
    /// # Errors
    /// Returns a `String` describing the error if
    ///     - `name` is empty or whitespace
    ///     - neither `destination` nor a non-empty `destination_name` is set
    fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err("Endpoint name must not be empty".to_string());
            }
        }
        let destination_set = self.destination.as_ref().is_some_and(Option::is_some);
        let destination_name_set = self
            .destination_name
            .as_ref()
            .is_some_and(|n| n.as_ref().is_some_and(|n| !n.trim().is_empty()));
        if !destination_set && !destination_name_set {
            return Err(
                "Endpoint requires a destination or a non-empty destination name".to_string(),
            );
        }
        Ok(())
    }
}

impl EndpointConfiguration {
    /// The endpoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved send destination, if configured.
    #[must_use]
    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    /// The symbolic send destination name, if configured.
    #[must_use]
    pub fn destination_name(&self) -> Option<&str> {
        self.destination_name.as_deref()
    }

    /// The fixed reply destination, if configured.
    #[must_use]
    pub fn reply_destination(&self) -> Option<&Destination> {
        self.reply_destination.as_ref()
    }

    /// The symbolic fixed reply destination name, if configured.
    #[must_use]
    pub fn reply_destination_name(&self) -> Option<&str> {
        self.reply_destination_name.as_deref()
    }

    /// Whether the endpoint addresses topics rather than queues.
    #[must_use]
    pub fn pub_sub_domain(&self) -> bool {
        self.pub_sub_domain
    }

    /// The reply window, `None` meaning an unbounded wait.
    #[must_use]
    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout
    }

    /// The correlation store polling granularity.
    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    /// The correlation key strategy.
    #[must_use]
    pub fn correlator(&self) -> &Arc<dyn Correlator> {
        &self.correlator
    }

    /// The wire-form converter.
    #[must_use]
    pub fn converter(&self) -> &Arc<dyn MessageConverter> {
        &self.converter
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn defaults_are_point_to_point_with_bounded_wait() {
        let configuration = EndpointConfigurationBuilder::default()
            .name("orders")
            .destination_name("orders.in".to_string())
            .build()
            .unwrap();
        assert!(!configuration.pub_sub_domain());
        assert_eq!(configuration.reply_timeout(), Some(DEFAULT_REPLY_TIMEOUT));
        assert_eq!(configuration.polling_interval(), DEFAULT_POLLING_INTERVAL);
        assert!(configuration.reply_destination().is_none());
        assert!(configuration.reply_destination_name().is_none());
    }

    #[test_case("", "orders.in"; "empty name")]
    #[test_case(" ", "orders.in"; "whitespace name")]
    #[test_case("orders", ""; "empty destination name")]
    #[test_case("orders", " "; "whitespace destination name")]
    fn invalid_configurations_are_rejected(name: &str, destination_name: &str) {
        let result = EndpointConfigurationBuilder::default()
            .name(name)
            .destination_name(destination_name.to_string())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn missing_destination_is_rejected() {
        let result = EndpointConfigurationBuilder::default().name("orders").build();
        assert!(result.is_err());
    }

    #[test]
    fn destination_handle_satisfies_validation() {
        let configuration = EndpointConfigurationBuilder::default()
            .name("orders")
            .destination(Destination::Queue("orders.in".to_string()))
            .build()
            .unwrap();
        assert_eq!(
            configuration.destination(),
            Some(&Destination::Queue("orders.in".to_string()))
        );
    }
}
