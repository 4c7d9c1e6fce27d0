// Copyright (c) The Testwire Authors.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use testwire_transport::{
    Destination, MessageConsumer, MessageProducer, Selector, SessionProvider, TransportError,
    TransportSession,
};

use crate::common::exchange_error::ExchangeError;
use crate::common::message::{Message, ReplyAddress};
use crate::context::TestContext;
use crate::converter::ConversionError;
use crate::correlation::store::{CorrelationManager, PollingCorrelationStore};
use crate::endpoint::EndpointConfiguration;

/// Logged on every correlation store poll miss while a reply is awaited.
const PENDING_REPLY_MESSAGE: &str = "Reply message did not arrive yet";

/// Transport handles owned by a single exchange.
///
/// Each `send` runs with its own `Exchange`; nothing in here is shared
/// between concurrent exchanges. [`Exchange::release`] is the one cleanup
/// stage, run unconditionally on every exit path.
struct Exchange<S: TransportSession> {
    producer: Option<S::Producer>,
    consumer: Option<S::Consumer>,
    reply_destination: Option<Destination>,
}

impl<S: TransportSession> Exchange<S> {
    fn new() -> Self {
        Self {
            producer: None,
            consumer: None,
            reply_destination: None,
        }
    }

    /// Closes the exchange's handles and deletes its temporary reply
    /// destination. Failures are logged, never raised over the exchange's
    /// primary result.
    async fn release(&mut self, session: &S, endpoint_name: &str) {
        if let Some(mut producer) = self.producer.take() {
            if let Err(e) = producer.close().await {
                log::warn!("[{endpoint_name}] error while closing producer: {e}");
            }
        }
        if let Some(mut consumer) = self.consumer.take() {
            if let Err(e) = consumer.close().await {
                log::warn!("[{endpoint_name}] error while closing consumer: {e}");
            }
        }
        if let Some(destination) = self.reply_destination.take() {
            if destination.is_temporary() {
                log::debug!("[{endpoint_name}] deleting temporary destination '{destination}'");
                if let Err(e) = session.delete_destination(&destination).await {
                    log::error!(
                        "[{endpoint_name}] error while deleting temporary destination '{destination}': {e}"
                    );
                }
            }
        }
    }
}

/// Synchronous request/reply producer.
///
/// A producer is long-lived and shared: concurrent `send` calls are allowed
/// and each runs its own exchange with exclusively owned transport handles.
/// The transport session is acquired lazily from the provider on first use
/// and cached until [`SyncProducer::reset`].
///
/// `send` dispatches the request, waits for the matching reply, and files it
/// in the endpoint's correlation store under the key bound into the caller's
/// context; `receive` hands the filed reply back.
/// # Example
/// ```no_run
/// # use std::time::Duration;
/// # use tokio_test::block_on;
/// # use testwire_transport::memory::MemoryBroker;
/// # use testwire_messaging::common::message::Message;
/// # use testwire_messaging::context::TestContext;
/// # use testwire_messaging::endpoint::{EndpointConfigurationBuilder, SyncProducer};
/// let configuration = EndpointConfigurationBuilder::default()
///     .name("orders")
///     .destination_name("orders.in".to_string())
///     .reply_timeout(Some(Duration::from_secs(2)))
///     .build()
///     .unwrap();
/// let producer = SyncProducer::new(configuration, MemoryBroker::new());
/// # block_on(async {
/// let context = TestContext::new();
/// producer.send(&Message::new("ping"), &context).await?;
/// let reply = producer.receive(&context).await?;
/// # Ok::<(), testwire_messaging::common::exchange_error::ExchangeError>(())
/// # });
/// ```
pub struct SyncProducer<P: SessionProvider> {
    configuration: Arc<EndpointConfiguration>,
    correlation: Arc<dyn CorrelationManager<Message>>,
    provider: P,
    session: Mutex<Option<P::Session>>,
}

impl<P: SessionProvider> SyncProducer<P> {
    /// Creates a producer for the given endpoint, backed by a
    /// [`PollingCorrelationStore`] at the endpoint's polling interval.
    #[must_use]
    pub fn new(configuration: EndpointConfiguration, provider: P) -> Self {
        let correlation = Arc::new(PollingCorrelationStore::new(
            configuration.polling_interval(),
            PENDING_REPLY_MESSAGE,
        ));
        Self {
            configuration: Arc::new(configuration),
            correlation,
            provider,
            session: Mutex::new(None),
        }
    }

    /// Replaces the correlation store, for callers that share one store
    /// across endpoints or bring their own implementation.
    #[must_use]
    pub fn with_correlation_manager(
        mut self,
        correlation: Arc<dyn CorrelationManager<Message>>,
    ) -> Self {
        self.correlation = correlation;
        self
    }

    /// The correlation store shared by this endpoint's exchanges.
    #[must_use]
    pub fn correlation_manager(&self) -> Arc<dyn CorrelationManager<Message>> {
        self.correlation.clone()
    }

    /// The endpoint configuration.
    #[must_use]
    pub fn configuration(&self) -> &EndpointConfiguration {
        &self.configuration
    }

    /// Sends `message` and waits for its reply.
    ///
    /// Binds the correlation key into `context`, resolves the reply
    /// destination, dispatches the request with the reply address stamped on
    /// it, waits up to the configured reply timeout, and files the converted
    /// reply in the correlation store. Transport handles and any temporary
    /// reply destination are released on every exit path.
    ///
    /// # Errors
    /// [`ExchangeError`] of kind [`Timeout`](crate::common::exchange_error::ExchangeErrorKind::Timeout)
    /// if no reply arrives within the reply window; no entry is stored and
    /// the exchange counts as failed.
    ///
    /// [`ExchangeError`] of kind [`Transport`](crate::common::exchange_error::ExchangeErrorKind::Transport)
    /// if the session, a handle, or the send itself fails.
    ///
    /// [`ExchangeError`] of kind [`Conversion`](crate::common::exchange_error::ExchangeErrorKind::Conversion)
    /// if the request or the reply cannot be converted.
    pub async fn send(&self, message: &Message, context: &TestContext) -> Result<(), ExchangeError> {
        let correlator = self.configuration.correlator();
        let key_name = correlator.correlation_key_name(self.configuration.name());
        let key = correlator.correlation_key(message);
        self.correlation.save_key(&key_name, &key, context);

        context.on_outbound_message(message);

        let session = self.session().await?;
        let mut exchange = Exchange::<P::Session>::new();
        let result = self
            .run_exchange(&session, &mut exchange, message, &key, context)
            .await;
        exchange.release(&session, self.configuration.name()).await;
        result
    }

    /// Receives the reply for the exchange bound into `context`, waiting up
    /// to the endpoint's reply timeout.
    ///
    /// # Errors
    /// [`ExchangeError`] of kind [`CorrelationKeyMissing`](crate::common::exchange_error::ExchangeErrorKind::CorrelationKeyMissing)
    /// if no send bound a key into this context for this endpoint.
    ///
    /// [`ExchangeError`] of kind [`Timeout`](crate::common::exchange_error::ExchangeErrorKind::Timeout)
    /// if the reply is absent after the wait.
    pub async fn receive(&self, context: &TestContext) -> Result<Message, ExchangeError> {
        self.receive_with_timeout(context, self.configuration.reply_timeout())
            .await
    }

    /// Like [`SyncProducer::receive`] with an explicit wait bound (`None`
    /// waits indefinitely).
    ///
    /// # Errors
    /// See [`SyncProducer::receive`].
    pub async fn receive_with_timeout(
        &self,
        context: &TestContext,
        timeout: Option<Duration>,
    ) -> Result<Message, ExchangeError> {
        let key_name = self
            .configuration
            .correlator()
            .correlation_key_name(self.configuration.name());
        let key = self
            .correlation
            .lookup_key(&key_name, context)
            .map_err(|mut e| {
                e.endpoint_name = Some(self.configuration.name().to_string());
                e
            })?;
        self.receive_selected(&key, timeout).await
    }

    /// Receives the reply filed under an explicit correlation key,
    /// bypassing the context lookup.
    ///
    /// # Errors
    /// [`ExchangeError`] of kind [`Timeout`](crate::common::exchange_error::ExchangeErrorKind::Timeout)
    /// if the reply is absent after the wait.
    pub async fn receive_selected(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Message, ExchangeError> {
        match self.correlation.find(key, timeout).await {
            Some(message) => Ok(message),
            None => Err(ExchangeError::new_timeout_error(
                &self.reply_destination_label(),
                timeout,
                None,
                Some(self.configuration.name().to_string()),
            )),
        }
    }

    /// Drops the cached transport session; the next send reconnects through
    /// the provider.
    pub async fn reset(&self) {
        *self.session.lock().await = None;
    }

    /// Returns the cached session, connecting through the provider exactly
    /// once even under concurrent first use.
    async fn session(&self) -> Result<P::Session, ExchangeError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }
        log::debug!("[{}] connecting transport session", self.configuration.name());
        let session = self
            .provider
            .session()
            .await
            .map_err(|e| self.transport_error(e))?;
        *slot = Some(session.clone());
        Ok(session)
    }

    async fn run_exchange(
        &self,
        session: &P::Session,
        exchange: &mut Exchange<P::Session>,
        request: &Message,
        key: &str,
        context: &TestContext,
    ) -> Result<(), ExchangeError> {
        let configuration = &self.configuration;
        let mut wire = configuration
            .converter()
            .to_wire(request, configuration, context)
            .map_err(|e| self.conversion_error(e))?;

        let target = self.target_destination(session).await?;
        log::debug!(
            "[{}] sending request to destination '{target}'",
            configuration.name()
        );

        let producer = exchange.producer.insert(
            session
                .create_producer(&target)
                .await
                .map_err(|e| self.transport_error(e))?,
        );

        let reply_destination = self.reply_destination(session, request).await?;
        if reply_destination.is_temporary() {
            // The consumer must exist before the request goes out: a reply on
            // a temporary destination with no consumer attached is lost.
            exchange.consumer = Some(
                session
                    .create_consumer(&reply_destination)
                    .await
                    .map_err(|e| self.transport_error(e))?,
            );
        }
        exchange.reply_destination = Some(reply_destination.clone());
        wire.reply_to = Some(reply_destination.clone());

        let message_id = producer
            .send(wire)
            .await
            .map_err(|e| self.transport_error(e))?;
        log::info!(
            "[{}] request sent to destination '{target}'",
            configuration.name()
        );

        if exchange.consumer.is_none() {
            // Durable reply destination: the reply carries the request's
            // transport identifier as its correlation token, so a selective
            // consumer created after the send still sees exactly this
            // exchange's reply.
            let selector = Selector::correlation_id(message_id.as_str());
            let subscription = reply_destination.is_topic().then(|| configuration.name());
            exchange.consumer = Some(
                session
                    .create_selective_consumer(&reply_destination, &selector, subscription)
                    .await
                    .map_err(|e| self.transport_error(e))?,
            );
        }
        let consumer = match exchange.consumer.as_mut() {
            Some(consumer) => consumer,
            // Set on one of the two branches above.
            None => unreachable!(),
        };

        log::debug!(
            "[{}] waiting for reply on destination '{reply_destination}'",
            configuration.name()
        );
        let reply_wire = consumer
            .receive(configuration.reply_timeout())
            .await
            .map_err(|e| self.transport_error(e))?;
        let Some(reply_wire) = reply_wire else {
            log::error!(
                "[{}] reply wait on destination '{reply_destination}' timed out",
                configuration.name()
            );
            return Err(ExchangeError::new_timeout_error(
                reply_destination.name(),
                configuration.reply_timeout(),
                None,
                Some(configuration.name().to_string()),
            ));
        };

        let reply = configuration
            .converter()
            .from_wire(reply_wire, configuration, context)
            .map_err(|e| self.conversion_error(e))?;
        log::info!(
            "[{}] received reply on destination '{reply_destination}'",
            configuration.name()
        );
        context.on_inbound_message(&reply);
        self.correlation.store(key.to_string(), reply);
        Ok(())
    }

    /// Resolves the destination requests are sent to.
    async fn target_destination(
        &self,
        session: &P::Session,
    ) -> Result<Destination, ExchangeError> {
        if let Some(destination) = self.configuration.destination() {
            return Ok(destination.clone());
        }
        match self.configuration.destination_name() {
            Some(name) => session
                .resolve(name, self.configuration.pub_sub_domain())
                .await
                .map_err(|e| self.transport_error(e)),
            None => Err(ExchangeError::new_configuration_invalid_error(
                "destination",
                Some("endpoint has neither a destination nor a destination name".to_string()),
                Some(self.configuration.name().to_string()),
            )),
        }
    }

    /// Resolves the reply destination. Precedence, highest first: the reply
    /// address on the request, the configured reply destination, the
    /// configured reply destination name, a fresh temporary destination.
    async fn reply_destination(
        &self,
        session: &P::Session,
        request: &Message,
    ) -> Result<Destination, ExchangeError> {
        let pub_sub = self.configuration.pub_sub_domain();
        if let Some(address) = request.reply_to() {
            return match address {
                ReplyAddress::Destination(destination) => {
                    self.checked_reply_mode(session, destination).await
                }
                ReplyAddress::Name(name) => session
                    .resolve(name, pub_sub)
                    .await
                    .map_err(|e| self.transport_error(e)),
            };
        }
        if let Some(destination) = self.configuration.reply_destination() {
            return self.checked_reply_mode(session, destination).await;
        }
        if let Some(name) = self.configuration.reply_destination_name() {
            return session
                .resolve(name, pub_sub)
                .await
                .map_err(|e| self.transport_error(e));
        }
        session
            .create_temporary_destination(pub_sub)
            .await
            .map_err(|e| self.transport_error(e))
    }

    /// A resolved reply destination whose shape contradicts the endpoint's
    /// publish/subscribe mode is a configuration error; warn and fall back
    /// to the configured mode rather than misroute.
    async fn checked_reply_mode(
        &self,
        session: &P::Session,
        destination: &Destination,
    ) -> Result<Destination, ExchangeError> {
        let pub_sub = self.configuration.pub_sub_domain();
        if destination.matches_pub_sub(pub_sub) {
            return Ok(destination.clone());
        }
        if destination.is_temporary() {
            log::warn!(
                "[{}] reply destination '{destination}' does not match setting 'publish-subscribe-domain' (={pub_sub}); using it as-is",
                self.configuration.name()
            );
            return Ok(destination.clone());
        }
        log::warn!(
            "[{}] reply destination '{destination}' does not match setting 'publish-subscribe-domain' (={pub_sub}); resolving '{}' under the configured mode",
            self.configuration.name(),
            destination.name()
        );
        session
            .resolve(destination.name(), pub_sub)
            .await
            .map_err(|e| self.transport_error(e))
    }

    /// Best description of where replies for this endpoint arrive, for
    /// timeout diagnostics.
    fn reply_destination_label(&self) -> String {
        if let Some(destination) = self.configuration.reply_destination() {
            destination.name().to_string()
        } else if let Some(name) = self.configuration.reply_destination_name() {
            name.to_string()
        } else {
            format!(
                "temporary reply destination of endpoint '{}'",
                self.configuration.name()
            )
        }
    }

    fn transport_error(&self, error: TransportError) -> ExchangeError {
        ExchangeError::new_transport_error(
            Box::new(error),
            None,
            Some(self.configuration.name().to_string()),
        )
    }

    fn conversion_error(&self, error: ConversionError) -> ExchangeError {
        ExchangeError::new_conversion_error(
            Box::new(error),
            None,
            Some(self.configuration.name().to_string()),
        )
    }
}
