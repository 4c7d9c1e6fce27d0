// Copyright (c) The Testwire Authors.
// Licensed under the MIT License.

//! Per-test-case state carrier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::common::message::Message;

/// Observer attached to a [`TestContext`] to see every message the engine
/// sends or receives, e.g. for tracing or recording.
pub trait MessageListener: Send + Sync {
    /// Called immediately before a request is handed to the transport.
    fn on_outbound_message(&self, _message: &Message) {}
    /// Called immediately after a reply has been converted from wire form.
    fn on_inbound_message(&self, _message: &Message) {}
}

/// The per-test-case state carrier.
///
/// Holds a string variable bag — the slot correlation keys are bound into
/// between `send` and `receive` — and the listener chain the engine notifies
/// on every outbound and inbound message.
#[derive(Default)]
pub struct TestContext {
    variables: Mutex<HashMap<String, String>>,
    listeners: Mutex<Vec<Arc<dyn MessageListener>>>,
}

impl TestContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a variable, replacing any previous value.
    pub fn set_variable(&self, name: impl Into<String>, value: impl Into<String>) {
        self.variables
            .lock()
            .unwrap()
            .insert(name.into(), value.into());
    }

    /// Looks up a variable.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<String> {
        self.variables.lock().unwrap().get(name).cloned()
    }

    /// Registers a listener for outbound and inbound messages.
    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Notifies listeners of a message about to be sent.
    pub fn on_outbound_message(&self, message: &Message) {
        log::debug!("outbound message {}", message.id());
        for listener in self.listeners.lock().unwrap().iter() {
            listener.on_outbound_message(message);
        }
    }

    /// Notifies listeners of a reply that has just been received.
    pub fn on_inbound_message(&self, message: &Message) {
        log::debug!("inbound message {}", message.id());
        for listener in self.listeners.lock().unwrap().iter() {
            listener.on_inbound_message(message);
        }
    }
}
