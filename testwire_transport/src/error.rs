// Copyright (c) The Testwire Authors.
// Licensed under the MIT License.

//! Common error types.

use thiserror::Error;

/// Error raised by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The destination does not exist or has been deleted.
    #[error("destination '{0}' is not available")]
    DestinationUnavailable(String),
    /// The producer or consumer handle has been closed and can no longer be used.
    #[error("transport handle is closed")]
    HandleClosed,
    /// The underlying connection could not be established or was lost.
    #[error("connection failure: {0}")]
    Connection(String),
}
