// Copyright (c) The Testwire Authors.
// Licensed under the MIT License.

//! Synchronous, correlation-based request/reply messaging for integration
//! testing.
//!
//! The engine presents a blocking send/receive contract over asynchronous
//! queue/topic transports: [`endpoint::SyncProducer::send`] dispatches a
//! request, waits for the matching reply and files it under a correlation
//! key; [`endpoint::SyncProducer::receive`] hands that reply back to the
//! test case that owns the key. Many exchanges may be in flight on one
//! endpoint at a time, each bounded by the configured reply timeout.

#![warn(missing_docs)]

pub mod common;
pub mod context;
pub mod converter;
pub mod correlation;
pub mod endpoint;

#[macro_use]
extern crate derive_builder;
