// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destinations for sealed batches.
//!
//! A [`Sink`] receives one batch at a time and either acknowledges it or
//! reports whether the failure is worth retrying. The scheduler never sends
//! two batches concurrently, so a sink sees batches in sequence order.

use async_trait::async_trait;

use crate::aggregator::Batch;
use crate::errors::SinkError;

pub mod http;

/// Positive acknowledgement of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub accepted: usize,
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Delivers `batch`.
    ///
    /// Must not be called again until the returned future resolves. An
    /// implementation may be called several times with the same batch when
    /// it returns [`SinkError::Retryable`].
    async fn send(&self, batch: &Batch) -> Result<Ack, SinkError>;
}
