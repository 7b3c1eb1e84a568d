// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Accumulation of log events into size-bounded batches.
//!
//! The accumulator owns exactly one open batch. Events are appended in the
//! order they arrive; an event that would push the open batch past the size
//! ceiling is handed back so the scheduler can seal the current batch first.
//!
//! # Batching Rules
//!
//! 1. **Size limit**: `total_bytes` never exceeds the configured ceiling
//! 2. **Oversized events**: an event larger than the ceiling can never fit
//!    any batch and is handed back as [`AppendResult::TooLarge`]
//! 3. **Sealing**: [`BatchAccumulator::seal`] moves the open events into an
//!    immutable [`Batch`] and opens a fresh, empty one

use std::mem;
use std::time::Duration;
use tokio::time::Instant;

use crate::constants;
use crate::event::LogEvent;

/// A sealed, immutable group of events dispatched together.
///
/// There is no way to append to a `Batch`: sealing moves the events out of
/// the accumulator into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    events: Vec<LogEvent>,
    total_bytes: usize,
    created_at: Instant,
}

impl Batch {
    #[must_use]
    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    /// Sum of the `size_bytes` of every event in the batch.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// When the batch was opened (not when it was sealed).
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sequence id range covered by the batch, for log messages.
    #[must_use]
    pub fn sequence_range(&self) -> Option<(u64, u64)> {
        let first = self.events.first()?.sequence_id();
        let last = self.events.last()?.sequence_id();
        Some((first, last))
    }
}

/// Outcome of [`BatchAccumulator::append`].
#[derive(Debug, PartialEq, Eq)]
pub enum AppendResult {
    /// The event joined the open batch.
    Accepted,
    /// The event fits an empty batch but not the open one. The caller seals
    /// the open batch and appends the returned event again.
    WouldExceedCeiling(LogEvent),
    /// The event alone exceeds the ceiling and can never be batched.
    TooLarge(LogEvent),
}

#[derive(Debug)]
pub struct BatchAccumulator {
    events: Vec<LogEvent>,
    total_bytes: usize,
    opened_at: Instant,
    ceiling_bytes: usize,
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        Self::new(constants::DEFAULT_BATCH_SIZE_CEILING_BYTES)
    }
}

impl BatchAccumulator {
    /// Creates an accumulator with an empty open batch.
    ///
    /// The ceiling is expected to have been validated by
    /// [`crate::ShipperConfig`]; it is not checked again here.
    #[must_use]
    pub fn new(ceiling_bytes: usize) -> Self {
        Self {
            events: Vec::new(),
            total_bytes: 0,
            opened_at: Instant::now(),
            ceiling_bytes,
        }
    }

    pub fn append(&mut self, event: LogEvent) -> AppendResult {
        let size = event.size_bytes();
        if size > self.ceiling_bytes {
            return AppendResult::TooLarge(event);
        }
        // Checked before adding so the open batch never crosses the ceiling.
        if self.total_bytes + size > self.ceiling_bytes {
            return AppendResult::WouldExceedCeiling(event);
        }

        self.total_bytes += size;
        self.events.push(event);
        AppendResult::Accepted
    }

    /// Seals the open batch, which may be empty, and opens a new one.
    pub fn seal(&mut self) -> Batch {
        let batch = Batch {
            events: mem::take(&mut self.events),
            total_bytes: mem::take(&mut self.total_bytes),
            created_at: self.opened_at,
        };
        self.opened_at = Instant::now();
        batch
    }

    /// Time since the open batch was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    #[must_use]
    pub fn ceiling_bytes(&self) -> usize {
        self.ceiling_bytes
    }
}
