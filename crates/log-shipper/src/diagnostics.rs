// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Two bounded feeds of recent problems, readable by the host at any time.
//!
//! The internal feed collects the shipper's own failures (dropped events,
//! exhausted retries, fatal sink errors). The application feed collects
//! error-level lines the host logged through the shipper. Neither feed ever
//! blocks the caller or grows past its capacity.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::ring_buffer::BoundedRingBuffer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticEntry {
    pub id: u64,
    pub time: DateTime<Utc>,
    pub message: String,
}

/// Both feeds at one point in time, newest entries first.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub internal_errors: Vec<DiagnosticEntry>,
    pub application_errors: Vec<DiagnosticEntry>,
}

#[derive(Debug)]
struct Feed {
    entries: BoundedRingBuffer<DiagnosticEntry>,
    next_id: AtomicU64,
}

impl Feed {
    fn new(capacity: usize) -> Self {
        Self {
            entries: BoundedRingBuffer::new(capacity),
            next_id: AtomicU64::new(1),
        }
    }

    fn record(&self, message: String) {
        // Ids are taken under the buffer lock so the feed stays in id order.
        self.entries.enqueue_with(|| DiagnosticEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            time: Utc::now(),
            message,
        });
    }
}

#[derive(Debug)]
pub struct Diagnostics {
    internal: Feed,
    application: Feed,
}

impl Diagnostics {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            internal: Feed::new(capacity),
            application: Feed::new(capacity),
        }
    }

    /// Records a failure of the shipper itself.
    pub fn record_internal_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("DIAGNOSTICS | {message}");
        self.internal.record(message);
    }

    pub fn record_application_error(&self, message: impl Into<String>) {
        self.application.record(message.into());
    }

    /// Most recent first.
    #[must_use]
    pub fn list_internal_errors(&self) -> Vec<DiagnosticEntry> {
        self.internal.entries.snapshot_newest_first()
    }

    /// Most recent first.
    #[must_use]
    pub fn list_application_errors(&self) -> Vec<DiagnosticEntry> {
        self.application.entries.snapshot_newest_first()
    }

    #[must_use]
    pub fn report(&self) -> DiagnosticsReport {
        DiagnosticsReport {
            internal_errors: self.list_internal_errors(),
            application_errors: self.list_application_errors(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.internal.entries.capacity()
    }
}
