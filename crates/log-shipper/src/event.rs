// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// One application log line plus the metadata assigned at submission.
///
/// Immutable once created. Owned by the intake queue, then by the open batch,
/// then by the sealed batch until the sink acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    sequence_id: u64,
    timestamp: SystemTime,
    message: Bytes,
    size_bytes: usize,
}

impl LogEvent {
    /// Creates an event stamped with the current wall-clock time.
    ///
    /// `size_bytes` is the size the caller accounts for this event; it is the
    /// value batch ceilings are checked against.
    #[must_use]
    pub fn new(sequence_id: u64, message: impl Into<Bytes>, size_bytes: usize) -> Self {
        Self {
            sequence_id,
            timestamp: SystemTime::now(),
            message: message.into(),
            size_bytes,
        }
    }

    #[must_use]
    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Milliseconds since the Unix epoch, the unit log ingestion APIs expect.
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        match self.timestamp.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
            Err(_) => 0,
        }
    }

    #[must_use]
    pub fn message(&self) -> &Bytes {
        &self.message
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event() {
        let before = SystemTime::now();
        let event = LogEvent::new(7, "hello", 5);

        assert_eq!(event.sequence_id(), 7);
        assert_eq!(event.message().as_ref(), b"hello");
        assert_eq!(event.size_bytes(), 5);
        assert!(event.timestamp() >= before);
    }

    #[test]
    fn test_declared_size_is_kept() {
        // Callers may account for envelope overhead on top of the raw bytes.
        let event = LogEvent::new(1, "abc", 29);
        assert_eq!(event.size_bytes(), 29);
    }

    #[test]
    fn test_timestamp_millis() {
        let event = LogEvent::new(1, Bytes::from_static(b"x"), 1);
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;

        assert!(event.timestamp_millis() > 0);
        assert!(event.timestamp_millis() <= now_ms);
    }
}
