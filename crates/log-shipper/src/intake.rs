// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Producer side of a shipper.
//!
//! [`ShipperHandle`] is cheap to clone and is what application code holds.
//! Submitting never awaits: the event either lands on the worker's channel
//! right away or is dropped and recorded in diagnostics.
//!
//! # Backpressure
//!
//! A pending counter tracks every accepted event until the worker is done
//! with it (acknowledged, dropped or abandoned). Once it reaches
//! `max_queued_messages`, further submissions are dropped with
//! [`SubmitError::QueueFull`].

use bytes::Bytes;
use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Level;

use crate::diagnostics::Diagnostics;
use crate::errors::{ShipperError, SubmitError};
use crate::event::LogEvent;
use crate::format::{error_chain, LineFormat, LogRecord};
use crate::scheduler::{Command, SchedulerState};

/// State shared by every handle of one shipper and its worker.
#[derive(Debug)]
pub(crate) struct IntakeState {
    pub(crate) diagnostics: Diagnostics,
    pending: AtomicUsize,
    next_sequence: AtomicU64,
    shutting_down: AtomicBool,
    max_queued_messages: usize,
    // Held while an id is assigned and the event is put on the channel, so
    // accepted events reach the worker in id order.
    order: Mutex<()>,
}

impl IntakeState {
    pub(crate) fn new(max_queued_messages: usize, diagnostics_capacity: usize) -> Self {
        Self {
            diagnostics: Diagnostics::new(diagnostics_capacity),
            pending: AtomicUsize::new(0),
            next_sequence: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            max_queued_messages,
            order: Mutex::new(()),
        }
    }

    fn try_reserve(&self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (pending < self.max_queued_messages).then_some(pending + 1)
            })
            .is_ok()
    }

    /// Marks `count` events as no longer pending.
    pub(crate) fn release(&self, count: usize) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                Some(pending.saturating_sub(count))
            });
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Releases everything still pending and returns how many events that was.
    pub(crate) fn abandon_pending(&self) -> usize {
        self.pending.swap(0, Ordering::AcqRel)
    }

    /// Stops intake. Once this returns no further event reaches the channel.
    pub(crate) fn begin_shutdown(&self) {
        let _order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        self.shutting_down.store(true, Ordering::Release);
    }
}

/// Cloneable handle used by application code to feed a shipper.
#[derive(Debug, Clone)]
pub struct ShipperHandle {
    tx: mpsc::UnboundedSender<Command>,
    intake: Arc<IntakeState>,
    state: watch::Receiver<SchedulerState>,
    line_format: LineFormat,
}

impl ShipperHandle {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<Command>,
        intake: Arc<IntakeState>,
        state: watch::Receiver<SchedulerState>,
        line_format: LineFormat,
    ) -> Self {
        Self {
            tx,
            intake,
            state,
            line_format,
        }
    }

    /// Queues one log line and returns the sequence id it was given.
    ///
    /// `size_bytes` is what the line counts against the batch size ceiling.
    /// A dropped line still consumes a sequence id.
    pub fn submit(&self, message: impl Into<Bytes>, size_bytes: usize) -> Result<u64, SubmitError> {
        let (sequence_id, outcome) = {
            let _order = self
                .intake
                .order
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let sequence_id = self.intake.next_sequence.fetch_add(1, Ordering::Relaxed);

            let outcome = if self.intake.shutting_down.load(Ordering::Acquire) {
                Err(SubmitError::ShuttingDown)
            } else if !self.intake.try_reserve() {
                Err(SubmitError::QueueFull {
                    max: self.intake.max_queued_messages,
                })
            } else {
                let event = LogEvent::new(sequence_id, message, size_bytes);
                self.tx.send(Command::Submit(event)).map_err(|_| {
                    self.intake.release(1);
                    SubmitError::ShuttingDown
                })
            };
            (sequence_id, outcome)
        };

        match outcome {
            Ok(()) => Ok(sequence_id),
            Err(e) => {
                self.intake
                    .diagnostics
                    .record_internal_error(format!("event {sequence_id} dropped: {e}"));
                Err(e)
            }
        }
    }

    /// Formats and queues one application log line.
    ///
    /// Error-level lines are also recorded in the application error feed.
    pub fn log_at(
        &self,
        level: Level,
        message: &str,
        error: Option<&(dyn Error + 'static)>,
    ) -> Result<u64, SubmitError> {
        let chain = error.map(error_chain);
        self.log_record(&LogRecord {
            level,
            category: "",
            message,
            scopes: &[],
            event_id: None,
            error: chain.as_deref(),
        })
    }

    /// Like [`log_at`](Self::log_at) for a fully described record.
    pub fn log_record(&self, record: &LogRecord<'_>) -> Result<u64, SubmitError> {
        let line = self.line_format.render(record);
        if record.level == Level::ERROR {
            self.intake
                .diagnostics
                .record_application_error(line.trim_end());
        }
        let size_bytes = line.len();
        self.submit(line, size_bytes)
    }

    /// Seals the open batch, dispatches it and waits until the worker is done
    /// with it, retries included.
    pub async fn flush(&self) -> Result<(), ShipperError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(done_tx))
            .map_err(|_| ShipperError::NotRunning)?;
        done_rx.await.map_err(|_| ShipperError::NotRunning)
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.intake.diagnostics
    }

    /// Events accepted but not yet acknowledged or dropped.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.intake.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_with(
        max_queued: usize,
    ) -> (
        ShipperHandle,
        mpsc::UnboundedReceiver<Command>,
        watch::Sender<SchedulerState>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let intake = Arc::new(IntakeState::new(max_queued, 10));
        (
            ShipperHandle::new(tx, intake, state_rx, LineFormat::default()),
            rx,
            state_tx,
        )
    }

    fn submitted(rx: &mut mpsc::UnboundedReceiver<Command>) -> Vec<LogEvent> {
        let mut events = Vec::new();
        while let Ok(command) = rx.try_recv() {
            if let Command::Submit(event) = command {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn test_submit_assigns_increasing_ids() {
        let (handle, mut rx, _state) = handle_with(10);

        assert_eq!(handle.submit("a", 1).unwrap(), 1);
        assert_eq!(handle.submit("b", 1).unwrap(), 2);

        let events = submitted(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence_id(), 1);
        assert_eq!(events[1].message().as_ref(), b"b");
        assert_eq!(handle.pending(), 2);
    }

    #[test]
    fn test_queue_full_drops_and_records() {
        let (handle, mut rx, _state) = handle_with(2);

        handle.submit("a", 1).unwrap();
        handle.submit("b", 1).unwrap();
        assert_eq!(
            handle.submit("c", 1),
            Err(SubmitError::QueueFull { max: 2 })
        );

        assert_eq!(submitted(&mut rx).len(), 2);
        let entries = handle.diagnostics().list_internal_errors();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].message.contains("event 3 dropped"));
    }

    #[test]
    fn test_dropped_event_consumes_id() {
        let (handle, _rx, _state) = handle_with(1);

        handle.submit("a", 1).unwrap();
        assert!(handle.submit("b", 1).is_err());
        handle.intake.release(1);
        assert_eq!(handle.submit("c", 1).unwrap(), 3);
    }

    #[test]
    fn test_release_reopens_capacity() {
        let (handle, _rx, _state) = handle_with(1);

        handle.submit("a", 1).unwrap();
        handle.intake.release(1);
        assert!(handle.submit("b", 1).is_ok());
    }

    #[test]
    fn test_release_saturates() {
        let intake = IntakeState::new(4, 4);
        intake.release(3);
        assert_eq!(intake.pending(), 0);
    }

    #[test]
    fn test_submit_after_shutdown() {
        let (handle, mut rx, _state) = handle_with(10);
        handle.intake.begin_shutdown();

        assert_eq!(handle.submit("late", 4), Err(SubmitError::ShuttingDown));
        assert!(submitted(&mut rx).is_empty());
        assert_eq!(handle.pending(), 0);
        assert_eq!(handle.diagnostics().list_internal_errors().len(), 1);
    }

    #[test]
    fn test_submit_with_closed_channel() {
        let (handle, rx, _state) = handle_with(10);
        drop(rx);

        assert_eq!(handle.submit("x", 1), Err(SubmitError::ShuttingDown));
        assert_eq!(handle.pending(), 0);
    }

    #[test]
    fn test_log_at_formats_line() {
        let (handle, mut rx, _state) = handle_with(10);

        handle.log_at(Level::INFO, "started", None).unwrap();

        let events = submitted(&mut rx);
        assert_eq!(events[0].message().as_ref(), b"[INFO] started\n");
        assert_eq!(events[0].size_bytes(), "[INFO] started\n".len());
        assert!(handle.diagnostics().list_application_errors().is_empty());
    }

    #[test]
    fn test_log_at_error_feeds_application_errors() {
        let (handle, _rx, _state) = handle_with(10);
        let error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");

        handle
            .log_at(Level::ERROR, "load failed", Some(&error))
            .unwrap();

        let entries = handle.diagnostics().list_application_errors();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "[ERROR] load failed\nmissing file");
    }

    #[test]
    fn test_state_reflects_worker() {
        let (handle, _rx, state_tx) = handle_with(10);
        assert_eq!(handle.state(), SchedulerState::Idle);

        state_tx.send_replace(SchedulerState::Backoff);
        assert_eq!(handle.state(), SchedulerState::Backoff);
    }

    #[tokio::test]
    async fn test_flush_without_worker() {
        let (handle, rx, _state) = handle_with(10);
        drop(rx);

        assert!(matches!(handle.flush().await, Err(ShipperError::NotRunning)));
    }
}
