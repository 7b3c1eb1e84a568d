// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The dispatch state machine that runs on the worker task.
//!
//! ```text
//!   Idle ──event──> Accumulating ──age or size──> Sealing ──> Dispatching ──ack──> Idle
//!                                                   │              │
//!                                         empty ────┘              └─retryable─> Backoff
//!                                                                                   │
//!                                                         Dispatching <──delay──────┘
//!
//!   shutdown: * ──> Draining ──> Stopped
//! ```
//!
//! The scheduler is the only consumer of the intake channel and the only
//! owner of the open batch, so no batch state is ever shared with producers.
//! Batches go to the sink one at a time, in the order they were sealed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::aggregator::{AppendResult, Batch, BatchAccumulator};
use crate::config::{RetryStrategy, ShipperConfig};
use crate::errors::SinkError;
use crate::event::LogEvent;
use crate::intake::IntakeState;
use crate::sink::Sink;

/// Observable phase of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// The open batch is empty.
    Idle,
    /// The open batch holds at least one event.
    Accumulating,
    Sealing,
    /// A sealed batch is with the sink.
    Dispatching,
    /// Waiting before retrying a failed batch.
    Backoff,
    /// Shutdown requested; flushing what is left.
    Draining,
    Stopped,
}

/// Messages from handles to the worker.
#[derive(Debug)]
pub(crate) enum Command {
    Submit(LogEvent),
    /// Seal and dispatch the open batch, then reply.
    Flush(oneshot::Sender<()>),
}

pub(crate) struct DispatchScheduler {
    rx: mpsc::UnboundedReceiver<Command>,
    sink: Arc<dyn Sink>,
    accumulator: BatchAccumulator,
    intake: Arc<IntakeState>,
    state: watch::Sender<SchedulerState>,
    cancel: CancellationToken,
    batch_push_interval: Duration,
    monitor_poll_interval: Duration,
    sink_timeout: Duration,
    drain_timeout: Duration,
    retry: RetryStrategy,
    // Batches whose dispatch was cut short by shutdown, with the number of
    // attempts already made. The drain resumes them first.
    carried_over: Vec<(Batch, u32)>,
    // Flush replies held back until the carried-over batches are done.
    pending_flushes: Vec<oneshot::Sender<()>>,
    draining: bool,
}

impl DispatchScheduler {
    pub(crate) fn new(
        config: &ShipperConfig,
        rx: mpsc::UnboundedReceiver<Command>,
        sink: Arc<dyn Sink>,
        intake: Arc<IntakeState>,
        state: watch::Sender<SchedulerState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            sink,
            accumulator: BatchAccumulator::new(config.batch_size_ceiling_bytes()),
            intake,
            state,
            cancel,
            batch_push_interval: config.batch_push_interval(),
            monitor_poll_interval: config.monitor_poll_interval(),
            sink_timeout: config.sink_timeout(),
            drain_timeout: config.drain_timeout(),
            retry: config.retry_strategy(),
            carried_over: Vec::new(),
            pending_flushes: Vec::new(),
            draining: false,
        }
    }

    /// Runs until cancelled or until every handle is gone, then drains.
    pub(crate) async fn run(mut self) {
        debug!("SCHEDULER | Scheduler started");
        let mut ticker = interval(self.monitor_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.accumulator.age() >= self.batch_push_interval {
                        self.seal_and_dispatch().await;
                    }
                }
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!("SCHEDULER | All handles dropped");
                        break;
                    }
                },
            }
        }

        self.drain().await;
        debug!("SCHEDULER | Scheduler stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Submit(event) => self.accept(event).await,
            Command::Flush(done) => {
                self.seal_and_dispatch().await;
                if self.carried_over.is_empty() {
                    let _ = done.send(());
                } else {
                    self.pending_flushes.push(done);
                }
            }
        }
    }

    async fn accept(&mut self, mut event: LogEvent) {
        loop {
            match self.accumulator.append(event) {
                AppendResult::Accepted => {
                    self.set_state(SchedulerState::Accumulating);
                    return;
                }
                AppendResult::WouldExceedCeiling(rejected) => {
                    self.seal_and_dispatch().await;
                    event = rejected;
                }
                AppendResult::TooLarge(rejected) => {
                    self.intake.release(1);
                    self.intake.diagnostics.record_internal_error(format!(
                        "event {} dropped: {} bytes exceeds the {} byte batch ceiling",
                        rejected.sequence_id(),
                        rejected.size_bytes(),
                        self.accumulator.ceiling_bytes()
                    ));
                    return;
                }
            }
        }
    }

    async fn seal_and_dispatch(&mut self) {
        self.set_state(SchedulerState::Sealing);
        let batch = self.accumulator.seal();
        if !batch.is_empty() {
            self.dispatch(batch, 0).await;
        }
        self.set_state(self.resting_state());
    }

    /// Sends `batch`, retrying per the retry strategy. `attempts_made` is
    /// non-zero when resuming a batch carried over into the drain.
    ///
    /// Outside the drain, shutdown interrupts both the sink call and the
    /// backoff; the batch is then carried over so the drain budget covers it.
    async fn dispatch(&mut self, batch: Batch, attempts_made: u32) {
        let max_attempts = self.retry.max_attempts().max(1);
        let mut attempt = attempts_made;

        loop {
            attempt += 1;
            self.set_state(SchedulerState::Dispatching);

            let outcome = tokio::select! {
                biased;
                outcome = timeout(self.sink_timeout, self.sink.send(&batch)) => Some(outcome),
                () = self.cancel.cancelled(), if !self.draining => None,
            };
            let Some(outcome) = outcome else {
                debug!("SCHEDULER | Shutdown requested during dispatch, resuming in drain");
                self.carried_over.push((batch, attempt - 1));
                return;
            };

            let reason = match outcome {
                Ok(Ok(ack)) => {
                    debug!(
                        "SCHEDULER | Batch {:?} acknowledged ({} events, {} bytes)",
                        batch.sequence_range(),
                        ack.accepted,
                        batch.total_bytes()
                    );
                    self.intake.release(batch.len());
                    return;
                }
                Ok(Err(SinkError::Fatal(reason))) => {
                    error!("SCHEDULER | Batch rejected by sink: {reason}");
                    self.intake.release(batch.len());
                    self.intake.diagnostics.record_internal_error(format!(
                        "batch of {} events dropped, sink rejected it: {reason}",
                        batch.len()
                    ));
                    return;
                }
                Ok(Err(SinkError::Retryable(reason))) => reason,
                Err(_) => format!(
                    "sink did not respond within {} ms",
                    self.sink_timeout.as_millis()
                ),
            };

            if attempt >= max_attempts {
                self.intake.release(batch.len());
                self.intake.diagnostics.record_internal_error(format!(
                    "dispatch failed after {attempt} attempts, batch of {} events dropped: {reason}",
                    batch.len()
                ));
                return;
            }

            let delay = self.retry.delay_after(attempt);
            warn!(
                "SCHEDULER | Dispatch attempt {attempt}/{max_attempts} failed, retrying in {} ms: {reason}",
                delay.as_millis()
            );
            self.set_state(SchedulerState::Backoff);
            // Outside the drain, shutdown hands the batch over to it. Inside,
            // the remaining attempts go out back to back.
            tokio::select! {
                () = sleep(delay) => {}
                () = self.cancel.cancelled() => {
                    if !self.draining {
                        self.carried_over.push((batch, attempt));
                        return;
                    }
                }
            }
        }
    }

    /// Final pass: stop intake, handle what is already queued, flush the open
    /// batch. Bounded by the drain timeout.
    async fn drain(&mut self) {
        self.set_state(SchedulerState::Draining);
        self.draining = true;
        self.rx.close();

        let drained = timeout(self.drain_timeout, async {
            for (batch, attempts_made) in std::mem::take(&mut self.carried_over) {
                self.dispatch(batch, attempts_made).await;
            }
            for done in self.pending_flushes.drain(..) {
                let _ = done.send(());
            }
            while let Some(command) = self.rx.recv().await {
                self.handle(command).await;
            }
            self.seal_and_dispatch().await;
        })
        .await;

        if drained.is_err() {
            let abandoned = self.intake.abandon_pending();
            if abandoned > 0 {
                self.intake.diagnostics.record_internal_error(format!(
                    "shutdown drain timed out after {} ms, {abandoned} events abandoned",
                    self.drain_timeout.as_millis()
                ));
            }
        }
        // Flushes still waiting on an abandoned batch: the worker is done with it.
        for done in self.pending_flushes.drain(..) {
            let _ = done.send(());
        }
        self.set_state(SchedulerState::Stopped);
    }

    fn resting_state(&self) -> SchedulerState {
        if self.accumulator.is_empty() {
            SchedulerState::Idle
        } else {
            SchedulerState::Accumulating
        }
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Ack;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptSink {
        script: Mutex<VecDeque<Result<Ack, SinkError>>>,
        sent: Mutex<Vec<Vec<u64>>>,
    }

    impl ScriptSink {
        fn new(script: Vec<Result<Ack, SinkError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                sent: Mutex::default(),
            })
        }

        fn sent(&self) -> Vec<Vec<u64>> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sink for ScriptSink {
        async fn send(&self, batch: &Batch) -> Result<Ack, SinkError> {
            self.sent
                .lock()
                .unwrap()
                .push(batch.events().iter().map(LogEvent::sequence_id).collect());
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(Ack {
                accepted: batch.len(),
            }))
        }
    }

    struct Harness {
        scheduler: DispatchScheduler,
        intake: Arc<IntakeState>,
        state: watch::Receiver<SchedulerState>,
        cancel: CancellationToken,
    }

    fn harness(config: &ShipperConfig, sink: Arc<dyn Sink>) -> Harness {
        let (_tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SchedulerState::Idle);
        let intake = Arc::new(IntakeState::new(100, 10));
        let cancel = CancellationToken::new();
        Harness {
            scheduler: DispatchScheduler::new(
                config,
                rx,
                sink,
                Arc::clone(&intake),
                state_tx,
                cancel.clone(),
            ),
            intake,
            state,
            cancel,
        }
    }

    fn event(id: u64, size: usize) -> LogEvent {
        LogEvent::new(id, format!("event {id}"), size)
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_forced_seal_dispatches_inline() {
        let sink = ScriptSink::new(vec![]);
        let config = ShipperConfig::default()
            .with_batch_size_ceiling_bytes(1_000)
            .unwrap();
        let mut h = harness(&config, sink.clone());

        for id in 1..=3 {
            h.scheduler.accept(event(id, 400)).await;
        }

        assert_eq!(sink.sent(), vec![vec![1, 2]]);
        assert_eq!(h.scheduler.accumulator.len(), 1);
        assert_eq!(h.scheduler.accumulator.total_bytes(), 400);
        assert_eq!(*h.state.borrow(), SchedulerState::Accumulating);
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_large_event_is_dropped() {
        let sink = ScriptSink::new(vec![]);
        let config = ShipperConfig::default()
            .with_batch_size_ceiling_bytes(100)
            .unwrap();
        let mut h = harness(&config, sink.clone());

        h.scheduler.accept(event(9, 101)).await;

        assert!(sink.sent().is_empty());
        assert!(h.scheduler.accumulator.is_empty());
        let entries = h.intake.diagnostics.list_internal_errors();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].message.contains("event 9 dropped"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch_is_not_dispatched() {
        let sink = ScriptSink::new(vec![]);
        let mut h = harness(&ShipperConfig::default(), sink.clone());

        h.scheduler.seal_and_dispatch().await;

        assert!(sink.sent().is_empty());
        assert_eq!(*h.state.borrow(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let sink = ScriptSink::new(vec![
            Err(SinkError::Retryable("503".into())),
            Err(SinkError::Retryable("503".into())),
        ]);
        let config =
            ShipperConfig::default().with_retry_strategy(RetryStrategy::LinearBackoff(3, 100));
        let mut h = harness(&config, sink.clone());

        h.scheduler.accept(event(1, 10)).await;
        h.scheduler.seal_and_dispatch().await;

        assert_eq!(sink.sent().len(), 3);
        assert!(h.intake.diagnostics.list_internal_errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_records_one_entry() {
        let sink = ScriptSink::new(vec![
            Err(SinkError::Retryable("503".into())),
            Err(SinkError::Retryable("503".into())),
            Err(SinkError::Retryable("503".into())),
        ]);
        let config = ShipperConfig::default().with_retry_strategy(RetryStrategy::default());
        let mut h = harness(&config, sink.clone());

        h.scheduler.accept(event(1, 10)).await;
        h.scheduler.seal_and_dispatch().await;

        assert_eq!(sink.sent().len(), 3);
        let entries = h.intake.diagnostics.list_internal_errors();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].message.contains("dispatch failed after 3 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_drops_without_retry() {
        let sink = ScriptSink::new(vec![Err(SinkError::Fatal("400".into()))]);
        let mut h = harness(&ShipperConfig::default(), sink.clone());

        h.scheduler.accept(event(1, 10)).await;
        h.scheduler.seal_and_dispatch().await;

        assert_eq!(sink.sent().len(), 1);
        assert_eq!(h.intake.diagnostics.list_internal_errors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff_resumes_in_drain() {
        let sink = ScriptSink::new(vec![Err(SinkError::Retryable("503".into()))]);
        let config = ShipperConfig::default()
            .with_retry_strategy(RetryStrategy::LinearBackoff(3, 10_000))
            .with_drain_timeout(Duration::from_secs(2));
        let mut h = harness(&config, sink.clone());
        h.cancel.cancel();

        h.scheduler.accept(event(1, 10)).await;
        h.scheduler.seal_and_dispatch().await;

        assert_eq!(sink.sent().len(), 1);
        assert_eq!(h.scheduler.carried_over.len(), 1);
        assert_eq!(h.scheduler.carried_over[0].1, 1);

        let started = tokio::time::Instant::now();
        h.scheduler.drain().await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(sink.sent(), vec![vec![1], vec![1]]);
        assert!(h.scheduler.carried_over.is_empty());
        assert!(h.intake.diagnostics.list_internal_errors().is_empty());
        assert_eq!(*h.state.borrow(), SchedulerState::Stopped);
    }
}
