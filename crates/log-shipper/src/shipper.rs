// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of one shipper instance.
//!
//! Every instance owns its own channel, counters, diagnostics and worker
//! task. Nothing is process-global, so several shippers (or several tests)
//! can run side by side.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::ShipperConfig;
use crate::constants::SHUTDOWN_GRACE_PERIOD;
use crate::diagnostics::Diagnostics;
use crate::errors::ShipperError;
use crate::intake::{IntakeState, ShipperHandle};
use crate::scheduler::{DispatchScheduler, SchedulerState};
use crate::sink::Sink;

pub struct LogShipper {
    handle: ShipperHandle,
    intake: Arc<IntakeState>,
    cancel_token: CancellationToken,
    worker: Option<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl LogShipper {
    /// Validates `config` and spawns the worker on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ShipperError::Config`] for an invalid configuration, in which case
    /// nothing is spawned. [`ShipperError::Runtime`] when called outside a
    /// tokio runtime.
    pub fn start(config: ShipperConfig, sink: Arc<dyn Sink>) -> Result<Self, ShipperError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ShipperError::Runtime(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let intake = Arc::new(IntakeState::new(
            config.max_queued_messages(),
            config.diagnostics_capacity(),
        ));
        let cancel_token = CancellationToken::new();

        let scheduler = DispatchScheduler::new(
            &config,
            rx,
            sink,
            Arc::clone(&intake),
            state_tx,
            cancel_token.clone(),
        );
        let worker = runtime.spawn(scheduler.run());
        debug!(
            "SHIPPER | Started with a {} byte batch ceiling and a {} ms push interval",
            config.batch_size_ceiling_bytes(),
            config.batch_push_interval().as_millis()
        );

        Ok(Self {
            handle: ShipperHandle::new(tx, Arc::clone(&intake), state_rx, config.line_format()),
            intake,
            cancel_token,
            worker: Some(worker),
            drain_timeout: config.drain_timeout(),
        })
    }

    #[must_use]
    pub fn handle(&self) -> ShipperHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.intake.diagnostics
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.handle.state()
    }

    /// Stops intake, lets the worker drain and waits for it.
    ///
    /// The wait is bounded by the drain timeout plus a short grace period;
    /// past that the worker is aborted and whatever it still held is
    /// recorded as abandoned.
    pub async fn shutdown(mut self) -> Result<(), ShipperError> {
        let Some(mut worker) = self.worker.take() else {
            return Err(ShipperError::NotRunning);
        };

        debug!("SHIPPER | Shutting down");
        self.intake.begin_shutdown();
        self.cancel_token.cancel();

        match timeout(self.drain_timeout + SHUTDOWN_GRACE_PERIOD, &mut worker).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("SHIPPER | Worker task failed: {e}");
                Err(ShipperError::Runtime(e.to_string()))
            }
            Err(_) => {
                worker.abort();
                let abandoned = self.intake.abandon_pending();
                self.intake.diagnostics.record_internal_error(format!(
                    "worker did not stop in time, {abandoned} events abandoned"
                ));
                Err(ShipperError::ShutdownTimeout)
            }
        }
    }
}

impl Drop for LogShipper {
    fn drop(&mut self) {
        // Without an explicit shutdown the worker still drains in the
        // background.
        if self.worker.is_some() {
            self.intake.begin_shutdown();
            self.cancel_token.cancel();
        }
    }
}
