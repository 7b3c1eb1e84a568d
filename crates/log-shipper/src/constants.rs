// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Default limits and intervals for the shipper.
//!
//! The batch size cap mirrors the ingestion limit of CloudWatch-style log
//! services: a single `PutLogEvents`-like request may not exceed 1MB.

use std::time::Duration;

/// Hard upper bound for the batch size ceiling, in bytes.
///
/// # Value: 1MB (1,048,576 bytes)
///
/// Configuring a ceiling above this is rejected when the configuration is
/// built, never at runtime.
pub const MAX_BATCH_SIZE_CEILING_BYTES: usize = 1_024 * 1_024;

/// Default batch size ceiling: 100KB.
pub const DEFAULT_BATCH_SIZE_CEILING_BYTES: usize = 100 * 1_024;

/// Default age after which the open batch is sealed and pushed.
pub const DEFAULT_BATCH_PUSH_INTERVAL: Duration = Duration::from_millis(3_000);

/// Default number of events that may be pending (queued, batched or in
/// flight) before new submissions are dropped.
pub const DEFAULT_MAX_QUEUED_MESSAGES: usize = 10_000;

/// Default wake-up period of the dispatch worker.
pub const DEFAULT_MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default timeout for a single sink `send` attempt.
pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper bound on the final flush performed at shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of each diagnostics feed.
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 100;

/// Default number of dispatch attempts per batch, the first one included.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default first backoff delay of the exponential retry strategy.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;

/// Default cap on a single backoff delay.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

/// Extra time granted to the worker task on top of the drain timeout before
/// `shutdown` gives up and aborts it.
pub(crate) const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Crates whose targets the forwarding layer never ships: this crate and the
/// HTTP stack underneath the sink. Shipping them would feed every send back
/// into the queue. A target matches the crate itself or one of its modules.
pub(crate) const IGNORED_TARGET_CRATES: &[&str] =
    &["log_shipper", "reqwest", "hyper", "hyper_util", "h2", "rustls"];
