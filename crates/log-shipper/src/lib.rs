// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Log Shipper
//!
//! A batching log shipper core. Application threads submit log events without
//! blocking; a single background worker accumulates them into size- and
//! time-bounded batches and pushes each batch to a remote [`sink::Sink`],
//! retrying transient failures with backoff.
//!
//! ```text
//!   producers ──submit──> intake ──channel──> scheduler ──send──> Sink
//!                            │                    │
//!                            └──── diagnostics <──┘
//! ```
//!
//! ## Modules
//!
//! - [`ring_buffer`]: fixed-capacity FIFO that evicts the oldest entry
//! - [`event`]: the immutable [`event::LogEvent`] record
//! - [`aggregator`]: the open batch and the sealed [`aggregator::Batch`]
//! - [`scheduler`]: the dispatch state machine running on the worker task
//! - [`sink`]: the sink contract and an HTTP implementation
//! - [`diagnostics`]: bounded feeds of internal and application errors
//! - [`intake`]: the cloneable producer handle
//! - [`shipper`]: starting and shutting down a shipper instance
//! - [`layer`]: a `tracing` layer forwarding events into a shipper
//! - [`config`], [`format`], [`stream_name`]: configuration, line rendering
//!   and stream naming
//! - [`logger`]: formatter for the shipper's own log output

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![deny(unused_extern_crates)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregator;
pub mod config;
pub mod constants;
pub mod diagnostics;
pub mod errors;
pub mod event;
pub mod format;
pub mod intake;
pub mod layer;
pub mod logger;
pub mod ring_buffer;
pub mod scheduler;
pub mod shipper;
pub mod sink;
pub mod stream_name;

pub use config::{RetryStrategy, ShipperConfig};
pub use diagnostics::{DiagnosticEntry, Diagnostics};
pub use errors::{ConfigError, ShipperError, SinkError, SubmitError};
pub use intake::ShipperHandle;
pub use layer::ShipperLayer;
pub use scheduler::SchedulerState;
pub use shipper::LogShipper;
