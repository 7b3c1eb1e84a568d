// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while building or validating a [`crate::ShipperConfig`].
///
/// These are the only errors returned synchronously to the host: they mean
/// the shipper was misconfigured and no instance is created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("batch size ceiling of {requested} bytes exceeds the {max} byte limit of the log ingestion service")]
    BatchSizeCeilingTooLarge { requested: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Why a submitted event was not queued.
///
/// Every variant has already been recorded in the diagnostics feed by the
/// time the caller sees it; callers are free to ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("queue full ({max} pending messages), event dropped")]
    QueueFull { max: usize },

    #[error("shipper is shutting down, event dropped")]
    ShuttingDown,
}

/// Failure reported by a [`crate::sink::Sink`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Transient failure (network, throttling, 5xx). The batch is retried.
    #[error("retryable sink error: {0}")]
    Retryable(String),

    /// Permanent failure (malformed or rejected batch). The batch is dropped.
    #[error("fatal sink error: {0}")]
    Fatal(String),
}

impl SinkError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Retryable(_))
    }
}

/// Errors surfaced by the shipper lifecycle API.
#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Shipper not running")]
    NotRunning,

    #[error("Shutdown timeout exceeded")]
    ShutdownTimeout,

    #[error("Runtime error: {0}")]
    Runtime(String),
}
