// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shipper configuration.
//!
//! Every field has a default and can be overridden either through the
//! `with_*` builders or through `LOG_SHIPPER_*` environment variables. The
//! batch size ceiling is checked against the 1MB service limit the moment it
//! is set, so a misconfigured shipper is never constructed.

use chrono::Utc;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::error;

use crate::constants;
use crate::errors::ConfigError;
use crate::format::LineFormat;
use crate::stream_name::stream_name;

const ENV_BATCH_PUSH_INTERVAL_MS: &str = "LOG_SHIPPER_BATCH_PUSH_INTERVAL_MS";
const ENV_BATCH_SIZE_BYTES: &str = "LOG_SHIPPER_BATCH_SIZE_BYTES";
const ENV_MAX_QUEUED_MESSAGES: &str = "LOG_SHIPPER_MAX_QUEUED_MESSAGES";
const ENV_MONITOR_POLL_INTERVAL_MS: &str = "LOG_SHIPPER_MONITOR_POLL_INTERVAL_MS";
const ENV_STREAM_NAME_PREFIX: &str = "LOG_SHIPPER_STREAM_NAME_PREFIX";
const ENV_STREAM_NAME_SUFFIX: &str = "LOG_SHIPPER_STREAM_NAME_SUFFIX";
const ENV_SINK_TIMEOUT_MS: &str = "LOG_SHIPPER_SINK_TIMEOUT_MS";
const ENV_DRAIN_TIMEOUT_MS: &str = "LOG_SHIPPER_DRAIN_TIMEOUT_MS";
const ENV_RETRY_STRATEGY: &str = "LOG_SHIPPER_RETRY_STRATEGY";
const ENV_DIAGNOSTICS_CAPACITY: &str = "LOG_SHIPPER_DIAGNOSTICS_CAPACITY";
const ENV_INCLUDE_LEVEL: &str = "LOG_SHIPPER_INCLUDE_LEVEL";
const ENV_INCLUDE_CATEGORY: &str = "LOG_SHIPPER_INCLUDE_CATEGORY";
const ENV_INCLUDE_NEWLINE: &str = "LOG_SHIPPER_INCLUDE_NEWLINE";
const ENV_INCLUDE_EXCEPTION: &str = "LOG_SHIPPER_INCLUDE_EXCEPTION";
const ENV_INCLUDE_SCOPES: &str = "LOG_SHIPPER_INCLUDE_SCOPES";
const ENV_INCLUDE_EVENT_ID: &str = "LOG_SHIPPER_INCLUDE_EVENT_ID";

/// How a batch is retried after a retryable sink failure.
///
/// The attempt count includes the first attempt: `Immediate(3)` sends at
/// most three times.
///
/// Parsed from strings of the form:
/// - `"immediate,3"`
/// - `"linear,3,500"` (500ms between attempts)
/// - `"exponential,3,200,5000"` (200ms, 400ms, ... capped at 5000ms)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryStrategy {
    Immediate(u32),
    LinearBackoff(u32, u64),
    ExponentialBackoff {
        attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::ExponentialBackoff {
            attempts: constants::DEFAULT_RETRY_ATTEMPTS,
            base_delay_ms: constants::DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: constants::DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl RetryStrategy {
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        match *self {
            RetryStrategy::Immediate(attempts)
            | RetryStrategy::LinearBackoff(attempts, _)
            | RetryStrategy::ExponentialBackoff { attempts, .. } => attempts,
        }
    }

    /// Delay to wait after the `failed_attempt`-th attempt (1-based) failed.
    #[must_use]
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        match *self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, delay_ms) => Duration::from_millis(delay_ms),
            RetryStrategy::ExponentialBackoff {
                base_delay_ms,
                max_delay_ms,
                ..
            } => {
                let factor = 2_u64
                    .checked_pow(failed_attempt.saturating_sub(1))
                    .unwrap_or(u64::MAX);
                Duration::from_millis(base_delay_ms.saturating_mul(factor).min(max_delay_ms))
            }
        }
    }
}

impl FromStr for RetryStrategy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        let invalid = || ConfigError::Invalid(format!("invalid retry strategy '{value}'"));
        let number = |s: &str| s.parse::<u64>().map_err(|_| invalid());
        let attempts = |s: &str| s.parse::<u32>().map_err(|_| invalid());

        match parts.as_slice() {
            [kind, n] if kind.eq_ignore_ascii_case("immediate") => {
                Ok(RetryStrategy::Immediate(attempts(n)?))
            }
            [kind, n, delay] if kind.eq_ignore_ascii_case("linear") => {
                Ok(RetryStrategy::LinearBackoff(attempts(n)?, number(delay)?))
            }
            [kind, n, base, max] if kind.eq_ignore_ascii_case("exponential") => {
                Ok(RetryStrategy::ExponentialBackoff {
                    attempts: attempts(n)?,
                    base_delay_ms: number(base)?,
                    max_delay_ms: number(max)?,
                })
            }
            _ => Err(invalid()),
        }
    }
}

/// Configuration of one shipper instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ShipperConfig {
    batch_push_interval: Duration,
    batch_size_ceiling_bytes: usize,
    max_queued_messages: usize,
    monitor_poll_interval: Duration,
    stream_name_prefix: String,
    stream_name_suffix: String,
    sink_timeout: Duration,
    drain_timeout: Duration,
    retry_strategy: RetryStrategy,
    diagnostics_capacity: usize,
    line_format: LineFormat,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            batch_push_interval: constants::DEFAULT_BATCH_PUSH_INTERVAL,
            batch_size_ceiling_bytes: constants::DEFAULT_BATCH_SIZE_CEILING_BYTES,
            max_queued_messages: constants::DEFAULT_MAX_QUEUED_MESSAGES,
            monitor_poll_interval: constants::DEFAULT_MONITOR_POLL_INTERVAL,
            stream_name_prefix: String::new(),
            stream_name_suffix: uuid::Uuid::new_v4().to_string(),
            sink_timeout: constants::DEFAULT_SINK_TIMEOUT,
            drain_timeout: constants::DEFAULT_DRAIN_TIMEOUT,
            retry_strategy: RetryStrategy::default(),
            diagnostics_capacity: constants::DEFAULT_DIAGNOSTICS_CAPACITY,
            line_format: LineFormat::default(),
        }
    }
}

impl ShipperConfig {
    /// Create configuration from `LOG_SHIPPER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unparseable numbers fall back to their default and are logged; a
    /// batch size above the service limit is an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let retry_strategy = match lookup(ENV_RETRY_STRATEGY) {
            Some(value) => value.parse()?,
            None => defaults.retry_strategy,
        };

        let line_format = LineFormat {
            include_level: parse_bool(&lookup, ENV_INCLUDE_LEVEL, defaults.line_format.include_level),
            include_category: parse_bool(
                &lookup,
                ENV_INCLUDE_CATEGORY,
                defaults.line_format.include_category,
            ),
            include_newline: parse_bool(
                &lookup,
                ENV_INCLUDE_NEWLINE,
                defaults.line_format.include_newline,
            ),
            include_exception: parse_bool(
                &lookup,
                ENV_INCLUDE_EXCEPTION,
                defaults.line_format.include_exception,
            ),
            include_scopes: parse_bool(&lookup, ENV_INCLUDE_SCOPES, defaults.line_format.include_scopes),
            include_event_id: parse_bool(
                &lookup,
                ENV_INCLUDE_EVENT_ID,
                defaults.line_format.include_event_id,
            ),
        };

        let config = Self {
            batch_push_interval: parse_millis(
                &lookup,
                ENV_BATCH_PUSH_INTERVAL_MS,
                defaults.batch_push_interval,
            ),
            max_queued_messages: parse_number(
                &lookup,
                ENV_MAX_QUEUED_MESSAGES,
                defaults.max_queued_messages,
            ),
            monitor_poll_interval: parse_millis(
                &lookup,
                ENV_MONITOR_POLL_INTERVAL_MS,
                defaults.monitor_poll_interval,
            ),
            stream_name_prefix: lookup(ENV_STREAM_NAME_PREFIX).unwrap_or_default(),
            stream_name_suffix: lookup(ENV_STREAM_NAME_SUFFIX)
                .filter(|suffix| !suffix.trim().is_empty())
                .unwrap_or(defaults.stream_name_suffix),
            sink_timeout: parse_millis(&lookup, ENV_SINK_TIMEOUT_MS, defaults.sink_timeout),
            drain_timeout: parse_millis(&lookup, ENV_DRAIN_TIMEOUT_MS, defaults.drain_timeout),
            retry_strategy,
            diagnostics_capacity: parse_number(
                &lookup,
                ENV_DIAGNOSTICS_CAPACITY,
                defaults.diagnostics_capacity,
            ),
            line_format,
            ..defaults
        }
        .with_batch_size_ceiling_bytes(parse_number(
            &lookup,
            ENV_BATCH_SIZE_BYTES,
            constants::DEFAULT_BATCH_SIZE_CEILING_BYTES,
        ))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ceiling(self.batch_size_ceiling_bytes)?;

        if self.max_queued_messages == 0 {
            return Err(ConfigError::Invalid(
                "max queued messages must be greater than 0".to_string(),
            ));
        }
        if self.batch_push_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "batch push interval must be greater than 0".to_string(),
            ));
        }
        if self.monitor_poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "monitor poll interval must be greater than 0".to_string(),
            ));
        }
        if self.sink_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "sink timeout must be greater than 0".to_string(),
            ));
        }
        if self.retry_strategy.max_attempts() == 0 {
            return Err(ConfigError::Invalid(
                "retry strategy must allow at least one attempt".to_string(),
            ));
        }
        if self.diagnostics_capacity == 0 {
            return Err(ConfigError::Invalid(
                "diagnostics capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Sets the batch size ceiling, rejecting values above the service limit.
    pub fn set_batch_size_ceiling_bytes(&mut self, bytes: usize) -> Result<(), ConfigError> {
        check_ceiling(bytes)?;
        self.batch_size_ceiling_bytes = bytes;
        Ok(())
    }

    pub fn with_batch_size_ceiling_bytes(mut self, bytes: usize) -> Result<Self, ConfigError> {
        self.set_batch_size_ceiling_bytes(bytes)?;
        Ok(self)
    }

    #[must_use]
    pub fn with_batch_push_interval(mut self, interval: Duration) -> Self {
        self.batch_push_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_queued_messages(mut self, max: usize) -> Self {
        self.max_queued_messages = max;
        self
    }

    #[must_use]
    pub fn with_monitor_poll_interval(mut self, interval: Duration) -> Self {
        self.monitor_poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_stream_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.stream_name_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_stream_name_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.stream_name_suffix = suffix.into();
        self
    }

    #[must_use]
    pub fn with_sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.diagnostics_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_line_format(mut self, format: LineFormat) -> Self {
        self.line_format = format;
        self
    }

    #[must_use]
    pub fn batch_push_interval(&self) -> Duration {
        self.batch_push_interval
    }

    #[must_use]
    pub fn batch_size_ceiling_bytes(&self) -> usize {
        self.batch_size_ceiling_bytes
    }

    #[must_use]
    pub fn max_queued_messages(&self) -> usize {
        self.max_queued_messages
    }

    #[must_use]
    pub fn monitor_poll_interval(&self) -> Duration {
        self.monitor_poll_interval
    }

    #[must_use]
    pub fn stream_name_prefix(&self) -> &str {
        &self.stream_name_prefix
    }

    #[must_use]
    pub fn stream_name_suffix(&self) -> &str {
        &self.stream_name_suffix
    }

    #[must_use]
    pub fn sink_timeout(&self) -> Duration {
        self.sink_timeout
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    #[must_use]
    pub fn retry_strategy(&self) -> RetryStrategy {
        self.retry_strategy
    }

    /// Destination stream name for a shipper started now.
    #[must_use]
    pub fn stream_name(&self) -> String {
        stream_name(&self.stream_name_prefix, &self.stream_name_suffix, Utc::now())
    }

    #[must_use]
    pub fn diagnostics_capacity(&self) -> usize {
        self.diagnostics_capacity
    }

    #[must_use]
    pub fn line_format(&self) -> LineFormat {
        self.line_format
    }
}

fn check_ceiling(bytes: usize) -> Result<(), ConfigError> {
    if bytes > constants::MAX_BATCH_SIZE_CEILING_BYTES {
        return Err(ConfigError::BatchSizeCeilingTooLarge {
            requested: bytes,
            max: constants::MAX_BATCH_SIZE_CEILING_BYTES,
        });
    }
    if bytes == 0 {
        return Err(ConfigError::Invalid(
            "batch size ceiling must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value.trim().parse::<T>().unwrap_or_else(|_| {
            error!("{key} has an invalid value '{value}', using the default");
            default
        }),
        None => default,
    }
}

fn parse_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(parse_number(lookup, key, default_ms))
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map_or(default, |val| match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => {
            error!("{key} has an invalid value '{val}', using the default");
            default
        }
    })
}
