// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP sink posting batches as JSON to a log ingestion endpoint.
//!
//! Request body:
//!
//! ```json
//! {
//!   "logGroupName": "my-group",
//!   "logStreamName": "web-2024/03/09T14.05.07-4f1c...",
//!   "logEvents": [{ "timestamp": 1709993107000, "message": "[INFO] ..." }]
//! }
//! ```
//!
//! Responses map onto [`SinkError`]:
//!
//! | Response                   | Outcome     |
//! |----------------------------|-------------|
//! | 2xx                        | `Ack`       |
//! | 408, 429, 5xx, no response | `Retryable` |
//! | any other status           | `Fatal`     |

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;
use std::borrow::Cow;
use std::error::Error;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, error};
use zstd::stream::write::Encoder;

use crate::aggregator::Batch;
use crate::constants;
use crate::errors::SinkError;
use crate::sink::{Ack, Sink};

#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    pub endpoint: String,
    pub log_group_name: String,
    pub log_stream_name: String,
    /// zstd level; `None` sends the body uncompressed.
    pub compression_level: Option<i32>,
    pub request_timeout: Duration,
}

impl HttpSinkConfig {
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        log_group_name: impl Into<String>,
        log_stream_name: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            log_group_name: log_group_name.into(),
            log_stream_name: log_stream_name.into(),
            compression_level: None,
            request_timeout: constants::DEFAULT_SINK_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    log_events: Vec<InputLogEvent<'a>>,
}

#[derive(Serialize)]
struct InputLogEvent<'a> {
    timestamp: i64,
    message: Cow<'a, str>,
}

#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    config: HttpSinkConfig,
    headers: HeaderMap,
}

impl HttpSink {
    #[must_use]
    pub fn new(config: HttpSinkConfig) -> Self {
        let client = match reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                error!("HTTP_SINK | Unable to build HTTP client, using defaults: {e}");
                reqwest::Client::new()
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if config.compression_level.is_some() {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        }

        Self {
            client,
            config,
            headers,
        }
    }

    #[must_use]
    pub fn log_stream_name(&self) -> &str {
        &self.config.log_stream_name
    }

    fn body(&self, batch: &Batch) -> Result<Vec<u8>, SinkError> {
        let request = PutLogEventsRequest {
            log_group_name: &self.config.log_group_name,
            log_stream_name: &self.config.log_stream_name,
            log_events: batch
                .events()
                .iter()
                .map(|event| InputLogEvent {
                    timestamp: event.timestamp_millis(),
                    message: String::from_utf8_lossy(event.message()),
                })
                .collect(),
        };

        let json = serde_json::to_vec(&request)
            .map_err(|e| SinkError::Fatal(format!("unable to serialize batch: {e}")))?;

        match self.config.compression_level {
            Some(level) => encode(&json, level)
                .map_err(|e| SinkError::Fatal(format!("unable to compress batch: {e}"))),
            None => Ok(json),
        }
    }
}

fn encode(data: &[u8], level: i32) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut encoder = Encoder::new(Vec::new(), level)?;
    encoder.write_all(data)?;
    encoder.finish().map_err(|e| Box::new(e) as Box<dyn Error>)
}

fn classify(status: StatusCode) -> Option<SinkError> {
    if status.is_success() {
        return None;
    }
    let reason = format!("endpoint responded with {status}");
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Some(SinkError::Retryable(reason))
    } else {
        Some(SinkError::Fatal(reason))
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn send(&self, batch: &Batch) -> Result<Ack, SinkError> {
        let body = self.body(batch)?;
        debug!(
            "HTTP_SINK | Sending {} events ({} bytes) to {}",
            batch.len(),
            body.len(),
            self.config.endpoint
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Retryable(format!("request failed: {e}")))?;

        match classify(response.status()) {
            None => Ok(Ack {
                accepted: batch.len(),
            }),
            Some(e) => Err(e),
        }
    }
}
