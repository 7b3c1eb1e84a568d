// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};

const TIMESTAMP_FORMAT: &str = "%Y/%m/%dT%H.%M.%S";

/// Builds the destination stream name: `prefix-timestamp-suffix`, skipping
/// empty parts.
#[must_use]
pub fn stream_name(prefix: &str, suffix: &str, now: DateTime<Utc>) -> String {
    let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
    [prefix, timestamp.as_str(), suffix]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<&str>>()
        .join("-")
}
