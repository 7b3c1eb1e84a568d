// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

use log_shipper::{
    diagnostics::Diagnostics,
    layer::ShipperLayer,
    logger::Formatter,
    sink::http::{HttpSink, HttpSinkConfig},
    LogShipper, ShipperConfig, ShipperError,
};

const DEFAULT_LOG_GROUP: &str = "log-shipper";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOG_SHIPPER_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let shipper = start_shipper();
    let shipper_layer = shipper
        .as_ref()
        .ok()
        .map(|shipper| ShipperLayer::new(shipper.handle()));

    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"))
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(Formatter)
                .with_writer(std::io::stderr),
        )
        .with(shipper_layer);

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let shipper = match shipper {
        Ok(shipper) => shipper,
        Err(e) => {
            error!("Unable to start log shipper: {e}");
            return;
        }
    };

    let handle = shipper.handle();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut forwarded: u64 = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let size = line.len();
                    if handle.submit(line, size).is_ok() {
                        forwarded += 1;
                    }
                }
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                debug!("Received interrupt");
                break;
            }
        }
    }

    info!("Forwarded {forwarded} lines, shutting down");
    if let Err(e) = shipper.shutdown().await {
        error!("Log shipper did not shut down cleanly: {e}");
    }
    print_diagnostics(handle.diagnostics());
}

fn start_shipper() -> Result<LogShipper, ShipperError> {
    let config = ShipperConfig::from_env()?;
    let endpoint = env::var("LOG_SHIPPER_ENDPOINT").map_err(|_| {
        ShipperError::Config(log_shipper::ConfigError::Invalid(
            "LOG_SHIPPER_ENDPOINT is not set".to_string(),
        ))
    })?;
    let log_group =
        env::var("LOG_SHIPPER_LOG_GROUP").unwrap_or_else(|_| DEFAULT_LOG_GROUP.to_string());
    let compression_level = env::var("LOG_SHIPPER_COMPRESSION_LEVEL")
        .ok()
        .and_then(|level| level.parse::<i32>().ok());

    let sink = HttpSink::new(HttpSinkConfig {
        compression_level,
        request_timeout: config.sink_timeout(),
        ..HttpSinkConfig::new(endpoint, log_group, config.stream_name())
    });
    LogShipper::start(config, Arc::new(sink))
}

fn print_diagnostics(diagnostics: &Diagnostics) {
    match serde_json::to_string_pretty(&diagnostics.report()) {
        Ok(report) => eprintln!("{report}"),
        Err(e) => error!("Unable to serialize diagnostics: {e}"),
    }
}
