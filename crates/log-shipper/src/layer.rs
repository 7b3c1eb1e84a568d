// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` integration.
//!
//! [`ShipperLayer`] turns every `tracing` event of the host application into
//! a shipped log line: the event target becomes the category, the names of
//! the enclosing spans become the scopes, an `error` field becomes the
//! appended error chain and an integer `event_id` field becomes the event id.
//!
//! ```rust,ignore
//! use tracing_subscriber::layer::SubscriberExt;
//!
//! let subscriber = tracing_subscriber::registry().with(ShipperLayer::new(shipper.handle()));
//! tracing::subscriber::set_global_default(subscriber)?;
//! ```

use std::error::Error;
use std::fmt::{self, Write};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::constants::IGNORED_TARGET_CRATES;
use crate::format::{error_chain, LogRecord};
use crate::intake::ShipperHandle;

#[derive(Debug, Clone)]
pub struct ShipperLayer {
    handle: ShipperHandle,
}

impl ShipperLayer {
    #[must_use]
    pub fn new(handle: ShipperHandle) -> Self {
        Self { handle }
    }
}

fn is_ignored(target: &str) -> bool {
    IGNORED_TARGET_CRATES.iter().any(|krate| {
        target
            .strip_prefix(krate)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: String,
    error: Option<String>,
    event_id: Option<u64>,
}

impl RecordVisitor {
    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        let _ = write!(self.fields, " {name}={value}");
    }

    fn into_line(self) -> (String, Option<String>, Option<u64>) {
        let mut line = self.message;
        if line.is_empty() {
            line.push_str(self.fields.trim_start());
        } else {
            line.push_str(&self.fields);
        }
        (line, self.error, self.event_id)
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "event_id" {
            self.event_id = Some(value);
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        match u64::try_from(value) {
            Ok(id) if field.name() == "event_id" => self.event_id = Some(id),
            _ => self.push_field(field.name(), format_args!("{value}")),
        }
    }

    fn record_error(&mut self, _field: &Field, value: &(dyn Error + 'static)) {
        self.error = Some(error_chain(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => {
                let _ = write!(self.message, "{value:?}");
            }
            "error" => self.error = Some(format!("{value:?}")),
            name => self.push_field(name, format_args!("{value:?}")),
        }
    }
}

impl<S> Layer<S> for ShipperLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_ignored(metadata.target()) {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        let (message, error, event_id) = visitor.into_line();

        let scopes: Vec<String> = ctx
            .event_scope(event)
            .map(|scope| scope.from_root().map(|span| span.name().to_string()).collect())
            .unwrap_or_default();

        // Drops are already recorded in diagnostics.
        let _ = self.handle.log_record(&LogRecord {
            level: *metadata.level(),
            category: metadata.target(),
            message: &message,
            scopes: &scopes,
            event_id,
            error: error.as_deref(),
        });
    }
}
