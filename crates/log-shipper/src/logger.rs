// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Formatter for the shipper's own log output.
//!
//! ```text
//! LOG_SHIPPER | WARN | DIAGNOSTICS | event 12 dropped: queue full (10000 pending messages)
//! LOG_SHIPPER | DEBUG | stdin > forward | forwarded bytes=42
//! ```
//!
//! ```rust,ignore
//! let subscriber = tracing_subscriber::FmtSubscriber::builder()
//!     .event_format(log_shipper::logger::Formatter)
//!     .finish();
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext,
};
use tracing_subscriber::registry::LookupSpan;

/// Renders `LOG_SHIPPER | LEVEL | outer > inner | message fields`; the span
/// segment is left out outside of any span.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(&mut writer, "LOG_SHIPPER | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            let mut separator = "";
            for span in scope.from_root() {
                write!(writer, "{separator}{}", span.name())?;
                separator = " > ";
            }
            if !separator.is_empty() {
                write!(writer, " | ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
