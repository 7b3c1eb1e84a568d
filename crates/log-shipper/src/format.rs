// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rendering of application log records into the text that is shipped.

use std::error::Error;
use std::fmt::Write;
use tracing::Level;

/// Which parts of a record end up in the shipped line.
///
/// A fully enabled format renders
/// `[ERROR] my_app::db[1002]: query failed => request > handler\ntimeout\n`.
/// The bracketed number is the application's own event id, not the shipper's
/// sequence id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineFormat {
    pub include_level: bool,
    pub include_category: bool,
    pub include_newline: bool,
    pub include_exception: bool,
    pub include_scopes: bool,
    pub include_event_id: bool,
}

impl Default for LineFormat {
    fn default() -> Self {
        Self {
            include_level: true,
            include_category: true,
            include_newline: true,
            include_exception: true,
            include_scopes: false,
            include_event_id: false,
        }
    }
}

/// One application record before rendering.
#[derive(Debug, Clone, Copy)]
pub struct LogRecord<'a> {
    pub level: Level,
    pub category: &'a str,
    pub message: &'a str,
    pub scopes: &'a [String],
    /// Application-assigned event id, if the caller has one.
    pub event_id: Option<u64>,
    /// Already rendered with [`error_chain`].
    pub error: Option<&'a str>,
}

impl LineFormat {
    #[must_use]
    pub fn render(&self, record: &LogRecord<'_>) -> String {
        let mut line = String::with_capacity(record.message.len() + 32);

        if self.include_level {
            let _ = write!(line, "[{}] ", record.level);
        }
        let with_category = self.include_category && !record.category.is_empty();
        let _ = match (with_category, record.event_id.filter(|_| self.include_event_id)) {
            (true, Some(id)) => write!(line, "{}[{id}]: ", record.category),
            (true, None) => write!(line, "{}: ", record.category),
            (false, Some(id)) => write!(line, "[{id}] "),
            (false, None) => Ok(()),
        };
        line.push_str(record.message);

        if self.include_scopes && !record.scopes.is_empty() {
            line.push_str(" => ");
            line.push_str(&record.scopes.join(" > "));
        }

        if self.include_exception {
            if let Some(error) = record.error {
                line.push('\n');
                line.push_str(error);
            }
        }

        if self.include_newline {
            line.push('\n');
        }
        line
    }
}

/// `outer: inner: root` rendering of an error and its sources.
#[must_use]
pub fn error_chain(error: &(dyn Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(rendered, ": {cause}");
        source = cause.source();
    }
    rendered
}
