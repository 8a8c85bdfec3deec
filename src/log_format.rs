//! Custom log format that displays target before span context.
//!
//! Default tracing format: `LEVEL span1:span2: target: message`
//! This format:            `LEVEL target: span1:span2: message`

use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Event formatter that puts target before span context.
///
/// Level colors are only written when `ansi` is set, so piped logs stay clean.
#[derive(Debug, Clone, Copy)]
pub struct TargetFirstFormat {
    pub ansi: bool,
}

impl TargetFirstFormat {
    pub fn new(ansi: bool) -> Self {
        Self { ansi }
    }
}

fn level_color(level: Level) -> &'static str {
    match level {
        Level::ERROR => "\x1b[31m",
        Level::WARN => "\x1b[33m",
        Level::INFO => "\x1b[32m",
        Level::DEBUG => "\x1b[34m",
        Level::TRACE => "\x1b[35m",
    }
}

impl<S, N> FormatEvent<S, N> for TargetFirstFormat
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
        let metadata = event.metadata();
        let level = *metadata.level();

        if self.ansi {
            write!(writer, "{}{:>5}\x1b[0m ", level_color(level), level)?;
        } else {
            write!(writer, "{:>5} ", level)?;
        }

        write!(writer, "{}: ", metadata.target())?;

        if let Some(scope) = ctx.event_scope() {
            let names: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !names.is_empty() {
                write!(writer, "{}: ", names.join(":"))?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}
