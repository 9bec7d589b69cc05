use colored::*;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Tracing formatter that colors the whole line by severity.
///
/// Operator-facing output stays clean: no timestamps or span metadata,
/// just the message, with debug and trace lines tagged so bus chatter
/// is easy to pick out when `--debug` is on.
pub struct LineFormatter;

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let line = match *event.metadata().level() {
            Level::ERROR => buffer.red(),
            Level::WARN => buffer.yellow(),
            Level::INFO => buffer.normal(),
            Level::DEBUG => format!("debug: {}", buffer).blue(),
            Level::TRACE => format!("trace: {}", buffer).purple(),
        };

        writeln!(writer, "{}", line)
    }
}

/// Install the subscriber. `--debug` lowers the default filter to
/// `debug`; `RUST_LOG` still takes precedence when set.
pub fn init(debug: bool) {
    let default_directive = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(LineFormatter)
        .init();
}
