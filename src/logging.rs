use std::fmt;
use std::io;

use chrono::{NaiveDate, Utc};
use color_eyre::eyre::{Result, WrapErr};
use serde_json::json;
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    fmt::{FormatEvent, FormatFields, FormattedFields, format::Writer},
    registry::LookupSpan,
};

/// One JSON object per line. All timestamps are UTC, matching the ledger.
/// Span context (session, player being handled) is carried as a list of
/// `name{fields}` entries from root to leaf.
pub struct JsonEventFormatter;

impl<S, N> FormatEvent<S, N> for JsonEventFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        let mut spans = Vec::new();
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let extensions = span.extensions();
                let fields = extensions
                    .get::<FormattedFields<N>>()
                    .map(|f| f.as_str().to_string())
                    .unwrap_or_default();
                spans.push(json!({
                    "name": span.name(),
                    "fields": fields,
                }));
            }
        }

        let mut visitor = JsonVisitor::new();
        event.record(&mut visitor);

        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": metadata.level().to_string(),
            "target": metadata.target(),
            "module": metadata.module_path(),
            "file": metadata.file(),
            "line": metadata.line(),
            "spans": spans,
            "fields": visitor.fields,
        });

        writeln!(writer, "{}", entry)
    }
}

struct JsonVisitor {
    fields: serde_json::Map<String, serde_json::Value>,
}

impl JsonVisitor {
    fn new() -> Self {
        Self {
            fields: serde_json::Map::new(),
        }
    }
}

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), json!(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }
}

/// File appender that rolls at UTC midnight, one file per day:
/// `<prefix>.<YYYY-MM-DD>.log`.
pub struct DailyUtcFileAppender {
    directory: std::path::PathBuf,
    file_name_prefix: String,
    current_file: Option<std::fs::File>,
    current_day: Option<NaiveDate>,
}

impl DailyUtcFileAppender {
    pub fn new<P: AsRef<std::path::Path>>(directory: P, file_name_prefix: &str) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory).wrap_err("Failed to create logs directory")?;

        Ok(Self {
            directory,
            file_name_prefix: file_name_prefix.to_string(),
            current_file: None,
            current_day: None,
        })
    }

    fn file_name_for(&self, day: NaiveDate) -> String {
        format!("{}.{}.log", self.file_name_prefix, day.format("%Y-%m-%d"))
    }

    fn ensure_current_file(&mut self) -> io::Result<&mut std::fs::File> {
        let today = Utc::now().date_naive();

        if self.current_day != Some(today) || self.current_file.is_none() {
            let filepath = self.directory.join(self.file_name_for(today));
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&filepath)?;
            self.current_file = Some(file);
            self.current_day = Some(today);
        }

        Ok(self.current_file.as_mut().expect("file was just set"))
    }
}

impl io::Write for DailyUtcFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_current_file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = &mut self.current_file {
            file.flush()
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_files_are_named_by_utc_day() {
        let appender = DailyUtcFileAppender {
            directory: std::path::PathBuf::from("logs"),
            file_name_prefix: "futmonitor".to_string(),
            current_file: None,
            current_day: None,
        };
        let day = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap();
        assert_eq!(appender.file_name_for(day), "futmonitor.2025-11-03.log");
    }
}
