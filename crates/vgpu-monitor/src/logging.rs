//! provides logging helpers

use std::collections::BTreeMap;
use std::fmt::{self};
use std::path::Path;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use anyhow::Context;
use influxdb_line_protocol::LineProtocolBuilder;
use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Subscriber;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::FilterExt;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

const METRICS_TARGET_PREFIX: &str = "metrics.";
/// Event fields with this prefix become line protocol tags.
const TAG_FIELD_PREFIX: &str = "tag_";

struct InfluxDBFormatter;

enum FieldValue {
    Integer(i64),
    UnsignedInteger(u64),
    Float(f64),
    Boolean(bool),
    String(String),
}

impl FieldValue {
    fn into_tag_value(self) -> String {
        match self {
            Self::Integer(v) => v.to_string(),
            Self::UnsignedInteger(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Boolean(v) => v.to_string(),
            Self::String(v) => v,
        }
    }
}

#[derive(Default)]
struct FieldVisitor {
    tags: BTreeMap<&'static str, String>,
    fields: BTreeMap<&'static str, FieldValue>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: FieldValue) {
        match field.name().strip_prefix(TAG_FIELD_PREFIX) {
            Some(tag) => {
                self.tags.insert(tag, value.into_tag_value());
            }
            None => {
                self.fields.insert(field.name(), value);
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, FieldValue::Integer(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, FieldValue::UnsignedInteger(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, FieldValue::Float(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, FieldValue::Boolean(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, FieldValue::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, FieldValue::String(format!("{value:?}")));
    }
}

/// Encode one line protocol line, including the trailing newline.
///
/// Tags and fields are written in key order. A line needs at least one
/// field, so an event without fields gets `_empty=true`.
fn encode_line(
    measurement: &str,
    tags: &BTreeMap<&str, String>,
    fields: &BTreeMap<&str, FieldValue>,
    timestamp: i64,
) -> String {
    let mut builder = LineProtocolBuilder::new().measurement(measurement);
    for (&key, value) in tags {
        builder = builder.tag(key, value);
    }

    let mut fields = fields.iter();
    let Some((&first_key, first_value)) = fields.next() else {
        let lp = builder
            .field("_empty", true)
            .timestamp(timestamp)
            .close_line()
            .build();
        return String::from_utf8_lossy(&lp).into_owned();
    };

    let mut line = match first_value {
        FieldValue::Integer(v) => builder.field(first_key, *v),
        FieldValue::UnsignedInteger(v) => builder.field(first_key, *v),
        FieldValue::Float(v) => builder.field(first_key, *v),
        FieldValue::Boolean(v) => builder.field(first_key, *v),
        FieldValue::String(v) => builder.field(first_key, v.as_str()),
    };
    for (&key, value) in fields {
        line = match value {
            FieldValue::Integer(v) => line.field(key, *v),
            FieldValue::UnsignedInteger(v) => line.field(key, *v),
            FieldValue::Float(v) => line.field(key, *v),
            FieldValue::Boolean(v) => line.field(key, *v),
            FieldValue::String(v) => line.field(key, v.as_str()),
        };
    }

    let lp = line.timestamp(timestamp).close_line().build();
    String::from_utf8_lossy(&lp).into_owned()
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

impl<S, N> FormatEvent<S, N> for InfluxDBFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        // Measurement name comes from the target
        let target = event.metadata().target();
        let measurement = target.strip_prefix(METRICS_TARGET_PREFIX).unwrap_or(target);

        let line = encode_line(measurement, &visitor.tags, &visitor.fields, now_nanos());
        write!(writer, "{line}")
    }
}

fn is_metrics_target(target: &str) -> bool {
    target.starts_with(METRICS_TARGET_PREFIX)
}

/// initiate the global tracing subscriber
///
/// Regular events go to stderr; `metrics.*` events go to a daily rolling
/// `metrics_file` in InfluxDB line protocol.
pub fn init(metrics_file: &Path) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let dir = metrics_file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file = metrics_file
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid metrics file path {}", metrics_file.display()))?;

    let fmt_layer = utils::logging::get_fmt_layer().with_filter(
        utils::logging::env_filter().and(filter::filter_fn(|metadata| {
            !is_metrics_target(metadata.target())
        })),
    );

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file)
        .max_log_files(3)
        .build(dir)
        .context("failed to create rolling file appender")?;

    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let metrics_layer = layer()
        .event_format(InfluxDBFormatter {})
        .fmt_fields(tracing_subscriber::fmt::format::DefaultFields::new())
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|metadata| {
            is_metrics_target(metadata.target())
        }));

    registry().with(fmt_layer).with(metrics_layer).init();
    Ok(file_guard)
}
