//! Core data types for logs and metrics.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Severity of a log record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LogLevel {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "DEBUG")]
    Debug,
    #[serde(rename = "TRACE")]
    Trace,
}

impl LogLevel {
    /// Whether this level represents an error condition (used to route
    /// autocapture writes and passthrough formatting).
    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        };
        write!(f, "{s}")
    }
}

/// A single log record, ready to be queued on the Log Batcher.
#[derive(Clone, Debug, serde::Serialize)]
#[non_exhaustive]
pub struct LogRecord {
    pub timestamp: Timestamp,
    pub level: LogLevel,
    pub body: String,
    pub attributes: HashMap<String, String>,
}

impl LogRecord {
    pub fn new(body: impl Into<String>, level: LogLevel, attributes: HashMap<String, String>) -> Self {
        Self {
            timestamp: Timestamp::now(),
            level,
            body: body.into(),
            attributes,
        }
    }
}

/// UTC instant at microsecond resolution, serialized as ISO-8601 with a
/// trailing `Z` (e.g. `2024-01-01T12:34:56.789012Z`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64 /* microseconds since epoch */);

impl Timestamp {
    pub fn now() -> Self {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(d.as_micros() as u64)
    }

    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Truncate down to the start of the aggregation interval `interval_secs`
    /// that this instant falls in, aligned to the Unix epoch.
    pub fn truncate_to_interval(&self, interval_secs: u64) -> Timestamp {
        if interval_secs == 0 {
            return *self;
        }
        let secs = self.0 / 1_000_000;
        let truncated = secs - (secs % interval_secs);
        Timestamp(truncated * 1_000_000)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = (self.0 / 1_000_000) as i64;
        let micros = self.0 % 1_000_000;
        let (y, mo, d, h, mi, s) = civil_from_unix(secs);
        write!(
            f,
            "{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:{s:02}.{micros:06}Z"
        )
    }
}

impl serde::Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Civil-calendar conversion from a Unix timestamp (UTC, no leap seconds),
/// using Howard Hinnant's `civil_from_days` algorithm so this crate has no
/// chrono/time dependency for a single formatting need.
fn civil_from_unix(unix_secs: i64) -> (i64, u32, u32, u32, u32, u32) {
    let days = unix_secs.div_euclid(86_400);
    let secs_of_day = unix_secs.rem_euclid(86_400);
    let h = (secs_of_day / 3600) as u32;
    let mi = ((secs_of_day % 3600) / 60) as u32;
    let s = (secs_of_day % 60) as u32;

    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };

    (y, m, d, h, mi, s)
}

/// Kind of metric a `MetricEvent` carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// How a gauge event updates its series value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GaugeMode {
    Set,
    Inc,
    Dec,
}

/// An ephemeral metric data point, queued from a producer to the aggregator.
#[derive(Clone, Debug)]
pub struct MetricEvent {
    pub kind: MetricKind,
    pub name: String,
    pub value: f64,
    pub tags: HashMap<String, String>,
    pub gauge_mode: Option<GaugeMode>,
}

impl MetricEvent {
    pub fn counter(name: impl Into<String>, value: f64, tags: HashMap<String, String>) -> Self {
        Self {
            kind: MetricKind::Counter,
            name: name.into(),
            value,
            tags,
            gauge_mode: None,
        }
    }

    pub fn gauge(
        name: impl Into<String>,
        value: f64,
        mode: GaugeMode,
        tags: HashMap<String, String>,
    ) -> Self {
        Self {
            kind: MetricKind::Gauge,
            name: name.into(),
            value,
            tags,
            gauge_mode: Some(mode),
        }
    }

    pub fn histogram(name: impl Into<String>, value: f64, tags: HashMap<String, String>) -> Self {
        Self {
            kind: MetricKind::Histogram,
            name: name.into(),
            value,
            tags,
            gauge_mode: None,
        }
    }

    /// The deterministic series identifier for this event (spec §3).
    pub fn series_id(&self) -> String {
        series_id(&self.name, &self.tags)
    }
}

/// Deterministic series identifier: `name` if `tags` is empty, else
/// `name + "_" + join(sorted(tag_key + "_" + tag_value), "_")`.
pub fn series_id(name: &str, tags: &HashMap<String, String>) -> String {
    if tags.is_empty() {
        return name.to_string();
    }
    let mut pairs: Vec<(&String, &String)> = tags.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    let mut id = String::with_capacity(name.len() + 8 * pairs.len());
    id.push_str(name);
    for (k, v) in pairs {
        id.push('_');
        id.push_str(k);
        id.push('_');
        id.push_str(v);
    }
    id
}

/// Per-interval record for a counter series.
#[derive(Clone, Debug, serde::Serialize)]
pub struct CounterMessage {
    pub timestamp: Timestamp,
    pub metric_name: String,
    pub value: f64,
    pub tags: HashMap<String, String>,
}

/// Per-interval record for a gauge series.
#[derive(Clone, Debug, serde::Serialize)]
pub struct GaugeMessage {
    pub timestamp: Timestamp,
    pub metric_name: String,
    pub value: f64,
    pub tags: HashMap<String, String>,
}

/// Per-interval record for a histogram series.
#[derive(Clone, Debug, serde::Serialize)]
pub struct HistogramMessage {
    pub timestamp: Timestamp,
    pub metric_name: String,
    pub values: Vec<f64>,
    pub tags: HashMap<String, String>,
}

/// Output of a completed aggregation interval (spec §3 "Aggregated batch").
#[derive(Clone, Debug, Default)]
pub struct AggregatedBatch {
    pub counters: Vec<CounterMessage>,
    pub gauges: Vec<GaugeMessage>,
    pub histograms: Vec<HistogramMessage>,
}

impl AggregatedBatch {
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.gauges.is_empty() && self.histograms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_id_without_tags_is_bare_name() {
        assert_eq!(series_id("req.count", &HashMap::new()), "req.count");
    }

    #[test]
    fn series_id_sorts_tags_deterministically() {
        let mut tags = HashMap::new();
        tags.insert("b".to_string(), "2".to_string());
        tags.insert("a".to_string(), "1".to_string());
        assert_eq!(series_id("req", &tags), "req_a_1_b_2");
    }

    #[test]
    fn timestamp_formats_with_micros_and_trailing_z() {
        // 2024-01-01T00:00:00.000000Z
        let ts = Timestamp::from_micros(1_704_067_200_000_000);
        assert_eq!(ts.to_string(), "2024-01-01T00:00:00.000000Z");
    }

    #[test]
    fn timestamp_truncates_to_interval_boundary() {
        let ts = Timestamp::from_micros(1_704_067_245_123_456); // :45.123456
        let truncated = ts.truncate_to_interval(60);
        assert_eq!(truncated.as_micros() % (60 * 1_000_000), 0);
        assert!(truncated.as_micros() <= ts.as_micros());
    }
}
