//! Client-side SDK for shipping logs and metrics to a hosted observability
//! endpoint.
//!
//! ```no_run
//! # use beacon_telemetry::{init, log_info, ConfigBuilder};
//! # use std::collections::HashMap;
//! # async fn doc() {
//! init(ConfigBuilder::new("my-service", "my-token").build()).unwrap();
//! log_info("service starting", HashMap::new()).unwrap();
//! beacon_telemetry::shutdown().await.unwrap();
//! # }
//! ```

mod aggregator;
mod attributes;
mod batcher;
mod config;
mod diag;
mod error;
mod facade;
mod instance;
mod metric_sender;
mod router;
mod sender;
mod types;

pub use attributes::add_attributes;
pub use config::{Config, ConfigBuilder};
pub use error::{SdkError, SendOutcome};
pub use facade::{
    counter, gauge_dec, gauge_inc, gauge_set, histogram, init, log_debug, log_error, log_info,
    log_trace, log_warn, shutdown,
};
pub use instance::Instance;
pub use types::{
    AggregatedBatch, CounterMessage, GaugeMessage, GaugeMode, HistogramMessage, LogLevel,
    LogRecord, MetricEvent, MetricKind, Timestamp,
};
