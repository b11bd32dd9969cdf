//! Lifecycle Manager (component G): process-wide singleton wiring
//! together components A-F, plus an `atexit` safety net.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::MetricAggregator;
use crate::attributes;
use crate::batcher::LogBatcher;
use crate::config::Config;
use crate::error::SdkError;
use crate::metric_sender::MetricSender;
use crate::router::{AutocaptureRouter, PassthroughWriter};
use crate::sender::HttpSender;
use crate::types::{GaugeMode, LogLevel, LogRecord, MetricEvent};

const DEFAULT_METRIC_INTERVAL: Duration = Duration::from_secs(60);

static GLOBAL: parking_lot::Mutex<Option<Arc<Instance>>> = parking_lot::Mutex::new(None);
static ATEXIT_ONCE: std::sync::Once = std::sync::Once::new();

/// A fully wired, running set of components A-F, reachable through the
/// process-wide singleton or held directly by a caller that wants more
/// than one instance (tests, multi-tenant embeddings).
pub struct Instance {
    config: Config,
    batcher: Arc<LogBatcher>,
    aggregator: MetricAggregator,
    metric_sender: Arc<MetricSender>,
    router: AutocaptureRouter,
    stdout_passthrough: Option<PassthroughWriter>,
    stderr_passthrough: Option<PassthroughWriter>,
}

impl Instance {
    /// Construct and start every component, but do not touch the global
    /// singleton. Prefer [`init`](Self::init) unless you specifically need
    /// an independent instance.
    pub fn new(config: Config) -> Arc<Instance> {
        let endpoint = config.ingest_url();

        let log_http = HttpSender::new(config.token.clone(), config.insecure);
        let batcher = Arc::new(LogBatcher::new(log_http, endpoint.clone()));

        let metric_http = HttpSender::new(config.token.clone(), config.insecure);
        let metric_sender = Arc::new(MetricSender::new(metric_http, endpoint));

        let forwarding_sender = metric_sender.clone();
        let aggregator = MetricAggregator::new(DEFAULT_METRIC_INTERVAL, move |batch| {
            forwarding_sender.add(batch);
        });

        // Captured *before* autocapture (if any) redirects fd 1/2, so the
        // facade's own passthrough formatting always reaches the real
        // terminal rather than looping back through the router.
        let (stdout_passthrough, stderr_passthrough) = if config.passthrough {
            (
                PassthroughWriter::dup(libc::STDOUT_FILENO).ok(),
                PassthroughWriter::dup(libc::STDERR_FILENO).ok(),
            )
        } else {
            (None, None)
        };

        let router_batcher = batcher.clone();
        let router = AutocaptureRouter::new(config.passthrough, move |level, line| {
            router_batcher.add(LogRecord::new(line, level, HashMap::new()));
        });
        if config.autocapture && !config.noop {
            if let Err(e) = router.enable() {
                crate::diag::warn_emergency!("beacon-telemetry: failed to enable autocapture: {e}");
            }
        }

        Arc::new(Instance {
            config,
            batcher,
            aggregator,
            metric_sender,
            router,
            stdout_passthrough,
            stderr_passthrough,
        })
    }

    /// Initialize the process-wide singleton. Fails with
    /// [`SdkError::AlreadyInitialized`] if one already exists.
    pub fn init(config: Config) -> Result<Arc<Instance>, SdkError> {
        let mut guard = GLOBAL.lock();
        if guard.is_some() {
            return Err(SdkError::AlreadyInitialized);
        }

        let instance = Instance::new(config);
        *guard = Some(instance.clone());
        drop(guard);

        ATEXIT_ONCE.call_once(|| unsafe {
            libc::atexit(atexit_shutdown);
        });

        Ok(instance)
    }

    /// Fetch the process-wide singleton, if one has been initialized.
    pub fn global() -> Option<Arc<Instance>> {
        GLOBAL.lock().clone()
    }

    /// Tear down the process-wide singleton. Returns
    /// [`SdkError::NotInitialized`] if there isn't one.
    pub async fn shutdown_global() -> Result<(), SdkError> {
        let instance = GLOBAL.lock().take();
        match instance {
            Some(instance) => {
                instance.shutdown().await;
                Ok(())
            }
            None => Err(SdkError::NotInitialized),
        }
    }

    /// Stop every component. Order matters: disable autocapture first (no
    /// more lines feeding the batcher), then the aggregator (so its final
    /// drain still has a live metric sender to forward to), then the
    /// metric sender (so that forwarded final batch actually gets sent),
    /// then the log batcher last.
    pub async fn shutdown(&self) {
        self.router.disable();
        self.aggregator.stop().await;
        self.metric_sender.stop().await;
        self.batcher.stop().await;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn effective_attributes(&self, explicit: &HashMap<String, String>) -> HashMap<String, String> {
        let mut merged = self.config.attributes.clone();
        merged.extend(attributes::get_attributes());
        merged.extend(explicit.clone());
        // Forced last: the service's own identity is never shadowable by
        // a caller-supplied attribute of the same name.
        merged.insert("service.name".to_string(), self.config.name.clone());
        merged
    }

    fn write_passthrough(&self, level: LogLevel, body: &str, attrs: &HashMap<String, String>) {
        let writer = if level.is_error() {
            self.stderr_passthrough.as_ref()
        } else {
            self.stdout_passthrough.as_ref()
        };
        let Some(writer) = writer else { return };

        let mut pairs: Vec<(&String, &String)> = attrs.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        let mut line = format!("[{}] [{level}] {body}", crate::types::Timestamp::now());
        for (k, v) in pairs {
            line.push(' ');
            line.push_str(k);
            line.push('=');
            line.push_str(v);
        }
        writer.write_line(&line);
    }

    pub fn log(&self, level: LogLevel, body: impl Into<String>, attrs: HashMap<String, String>) {
        if self.config.noop {
            return;
        }
        let body = body.into();
        let merged = self.effective_attributes(&attrs);
        if self.config.passthrough {
            self.write_passthrough(level, &body, &merged);
        }
        self.batcher.add(LogRecord::new(body, level, merged));
    }

    pub fn counter(&self, name: impl Into<String>, value: f64, tags: HashMap<String, String>) {
        if self.config.noop {
            return;
        }
        self.aggregator
            .record(MetricEvent::counter(name, value, tags));
    }

    pub fn gauge(
        &self,
        name: impl Into<String>,
        value: f64,
        mode: GaugeMode,
        tags: HashMap<String, String>,
    ) {
        if self.config.noop {
            return;
        }
        self.aggregator
            .record(MetricEvent::gauge(name, value, mode, tags));
    }

    pub fn histogram(&self, name: impl Into<String>, value: f64, tags: HashMap<String, String>) {
        if self.config.noop {
            return;
        }
        self.aggregator
            .record(MetricEvent::histogram(name, value, tags));
    }
}

/// `atexit` safety net: if the process exits without an explicit
/// `shutdown()` call, flush whatever is still queued instead of dropping
/// it silently. The runtime that ran `init()` is gone by the time `atexit`
/// handlers fire (it was torn down when `main` returned), so this spins up
/// a throwaway one just to drive the async shutdown to completion.
extern "C" fn atexit_shutdown() {
    let instance = GLOBAL.lock().take();
    let Some(instance) = instance else { return };

    match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt.block_on(instance.shutdown()),
        Err(e) => crate::diag::warn_emergency!(
            "beacon-telemetry: atexit shutdown could not start a runtime: {e}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    fn noop_config() -> Config {
        ConfigBuilder::new("test", "tk")
            .autocapture(false)
            .noop(true)
            .build()
    }

    #[tokio::test]
    async fn new_instance_does_not_touch_the_global_singleton() {
        let a = Instance::new(noop_config());
        assert!(Instance::global().is_none());
        a.shutdown().await;
    }

    #[tokio::test]
    async fn noop_config_drops_logs_and_metrics_without_queuing() {
        let instance = Instance::new(noop_config());
        instance.log(LogLevel::Info, "hello", HashMap::new());
        instance.counter("c", 1.0, HashMap::new());
        instance.shutdown().await; // should return promptly: nothing queued
    }

    #[tokio::test]
    async fn effective_attributes_merge_config_then_task_then_explicit() {
        let mut cfg = noop_config();
        cfg.attributes.insert("env".to_string(), "prod".to_string());
        cfg.attributes.insert("shared".to_string(), "config".to_string());
        let instance = Instance::new(cfg);

        let mut task_attrs = HashMap::new();
        task_attrs.insert("shared".to_string(), "task".to_string());
        task_attrs.insert("request_id".to_string(), "abc".to_string());

        let merged = attributes::add_attributes(task_attrs, || async {
            let mut explicit = HashMap::new();
            explicit.insert("shared".to_string(), "explicit".to_string());
            instance.effective_attributes(&explicit)
        })
        .await;

        assert_eq!(merged.get("env").map(String::as_str), Some("prod"));
        assert_eq!(merged.get("request_id").map(String::as_str), Some("abc"));
        // Explicit call-site attributes win over task-scoped, which win
        // over config-level defaults.
        assert_eq!(merged.get("shared").map(String::as_str), Some("explicit"));

        instance.shutdown().await;
    }
}
