//! Metric Aggregator (component D): three inbound queues (counter, gauge,
//! histogram), series maps folded under a mutex, drained on an
//! epoch-aligned ticker.

use crate::types::{
    AggregatedBatch, CounterMessage, GaugeMessage, GaugeMode, HistogramMessage, MetricEvent,
    MetricKind, Timestamp,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct CounterSeries {
    name: String,
    tags: HashMap<String, String>,
    value: f64,
}

#[derive(Clone)]
struct GaugeSeries {
    name: String,
    tags: HashMap<String, String>,
    value: f64,
}

#[derive(Clone)]
struct HistogramSeries {
    name: String,
    tags: HashMap<String, String>,
    values: Vec<f64>,
}

#[derive(Default)]
struct SeriesState {
    counters: HashMap<String, CounterSeries>,
    gauges: HashMap<String, GaugeSeries>,
    histograms: HashMap<String, HistogramSeries>,
}

impl SeriesState {
    fn fold(&mut self, event: MetricEvent) {
        let id = event.series_id();
        match event.kind {
            MetricKind::Counter => {
                let entry = self.counters.entry(id).or_insert_with(|| CounterSeries {
                    name: event.name.clone(),
                    tags: event.tags.clone(),
                    value: 0.0,
                });
                entry.value += event.value;
            }
            MetricKind::Gauge => {
                let entry = self.gauges.entry(id).or_insert_with(|| GaugeSeries {
                    name: event.name.clone(),
                    tags: event.tags.clone(),
                    value: 0.0,
                });
                match event.gauge_mode.unwrap_or(GaugeMode::Set) {
                    GaugeMode::Set => entry.value = event.value,
                    GaugeMode::Inc => entry.value += event.value,
                    GaugeMode::Dec => entry.value -= event.value,
                }
            }
            MetricKind::Histogram => {
                let entry = self
                    .histograms
                    .entry(id)
                    .or_insert_with(|| HistogramSeries {
                        name: event.name.clone(),
                        tags: event.tags.clone(),
                        values: Vec::new(),
                    });
                entry.values.push(event.value);
            }
        }
    }

    /// Drain into an `AggregatedBatch`, resetting per spec §4.D: counters
    /// reset to zero (series kept so the next interval still reports it),
    /// gauges persist their last value, histograms are cleared entirely.
    fn drain(&mut self, timestamp: Timestamp) -> AggregatedBatch {
        let counters = self
            .counters
            .values_mut()
            .map(|c| {
                let msg = CounterMessage {
                    timestamp,
                    metric_name: c.name.clone(),
                    value: c.value,
                    tags: c.tags.clone(),
                };
                c.value = 0.0;
                msg
            })
            .collect();

        let gauges = self
            .gauges
            .values()
            .map(|g| GaugeMessage {
                timestamp,
                metric_name: g.name.clone(),
                value: g.value,
                tags: g.tags.clone(),
            })
            .collect();

        let histograms = self
            .histograms
            .values()
            .filter(|h| !h.values.is_empty())
            .map(|h| HistogramMessage {
                timestamp,
                metric_name: h.name.clone(),
                values: h.values.clone(),
                tags: h.tags.clone(),
            })
            .collect();
        self.histograms.values_mut().for_each(|h| h.values.clear());

        AggregatedBatch {
            counters,
            gauges,
            histograms,
        }
    }
}

/// Bounded inbound queues for each metric kind, folded into per-series
/// state and drained on an epoch-aligned tick.
pub struct MetricAggregator {
    counter_tx: mpsc::Sender<MetricEvent>,
    gauge_tx: mpsc::Sender<MetricEvent>,
    histogram_tx: mpsc::Sender<MetricEvent>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stop_tx: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl MetricAggregator {
    /// `interval` is the aggregation window; ticks are aligned to Unix
    /// epoch boundaries (`t mod interval == 0`), not to process start time.
    pub fn new(interval: Duration, on_flush: impl Fn(AggregatedBatch) + Send + Sync + 'static) -> Self {
        Self::with_capacity(interval, DEFAULT_QUEUE_CAPACITY, on_flush)
    }

    pub fn with_capacity(
        interval: Duration,
        queue_capacity: usize,
        on_flush: impl Fn(AggregatedBatch) + Send + Sync + 'static,
    ) -> Self {
        let (counter_tx, counter_rx) = mpsc::channel(queue_capacity);
        let (gauge_tx, gauge_rx) = mpsc::channel(queue_capacity);
        let (histogram_tx, histogram_rx) = mpsc::channel(queue_capacity);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(run_worker(
            counter_rx,
            gauge_rx,
            histogram_rx,
            interval,
            stop_rx,
            Box::new(on_flush),
        ));

        Self {
            counter_tx,
            gauge_tx,
            histogram_tx,
            handle: Mutex::new(Some(handle)),
            stop_tx: Mutex::new(Some(stop_tx)),
        }
    }

    /// Non-blocking: events are dropped silently if the relevant queue is
    /// full (spec §4.D, same drop-on-full contract as the batcher).
    pub fn record(&self, event: MetricEvent) {
        let tx = match event.kind {
            MetricKind::Counter => &self.counter_tx,
            MetricKind::Gauge => &self.gauge_tx,
            MetricKind::Histogram => &self.histogram_tx,
        };
        let _ = tx.try_send(event);
    }

    /// Stop the ticker, perform one final drain/flush of whatever series
    /// state has accumulated, and wait for the worker to exit.
    pub async fn stop(&self) {
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle)
                .await
                .is_err()
            {
                crate::diag::warn_emergency!(
                    "beacon-telemetry: metric aggregator did not stop within {:?}; abandoning",
                    SHUTDOWN_JOIN_TIMEOUT
                );
            }
        }
    }
}

async fn run_worker(
    mut counter_rx: mpsc::Receiver<MetricEvent>,
    mut gauge_rx: mpsc::Receiver<MetricEvent>,
    mut histogram_rx: mpsc::Receiver<MetricEvent>,
    interval: Duration,
    mut stop_rx: tokio::sync::oneshot::Receiver<()>,
    on_flush: Box<dyn Fn(AggregatedBatch) + Send + Sync>,
) {
    let mut state = SeriesState::default();
    let mut ticker = epoch_aligned_interval(interval);

    loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => break,

            Some(event) = counter_rx.recv() => state.fold(event),
            Some(event) = gauge_rx.recv() => state.fold(event),
            Some(event) = histogram_rx.recv() => state.fold(event),

            _ = ticker.tick() => {
                // The tick fires a few ms after the boundary (spec's late-
                // absorption slack); label the batch with the truncated
                // interval-start, not the fire time, so emitted timestamps
                // stay exact multiples of the interval.
                let interval_start = Timestamp::now().truncate_to_interval(interval.as_secs());
                let batch = state.drain(interval_start);
                if !batch.is_empty() {
                    on_flush(batch);
                }
            }
        }
    }

    // Drain whatever is already buffered in the three queues, then flush
    // once more regardless of tick alignment.
    while let Ok(event) = counter_rx.try_recv() {
        state.fold(event);
    }
    while let Ok(event) = gauge_rx.try_recv() {
        state.fold(event);
    }
    while let Ok(event) = histogram_rx.try_recv() {
        state.fold(event);
    }
    let interval_start = Timestamp::now().truncate_to_interval(interval.as_secs());
    let batch = state.drain(interval_start);
    if !batch.is_empty() {
        on_flush(batch);
    }
}

/// A `tokio::time::Interval` whose ticks land on Unix-epoch-aligned
/// boundaries of `interval`, so two SDK instances with the same interval
/// flush at (close to) the same wall-clock moment.
fn epoch_aligned_interval(interval: Duration) -> tokio::time::Interval {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let interval_ms = interval.as_millis().max(1) as u64;
    let now_ms = now.as_millis() as u64;
    let remainder_ms = now_ms % interval_ms;
    let delay = Duration::from_millis(interval_ms - remainder_ms);

    let start = tokio::time::Instant::now() + delay;
    tokio::time::interval_at(start, interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn counter_events_accumulate_within_an_interval() {
        let mut state = SeriesState::default();
        state.fold(MetricEvent::counter("hits", 1.0, HashMap::new()));
        state.fold(MetricEvent::counter("hits", 2.0, HashMap::new()));
        let batch = state.drain(Timestamp::now());
        assert_eq!(batch.counters.len(), 1);
        assert_eq!(batch.counters[0].value, 3.0);
    }

    #[test]
    fn counter_resets_to_zero_after_drain_but_series_persists() {
        let mut state = SeriesState::default();
        state.fold(MetricEvent::counter("hits", 5.0, HashMap::new()));
        state.drain(Timestamp::now());
        let second = state.drain(Timestamp::now());
        assert_eq!(second.counters[0].value, 0.0);
    }

    #[test]
    fn gauge_set_overwrites_and_persists_across_drains() {
        let mut state = SeriesState::default();
        state.fold(MetricEvent::gauge("mem", 10.0, GaugeMode::Set, HashMap::new()));
        state.fold(MetricEvent::gauge("mem", 3.0, GaugeMode::Inc, HashMap::new()));
        let batch = state.drain(Timestamp::now());
        assert_eq!(batch.gauges[0].value, 13.0);

        let second = state.drain(Timestamp::now());
        assert_eq!(second.gauges[0].value, 13.0); // persists, unlike counters
    }

    #[test]
    fn gauge_dec_subtracts() {
        let mut state = SeriesState::default();
        state.fold(MetricEvent::gauge("q", 10.0, GaugeMode::Set, HashMap::new()));
        state.fold(MetricEvent::gauge("q", 4.0, GaugeMode::Dec, HashMap::new()));
        let batch = state.drain(Timestamp::now());
        assert_eq!(batch.gauges[0].value, 6.0);
    }

    #[test]
    fn histogram_values_collect_then_clear_on_drain() {
        let mut state = SeriesState::default();
        state.fold(MetricEvent::histogram("latency", 1.0, HashMap::new()));
        state.fold(MetricEvent::histogram("latency", 2.0, HashMap::new()));
        let batch = state.drain(Timestamp::now());
        assert_eq!(batch.histograms[0].values, vec![1.0, 2.0]);

        let second = state.drain(Timestamp::now());
        assert!(second.histograms.is_empty()); // cleared, series dropped if empty
    }

    #[test]
    fn distinct_tag_sets_are_distinct_series() {
        let mut state = SeriesState::default();
        let mut tags_a = HashMap::new();
        tags_a.insert("region".to_string(), "us".to_string());
        let mut tags_b = HashMap::new();
        tags_b.insert("region".to_string(), "eu".to_string());

        state.fold(MetricEvent::counter("req", 1.0, tags_a));
        state.fold(MetricEvent::counter("req", 1.0, tags_b));
        let batch = state.drain(Timestamp::now());
        assert_eq!(batch.counters.len(), 2);
    }

    #[tokio::test]
    async fn stop_flushes_buffered_events_once() {
        let flushed = Arc::new(AtomicUsize::new(0));
        let flushed2 = flushed.clone();

        let agg = MetricAggregator::new(Duration::from_secs(3600), move |batch| {
            flushed2.fetch_add(batch.counters.len(), Ordering::SeqCst);
        });

        agg.record(MetricEvent::counter("c", 1.0, HashMap::new()));
        agg.stop().await;

        assert_eq!(flushed.load(Ordering::SeqCst), 1);
    }
}
