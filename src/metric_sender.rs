//! Metric Sender (component E): bounded queue of complete aggregated
//! batches, periodic flush only - no size trigger, since each item is
//! already a whole interval's worth of series.

use crate::sender::HttpSender;
use crate::types::AggregatedBatch;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

const DEFAULT_QUEUE_CAPACITY: usize = 100;
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct MetricsPayload<'a> {
    #[serde(rename = "metrics_counters", skip_serializing_if = "Vec::is_empty")]
    counters: &'a [crate::types::CounterMessage],
    #[serde(rename = "metrics_gauges", skip_serializing_if = "Vec::is_empty")]
    gauges: &'a [crate::types::GaugeMessage],
    #[serde(rename = "metrics_histograms", skip_serializing_if = "Vec::is_empty")]
    histograms: &'a [crate::types::HistogramMessage],
}

/// Bounded queue of `AggregatedBatch`es with a single background worker
/// that posts each one as it arrives.
pub struct MetricSender {
    tx: parking_lot::Mutex<Option<mpsc::Sender<AggregatedBatch>>>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    fatal: Arc<AtomicBool>,
}

impl MetricSender {
    pub fn new(sender: HttpSender, endpoint: String) -> Self {
        Self::with_capacity(sender, endpoint, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(sender: HttpSender, endpoint: String, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let fatal = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(run_worker(rx, sender, endpoint, fatal.clone()));

        Self {
            tx: parking_lot::Mutex::new(Some(tx)),
            handle: parking_lot::Mutex::new(Some(handle)),
            fatal,
        }
    }

    /// Non-blocking: the batch is dropped silently if the queue is full.
    /// Called once per aggregation interval by the Metric Aggregator (D).
    pub fn add(&self, batch: AggregatedBatch) {
        let guard = self.tx.lock();
        if let Some(tx) = guard.as_ref() {
            let _ = tx.try_send(batch);
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Relaxed)
    }

    pub async fn stop(&self) {
        let tx = self.tx.lock().take();
        drop(tx);

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle)
                .await
                .is_err()
            {
                crate::diag::warn_emergency!(
                    "beacon-telemetry: metric sender did not stop within {:?}; abandoning",
                    SHUTDOWN_JOIN_TIMEOUT
                );
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<AggregatedBatch>,
    sender: HttpSender,
    endpoint: String,
    fatal: Arc<AtomicBool>,
) {
    while let Some(batch) = rx.recv().await {
        send_batch(&sender, &endpoint, batch, &fatal).await;
    }
    // Drain anything left buffered after the channel closed.
    while let Ok(batch) = rx.try_recv() {
        send_batch(&sender, &endpoint, batch, &fatal).await;
    }
}

async fn send_batch(
    sender: &HttpSender,
    endpoint: &str,
    batch: AggregatedBatch,
    fatal: &AtomicBool,
) {
    if batch.is_empty() || fatal.load(Ordering::Relaxed) {
        return;
    }

    let payload = MetricsPayload {
        counters: &batch.counters,
        gauges: &batch.gauges,
        histograms: &batch.histograms,
    };
    let outcome = sender.send(endpoint, &payload).await;
    if outcome.is_fatal() {
        fatal.store(true, Ordering::Relaxed);
        crate::diag::warn_emergency!("beacon-telemetry: invalid token; metric sends disabled for this process");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CounterMessage;
    use crate::types::Timestamp;
    use std::collections::HashMap;

    fn one_counter_batch() -> AggregatedBatch {
        AggregatedBatch {
            counters: vec![CounterMessage {
                timestamp: Timestamp::now(),
                metric_name: "hits".to_string(),
                value: 1.0,
                tags: HashMap::new(),
            }],
            gauges: vec![],
            histograms: vec![],
        }
    }

    #[tokio::test]
    async fn posts_each_batch_as_it_arrives() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/message")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let sender = HttpSender::new("tk", false);
        let ms = MetricSender::new(sender, format!("{}/api/message", server.url()));

        ms.add(one_counter_batch());
        ms.add(one_counter_batch());
        ms.stop().await;

        m.assert_async().await;
    }

    #[tokio::test]
    async fn empty_batches_are_not_posted() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/message")
            .with_status(200)
            .expect(0)
            .create_async()
            .await;

        let sender = HttpSender::new("tk", false);
        let ms = MetricSender::new(sender, format!("{}/api/message", server.url()));

        ms.add(AggregatedBatch::default());
        ms.stop().await;

        m.assert_async().await;
    }

    #[tokio::test]
    async fn stops_sending_after_invalid_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/message")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let sender = HttpSender::new("bad-tk", false);
        let ms = MetricSender::new(sender, format!("{}/api/message", server.url()));

        ms.add(one_counter_batch());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ms.is_fatal());

        ms.add(one_counter_batch());
        ms.stop().await;
    }
}
