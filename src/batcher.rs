//! Log Batcher (component C): bounded queue, one background worker,
//! size/time-triggered flush.

use crate::error::SendOutcome;
use crate::sender::HttpSender;
use crate::types::LogRecord;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_millis(100);
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct LogsPayload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    logs: &'a [LogRecord],
}

/// Bounded FIFO of log records with a single background worker.
pub struct LogBatcher {
    tx: parking_lot::Mutex<Option<mpsc::Sender<LogRecord>>>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    fatal: Arc<AtomicBool>,
    max_batch_size: usize,
}

impl LogBatcher {
    pub fn new(sender: HttpSender, endpoint: String) -> Self {
        Self::with_config(sender, endpoint, DEFAULT_MAX_BATCH_SIZE, DEFAULT_BATCH_INTERVAL)
    }

    pub fn with_config(
        sender: HttpSender,
        endpoint: String,
        max_batch_size: usize,
        batch_interval: Duration,
    ) -> Self {
        let capacity = max_batch_size.saturating_mul(10).max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let fatal = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(run_worker(
            rx,
            sender,
            endpoint,
            max_batch_size,
            batch_interval,
            fatal.clone(),
        ));

        Self {
            tx: parking_lot::Mutex::new(Some(tx)),
            handle: parking_lot::Mutex::new(Some(handle)),
            fatal,
            max_batch_size,
        }
    }

    /// Non-blocking: drops the record silently if the queue is full or the
    /// batcher has already been stopped.
    pub fn add(&self, log: LogRecord) {
        let guard = self.tx.lock();
        if let Some(tx) = guard.as_ref() {
            let _ = tx.try_send(log);
        }
    }

    /// Whether an `InvalidToken` response has permanently stopped sends.
    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Relaxed)
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Stop accepting new logs, drain the queue into a final batch, flush
    /// once, and wait for the worker to exit. Bounded to ~10s; if the
    /// worker doesn't finish in time this is logged and abandoned rather
    /// than blocking shutdown forever.
    pub async fn stop(&self) {
        let tx = self.tx.lock().take();
        drop(tx); // closes the channel, waking the worker's recv() promptly

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle)
                .await
                .is_err()
            {
                crate::diag::warn_emergency!(
                    "beacon-telemetry: log batcher did not stop within {:?}; abandoning",
                    SHUTDOWN_JOIN_TIMEOUT
                );
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<LogRecord>,
    sender: HttpSender,
    endpoint: String,
    max_batch_size: usize,
    batch_interval: Duration,
    fatal: Arc<AtomicBool>,
) {
    let mut batch: Vec<LogRecord> = Vec::with_capacity(max_batch_size);
    let mut deadline = Instant::now() + batch_interval;

    loop {
        let now = Instant::now();
        let timeout = if now >= deadline {
            Duration::from_millis(0)
        } else {
            deadline - now
        };

        tokio::select! {
            maybe_item = rx.recv() => {
                match maybe_item {
                    Some(item) => {
                        batch.push(item);
                        if batch.len() >= max_batch_size {
                            flush(&sender, &endpoint, &mut batch, &fatal).await;
                            deadline = Instant::now() + batch_interval;
                        }
                    }
                    None => break, // channel closed: stop() was called
                }
            }
            _ = tokio::time::sleep(timeout) => {
                if !batch.is_empty() {
                    flush(&sender, &endpoint, &mut batch, &fatal).await;
                }
                deadline = Instant::now() + batch_interval;
            }
        }
    }

    // Drain whatever is still buffered in the channel and flush once more,
    // even if it's larger than max_batch_size.
    while let Ok(item) = rx.try_recv() {
        batch.push(item);
    }
    if !batch.is_empty() {
        flush(&sender, &endpoint, &mut batch, &fatal).await;
    }
}

async fn flush(
    sender: &HttpSender,
    endpoint: &str,
    batch: &mut Vec<LogRecord>,
    fatal: &AtomicBool,
) {
    if batch.is_empty() || fatal.load(Ordering::Relaxed) {
        batch.clear();
        return;
    }

    let payload = LogsPayload {
        kind: "logs",
        logs: batch,
    };
    let outcome = sender.send(endpoint, &payload).await;
    match outcome {
        SendOutcome::Ok => batch.clear(),
        SendOutcome::InvalidToken => {
            fatal.store(true, Ordering::Relaxed);
            crate::diag::warn_emergency!(
                "beacon-telemetry: invalid token; log sends disabled for this process"
            );
            batch.clear(); // permanently dead; nothing will ever send it
        }
        SendOutcome::ServerError { .. } | SendOutcome::NetworkError(_) => {
            // Spec §4.C: retain the batch on a transient failure so the
            // next flush re-sends it plus whatever arrived in between.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogLevel;
    use std::collections::HashMap;

    fn log(body: &str) -> LogRecord {
        LogRecord::new(body, LogLevel::Info, HashMap::new())
    }

    #[tokio::test]
    async fn flushes_on_size_trigger() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/message")
            .with_status(200)
            .expect_at_least(1)
            .create_async()
            .await;

        let sender = HttpSender::new("tk", false);
        let batcher = LogBatcher::with_config(
            sender,
            format!("{}/api/message", server.url()),
            2,
            Duration::from_secs(60),
        );

        batcher.add(log("one"));
        batcher.add(log("two")); // hits max_batch_size=2, should flush promptly

        tokio::time::sleep(Duration::from_millis(100)).await;
        m.assert_async().await;
        batcher.stop().await;
    }

    #[tokio::test]
    async fn drains_remaining_queue_on_stop() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/message")
            .with_status(200)
            .create_async()
            .await;

        let sender = HttpSender::new("tk", false);
        let batcher = LogBatcher::with_config(
            sender,
            format!("{}/api/message", server.url()),
            1000,
            Duration::from_secs(60),
        );

        batcher.add(log("one"));
        batcher.add(log("two"));
        batcher.stop().await;

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
        let batcher = LogBatcher::with_config(
            sender,
            format!("{}/api/message", server.url()),
            1,
            Duration::from_secs(60),
        );

        batcher.add(log("one")); // triggers the single flush and goes fatal
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(batcher.is_fatal());

        batcher.add(log("two"));
        batcher.stop().await; // must not attempt another POST
    }

    #[tokio::test]
    async fn add_after_stop_is_silently_dropped() {
        let mut server = mockito::Server::new_async().await;
        let sender = HttpSender::new("tk", false);
        let batcher = LogBatcher::with_config(
            sender,
            format!("{}/api/message", server.url()),
            10,
            Duration::from_millis(50),
        );
        batcher.stop().await;
        batcher.add(log("late")); // must not panic
    }
}
