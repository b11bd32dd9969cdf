//! Public Facade (component H): the surface most callers use - thin
//! dispatch onto whatever instance is currently installed as the
//! process-wide singleton.
//!
//! Every function here fails fast with [`SdkError::NotInitialized`] when
//! called before `init()`: spec §4.H requires the facade to raise to the
//! caller rather than swallow the condition, unlike the internal pipeline
//! (queue-full, batch-send failures), which is genuinely fire-and-forget.

use std::collections::HashMap;

use crate::config::Config;
use crate::error::SdkError;
use crate::instance::Instance;
use crate::types::{GaugeMode, LogLevel};

/// Initialize the process-wide singleton. Call this once, near the start
/// of `main`.
pub fn init(config: Config) -> Result<(), SdkError> {
    Instance::init(config).map(|_| ())
}

/// Tear down the process-wide singleton: disables autocapture, flushes
/// every queued log and metric, and waits for the background workers to
/// exit.
pub async fn shutdown() -> Result<(), SdkError> {
    Instance::shutdown_global().await
}

fn dispatch(f: impl FnOnce(&Instance)) -> Result<(), SdkError> {
    let instance = Instance::global().ok_or(SdkError::NotInitialized)?;
    f(&instance);
    Ok(())
}

pub fn log_trace(body: impl Into<String>, attrs: HashMap<String, String>) -> Result<(), SdkError> {
    dispatch(|i| i.log(LogLevel::Trace, body, attrs))
}

pub fn log_debug(body: impl Into<String>, attrs: HashMap<String, String>) -> Result<(), SdkError> {
    dispatch(|i| i.log(LogLevel::Debug, body, attrs))
}

pub fn log_info(body: impl Into<String>, attrs: HashMap<String, String>) -> Result<(), SdkError> {
    dispatch(|i| i.log(LogLevel::Info, body, attrs))
}

pub fn log_warn(body: impl Into<String>, attrs: HashMap<String, String>) -> Result<(), SdkError> {
    dispatch(|i| i.log(LogLevel::Warn, body, attrs))
}

pub fn log_error(body: impl Into<String>, attrs: HashMap<String, String>) -> Result<(), SdkError> {
    dispatch(|i| i.log(LogLevel::Error, body, attrs))
}

pub fn counter(
    name: impl Into<String>,
    value: f64,
    tags: HashMap<String, String>,
) -> Result<(), SdkError> {
    dispatch(|i| i.counter(name, value, tags))
}

pub fn gauge_set(
    name: impl Into<String>,
    value: f64,
    tags: HashMap<String, String>,
) -> Result<(), SdkError> {
    dispatch(|i| i.gauge(name, value, GaugeMode::Set, tags))
}

pub fn gauge_inc(
    name: impl Into<String>,
    value: f64,
    tags: HashMap<String, String>,
) -> Result<(), SdkError> {
    dispatch(|i| i.gauge(name, value, GaugeMode::Inc, tags))
}

pub fn gauge_dec(
    name: impl Into<String>,
    value: f64,
    tags: HashMap<String, String>,
) -> Result<(), SdkError> {
    dispatch(|i| i.gauge(name, value, GaugeMode::Dec, tags))
}

pub fn histogram(
    name: impl Into<String>,
    value: f64,
    tags: HashMap<String, String>,
) -> Result<(), SdkError> {
    dispatch(|i| i.histogram(name, value, tags))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn calls_before_init_fail_with_not_initialized() {
        // No singleton installed in this test process; every call must
        // raise rather than panic, block, or silently swallow the miss.
        assert!(matches!(
            log_info("hello", HashMap::new()),
            Err(SdkError::NotInitialized)
        ));
        assert!(matches!(
            counter("c", 1.0, HashMap::new()),
            Err(SdkError::NotInitialized)
        ));
        assert!(matches!(
            gauge_set("g", 1.0, HashMap::new()),
            Err(SdkError::NotInitialized)
        ));
        assert!(matches!(
            histogram("h", 1.0, HashMap::new()),
            Err(SdkError::NotInitialized)
        ));
        assert!(matches!(shutdown().await, Err(SdkError::NotInitialized)));
    }
}
