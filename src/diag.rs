//! Internal diagnostic channel.
//!
//! These are conditions a caller can't act on (a background worker missed
//! its shutdown deadline, autocapture couldn't grab a file descriptor) -
//! not propagated as `Result`s, just surfaced. When the `tracing` feature
//! is enabled they go through `tracing::warn!`; otherwise they fall back
//! to stderr, since the SDK must never depend on the host having set up a
//! subscriber.

#[cfg(feature = "tracing")]
macro_rules! warn_emergency {
    ($($arg:tt)*) => { tracing::warn!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_emergency {
    ($($arg:tt)*) => { eprintln!($($arg)*) };
}

pub(crate) use warn_emergency;
