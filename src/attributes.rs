//! Attribute Store (component A): task-scoped key/value propagation.
//!
//! Spec §4.A requires partitioning by "logical task", not OS thread. In this
//! crate's concurrency model (tokio tasks) the idiomatic equivalent of
//! Python's `contextvars.ContextVar` is [`tokio::task_local!`]: it is local
//! to the task polling it, inherited by futures spawned *within* a scope,
//! and automatically restored when the scope exits - on any exit path,
//! including a panic unwind through the scope.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;

tokio::task_local! {
    static ATTRIBUTES: RefCell<HashMap<String, String>>;
}

/// Snapshot of the attributes visible to the calling task right now.
///
/// Outside of any `add_attributes` scope this is always empty, mirroring
/// `contextvars.ContextVar`'s process-wide default.
pub fn get_attributes() -> HashMap<String, String> {
    ATTRIBUTES
        .try_with(|cell| cell.borrow().clone())
        .unwrap_or_default()
}

/// Run `body` with `attrs` merged on top of the current task's effective
/// attributes, then restore the prior map on every exit path (normal
/// return, early return, or panic unwind).
///
/// Nested calls compose as a stack: an inner `add_attributes` sees the
/// outer scope's attributes and its own overlay is invisible once the
/// inner future completes.
pub async fn add_attributes<F, Fut, T>(attrs: HashMap<String, String>, body: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let mut merged = get_attributes();
    merged.extend(attrs);
    ATTRIBUTES.scope(RefCell::new(merged), body()).await
}
