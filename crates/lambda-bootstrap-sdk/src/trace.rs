//! Current trace scope
//!
//! Handlers should read the trace id from [`Context::trace_id`]. This slot
//! exists for tracing integrations that cannot be handed the context. The
//! runtime loop overwrites it at the start of every cycle, so it always holds
//! the trace id of the invocation in flight (or of the last one handled).
//!
//! [`Context::trace_id`]: crate::Context::trace_id

use std::sync::{PoisonError, RwLock};

static CURRENT_TRACE_ID: RwLock<Option<String>> = RwLock::new(None);

/// Trace id of the current invocation, if one has been published
pub fn current_trace_id() -> Option<String> {
    CURRENT_TRACE_ID
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Publish the trace id for the invocation about to run.
///
/// Called by the runtime loop once per cycle; last writer wins.
pub fn set_current_trace_id(trace_id: &str) {
    let mut slot = CURRENT_TRACE_ID
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    *slot = Some(trace_id.to_string());
}
