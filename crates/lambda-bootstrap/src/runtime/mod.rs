//! Runtime module - the invocation loop and its control API client
//!
//! This module provides:
//! - The control API client (`api`)
//! - The fetch/execute/report state machine (`event_loop`)
//! - Startup, including init error reporting (`start`)
//! - Panic logging (`log_panics`)

pub mod api;
pub mod event_loop;

use std::convert::Infallible;
use std::io::{self, Write};

use lambda_bootstrap_sdk::{Handler, HandlerError};

pub use api::{FetchError, HttpRuntimeApi, Invocation, ReportError, RuntimeApi};
pub use event_loop::{CycleOutcome, CycleState, Runtime};

/// Initialize the handler and run the loop forever.
///
/// `init` runs once, before the first fetch, and is where process-wide
/// resources shared across invocations are created. If it fails, the failure
/// is reported to the init error endpoint (best effort) and returned; that is
/// the only way this function returns.
pub async fn start<A, H, F>(api: A, init: F) -> Result<Infallible, HandlerError>
where
    A: RuntimeApi,
    H: Handler,
    F: FnOnce() -> Result<H, HandlerError>,
{
    let handler = match init() {
        Ok(handler) => handler,
        Err(e) => {
            tracing::error!(kind = %e.kind(), error = %e, "Handler initialization failed");
            let _ = io::stdout().flush();
            if let Err(report_err) = api.post_init_error(&e.to_report()).await {
                tracing::error!(error = %report_err, "Failed to report initialization error");
            }
            return Err(e);
        }
    };

    Ok(Runtime::new(api, handler).run().await)
}

/// Send panic messages through `tracing` instead of the default stderr hook,
/// so a handler panic shows up in the same stream as the rest of the log.
pub fn log_panics() {
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "Panicked");
    }));
}
