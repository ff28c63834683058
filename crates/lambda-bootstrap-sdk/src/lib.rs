//! Lambda Bootstrap SDK - Types and utilities for writing handlers
//!
//! This crate provides the handler-facing half of the custom runtime: the
//! per-invocation [`Context`], the [`Handler`] capability and its adapter,
//! and the error shape reported back to the control plane when a handler
//! fails.

pub mod context;
pub mod error;
pub mod handler;
pub mod trace;

pub mod prelude {
    //! Common imports for handlers
    pub use crate::context::{Context, RequestId};
    pub use crate::error::HandlerError;
    pub use crate::handler::{handler_fn, Handler};
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{json, Value as JsonValue};
}

// Re-export key types at crate root
pub use context::{Context, RequestId};
pub use error::{ErrorReport, HandlerError};
pub use handler::{handler_fn, Adapter, BoxFuture, Handler, HandlerFn};
