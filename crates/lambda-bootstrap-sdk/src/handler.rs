//! Handler capability and the adapter the runtime loop calls
//!
//! A handler is anything implementing [`Handler`]. Most handlers are plain
//! async functions wrapped with [`handler_fn`]:
//!
//! ```ignore
//! use lambda_bootstrap_sdk::prelude::*;
//!
//! async fn handle(event: JsonValue, ctx: Context) -> Result<JsonValue, HandlerError> {
//!     Ok(json!({"event": event, "context": ctx}))
//! }
//!
//! let handler = handler_fn(handle);
//! ```
//!
//! The runtime never calls a handler directly. It goes through [`Adapter`],
//! which turns every way a handler can fail, panics included, into a
//! [`HandlerError`].

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{Context, HandlerError};

/// Type alias for boxed future returned by handlers
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A user-supplied function computing a result from an event and context
pub trait Handler {
    fn call(&self, event: Value, ctx: Context) -> BoxFuture<'_, Result<Value, HandlerError>>;
}

/// Handler built from an async function over typed events and results
pub struct HandlerFn<F, E, R> {
    f: F,
    _marker: PhantomData<fn(E) -> R>,
}

/// Wrap an async function as a [`Handler`].
///
/// The event is deserialized into `E` before the call and the returned `R`
/// is serialized back to JSON. Use `serde_json::Value` for both to receive
/// and return the raw payload.
pub fn handler_fn<F, E, R, Fut>(f: F) -> HandlerFn<F, E, R>
where
    F: Fn(E, Context) -> Fut,
    Fut: Future<Output = Result<R, HandlerError>>,
{
    HandlerFn {
        f,
        _marker: PhantomData,
    }
}

impl<F, E, R, Fut> Handler for HandlerFn<F, E, R>
where
    F: Fn(E, Context) -> Fut,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    E: DeserializeOwned + 'static,
    R: Serialize + Send + 'static,
{
    fn call(&self, event: Value, ctx: Context) -> BoxFuture<'_, Result<Value, HandlerError>> {
        let event: E = match serde_json::from_value(event) {
            Ok(event) => event,
            Err(e) => return Box::pin(async move { Err(HandlerError::InvalidEvent(e)) }),
        };

        let fut = (self.f)(event, ctx);
        Box::pin(async move {
            let result = fut.await?;
            serde_json::to_value(result).map_err(HandlerError::Serialization)
        })
    }
}

/// Uniform entry point around a [`Handler`].
///
/// Performs no retries and passes the payload through untouched. A panic
/// raised while the handler runs is caught and reported as
/// [`HandlerError::Panic`].
pub struct Adapter<H> {
    handler: H,
}

impl<H: Handler> Adapter<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Invoke the handler for one event
    pub async fn invoke(&self, payload: Value, ctx: Context) -> Result<Value, HandlerError> {
        let call = panic::catch_unwind(AssertUnwindSafe(|| self.handler.call(payload, ctx)));
        let fut = match call {
            Ok(fut) => fut,
            Err(panic) => return Err(HandlerError::Panic(panic_message(panic.as_ref()))),
        };

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(HandlerError::Panic(panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
