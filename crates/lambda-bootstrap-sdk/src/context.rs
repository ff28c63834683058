//! Execution context passed to every handler
//!
//! A [`Context`] is built by the runtime loop from the metadata of one
//! invocation. It is owned by that cycle and never reused for another
//! invocation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Request identifier assigned by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Create from a string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation metadata for the invocation currently being handled.
///
/// Serializes as `{"request_id", "invoked_function_arn", "trace_id"}` so a
/// handler can echo it back in its result.
///
/// # Example
///
/// ```ignore
/// async fn handle(event: JsonValue, ctx: Context) -> Result<JsonValue, HandlerError> {
///     println!("handling {}", ctx.request_id());
///     Ok(json!({"context": ctx}))
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    request_id: RequestId,
    invoked_function_arn: String,
    trace_id: String,
}

impl Context {
    pub fn new(
        request_id: RequestId,
        invoked_function_arn: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            invoked_function_arn: invoked_function_arn.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// ARN of the deployed function that was invoked
    pub fn invoked_function_arn(&self) -> &str {
        &self.invoked_function_arn
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }
}
