//! Sample handler shipped with the bootstrap
//!
//! Mimics the out-of-the-box hello world function: it logs to stdout, echoes
//! the event and context back, and fails on demand when the event carries a
//! `force_exception` key.

use lambda_bootstrap_sdk::prelude::*;

pub const GREETING: &str = "Hello from ECR Lambda!!!!";

/// Build the handler. Shared resources for all invocations belong here.
pub fn init() -> Result<impl Handler, HandlerError> {
    Ok(handler_fn(handle))
}

/// Hello world handler
///
/// # Example
///
/// ```ignore
/// // {"force_exception": "boom"} fails with kind "Exception" and message "boom"
/// // {} returns {"statusCode": 200, "body": "...", "event": {}, "context": {...}}
/// ```
pub async fn handle(event: JsonValue, ctx: Context) -> Result<JsonValue, HandlerError> {
    println!("Logging works just like old-school Lambda");

    if let Some(reason) = event.get("force_exception") {
        let message = match reason.as_str() {
            Some(s) => s.to_string(),
            None => reason.to_string(),
        };
        return Err(HandlerError::exception(message));
    }

    Ok(json!({
        "statusCode": 200,
        "body": GREETING,
        "event": event,
        "context": ctx,
    }))
}
