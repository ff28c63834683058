//! Error types for handlers

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a handler can fail with.
///
/// Every variant carries a stable categorical tag, returned by
/// [`HandlerError::kind`], which becomes `errorKind` in the report sent to
/// the control plane.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Exception(String),

    #[error("{message}")]
    Custom { kind: String, message: String },

    #[error("Invalid event: {0}")]
    InvalidEvent(serde_json::Error),

    #[error("Failed to serialize result: {0}")]
    Serialization(serde_json::Error),

    #[error("{0}")]
    Panic(String),

    #[error(transparent)]
    Unhandled(#[from] anyhow::Error),
}

impl HandlerError {
    /// Generic failure raised by handler code
    pub fn exception(message: impl Into<String>) -> Self {
        HandlerError::Exception(message.into())
    }

    /// Failure with a handler-defined kind
    pub fn custom(kind: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerError::Custom {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            HandlerError::Exception(_) => "Exception",
            HandlerError::Custom { kind, .. } => kind,
            HandlerError::InvalidEvent(_) => "InvalidEvent",
            HandlerError::Serialization(_) => "SerializationError",
            HandlerError::Panic(_) => "Panic",
            HandlerError::Unhandled(_) => "Unhandled",
        }
    }

    /// Convert to the report posted to the error endpoint
    pub fn to_report(&self) -> ErrorReport {
        ErrorReport::from_error(self.kind(), self)
    }
}

/// Body of an error report: `{errorKind, errorMessage, stackTrace}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub error_kind: String,
    pub error_message: String,
    pub stack_trace: Vec<String>,
}

impl ErrorReport {
    /// Build a report, filling in an empty kind or message so neither is
    /// ever blank on the wire.
    pub fn new(kind: impl Into<String>, message: impl Into<String>, stack_trace: Vec<String>) -> Self {
        let mut error_kind = kind.into();
        if error_kind.is_empty() {
            error_kind = "Unhandled".to_string();
        }
        let mut error_message = message.into();
        if error_message.is_empty() {
            error_message = error_kind.clone();
        }
        let mut stack_trace = stack_trace;
        if stack_trace.is_empty() {
            stack_trace.push(format!("{}: {}", error_kind, error_message));
        }

        Self {
            error_kind,
            error_message,
            stack_trace,
        }
    }

    /// Build a report from any error.
    ///
    /// The stack trace is the error's source chain, outermost first.
    pub fn from_error(kind: &str, err: &(dyn std::error::Error + 'static)) -> Self {
        let message = err.to_string();
        let mut stack_trace = vec![format!("{}: {}", kind, message)];
        let mut source = err.source();
        while let Some(cause) = source {
            stack_trace.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        Self::new(kind, message, stack_trace)
    }
}

impl From<&HandlerError> for ErrorReport {
    fn from(err: &HandlerError) -> Self {
        err.to_report()
    }
}
