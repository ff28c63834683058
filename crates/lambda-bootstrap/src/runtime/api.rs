//! Control API client
//!
//! The runtime loop talks to the control plane through [`RuntimeApi`]. The
//! production implementation is [`HttpRuntimeApi`], a thin `reqwest` client
//! over the three invocation endpoints plus the init error endpoint.

use lambda_bootstrap_sdk::{BoxFuture, ErrorReport, RequestId};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::RuntimeConfig;

pub const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";
pub const FUNCTION_ARN_HEADER: &str = "Lambda-Runtime-Invoked-Function-Arn";
pub const TRACE_ID_HEADER: &str = "Lambda-Runtime-Trace-Id";
pub const ERROR_TYPE_HEADER: &str = "Lambda-Runtime-Function-Error-Type";

/// One unit of work fetched from the control API
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub request_id: RequestId,
    pub invoked_function_arn: String,
    pub trace_id: String,
    pub payload: Value,
}

/// Failures while fetching the next invocation
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to reach control API: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Control API returned status {0}")]
    Status(u16),

    #[error("Missing Lambda-Runtime-Aws-Request-Id header")]
    MissingRequestId,

    /// The request id was read but the rest of the invocation was unusable.
    #[error("Invalid invocation {request_id}: {reason}")]
    InvalidInvocation { request_id: RequestId, reason: String },
}

/// Failures while posting a report. Never fatal to the loop.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to send report: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Control API rejected report with status {0}")]
    Rejected(u16),
}

/// Operations the runtime loop needs from the control plane
pub trait RuntimeApi {
    /// Block until the next invocation is available
    fn next_invocation(&self) -> BoxFuture<'_, Result<Invocation, FetchError>>;

    fn post_response<'a>(
        &'a self,
        request_id: &'a RequestId,
        result: &'a Value,
    ) -> BoxFuture<'a, Result<(), ReportError>>;

    fn post_error<'a>(
        &'a self,
        request_id: &'a RequestId,
        report: &'a ErrorReport,
    ) -> BoxFuture<'a, Result<(), ReportError>>;

    /// Report that the handler could not be initialized
    fn post_init_error<'a>(&'a self, report: &'a ErrorReport) -> BoxFuture<'a, Result<(), ReportError>>;
}

impl<T: RuntimeApi + ?Sized> RuntimeApi for &T {
    fn next_invocation(&self) -> BoxFuture<'_, Result<Invocation, FetchError>> {
        (**self).next_invocation()
    }

    fn post_response<'a>(
        &'a self,
        request_id: &'a RequestId,
        result: &'a Value,
    ) -> BoxFuture<'a, Result<(), ReportError>> {
        (**self).post_response(request_id, result)
    }

    fn post_error<'a>(
        &'a self,
        request_id: &'a RequestId,
        report: &'a ErrorReport,
    ) -> BoxFuture<'a, Result<(), ReportError>> {
        (**self).post_error(request_id, report)
    }

    fn post_init_error<'a>(&'a self, report: &'a ErrorReport) -> BoxFuture<'a, Result<(), ReportError>> {
        (**self).post_init_error(report)
    }
}

/// HTTP client for the control API
#[derive(Debug, Clone)]
pub struct HttpRuntimeApi {
    client: reqwest::Client,
    base: Url,
}

impl HttpRuntimeApi {
    /// Create a client for the configured control API.
    ///
    /// No request timeout is set: the next-invocation call is held open by
    /// the control plane until work arrives.
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: config.api_base.clone(),
        }
    }

    /// Each segment is percent-encoded, so a request id always stays a
    /// single path segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // The base is always an http URL, which has path segments
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn invocation_endpoint(&self, request_id: &RequestId, action: &str) -> Url {
        self.endpoint(&["runtime", "invocation", request_id.as_str(), action])
    }

    async fn fetch_next(&self) -> Result<Invocation, FetchError> {
        let url = self.endpoint(&["runtime", "invocation", "next"]);
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let headers = response.headers();
        let request_id = header(headers, REQUEST_ID_HEADER)
            .map(RequestId::from)
            .ok_or(FetchError::MissingRequestId)?;

        let invalid = |reason: String| FetchError::InvalidInvocation {
            request_id: request_id.clone(),
            reason,
        };

        let invoked_function_arn = header(headers, FUNCTION_ARN_HEADER)
            .ok_or_else(|| invalid(format!("missing {} header", FUNCTION_ARN_HEADER)))?
            .to_string();
        let trace_id = header(headers, TRACE_ID_HEADER)
            .ok_or_else(|| invalid(format!("missing {} header", TRACE_ID_HEADER)))?
            .to_string();

        let body = response
            .bytes()
            .await
            .map_err(|e| invalid(format!("failed to read body: {}", e)))?;
        let payload = serde_json::from_slice(&body)
            .map_err(|e| invalid(format!("body is not valid JSON: {}", e)))?;

        Ok(Invocation {
            request_id,
            invoked_function_arn,
            trace_id,
            payload,
        })
    }

    async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        url: Url,
        body: &T,
        error_kind: Option<&str>,
    ) -> Result<(), ReportError> {
        let mut request = self.client.post(url).json(body);
        // The body carries the kind regardless; only a kind that can be a
        // header value is repeated in the header
        if let Some(kind) = error_kind {
            match HeaderValue::from_str(kind) {
                Ok(value) => request = request.header(ERROR_TYPE_HEADER, value),
                Err(_) => tracing::warn!(kind = %kind.escape_debug(), "Error kind is not a valid header value, omitting header"),
            }
        }

        let status = request.send().await?.status();
        if !status.is_success() {
            return Err(ReportError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

impl RuntimeApi for HttpRuntimeApi {
    fn next_invocation(&self) -> BoxFuture<'_, Result<Invocation, FetchError>> {
        Box::pin(self.fetch_next())
    }

    fn post_response<'a>(
        &'a self,
        request_id: &'a RequestId,
        result: &'a Value,
    ) -> BoxFuture<'a, Result<(), ReportError>> {
        Box::pin(async move {
            let url = self.invocation_endpoint(request_id, "response");
            self.post_json(url, result, None).await
        })
    }

    fn post_error<'a>(
        &'a self,
        request_id: &'a RequestId,
        report: &'a ErrorReport,
    ) -> BoxFuture<'a, Result<(), ReportError>> {
        Box::pin(async move {
            let url = self.invocation_endpoint(request_id, "error");
            self.post_json(url, report, Some(&report.error_kind)).await
        })
    }

    fn post_init_error<'a>(&'a self, report: &'a ErrorReport) -> BoxFuture<'a, Result<(), ReportError>> {
        Box::pin(async move {
            let url = self.endpoint(&["runtime", "init", "error"]);
            self.post_json(url, report, Some(&report.error_kind)).await
        })
    }
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name)?.to_str().ok()
}
