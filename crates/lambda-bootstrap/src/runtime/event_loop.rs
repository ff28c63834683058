//! The fetch -> execute -> report cycle
//!
//! Each cycle walks the states
//!
//! ```text
//! Idle -> Fetching -> Executing -> Reporting -> Idle
//!            |            |            |
//!            +------------+------------+-----> ErrorReporting -> Idle
//! ```
//!
//! No outcome of a cycle stops the next one. Fetch faults are logged and the
//! loop fetches again. Handler faults are reported to the error endpoint, and
//! so is a response the control plane refused. A failed error report is
//! logged and dropped.

use std::convert::Infallible;
use std::io::{self, Write};
use std::ops::ControlFlow;

use lambda_bootstrap_sdk::{trace, Adapter, Context, ErrorReport, Handler, RequestId};
use serde_json::Value;

use super::api::{FetchError, Invocation, RuntimeApi};

/// Error kind reported when the control plane hands out an invocation whose
/// metadata or body cannot be used
pub const INVALID_INVOCATION_KIND: &str = "Runtime.InvalidInvocation";

/// Error kind reported when posting a successful result failed
pub const RESPONSE_REJECTED_KIND: &str = "Runtime.ResponseRejected";

/// State of the cycle in progress
#[derive(Debug)]
pub enum CycleState {
    Idle,
    Fetching,
    Executing(Invocation),
    Reporting { request_id: RequestId, result: Value },
    ErrorReporting { request_id: RequestId, report: ErrorReport },
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No invocation was obtained; nothing was reported
    FetchFailed,
    /// The result was delivered to the response endpoint
    Succeeded(RequestId),
    /// The failure was delivered to the error endpoint
    Failed(RequestId),
    /// Posting the report failed and was dropped
    ReportDropped(RequestId),
}

/// The runtime loop: one invocation at a time, forever
pub struct Runtime<A, H> {
    api: A,
    adapter: Adapter<H>,
    log_output: Box<dyn Write + Send>,
}

impl<A: RuntimeApi, H: Handler> Runtime<A, H> {
    /// Create a runtime whose log output is the process's stdout
    pub fn new(api: A, handler: H) -> Self {
        Self {
            api,
            adapter: Adapter::new(handler),
            log_output: Box::new(io::stdout()),
        }
    }

    /// Replace the log stream that is flushed before every report
    pub fn with_log_output(mut self, output: impl Write + Send + 'static) -> Self {
        self.log_output = Box::new(output);
        self
    }

    #[cfg(test)]
    pub(crate) fn api(&self) -> &A {
        &self.api
    }

    /// Run cycles until the process is killed
    pub async fn run(mut self) -> Infallible {
        tracing::info!("Runtime loop started");
        loop {
            self.run_cycle().await;
        }
    }

    /// Run a single fetch -> execute -> report cycle
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let mut state = CycleState::Idle;
        loop {
            state = match state {
                CycleState::Idle => CycleState::Fetching,
                CycleState::Fetching => match self.fetch().await {
                    Some(next) => next,
                    None => return CycleOutcome::FetchFailed,
                },
                CycleState::Executing(invocation) => self.execute(invocation).await,
                CycleState::Reporting { request_id, result } => {
                    match self.report_success(request_id, result).await {
                        ControlFlow::Break(outcome) => return outcome,
                        ControlFlow::Continue(next) => next,
                    }
                }
                CycleState::ErrorReporting { request_id, report } => {
                    return self.report_failure(request_id, report).await;
                }
            };
        }
    }

    async fn fetch(&mut self) -> Option<CycleState> {
        match self.api.next_invocation().await {
            Ok(invocation) => {
                tracing::debug!(request_id = %invocation.request_id, "Received invocation");
                Some(CycleState::Executing(invocation))
            }
            Err(FetchError::InvalidInvocation { request_id, reason }) => {
                tracing::warn!(request_id = %request_id, reason = %reason, "Received unusable invocation");
                Some(CycleState::ErrorReporting {
                    request_id,
                    report: ErrorReport::new(INVALID_INVOCATION_KIND, reason, Vec::new()),
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch next invocation");
                None
            }
        }
    }

    async fn execute(&mut self, invocation: Invocation) -> CycleState {
        let Invocation {
            request_id,
            invoked_function_arn,
            trace_id,
            payload,
        } = invocation;

        trace::set_current_trace_id(&trace_id);
        let ctx = Context::new(request_id.clone(), invoked_function_arn, trace_id);

        match self.adapter.invoke(payload, ctx).await {
            Ok(result) => CycleState::Reporting { request_id, result },
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    kind = %e.kind(),
                    error = %e,
                    "Handler failed"
                );
                CycleState::ErrorReporting {
                    request_id,
                    report: e.to_report(),
                }
            }
        }
    }

    /// Post the result. If the control plane does not take it, the cycle
    /// continues into error reporting for the same request id.
    async fn report_success(
        &mut self,
        request_id: RequestId,
        result: Value,
    ) -> ControlFlow<CycleOutcome, CycleState> {
        self.flush_logs();
        match self.api.post_response(&request_id, &result).await {
            Ok(()) => {
                tracing::debug!(request_id = %request_id, "Reported invocation response");
                ControlFlow::Break(CycleOutcome::Succeeded(request_id))
            }
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "Failed to report invocation response");
                let report = ErrorReport::from_error(RESPONSE_REJECTED_KIND, &e);
                ControlFlow::Continue(CycleState::ErrorReporting { request_id, report })
            }
        }
    }

    async fn report_failure(&mut self, request_id: RequestId, report: ErrorReport) -> CycleOutcome {
        self.flush_logs();
        match self.api.post_error(&request_id, &report).await {
            Ok(()) => {
                tracing::debug!(request_id = %request_id, kind = %report.error_kind, "Reported invocation error");
                CycleOutcome::Failed(request_id)
            }
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "Failed to report invocation error");
                CycleOutcome::ReportDropped(request_id)
            }
        }
    }

    fn flush_logs(&mut self) {
        if let Err(e) = self.log_output.flush() {
            tracing::warn!(error = %e, "Failed to flush log output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::api::ReportError;
    use lambda_bootstrap_sdk::{handler_fn, BoxFuture, HandlerError};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Post {
        Response { request_id: String, body: Value, logs: String },
        Error { request_id: String, report: ErrorReport, logs: String },
    }

    /// Scripted control plane recording every report it receives
    #[derive(Default)]
    struct FakeApi {
        invocations: Mutex<VecDeque<Result<Invocation, FetchError>>>,
        posts: Mutex<Vec<Post>>,
        fetches: Mutex<usize>,
        reject_responses: bool,
        reject_errors: bool,
        log: BufferedLog,
    }

    impl FakeApi {
        fn with(invocations: Vec<Result<Invocation, FetchError>>) -> Self {
            Self {
                invocations: Mutex::new(invocations.into()),
                ..Default::default()
            }
        }

        fn posts(&self) -> Vec<Post> {
            self.posts.lock().unwrap().clone()
        }

        fn fetches(&self) -> usize {
            *self.fetches.lock().unwrap()
        }
    }

    impl RuntimeApi for FakeApi {
        fn next_invocation(&self) -> BoxFuture<'_, Result<Invocation, FetchError>> {
            *self.fetches.lock().unwrap() += 1;
            let next = self
                .invocations
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(FetchError::Status(503)));
            Box::pin(async move { next })
        }

        fn post_response<'a>(
            &'a self,
            request_id: &'a RequestId,
            result: &'a Value,
        ) -> BoxFuture<'a, Result<(), ReportError>> {
            self.posts.lock().unwrap().push(Post::Response {
                request_id: request_id.to_string(),
                body: result.clone(),
                logs: self.log.flushed(),
            });
            let outcome = if self.reject_responses {
                Err(ReportError::Rejected(413))
            } else {
                Ok(())
            };
            Box::pin(async move { outcome })
        }

        fn post_error<'a>(
            &'a self,
            request_id: &'a RequestId,
            report: &'a ErrorReport,
        ) -> BoxFuture<'a, Result<(), ReportError>> {
            self.posts.lock().unwrap().push(Post::Error {
                request_id: request_id.to_string(),
                report: report.clone(),
                logs: self.log.flushed(),
            });
            let outcome = if self.reject_errors {
                Err(ReportError::Rejected(500))
            } else {
                Ok(())
            };
            Box::pin(async move { outcome })
        }

        fn post_init_error<'a>(&'a self, _report: &'a ErrorReport) -> BoxFuture<'a, Result<(), ReportError>> {
            Box::pin(async { Ok(()) })
        }
    }

    /// Log stream that only becomes visible once flushed
    #[derive(Clone, Default)]
    struct BufferedLog {
        pending: Arc<Mutex<Vec<u8>>>,
        visible: Arc<Mutex<Vec<u8>>>,
    }

    impl BufferedLog {
        fn flushed(&self) -> String {
            String::from_utf8_lossy(&self.visible.lock().unwrap()).into_owned()
        }
    }

    impl Write for BufferedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.pending.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            let mut pending = self.pending.lock().unwrap();
            self.visible.lock().unwrap().append(&mut pending);
            Ok(())
        }
    }

    fn invocation(request_id: &str, payload: Value) -> Invocation {
        Invocation {
            request_id: RequestId::from(request_id),
            invoked_function_arn: "arn:aws:lambda:us-east-1:123456789012:function:hello".to_string(),
            trace_id: format!("Root=1-{}", request_id),
            payload,
        }
    }

    fn runtime(api: FakeApi) -> Runtime<FakeApi, impl Handler> {
        let log = api.log.clone();
        Runtime::new(api, crate::app::init().unwrap()).with_log_output(log)
    }

    #[tokio::test]
    async fn test_success_posts_one_response() {
        let mut runtime = runtime(FakeApi::with(vec![Ok(invocation("req-1", json!({})))]));

        let outcome = runtime.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Succeeded(RequestId::from("req-1")));
        let posts = runtime.api().posts();
        assert_eq!(posts.len(), 1);
        match &posts[0] {
            Post::Response { request_id, body, .. } => {
                assert_eq!(request_id, "req-1");
                assert_eq!(
                    body,
                    &json!({
                        "statusCode": 200,
                        "body": "Hello from ECR Lambda!!!!",
                        "event": {},
                        "context": {
                            "request_id": "req-1",
                            "invoked_function_arn": "arn:aws:lambda:us-east-1:123456789012:function:hello",
                            "trace_id": "Root=1-req-1",
                        },
                    })
                );
            }
            other => panic!("expected a response post, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_failure_posts_one_error() {
        let mut runtime = runtime(FakeApi::with(vec![Ok(invocation(
            "req-2",
            json!({"force_exception": "boom"}),
        ))]));

        let outcome = runtime.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Failed(RequestId::from("req-2")));
        let posts = runtime.api().posts();
        assert_eq!(posts.len(), 1);
        match &posts[0] {
            Post::Error { request_id, report, .. } => {
                assert_eq!(request_id, "req-2");
                assert_eq!(report.error_kind, "Exception");
                assert_eq!(report.error_message, "boom");
                assert!(!report.stack_trace.is_empty());
            }
            other => panic!("expected an error post, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_posts_nothing_and_fetches_again() {
        let mut runtime = runtime(FakeApi::with(vec![
            Err(FetchError::MissingRequestId),
            Err(FetchError::Status(500)),
            Ok(invocation("req-3", json!({}))),
        ]));

        assert_eq!(runtime.run_cycle().await, CycleOutcome::FetchFailed);
        assert_eq!(runtime.run_cycle().await, CycleOutcome::FetchFailed);
        assert!(runtime.api().posts().is_empty());

        assert_eq!(
            runtime.run_cycle().await,
            CycleOutcome::Succeeded(RequestId::from("req-3"))
        );
        assert_eq!(runtime.api().fetches(), 3);
    }

    #[tokio::test]
    async fn test_error_report_failure_is_swallowed() {
        let api = FakeApi {
            reject_errors: true,
            ..FakeApi::with(vec![
                Ok(invocation("req-4", json!({"force_exception": "boom"}))),
                Ok(invocation("req-5", json!({}))),
            ])
        };
        let mut runtime = runtime(api);

        assert_eq!(
            runtime.run_cycle().await,
            CycleOutcome::ReportDropped(RequestId::from("req-4"))
        );
        assert_eq!(
            runtime.run_cycle().await,
            CycleOutcome::Succeeded(RequestId::from("req-5"))
        );
        assert_eq!(runtime.api().fetches(), 2);
    }

    #[tokio::test]
    async fn test_rejected_response_is_followed_by_one_error_report() {
        let api = FakeApi {
            reject_responses: true,
            ..FakeApi::with(vec![
                Ok(invocation("req-6", json!({}))),
                Ok(invocation("req-6b", json!({"force_exception": "boom"}))),
            ])
        };
        let mut runtime = runtime(api);

        assert_eq!(
            runtime.run_cycle().await,
            CycleOutcome::Failed(RequestId::from("req-6"))
        );
        let posts = runtime.api().posts();
        assert_eq!(posts.len(), 2);
        assert!(matches!(&posts[0], Post::Response { request_id, .. } if request_id == "req-6"));
        match &posts[1] {
            Post::Error { request_id, report, .. } => {
                assert_eq!(request_id, "req-6");
                assert_eq!(report.error_kind, RESPONSE_REJECTED_KIND);
                assert!(report.error_message.contains("413"));
            }
            other => panic!("expected an error post, got {:?}", other),
        }

        // The loop carries on with the next invocation
        assert_eq!(
            runtime.run_cycle().await,
            CycleOutcome::Failed(RequestId::from("req-6b"))
        );
        assert_eq!(runtime.api().posts().len(), 3);
    }

    #[tokio::test]
    async fn test_rejected_response_and_error_report_are_dropped() {
        let api = FakeApi {
            reject_responses: true,
            reject_errors: true,
            ..FakeApi::with(vec![Ok(invocation("req-6c", json!({})))])
        };
        let mut runtime = runtime(api);

        assert_eq!(
            runtime.run_cycle().await,
            CycleOutcome::ReportDropped(RequestId::from("req-6c"))
        );
        assert_eq!(runtime.api().posts().len(), 2);
        assert_eq!(runtime.run_cycle().await, CycleOutcome::FetchFailed);
    }

    #[tokio::test]
    async fn test_invalid_invocation_is_reported() {
        let mut runtime = runtime(FakeApi::with(vec![Err(FetchError::InvalidInvocation {
            request_id: RequestId::from("req-7"),
            reason: "body is not valid JSON".to_string(),
        })]));

        assert_eq!(
            runtime.run_cycle().await,
            CycleOutcome::Failed(RequestId::from("req-7"))
        );
        match &runtime.api().posts()[0] {
            Post::Error { report, .. } => {
                assert_eq!(report.error_kind, INVALID_INVOCATION_KIND);
                assert_eq!(report.error_message, "body is not valid JSON");
            }
            other => panic!("expected an error post, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_logs_flushed_before_each_report() {
        let api = FakeApi::with(vec![
            Ok(invocation("req-8", json!({"ok": true}))),
            Ok(invocation("req-9", json!({"fail": true}))),
        ]);
        let handler_log = api.log.clone();
        let handler = handler_fn(move |event: Value, ctx: Context| {
            let mut log = handler_log.clone();
            async move {
                writeln!(log, "handling {}", ctx.request_id()).map_err(anyhow::Error::from)?;
                if event.get("fail").is_some() {
                    return Err(HandlerError::exception("requested failure"));
                }
                Ok::<Value, HandlerError>(event)
            }
        });
        let log = api.log.clone();
        let mut runtime = Runtime::new(api, handler).with_log_output(log);

        runtime.run_cycle().await;
        runtime.run_cycle().await;

        let posts = runtime.api().posts();
        match &posts[0] {
            Post::Response { logs, .. } => assert!(logs.contains("handling req-8")),
            other => panic!("expected a response post, got {:?}", other),
        }
        match &posts[1] {
            Post::Error { logs, .. } => assert!(logs.contains("handling req-9")),
            other => panic!("expected an error post, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_the_loop() {
        let handler = handler_fn(|event: Value, _: Context| async move {
            if event.get("panic").is_some() {
                panic!("handler panicked on purpose");
            }
            Ok::<_, HandlerError>(event)
        });
        let api = FakeApi::with(vec![
            Ok(invocation("req-10", json!({"panic": true}))),
            Ok(invocation("req-11", json!({}))),
        ]);
        let log = api.log.clone();
        let mut runtime = Runtime::new(api, handler).with_log_output(log);

        assert_eq!(
            runtime.run_cycle().await,
            CycleOutcome::Failed(RequestId::from("req-10"))
        );
        assert_eq!(
            runtime.run_cycle().await,
            CycleOutcome::Succeeded(RequestId::from("req-11"))
        );
        match &runtime.api().posts()[0] {
            Post::Error { report, .. } => {
                assert_eq!(report.error_kind, "Panic");
                assert_eq!(report.error_message, "handler panicked on purpose");
            }
            other => panic!("expected an error post, got {:?}", other),
        }
    }
}
