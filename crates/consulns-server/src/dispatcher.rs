//! Request dispatcher.
//!
//! Turns one request frame into one response. Handlers run on their own
//! task, raced against the request deadline; anything that goes wrong on
//! the way is answered with `{"result": false}` and logged here.

use crate::methods::HandlerError;
use crate::stats::ServerStats;
use async_trait::async_trait;
use consulns_metrics::{metrics, RequestTimer};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Serialized failure response, used when even encoding fails.
const FAILURE_LINE: &str = "{\"result\":false}\n";

/// Failures at the dispatcher boundary. Never sent to the client.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid request frame: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No handler registered for method {0:?}")]
    UnknownMethod(String),

    #[error("Method {method} exceeded the {timeout:?} deadline")]
    Timeout { method: String, timeout: Duration },

    #[error("Method {method} aborted: {reason}")]
    Aborted { method: String, reason: String },
}

impl DispatchError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            DispatchError::Parse(_) => "parse",
            DispatchError::UnknownMethod(_) => "unknown_method",
            DispatchError::Timeout { .. } => "timeout",
            DispatchError::Aborted { .. } => "aborted",
        }
    }
}

/// A decoded request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Method name.
    pub method: String,

    /// Method parameters, `null` when absent.
    #[serde(default)]
    pub parameters: Value,
}

impl Request {
    /// Creates a request.
    pub fn new(method: impl Into<String>, parameters: Value) -> Self {
        Self {
            method: method.into(),
            parameters,
        }
    }

    /// Decodes the parameters into a typed structure.
    pub fn parameters<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.parameters)
    }
}

/// A response under construction. Starts out as `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    result: Value,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    /// Creates a generic success response.
    pub fn new() -> Self {
        Self {
            result: Value::Bool(true),
        }
    }

    /// Creates a failure response.
    pub fn failure() -> Self {
        Self {
            result: Value::Bool(false),
        }
    }

    /// Marks the response as failed.
    pub fn fail(&mut self) {
        self.result = Value::Bool(false);
    }

    /// Sets the response payload.
    ///
    /// A payload that cannot be encoded turns the response into a failure.
    pub fn set_value<T: Serialize>(&mut self, value: T) {
        match serde_json::to_value(value) {
            Ok(value) => self.result = value,
            Err(e) => {
                warn!(error = %e, "could not encode response payload");
                self.fail();
            }
        }
    }

    /// Returns the payload.
    pub fn result(&self) -> &Value {
        &self.result
    }

    /// Returns true if the response reports failure.
    pub fn is_failure(&self) -> bool {
        self.result == Value::Bool(false)
    }

    /// Serializes the response as one newline-terminated line.
    pub fn to_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(mut line) => {
                line.push('\n');
                line
            }
            Err(e) => {
                warn!(error = %e, "could not serialize response");
                FAILURE_LINE.to_string()
            }
        }
    }
}

/// A remote backend method.
///
/// The response starts out as `true`; a handler sets a payload, marks the
/// response failed, or returns an error (which also fails the response).
#[async_trait]
pub trait MethodHandler: Send + Sync + 'static {
    /// Handles one request.
    async fn handle(&self, request: &Request, response: &mut Response) -> Result<(), HandlerError>;
}

/// Routes request frames to registered handlers.
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    timeout: Duration,
    stats: Arc<ServerStats>,
}

impl Dispatcher {
    /// Creates a dispatcher with the given per-request deadline.
    pub fn new(timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            timeout,
            stats: Arc::new(ServerStats::new()),
        }
    }

    /// Registers a handler. A later registration for the same method wins.
    pub fn register(&mut self, method: impl Into<String>, handler: impl MethodHandler) {
        let method = method.into();
        if self.handlers.contains_key(&method) {
            warn!(method = %method, "re-registered handler");
        }
        debug!(method = %method, "registered handler");
        self.handlers.insert(method, Arc::new(handler));
    }

    /// Returns true if a handler is registered for `method`.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Returns the registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    /// Returns the per-request deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the server statistics.
    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Answers one request frame. Never fails: errors become `false`.
    pub async fn dispatch(&self, frame: &str, received_at: Instant) -> Response {
        match self.try_dispatch(frame, received_at).await {
            Ok((method, response)) => {
                if response.is_failure() {
                    self.stats.inc_failure();
                    metrics().record_failure(&method, "handler");
                }
                response
            }
            Err(e) => {
                match &e {
                    DispatchError::Parse(_) => {
                        self.stats.inc_parse_error();
                        warn!(error = %e, raw = %frame, "could not parse command");
                    }
                    DispatchError::Timeout { .. } => {
                        self.stats.inc_timeout();
                        warn!(error = %e, "request timed out");
                    }
                    _ => warn!(error = %e, "request failed"),
                }
                self.stats.inc_failure();
                metrics().record_failure(failed_method(&e), e.reason());
                Response::failure()
            }
        }
    }

    /// Answers one request frame, reporting dispatcher-level failures.
    ///
    /// Returns the method name alongside the handler's response.
    pub async fn try_dispatch(
        &self,
        frame: &str,
        received_at: Instant,
    ) -> Result<(String, Response), DispatchError> {
        let request: Request = serde_json::from_str(frame)?;
        let method = request.method.clone();

        let handler = self
            .handlers
            .get(&method)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownMethod(method.clone()))?;

        trace!(method = %method, "dispatching");
        self.stats.inc_request();
        metrics().record_request(&method);
        let timer = RequestTimer::start(method.as_str());

        let task = tokio::spawn(async move {
            let mut response = Response::new();
            if let Err(e) = handler.handle(&request, &mut response).await {
                warn!(method = %request.method, error = %e, "handler failed");
                response.fail();
            }
            response
        });
        let abort = task.abort_handle();

        let deadline = tokio::time::Instant::from_std(received_at + self.timeout);
        let outcome = tokio::time::timeout_at(deadline, task).await;
        timer.finish();

        match outcome {
            Ok(Ok(response)) => Ok((method, response)),
            Ok(Err(e)) => Err(DispatchError::Aborted {
                method,
                reason: e.to_string(),
            }),
            Err(_) => {
                abort.abort();
                Err(DispatchError::Timeout {
                    method,
                    timeout: self.timeout,
                })
            }
        }
    }
}

/// Method label for a failure. Only registered names are used so that a
/// client cannot grow the label set.
fn failed_method(e: &DispatchError) -> &str {
    match e {
        DispatchError::Parse(_) => "invalid",
        DispatchError::UnknownMethod(_) => "unknown",
        DispatchError::Timeout { method, .. }
        | DispatchError::Aborted { method, .. } => method,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    #[async_trait]
    impl MethodHandler for Echo {
        async fn handle(&self, request: &Request, response: &mut Response) -> Result<(), HandlerError> {
            response.set_value(request.parameters.clone());
            Ok(())
        }
    }

    struct Fixed(Value);

    #[async_trait]
    impl MethodHandler for Fixed {
        async fn handle(&self, _request: &Request, response: &mut Response) -> Result<(), HandlerError> {
            response.set_value(self.0.clone());
            Ok(())
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl MethodHandler for Counting {
        async fn handle(&self, _request: &Request, _response: &mut Response) -> Result<(), HandlerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Slow(Duration);

    #[async_trait]
    impl MethodHandler for Slow {
        async fn handle(&self, _request: &Request, _response: &mut Response) -> Result<(), HandlerError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl MethodHandler for Panics {
        async fn handle(&self, _request: &Request, _response: &mut Response) -> Result<(), HandlerError> {
            panic!("handler bug");
        }
    }

    struct BadParams;

    #[async_trait]
    impl MethodHandler for BadParams {
        async fn handle(&self, request: &Request, _response: &mut Response) -> Result<(), HandlerError> {
            let _: Vec<u32> = request.parameters()?;
            Ok(())
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Duration::from_secs(2))
    }

    #[test]
    fn test_response_lines() {
        assert_eq!(Response::new().to_line(), "{\"result\":true}\n");
        assert_eq!(Response::failure().to_line(), FAILURE_LINE);

        let mut response = Response::new();
        response.set_value(vec!["a", "b"]);
        assert_eq!(response.to_line(), "{\"result\":[\"a\",\"b\"]}\n");
        assert!(!response.is_failure());
        response.fail();
        assert!(response.is_failure());
    }

    #[test]
    fn test_request_parameters_default_to_null() {
        let request: Request = serde_json::from_str(r#"{"method":"initialize"}"#).unwrap();
        assert_eq!(request.method, "initialize");
        assert_eq!(request.parameters, Value::Null);
    }

    #[tokio::test]
    async fn test_dispatch_to_handler() {
        let mut d = dispatcher();
        d.register("echo", Echo);

        let response = d
            .dispatch(r#"{"method":"echo","parameters":{"a":1}}"#, Instant::now())
            .await;
        assert_eq!(response.result(), &json!({"a": 1}));
        assert_eq!(d.stats().total_requests(), 1);
    }

    #[tokio::test]
    async fn test_default_response_is_true() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut d = dispatcher();
        d.register("initialize", Counting(calls.clone()));

        let response = d.dispatch(r#"{"method":"initialize"}"#, Instant::now()).await;
        assert_eq!(response.result(), &Value::Bool(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_json_calls_no_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut d = dispatcher();
        d.register("initialize", Counting(calls.clone()));

        let response = d.dispatch("{not json", Instant::now()).await;
        assert!(response.is_failure());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(d.stats().parse_errors.load(Ordering::Relaxed), 1);

        let err = d.try_dispatch("[]", Instant::now()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Parse(_)));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let d = dispatcher();
        let response = d.dispatch(r#"{"method":"nope","parameters":{}}"#, Instant::now()).await;
        assert!(response.is_failure());

        let err = d
            .try_dispatch(r#"{"method":"nope"}"#, Instant::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownMethod(m) if m == "nope"));
    }

    #[tokio::test]
    async fn test_failure_labels_are_bounded() {
        let mut d = dispatcher();
        d.register("panics", Panics);

        for method in ["nope", "createSlaveDomain", "x-1234"] {
            let frame = format!(r#"{{"method":"{method}"}}"#);
            let err = d.try_dispatch(&frame, Instant::now()).await.unwrap_err();
            assert_eq!(failed_method(&err), "unknown");
        }

        let err = d.try_dispatch("{", Instant::now()).await.unwrap_err();
        assert_eq!(failed_method(&err), "invalid");

        let err = d
            .try_dispatch(r#"{"method":"panics"}"#, Instant::now())
            .await
            .unwrap_err();
        assert_eq!(failed_method(&err), "panics");
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let mut d = dispatcher();
        d.register("m", Fixed(json!(1)));
        d.register("m", Fixed(json!(2)));
        assert_eq!(d.methods(), vec!["m"]);

        let response = d.dispatch(r#"{"method":"m"}"#, Instant::now()).await;
        assert_eq!(response.result(), &json!(2));
    }

    #[tokio::test]
    async fn test_handler_error_fails_response() {
        let mut d = dispatcher();
        d.register("bad", BadParams);

        let response = d
            .dispatch(r#"{"method":"bad","parameters":{"x":1}}"#, Instant::now())
            .await;
        assert!(response.is_failure());
        assert_eq!(d.stats().failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut d = Dispatcher::new(Duration::from_millis(50));
        d.register("slow", Slow(Duration::from_secs(5)));
        d.register("fast", Slow(Duration::from_millis(1)));

        let start = Instant::now();
        let response = d.dispatch(r#"{"method":"slow"}"#, Instant::now()).await;
        assert!(response.is_failure());
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(d.stats().timeouts.load(Ordering::Relaxed), 1);

        let response = d.dispatch(r#"{"method":"fast"}"#, Instant::now()).await;
        assert!(!response.is_failure());
    }

    #[tokio::test]
    async fn test_deadline_counts_from_receipt() {
        let mut d = Dispatcher::new(Duration::from_millis(100));
        d.register("fast", Slow(Duration::from_millis(20)));

        let received_at = Instant::now() - Duration::from_millis(200);
        let err = d
            .try_dispatch(r#"{"method":"fast"}"#, received_at)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_panicking_handler() {
        let mut d = dispatcher();
        d.register("panics", Panics);

        let err = d
            .try_dispatch(r#"{"method":"panics"}"#, Instant::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Aborted { .. }));

        let response = d.dispatch(r#"{"method":"panics"}"#, Instant::now()).await;
        assert!(response.is_failure());
    }
}
