use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use tokio_util::sync::CancellationToken;

use reqcore::{
    Body, ClientConfig, ClientError, Clock, Content, Credentials, ErrorResponseHandler,
    ExecutionContext, Field, FixedDelayBackoff, HandlerError, HttpRequest, HttpResponse,
    Interceptor, OriginalRequest, Request, ResponseContent, ResponseHandler, RetryCondition,
    RetryPolicy, SdkError, ServiceClient, ServiceError, Signer, SignerResolver, SigningClock,
    Transport, DEFAULT_USER_AGENT,
};

#[derive(Clone, Debug)]
struct SeenRequest {
    method: Method,
    uri: String,
    headers: HeaderMap,
}

struct Reply {
    status: u16,
    headers: Vec<(&'static str, &'static str)>,
    body: &'static str,
    closed: Option<Arc<AtomicBool>>,
    io_error: Option<io::ErrorKind>,
}

impl Reply {
    fn status(status: u16, body: &'static str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
            closed: None,
            io_error: None,
        }
    }

    fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }

    fn with_close_flag(mut self, closed: Arc<AtomicBool>) -> Self {
        self.closed = Some(closed);
        self
    }

    fn io_error(kind: io::ErrorKind) -> Self {
        Self {
            status: 0,
            headers: Vec::new(),
            body: "",
            closed: None,
            io_error: Some(kind),
        }
    }
}

struct TrackedContent {
    bytes: Option<Bytes>,
    closed: Option<Arc<AtomicBool>>,
}

impl ResponseContent for TrackedContent {
    fn read_to_bytes(&mut self) -> io::Result<Bytes> {
        Ok(self.bytes.take().unwrap_or_default())
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(closed) = &self.closed {
            closed.store(true, Ordering::SeqCst);
        }
        self.bytes = None;
        Ok(())
    }
}

struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().expect("seen requests lock").clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &HttpRequest) -> io::Result<HttpResponse> {
        self.seen.lock().expect("seen requests lock").push(SeenRequest {
            method: request.method().clone(),
            uri: request.uri().to_string(),
            headers: request.headers().clone(),
        });
        let reply = self
            .replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .ok_or_else(|| io::Error::other("transport script exhausted"))?;
        if let Some(kind) = reply.io_error {
            return Err(io::Error::new(kind, "scripted transport failure"));
        }
        let mut headers = HeaderMap::new();
        for (name, value) in reply.headers {
            headers.insert(
                name.parse::<HeaderName>().expect("scripted header name"),
                HeaderValue::from_static(value),
            );
        }
        let status = StatusCode::from_u16(reply.status).expect("scripted status");
        Ok(HttpResponse::new(status, headers).content(Box::new(TrackedContent {
            bytes: Some(Bytes::from_static(reply.body.as_bytes())),
            closed: reply.closed,
        })))
    }
}

struct TextHandler;

impl ResponseHandler<String> for TextHandler {
    fn handle(&self, response: &mut HttpResponse) -> Result<String, HandlerError> {
        let bytes = match response.content_mut() {
            Some(content) => content.read_to_bytes()?,
            None => Bytes::new(),
        };
        String::from_utf8(bytes.to_vec()).map_err(HandlerError::other)
    }
}

struct LeaveOpenHandler;

impl ResponseHandler<()> for LeaveOpenHandler {
    fn handle(&self, _response: &mut HttpResponse) -> Result<(), HandlerError> {
        Ok(())
    }

    fn needs_connection_left_open(&self) -> bool {
        true
    }
}

struct FailingHandler;

impl ResponseHandler<String> for FailingHandler {
    fn handle(&self, _response: &mut HttpResponse) -> Result<String, HandlerError> {
        Err(HandlerError::other("malformed payload"))
    }
}

struct CodeErrorHandler {
    code: &'static str,
}

impl ErrorResponseHandler for CodeErrorHandler {
    fn handle(&self, response: &mut HttpResponse) -> Result<ServiceError, HandlerError> {
        let body = match response.content_mut() {
            Some(content) => content.read_to_bytes()?,
            None => Bytes::new(),
        };
        Ok(ServiceError::new(String::from_utf8_lossy(&body).into_owned())
            .error_code(self.code))
    }
}

struct FailingErrorHandler;

impl ErrorResponseHandler for FailingErrorHandler {
    fn handle(&self, _response: &mut HttpResponse) -> Result<ServiceError, HandlerError> {
        Err(HandlerError::other("no parseable error body"))
    }
}

struct LeaveOpenErrorHandler;

impl ErrorResponseHandler for LeaveOpenErrorHandler {
    fn handle(&self, _response: &mut HttpResponse) -> Result<ServiceError, HandlerError> {
        Ok(ServiceError::new("transient").error_code("InternalFailure"))
    }

    fn needs_connection_left_open(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct TerminalResponseProbe {
    saw_response: AtomicBool,
    status: AtomicU32,
}

impl Interceptor for TerminalResponseProbe {
    fn after_error(&self, _request: &Request, response: Option<&HttpResponse>, _error: &SdkError) {
        if let Some(response) = response {
            self.saw_response.store(true, Ordering::SeqCst);
            self.status
                .store(u32::from(response.status().as_u16()), Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
struct CountingInterceptor {
    before: AtomicU32,
    responses: AtomicU32,
    errors: AtomicU32,
}

impl Interceptor for CountingInterceptor {
    fn before_request(&self, _request: &mut Request) {
        self.before.fetch_add(1, Ordering::SeqCst);
    }

    fn after_response(&self, _request: &Request, _response: &HttpResponse) {
        self.responses.fetch_add(1, Ordering::SeqCst);
    }

    fn after_error(&self, _request: &Request, _response: Option<&HttpResponse>, _error: &SdkError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

struct AlwaysRetry;

impl RetryCondition for AlwaysRetry {
    fn should_retry(&self, _: &OriginalRequest, _: &SdkError, _: u32) -> bool {
        true
    }
}

struct HeaderSigner;

impl Signer for HeaderSigner {
    fn sign(&self, request: &mut Request, credentials: &Credentials, _clock: &SigningClock) {
        let signature = format!("sig-{}", credentials.access_key_id());
        request.headers_mut().append(
            "x-signature",
            HeaderValue::from_str(&signature).expect("signature header"),
        );
        request.add_parameter("X-Signature", signature);
    }
}

struct FixedResolver(Arc<dyn Signer>);

impl SignerResolver for FixedResolver {
    fn signer_for(&self, _endpoint: &Uri) -> Option<Arc<dyn Signer>> {
        Some(Arc::clone(&self.0))
    }
}

struct FixedClock(SystemTime);

impl Clock for FixedClock {
    fn now_system(&self) -> SystemTime {
        self.0
    }
}

struct NonRewindableContent;

impl Content for NonRewindableContent {
    fn reset(&mut self) -> io::Result<()> {
        Err(io::Error::other("one-shot stream"))
    }

    fn read_to_bytes(&mut self) -> io::Result<Bytes> {
        Ok(Bytes::from_static(b"payload"))
    }
}

fn fast_retry_policy(max_error_retry: u32) -> RetryPolicy {
    RetryPolicy::default_policy()
        .max_error_retry(max_error_retry)
        .condition(Arc::new(AlwaysRetry))
        .backoff(Arc::new(FixedDelayBackoff(Duration::ZERO)))
}

fn client_with(transport: Arc<ScriptedTransport>, config: ClientConfig) -> ServiceClient {
    ServiceClient::builder()
        .transport(transport)
        .config(config)
        .build()
}

fn sample_request() -> Request {
    Request::new(
        Method::GET,
        "https://svc.example.com".parse().expect("endpoint"),
        "svc",
    )
    .resource_path("/v1/op")
}

#[tokio::test]
async fn success_on_first_attempt_notifies_after_response_once() {
    let transport = ScriptedTransport::new(vec![Reply::status(200, "hi")]);
    let client = client_with(Arc::clone(&transport), ClientConfig::new());
    let interceptor = Arc::new(CountingInterceptor::default());

    let mut request = sample_request();
    let mut context =
        ExecutionContext::new().add_interceptor(Arc::clone(&interceptor) as Arc<dyn Interceptor>);
    let response = client
        .execute(&mut request, &TextHandler, &FailingErrorHandler, Some(&mut context))
        .await
        .expect("first attempt should succeed");

    assert_eq!(response.payload(), "hi");
    let seen = transport.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, Method::GET);
    assert_eq!(interceptor.before.load(Ordering::SeqCst), 1);
    assert_eq!(interceptor.responses.load(Ordering::SeqCst), 1);
    assert_eq!(interceptor.errors.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn identical_executions_produce_identical_traces() {
    let transport = ScriptedTransport::new(vec![
        Reply::status(200, "same"),
        Reply::status(200, "same"),
    ]);
    let client = client_with(Arc::clone(&transport), ClientConfig::new());
    let interceptor = Arc::new(CountingInterceptor::default());

    for _ in 0..2 {
        let mut request = sample_request();
        let mut context = ExecutionContext::new()
            .add_interceptor(Arc::clone(&interceptor) as Arc<dyn Interceptor>);
        let response = client
            .execute(&mut request, &TextHandler, &FailingErrorHandler, Some(&mut context))
            .await
            .expect("execution should succeed");
        assert_eq!(response.payload(), "same");
    }

    let seen = transport.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].uri, seen[1].uri);
    assert_eq!(seen[0].headers, seen[1].headers);
    assert_eq!(interceptor.before.load(Ordering::SeqCst), 2);
    assert_eq!(interceptor.responses.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transient_500s_are_retried_until_success() {
    let transport = ScriptedTransport::new(vec![
        Reply::status(500, "err"),
        Reply::status(500, "err"),
        Reply::status(200, "ok"),
    ]);
    let config = ClientConfig::new().retry_policy(fast_retry_policy(3));
    let client = client_with(Arc::clone(&transport), config);

    let mut request = sample_request();
    let mut context = ExecutionContext::new();
    let response = client
        .execute(
            &mut request,
            &TextHandler,
            &CodeErrorHandler { code: "InternalFailure" },
            Some(&mut context),
        )
        .await
        .expect("third attempt should succeed");

    assert_eq!(response.payload(), "ok");
    assert_eq!(transport.seen().len(), 3);
    let snapshot = context.metrics_value().snapshot();
    assert_eq!(snapshot.counters.get(&Field::RequestCount), Some(&3));
    assert!(
        snapshot.timings.contains_key(&Field::RetryPauseTime),
        "backoff pauses should be measured"
    );
}

#[tokio::test]
async fn retry_ceiling_raises_last_service_error() {
    let transport = ScriptedTransport::new(vec![
        Reply::status(500, "err"),
        Reply::status(500, "err"),
        Reply::status(500, "err"),
        Reply::status(500, "err"),
    ]);
    let config = ClientConfig::new().retry_policy(fast_retry_policy(2));
    let client = client_with(Arc::clone(&transport), config);
    let interceptor = Arc::new(CountingInterceptor::default());

    let mut request = sample_request();
    let mut context =
        ExecutionContext::new().add_interceptor(Arc::clone(&interceptor) as Arc<dyn Interceptor>);
    let error = client
        .execute(
            &mut request,
            &TextHandler,
            &CodeErrorHandler { code: "InternalFailure" },
            Some(&mut context),
        )
        .await
        .expect_err("retries should exhaust");

    let service_error = error.as_service().expect("service error expected");
    assert_eq!(service_error.status(), 500);
    assert_eq!(service_error.service(), "svc");
    assert_eq!(transport.seen().len(), 3);
    assert_eq!(interceptor.errors.load(Ordering::SeqCst), 1);
    assert_eq!(interceptor.responses.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_rewindable_body_limits_request_to_one_attempt() {
    let transport = ScriptedTransport::new(vec![
        Reply::io_error(io::ErrorKind::ConnectionReset),
        Reply::io_error(io::ErrorKind::ConnectionReset),
        Reply::status(200, "ok"),
    ]);
    let config = ClientConfig::new().retry_policy(fast_retry_policy(5));
    let client = client_with(Arc::clone(&transport), config);

    let mut request = sample_request().body(Body::new(Box::new(NonRewindableContent)));
    let mut context = ExecutionContext::new();
    let error = client
        .execute(
            &mut request,
            &TextHandler,
            &CodeErrorHandler { code: "InternalFailure" },
            Some(&mut context),
        )
        .await
        .expect_err("non-rewindable body must not be retried");

    match error {
        SdkError::Client(ClientError::Transport { .. }) => {}
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.seen().len(), 1);
}

#[tokio::test]
async fn io_errors_are_retried_when_body_is_rewindable() {
    let transport = ScriptedTransport::new(vec![
        Reply::io_error(io::ErrorKind::ConnectionReset),
        Reply::io_error(io::ErrorKind::TimedOut),
        Reply::status(200, "ok"),
    ]);
    let config = ClientConfig::new().retry_policy(fast_retry_policy(5));
    let client = client_with(Arc::clone(&transport), config);

    let mut request = sample_request().body(Body::from_bytes("payload"));
    let mut context = ExecutionContext::new();
    let response = client
        .execute(
            &mut request,
            &TextHandler,
            &CodeErrorHandler { code: "InternalFailure" },
            Some(&mut context),
        )
        .await
        .expect("third attempt should succeed");

    assert_eq!(response.payload(), "ok");
    assert_eq!(transport.seen().len(), 3);
}

#[tokio::test]
async fn temporary_redirect_switches_transport_uri_only() {
    let transport = ScriptedTransport::new(vec![
        Reply::status(307, "").with_header("location", "/b"),
        Reply::status(200, "moved"),
    ]);
    let client = client_with(Arc::clone(&transport), ClientConfig::new());

    let mut request = sample_request();
    let endpoint_before = request.endpoint().clone();
    let mut context = ExecutionContext::new();
    let response = client
        .execute(
            &mut request,
            &TextHandler,
            &CodeErrorHandler { code: "InternalFailure" },
            Some(&mut context),
        )
        .await
        .expect("redirected attempt should succeed");

    assert_eq!(response.payload(), "moved");
    let seen = transport.seen();
    assert_eq!(seen.len(), 2);
    assert!(seen[1].uri.ends_with("/b"), "second uri: {}", seen[1].uri);
    assert_eq!(request.endpoint(), &endpoint_before);
}

#[tokio::test]
async fn redirected_uri_persists_across_later_retries() {
    let transport = ScriptedTransport::new(vec![
        Reply::status(307, "").with_header("location", "/b"),
        Reply::status(500, "err"),
        Reply::status(200, "ok"),
    ]);
    let config = ClientConfig::new().retry_policy(fast_retry_policy(3));
    let client = client_with(Arc::clone(&transport), config);

    let mut request = sample_request();
    let mut context = ExecutionContext::new();
    let response = client
        .execute(
            &mut request,
            &TextHandler,
            &CodeErrorHandler { code: "InternalFailure" },
            Some(&mut context),
        )
        .await
        .expect("final attempt should succeed");

    assert_eq!(response.payload(), "ok");
    let seen = transport.seen();
    assert_eq!(seen.len(), 3);
    assert!(seen[1].uri.ends_with("/b"));
    assert!(seen[2].uri.ends_with("/b"));
}

#[tokio::test]
async fn clock_skew_error_updates_offset_and_retries() {
    let device_now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let server_time = device_now + Duration::from_secs(3600);
    let date_header: &'static str =
        Box::leak(httpdate::fmt_http_date(server_time).into_boxed_str());

    let transport = ScriptedTransport::new(vec![
        Reply::status(403, "Signature expired").with_header("date", date_header),
        Reply::status(200, "ok"),
    ]);
    let config = ClientConfig::new().retry_policy(
        RetryPolicy::default_policy().backoff(Arc::new(FixedDelayBackoff(Duration::ZERO))),
    );
    let client = ServiceClient::builder()
        .transport(Arc::clone(&transport) as Arc<dyn Transport>)
        .config(config)
        .clock(Arc::new(FixedClock(device_now)))
        .build();

    let mut request = sample_request();
    let mut context = ExecutionContext::new();
    let response = client
        .execute(
            &mut request,
            &TextHandler,
            &CodeErrorHandler { code: "RequestTimeTooSkewed" },
            Some(&mut context),
        )
        .await
        .expect("retry after skew correction should succeed");

    assert_eq!(response.payload(), "ok");
    assert_eq!(transport.seen().len(), 2);
    assert_eq!(client.clock_skew().offset(), -3600);
}

#[tokio::test]
async fn bodiless_503_falls_back_to_synthetic_service_error() {
    let transport = ScriptedTransport::new(vec![Reply::status(503, "")]);
    let config = ClientConfig::new().max_error_retry(0);
    let client = client_with(Arc::clone(&transport), config);

    let mut request = sample_request();
    let mut context = ExecutionContext::new();
    let error = client
        .execute(&mut request, &TextHandler, &FailingErrorHandler, Some(&mut context))
        .await
        .expect_err("503 with max retries 0 should raise");

    let service_error = error.as_service().expect("service error expected");
    assert_eq!(service_error.status(), 503);
    assert_eq!(service_error.code(), "Service unavailable");
    assert_eq!(service_error.kind(), reqcore::ErrorType::Service);
    assert_eq!(service_error.service(), "svc");
}

#[tokio::test]
async fn bodiless_413_falls_back_to_synthetic_client_typed_error() {
    let transport = ScriptedTransport::new(vec![Reply::status(413, "")]);
    let config = ClientConfig::new().max_error_retry(0);
    let client = client_with(Arc::clone(&transport), config);

    let mut request = sample_request();
    let mut context = ExecutionContext::new();
    let error = client
        .execute(&mut request, &TextHandler, &FailingErrorHandler, Some(&mut context))
        .await
        .expect_err("413 should raise");

    let service_error = error.as_service().expect("service error expected");
    assert_eq!(service_error.status(), 413);
    assert_eq!(service_error.code(), "Request entity too large");
    assert_eq!(service_error.kind(), reqcore::ErrorType::Client);
}

#[tokio::test]
async fn leave_open_handler_keeps_response_content_unclosed() {
    let closed = Arc::new(AtomicBool::new(false));
    let transport = ScriptedTransport::new(vec![
        Reply::status(200, "stream").with_close_flag(Arc::clone(&closed)),
    ]);
    let client = client_with(Arc::clone(&transport), ClientConfig::new());

    let mut request = sample_request();
    let mut context = ExecutionContext::new();
    client
        .execute(&mut request, &LeaveOpenHandler, &FailingErrorHandler, Some(&mut context))
        .await
        .expect("success expected");

    assert!(!closed.load(Ordering::SeqCst), "content must stay open");
}

#[tokio::test]
async fn default_handler_lets_core_close_response_content() {
    let closed = Arc::new(AtomicBool::new(false));
    let transport = ScriptedTransport::new(vec![
        Reply::status(200, "body").with_close_flag(Arc::clone(&closed)),
    ]);
    let client = client_with(Arc::clone(&transport), ClientConfig::new());

    let mut request = sample_request();
    let mut context = ExecutionContext::new();
    client
        .execute(&mut request, &TextHandler, &FailingErrorHandler, Some(&mut context))
        .await
        .expect("success expected");

    assert!(closed.load(Ordering::SeqCst), "content must be closed");
}

#[tokio::test]
async fn signer_observes_pristine_request_on_every_attempt() {
    let transport = ScriptedTransport::new(vec![
        Reply::status(500, "err"),
        Reply::status(200, "ok"),
    ]);
    let config = ClientConfig::new().retry_policy(fast_retry_policy(3));
    let client = client_with(Arc::clone(&transport), config);

    let mut request = sample_request();
    let mut context = ExecutionContext::new()
        .credentials(Credentials::new("AKID", "secret"))
        .signer_resolver(Arc::new(FixedResolver(Arc::new(HeaderSigner))));
    client
        .execute(
            &mut request,
            &TextHandler,
            &CodeErrorHandler { code: "InternalFailure" },
            Some(&mut context),
        )
        .await
        .expect("second attempt should succeed");

    let seen = transport.seen();
    assert_eq!(seen.len(), 2);
    for (attempt, seen_request) in seen.iter().enumerate() {
        let signatures = seen_request
            .headers
            .get_all("x-signature")
            .iter()
            .count();
        assert_eq!(signatures, 1, "attempt {attempt} leaked signer headers");
        let parameter_occurrences = seen_request.uri.matches("X-Signature=").count();
        assert_eq!(
            parameter_occurrences, 1,
            "attempt {attempt} leaked signer parameters: {}",
            seen_request.uri
        );
    }
}

#[tokio::test]
async fn after_error_receives_response_of_failing_attempt() {
    let transport = ScriptedTransport::new(vec![Reply::status(500, "err")]);
    let config = ClientConfig::new().max_error_retry(0);
    let client = client_with(Arc::clone(&transport), config);
    let probe = Arc::new(TerminalResponseProbe::default());

    let mut request = sample_request();
    let mut context =
        ExecutionContext::new().add_interceptor(Arc::clone(&probe) as Arc<dyn Interceptor>);
    client
        .execute(
            &mut request,
            &TextHandler,
            &CodeErrorHandler { code: "InternalFailure" },
            Some(&mut context),
        )
        .await
        .expect_err("non-retryable 500 should raise");

    assert!(
        probe.saw_response.load(Ordering::SeqCst),
        "after_error must see the failing attempt's response"
    );
    assert_eq!(probe.status.load(Ordering::SeqCst), 500);
}

#[tokio::test]
async fn after_error_has_no_response_for_transport_failures() {
    let transport = ScriptedTransport::new(vec![Reply::io_error(io::ErrorKind::ConnectionReset)]);
    let config = ClientConfig::new().max_error_retry(0);
    let client = client_with(Arc::clone(&transport), config);
    let probe = Arc::new(TerminalResponseProbe::default());

    let mut request = sample_request();
    let mut context =
        ExecutionContext::new().add_interceptor(Arc::clone(&probe) as Arc<dyn Interceptor>);
    client
        .execute(
            &mut request,
            &TextHandler,
            &CodeErrorHandler { code: "InternalFailure" },
            Some(&mut context),
        )
        .await
        .expect_err("transport failure should raise");

    assert!(
        !probe.saw_response.load(Ordering::SeqCst),
        "no response exists for a transport-level failure"
    );
}

#[tokio::test]
async fn leave_open_from_error_handler_extends_to_following_redirect() {
    let error_closed = Arc::new(AtomicBool::new(false));
    let redirect_closed = Arc::new(AtomicBool::new(false));
    let success_closed = Arc::new(AtomicBool::new(false));
    let transport = ScriptedTransport::new(vec![
        Reply::status(500, "err").with_close_flag(Arc::clone(&error_closed)),
        Reply::status(307, "")
            .with_header("location", "/b")
            .with_close_flag(Arc::clone(&redirect_closed)),
        Reply::status(200, "ok").with_close_flag(Arc::clone(&success_closed)),
    ]);
    let config = ClientConfig::new().retry_policy(fast_retry_policy(3));
    let client = client_with(Arc::clone(&transport), config);

    let mut request = sample_request();
    let mut context = ExecutionContext::new();
    let response = client
        .execute(&mut request, &TextHandler, &LeaveOpenErrorHandler, Some(&mut context))
        .await
        .expect("final attempt should succeed");

    assert_eq!(response.payload(), "ok");
    assert_eq!(transport.seen().len(), 3);
    assert!(
        !error_closed.load(Ordering::SeqCst),
        "error handler asked for the connection to stay open"
    );
    assert!(
        !redirect_closed.load(Ordering::SeqCst),
        "redirect after a leave-open error must not be closed"
    );
    assert!(
        success_closed.load(Ordering::SeqCst),
        "success handler did not ask to keep the connection"
    );
}

#[tokio::test]
async fn cancellation_during_backoff_raises_interrupted() {
    let transport = ScriptedTransport::new(vec![Reply::status(500, "err")]);
    let config = ClientConfig::new().retry_policy(fast_retry_policy(5));
    let client = client_with(Arc::clone(&transport), config);

    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let mut request = sample_request();
    let mut context = ExecutionContext::new().cancellation(cancellation.clone());
    let error = client
        .execute(
            &mut request,
            &TextHandler,
            &CodeErrorHandler { code: "InternalFailure" },
            Some(&mut context),
        )
        .await
        .expect_err("cancelled backoff should raise");

    match error {
        SdkError::Client(ClientError::Interrupted) => {}
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.seen().len(), 1);
    assert!(cancellation.is_cancelled(), "signal must stay observable");
}

#[tokio::test]
async fn missing_execution_context_is_rejected() {
    let transport = ScriptedTransport::new(vec![Reply::status(200, "ok")]);
    let client = client_with(Arc::clone(&transport), ClientConfig::new());

    let mut request = sample_request();
    let error = client
        .execute(&mut request, &TextHandler, &FailingErrorHandler, None)
        .await
        .expect_err("missing context should raise");

    match error {
        SdkError::Client(ClientError::MissingExecutionContext) => {}
        other => panic!("unexpected error: {other}"),
    }
    assert!(transport.seen().is_empty());
}

#[tokio::test]
async fn user_agent_combines_override_default_and_marker() {
    let transport = ScriptedTransport::new(vec![Reply::status(200, "ok")]);
    let config = ClientConfig::new().user_agent("my-sdk/1.2");
    let client = client_with(Arc::clone(&transport), config);

    let mut request = sample_request().original(OriginalRequest::new(
        reqcore::ClientOptions::default().user_agent_marker("exec-env/test"),
    ));
    let mut context = ExecutionContext::new();
    client
        .execute(&mut request, &TextHandler, &FailingErrorHandler, Some(&mut context))
        .await
        .expect("success expected");

    let seen = transport.seen();
    let user_agent = seen[0]
        .headers
        .get(http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .expect("user agent header should be sent");
    assert_eq!(
        user_agent,
        format!("my-sdk/1.2, {DEFAULT_USER_AGENT} exec-env/test")
    );
}

#[tokio::test]
async fn unmarshal_failure_on_success_path_wraps_as_client_error() {
    let transport = ScriptedTransport::new(vec![Reply::status(200, "ok")]);
    let client = client_with(Arc::clone(&transport), ClientConfig::new());
    let interceptor = Arc::new(CountingInterceptor::default());

    let mut request = sample_request();
    let mut context =
        ExecutionContext::new().add_interceptor(Arc::clone(&interceptor) as Arc<dyn Interceptor>);
    let error = client
        .execute(&mut request, &FailingHandler, &FailingErrorHandler, Some(&mut context))
        .await
        .expect_err("handler failure should raise");

    match error {
        SdkError::Client(ClientError::UnmarshalResponse { status, .. }) => {
            assert_eq!(status, 200);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(interceptor.errors.load(Ordering::SeqCst), 1);
    assert_eq!(interceptor.responses.load(Ordering::SeqCst), 0);
}
