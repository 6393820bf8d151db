use std::sync::Arc;
use std::time::Instant;

use http::Uri;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::context::{ExecutionContext, Signer};
use crate::error::{ClientError, SdkError};
use crate::execution::{
    apply_user_agent, classify_response, handle_error_response, handle_success_response,
    reset_request_after_error, Disposition,
};
use crate::interceptor::Interceptor;
use crate::metrics::Field;
use crate::request::{Body, HttpRequest, OriginalRequest, Request};
use crate::response::{ErrorResponseHandler, HttpResponse, ResponseHandler, ServiceResponse};
use crate::retry::{effective_max_retries, is_clock_skew_error, RetryPolicy};
use crate::skew::{parse_clock_skew_offset, Clock, ClockSkew, SigningClock, SystemClock};
use crate::transport::{HyperTransport, Transport};
use crate::util::resolve_redirect_uri;

/// Executes prepared service requests: signs them, sends them through the
/// transport, interprets the responses, and retries transient failures with
/// backoff while correcting for clock skew.
///
/// The client holds no per-call state; `execute` is safe to call
/// concurrently. Release it explicitly with [`shutdown`](Self::shutdown)
/// when done.
pub struct ServiceClient {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    skew: ClockSkew,
}

pub struct ServiceClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

impl ServiceClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> ServiceClient {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::build(&self.config)),
        };
        ServiceClient {
            transport,
            config: self.config,
            clock: self.clock,
            skew: ClockSkew::default(),
        }
    }
}

impl ServiceClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ServiceClientBuilder {
        ServiceClientBuilder {
            transport: None,
            config: ClientConfig::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The device-minus-server offset recorded from clock-skew errors, in
    /// whole seconds.
    pub fn clock_skew(&self) -> &ClockSkew {
        &self.skew
    }

    /// Releases the transport. Consumes the client so no further requests
    /// can be issued through it.
    pub fn shutdown(self) {
        self.transport.shutdown();
    }

    /// Executes the request and returns the unmarshalled result.
    ///
    /// `before_request` fires on every interceptor exactly once, then
    /// exactly one of `after_response` / `after_error` fires with the
    /// terminal outcome. Retryable failures are not surfaced; only the last
    /// error is.
    pub async fn execute<T>(
        &self,
        request: &mut Request,
        response_handler: &dyn ResponseHandler<T>,
        error_response_handler: &dyn ErrorResponseHandler,
        context: Option<&mut ExecutionContext>,
    ) -> crate::Result<ServiceResponse<T>> {
        let Some(context) = context else {
            return Err(ClientError::MissingExecutionContext.into());
        };
        let interceptors = prepared_interceptors(context);
        for interceptor in &interceptors {
            interceptor.before_request(request);
        }
        match self
            .execute_with_retries(request, response_handler, error_response_handler, context)
            .await
        {
            Ok(response) => {
                for interceptor in &interceptors {
                    interceptor.after_response(request, response.http_response());
                }
                Ok(response)
            }
            Err(failure) => {
                for interceptor in &interceptors {
                    interceptor.after_error(request, failure.response.as_ref(), &failure.error);
                }
                Err(failure.error)
            }
        }
    }

    async fn execute_with_retries<T>(
        &self,
        request: &mut Request,
        response_handler: &dyn ResponseHandler<T>,
        error_response_handler: &dyn ErrorResponseHandler,
        context: &mut ExecutionContext,
    ) -> Result<ServiceResponse<T>, AttemptFailure> {
        let metrics = context.metrics_value().clone();
        metrics.add_property(Field::ServiceName, request.service_name());
        metrics.add_property(Field::ServiceEndpoint, request.endpoint().to_string());

        apply_user_agent(&self.config, request);

        // Copies of the original parameters and headers, restored at the top
        // of every retry so attempts never see each other's mutations.
        let original_parameters = request.parameters().to_vec();
        let original_headers = request.headers().clone();

        let credentials = context.credentials_value().cloned();
        let cancellation = context.cancellation_value().clone();
        let signing_clock = SigningClock::new(Arc::clone(&self.clock), self.skew.clone());
        let retry_policy = self.config.retry_policy_value().clone();

        let mut signer: Option<Arc<dyn Signer>> = None;
        let mut redirect_uri: Option<Uri> = None;
        let mut retried_error: Option<SdkError> = None;
        let mut attempts: u32 = 0;
        // Persists across attempts: once a handler asks for the connection
        // to stay open, later responses it never saw (a redirect after the
        // error, say) are not closed out from under it either.
        let mut leave_open = false;

        loop {
            attempts += 1;
            metrics.set_counter(Field::RequestCount, u64::from(attempts));
            if attempts > 1 {
                request.set_parameters(original_parameters.clone());
                request.set_headers(original_headers.clone());
            }

            // The signer is resolved once and reused across retries; a 307
            // swaps the transport URI, not the signing endpoint.
            if signer.is_none() {
                signer = context.signer_for(request.endpoint());
            }
            if let (Some(signer), Some(credentials)) = (signer.as_deref(), credentials.as_ref()) {
                let started = Instant::now();
                signer.sign(request, credentials, &signing_clock);
                metrics.add_time(Field::RequestSigningTime, started.elapsed());
            }

            debug!(
                method = %request.method(),
                endpoint = %request.endpoint(),
                attempt = attempts,
                "sending request"
            );

            let mut http_request =
                HttpRequest::from_request(request).map_err(|error| AttemptFailure::bare(error))?;
            if let Some(uri) = &redirect_uri {
                http_request.set_uri(uri.clone());
            }

            if attempts > 1 {
                let started = Instant::now();
                let paused = pause_before_retry(
                    &retry_policy,
                    request.original_request(),
                    retried_error.as_ref(),
                    attempts,
                    &cancellation,
                )
                .await;
                metrics.add_time(Field::RetryPauseTime, started.elapsed());
                paused.map_err(|error| AttemptFailure::bare(error))?;
            }

            let send_result = match prepare_body_for_attempt(request.body_value(), attempts) {
                Err(rewind_error) => Err(rewind_error),
                Ok(()) => {
                    let started = Instant::now();
                    let sent = self.transport.execute(&http_request).await;
                    metrics.add_time(Field::HttpRequestTime, started.elapsed());
                    sent
                }
            };

            match send_result {
                Ok(mut http_response) => match classify_response(&http_response) {
                    Disposition::Success => {
                        metrics
                            .add_property(Field::StatusCode, http_response.status().as_u16().to_string());
                        leave_open = response_handler.needs_connection_left_open();
                        let handled = handle_success_response(
                            request,
                            response_handler,
                            &mut http_response,
                            &metrics,
                        );
                        if !leave_open {
                            http_response.release();
                        }
                        return match handled {
                            Ok(payload) => Ok(ServiceResponse::new(payload, http_response)),
                            Err(error) => {
                                Err(AttemptFailure::with_response(error, http_response))
                            }
                        };
                    }
                    Disposition::TemporaryRedirect(location) => {
                        debug!(location = %location, "redirecting");
                        let resolved = resolve_redirect_uri(http_request.uri(), &location);
                        if !leave_open {
                            http_response.release();
                        }
                        let Some(resolved) = resolved else {
                            return Err(AttemptFailure::with_response(
                                ClientError::InvalidRedirectLocation { location },
                                http_response,
                            ));
                        };
                        metrics.add_property(
                            Field::StatusCode,
                            http_response.status().as_u16().to_string(),
                        );
                        metrics.add_property(Field::RedirectLocation, location);
                        // The redirected URI persists for the rest of the
                        // call; a later retry goes straight to it. The last
                        // retried error, if any, stays cached.
                        redirect_uri = Some(resolved);
                    }
                    Disposition::ServiceFault => {
                        leave_open = error_response_handler.needs_connection_left_open();
                        let unmarshalled = handle_error_response(
                            request,
                            error_response_handler,
                            &mut http_response,
                        );
                        if !leave_open {
                            http_response.release();
                        }
                        let service_error = match unmarshalled {
                            Ok(service_error) => service_error,
                            Err(error) => {
                                return Err(AttemptFailure::with_response(error, http_response))
                            }
                        };
                        metrics.add_property(Field::ErrorCode, service_error.code());
                        metrics.add_property(
                            Field::StatusCode,
                            service_error.status().to_string(),
                        );
                        if let Some(request_id) = service_error.request_id_value() {
                            metrics.add_property(Field::RequestId, request_id);
                        }

                        let error = SdkError::Service(service_error);
                        if !self.should_retry(
                            request.original_request(),
                            request.body_value(),
                            &error,
                            attempts,
                            &retry_policy,
                        ) {
                            return Err(AttemptFailure::with_response(error, http_response));
                        }
                        // Only here, once the error is known retryable, so
                        // unrelated service errors never move the offset.
                        if let SdkError::Service(service_error) = &error {
                            if is_clock_skew_error(service_error) {
                                let offset = parse_clock_skew_offset(
                                    self.clock.as_ref(),
                                    &http_response,
                                    service_error,
                                );
                                self.skew.set_offset(offset);
                            }
                        }
                        match reset_request_after_error(request) {
                            Ok(()) => retried_error = Some(error),
                            Err(failure) => {
                                return Err(AttemptFailure::with_response(
                                    failure.into_client_error(error),
                                    http_response,
                                ))
                            }
                        }
                    }
                },
                Err(io_error) => {
                    info!(error = %io_error, "unable to execute HTTP request");
                    metrics.increment_counter(Field::Exception);
                    let error = SdkError::Client(ClientError::Transport {
                        message: io_error.to_string(),
                        source: io_error,
                    });
                    if !self.should_retry(
                        request.original_request(),
                        request.body_value(),
                        &error,
                        attempts,
                        &retry_policy,
                    ) {
                        return Err(AttemptFailure::bare(error));
                    }
                    match reset_request_after_error(request) {
                        Ok(()) => retried_error = Some(error),
                        Err(failure) => {
                            return Err(AttemptFailure::bare(failure.into_client_error(error)))
                        }
                    }
                }
            }
        }
    }

    /// Retry predicate in precedence order: ceiling, body replayability,
    /// then the policy's own condition. `retries = attempts - 1` at the time
    /// the predicate runs.
    fn should_retry(
        &self,
        original: &OriginalRequest,
        body: Option<&Body>,
        error: &SdkError,
        attempts: u32,
        retry_policy: &RetryPolicy,
    ) -> bool {
        let retries_attempted = attempts - 1;
        let max_error_retry =
            effective_max_retries(self.config.max_error_retry_value(), retry_policy);
        if retries_attempted >= max_error_retry {
            return false;
        }
        if body.is_some_and(|body| !body.mark_supported()) {
            debug!("content not repeatable");
            return false;
        }
        retry_policy
            .condition_value()
            .should_retry(original, error, retries_attempted)
    }
}

/// Terminal failure of the retry loop. Carries the response of the failing
/// attempt when one existed, so `after_error` hooks can inspect it.
struct AttemptFailure {
    error: SdkError,
    response: Option<HttpResponse>,
}

impl AttemptFailure {
    fn bare(error: impl Into<SdkError>) -> Self {
        Self {
            error: error.into(),
            response: None,
        }
    }

    fn with_response(error: impl Into<SdkError>, response: HttpResponse) -> Self {
        Self {
            error: error.into(),
            response: Some(response),
        }
    }
}

fn prepared_interceptors(context: &ExecutionContext) -> Vec<Arc<dyn Interceptor>> {
    let interceptors = context.interceptors_value().to_vec();
    if let Some(credentials) = context.credentials_value() {
        for interceptor in &interceptors {
            if interceptor.wants_credentials() {
                interceptor.set_credentials(credentials);
            }
        }
    }
    interceptors
}

/// Rewinds the body ahead of a retry, or installs the rewind marker on the
/// first attempt. Reset failures surface through the transport error path.
fn prepare_body_for_attempt(body: Option<&Body>, attempts: u32) -> std::io::Result<()> {
    let Some(body) = body else {
        return Ok(());
    };
    if !body.mark_supported() {
        return Ok(());
    }
    if attempts > 1 {
        body.reset()?;
    }
    body.mark();
    Ok(())
}

/// Sleeps for the policy-computed delay before the next attempt, bailing out
/// the moment the ambient cancellation signal fires. The signal stays set
/// for the caller to observe.
async fn pause_before_retry(
    retry_policy: &RetryPolicy,
    original: &OriginalRequest,
    previous_error: Option<&SdkError>,
    attempts: u32,
    cancellation: &CancellationToken,
) -> crate::Result<()> {
    // Zero-based count of retries already performed: the upcoming attempt
    // and the first attempt are both excluded.
    let retries_attempted = attempts.saturating_sub(2);
    let delay =
        retry_policy
            .backoff_value()
            .delay_before_next_retry(original, previous_error, retries_attempted);
    debug!(
        delay_ms = delay.as_millis() as u64,
        retries = retries_attempted,
        "retryable error detected, pausing before next attempt"
    );
    if cancellation.is_cancelled() {
        return Err(ClientError::Interrupted.into());
    }
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        () = sleep(delay) => Ok(()),
        () = cancellation.cancelled() => Err(ClientError::Interrupted.into()),
    }
}
