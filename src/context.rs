use std::fmt;
use std::sync::Arc;

use http::Uri;
use tokio_util::sync::CancellationToken;

use crate::interceptor::Interceptor;
use crate::metrics::RequestMetrics;
use crate::request::Request;
use crate::skew::SigningClock;

/// Opaque authentication material supplied per execution. The core never
/// reads these fields; signers do.
#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn session_token(mut self, session_token: impl Into<String>) -> Self {
        self.session_token = Some(session_token.into());
        self
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn session_token_value(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Attaches authentication material to a request, mutating its headers
/// and/or parameters in place. Time-bound fields come from the supplied
/// clock, which already accounts for the recorded clock skew.
pub trait Signer: Send + Sync {
    fn sign(&self, request: &mut Request, credentials: &Credentials, clock: &SigningClock);
}

/// Picks a signer for an endpoint. Returning `None` leaves the request
/// unsigned; some endpoints are anonymous.
pub trait SignerResolver: Send + Sync {
    fn signer_for(&self, endpoint: &Uri) -> Option<Arc<dyn Signer>>;
}

/// Per-call scratch space: credentials, interceptors, the signer resolver,
/// the metrics sink, and the cancellation signal observed during backoff.
/// Created per `execute` and discarded afterwards.
pub struct ExecutionContext {
    credentials: Option<Credentials>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    signer_resolver: Option<Arc<dyn SignerResolver>>,
    metrics: RequestMetrics,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            credentials: None,
            interceptors: Vec::new(),
            signer_resolver: None,
            metrics: RequestMetrics::enabled(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn add_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn signer_resolver(mut self, signer_resolver: Arc<dyn SignerResolver>) -> Self {
        self.signer_resolver = Some(signer_resolver);
        self
    }

    pub fn metrics(mut self, metrics: RequestMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn credentials_value(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn interceptors_value(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    pub fn metrics_value(&self) -> &RequestMetrics {
        &self.metrics
    }

    pub fn cancellation_value(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub(crate) fn signer_for(&self, endpoint: &Uri) -> Option<Arc<dyn Signer>> {
        self.signer_resolver
            .as_ref()
            .and_then(|resolver| resolver.signer_for(endpoint))
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ExecutionContext")
            .field("credentials", &self.credentials)
            .field("interceptors", &self.interceptors.len())
            .field("has_signer_resolver", &self.signer_resolver.is_some())
            .finish_non_exhaustive()
    }
}
