//! `reqcore` is the request execution core for service SDK clients: it
//! signs a prepared request, moves it through an HTTP transport, interprets
//! the response, and retries transient failures with backoff while
//! correcting for clock skew against the server and invoking user-supplied
//! interceptors around all of that.
//!
//! # Quick Start
//!
//! ```no_run
//! use http::Method;
//! use reqcore::{
//!     ClientConfig, ErrorResponseHandler, ExecutionContext, HandlerError, HttpResponse,
//!     JsonResponseHandler, Request, ServiceClient, ServiceError,
//! };
//!
//! struct PlainErrorHandler;
//!
//! impl ErrorResponseHandler for PlainErrorHandler {
//!     fn handle(&self, response: &mut HttpResponse) -> Result<ServiceError, HandlerError> {
//!         Ok(ServiceError::new("request failed").status_code(response.status().as_u16()))
//!     }
//! }
//!
//! # async fn demo() -> Result<(), reqcore::SdkError> {
//! let client = ServiceClient::new(ClientConfig::new());
//! let mut request = Request::new(
//!     Method::GET,
//!     "https://api.example.com".parse().expect("endpoint should parse"),
//!     "example",
//! )
//! .resource_path("/v1/items");
//! let mut context = ExecutionContext::new();
//! let response = client
//!     .execute::<serde_json::Value>(
//!         &mut request,
//!         &JsonResponseHandler::new(),
//!         &PlainErrorHandler,
//!         Some(&mut context),
//!     )
//!     .await?;
//! println!("items: {}", response.payload());
//! # Ok(())
//! # }
//! ```
//!
//! # Recommended Defaults
//!
//! - Keep [`RetryPolicy::default_policy`] for SDK traffic; override the
//!   ceiling through [`ClientConfig::max_error_retry`] rather than a custom
//!   policy when that is all you need.
//! - Give streamed request bodies a rewindable [`Content`] implementation;
//!   a non-rewindable body limits the request to a single attempt.

mod client;
mod context;
mod core;
mod http;
mod transport;

pub(crate) use crate::core::config;
pub(crate) use crate::core::error;
pub(crate) use crate::core::execution;
pub(crate) use crate::core::interceptor;
pub(crate) use crate::core::metrics;
pub(crate) use crate::core::retry;
pub(crate) use crate::core::skew;
pub(crate) use crate::core::util;
pub(crate) use crate::http::request;
pub(crate) use crate::http::response;

pub use crate::client::{ServiceClient, ServiceClientBuilder};
pub use crate::config::{ClientConfig, DEFAULT_USER_AGENT};
pub use crate::context::{Credentials, ExecutionContext, Signer, SignerResolver};
pub use crate::error::{ClientError, ErrorType, HandlerError, SdkError, ServiceError};
pub use crate::interceptor::Interceptor;
pub use crate::metrics::{Field, MetricsSnapshot, RequestMetrics};
pub use crate::request::{
    Body, BytesContent, ClientOptions, Content, HttpRequest, OriginalRequest, Request,
};
pub use crate::response::{
    BufferedContent, ErrorResponseHandler, HttpResponse, JsonResponseHandler, ResponseContent,
    ResponseHandler, ServiceResponse,
};
pub use crate::retry::{
    is_clock_skew_error, is_throttling_error, BackoffStrategy, DefaultRetryCondition,
    FixedDelayBackoff, FullJitterBackoff, RetryCondition, RetryPolicy,
};
pub use crate::skew::{Clock, ClockSkew, SigningClock, SystemClock};
pub use crate::transport::{HyperTransport, Transport};

pub type Result<T> = std::result::Result<T, SdkError>;

pub mod prelude {
    pub use crate::{
        ClientConfig, Credentials, ErrorResponseHandler, ExecutionContext, HandlerError,
        HttpResponse, Interceptor, JsonResponseHandler, Request, ResponseHandler, Result,
        RetryPolicy, SdkError, ServiceClient, ServiceError, ServiceResponse,
    };
}
