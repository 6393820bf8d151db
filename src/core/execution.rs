use std::io;
use std::time::Instant;

use http::header::{LOCATION, USER_AGENT};
use http::HeaderValue;
use tracing::{debug, warn};

use crate::config::{ClientConfig, DEFAULT_USER_AGENT};
use crate::error::{ClientError, ErrorType, HandlerError, SdkError, ServiceError};
use crate::metrics::{Field, RequestMetrics};
use crate::request::Request;
use crate::response::{ErrorResponseHandler, HttpResponse, ResponseHandler};

/// What the classifier made of a transport response.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Disposition {
    Success,
    TemporaryRedirect(String),
    ServiceFault,
}

/// 2xx is success; a 307 with a non-empty `Location` is a temporary
/// redirect; everything else, including a 307 without one, is a service
/// fault.
pub(crate) fn classify_response(response: &HttpResponse) -> Disposition {
    let status = response.status();
    if status.is_success() {
        return Disposition::Success;
    }
    if status == http::StatusCode::TEMPORARY_REDIRECT {
        if let Some(location) = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
        {
            if !location.is_empty() {
                return Disposition::TemporaryRedirect(location.to_owned());
            }
        }
    }
    Disposition::ServiceFault
}

/// Applies the user-agent policy: a caller override gets the SDK default
/// appended, and the user-level request's marker is appended idempotently.
pub(crate) fn apply_user_agent(config: &ClientConfig, request: &mut Request) {
    let mut user_agent = config.user_agent_value().to_owned();
    if user_agent != DEFAULT_USER_AGENT {
        user_agent = format!("{user_agent}, {DEFAULT_USER_AGENT}");
    }
    let marker = request
        .original_request()
        .client_options()
        .user_agent_marker_value()
        .map(ToOwned::to_owned);
    if let Some(marker) = marker {
        user_agent = append_user_agent_marker(&user_agent, &marker);
    }
    match HeaderValue::from_str(&user_agent) {
        Ok(value) => {
            request.headers_mut().insert(USER_AGENT, value);
        }
        Err(_) => warn!("user agent contains invalid header characters, leaving header unset"),
    }
}

/// Appends a marker to the user-agent string unless it is already present.
pub(crate) fn append_user_agent_marker(existing: &str, marker: &str) -> String {
    if existing.contains(marker) {
        existing.to_owned()
    } else {
        format!("{} {}", existing.trim(), marker.trim())
    }
}

/// Runs the success handler over a 2xx response.
///
/// Handler I/O errors propagate unwrapped; anything else becomes an
/// unmarshalling failure carrying the response's status line.
pub(crate) fn handle_success_response<T>(
    request: &Request,
    handler: &dyn ResponseHandler<T>,
    response: &mut HttpResponse,
    metrics: &RequestMetrics,
) -> crate::Result<T> {
    let started = Instant::now();
    let handled = handler.handle(response);
    metrics.add_time(Field::ResponseProcessingTime, started.elapsed());
    match handled {
        Ok(payload) => {
            debug!(
                status = response.status().as_u16(),
                service = request.service_name(),
                "received successful response"
            );
            Ok(payload)
        }
        Err(HandlerError::Io(error)) => Err(ClientError::Io(error).into()),
        Err(HandlerError::Other(source)) => Err(ClientError::UnmarshalResponse {
            message: source.to_string(),
            status: response.status().as_u16(),
            status_text: response.status_text_value().to_owned(),
            source,
        }
        .into()),
    }
}

/// Turns a non-2xx response into a typed service error.
///
/// The caller-provided handler runs first; if it fails, bodiless 413/503
/// responses get synthetic errors, handler I/O errors propagate unwrapped,
/// and anything else becomes an unmarshalling failure. The status code and
/// service name are stamped on whatever comes out.
pub(crate) fn handle_error_response(
    request: &Request,
    handler: &dyn ErrorResponseHandler,
    response: &mut HttpResponse,
) -> crate::Result<ServiceError> {
    let status = response.status().as_u16();
    let mut service_error = match handler.handle(response) {
        Ok(service_error) => {
            debug!(error = %service_error, "received error response");
            service_error
        }
        Err(handler_error) => {
            if status == 413 {
                ServiceError::new("Request entity too large")
                    .error_code("Request entity too large")
                    .error_type(ErrorType::Client)
            } else if status == 503
                && response
                    .status_text_value()
                    .eq_ignore_ascii_case("Service Unavailable")
            {
                ServiceError::new("Service unavailable")
                    .error_code("Service unavailable")
                    .error_type(ErrorType::Service)
            } else {
                return match handler_error {
                    HandlerError::Io(error) => Err(ClientError::Io(error).into()),
                    HandlerError::Other(source) => Err(ClientError::UnmarshalErrorResponse {
                        message: source.to_string(),
                        status,
                        status_text: response.status_text_value().to_owned(),
                        source,
                    }
                    .into()),
                };
            }
        }
    };
    service_error.set_status_code(status);
    service_error.set_service_name(request.service_name());
    Ok(service_error)
}

/// Why a request body could not be made ready for another attempt.
pub(crate) enum ResetFailure {
    NotResettable,
    Io(io::Error),
}

/// Restores the request body so the request can be sent again after an
/// error. A missing body needs no work; a non-resettable one refuses the
/// retry.
pub(crate) fn reset_request_after_error(request: &Request) -> Result<(), ResetFailure> {
    let Some(body) = request.body_value() else {
        return Ok(());
    };
    if !body.mark_supported() {
        return Err(ResetFailure::NotResettable);
    }
    body.reset().map_err(ResetFailure::Io)
}

impl ResetFailure {
    /// Wraps the original, more meaningful error as the cause; the reset
    /// problem itself is secondary.
    pub(crate) fn into_client_error(self, cause: SdkError) -> SdkError {
        match self {
            Self::NotResettable => ClientError::StreamNotResettable {
                source: Box::new(cause),
            }
            .into(),
            Self::Io(_) => ClientError::ResetStreamFailed {
                source: Box::new(cause),
            }
            .into(),
        }
    }
}
