use std::fmt;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Rough attribution of a service failure, as reported by the remote side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorType {
    Client,
    Service,
    #[default]
    Unknown,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Client => "client",
            Self::Service => "service",
            Self::Unknown => "unknown",
        };
        formatter.write_str(text)
    }
}

/// A failure reported by the remote service, unmarshalled from a non-2xx
/// response.
#[derive(Debug)]
pub struct ServiceError {
    message: String,
    status_code: u16,
    error_code: String,
    error_type: ErrorType,
    request_id: Option<String>,
    service_name: String,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: 0,
            error_code: String::new(),
            error_type: ErrorType::Unknown,
            request_id: None,
            service_name: String::new(),
        }
    }

    pub fn error_code(mut self, error_code: impl Into<String>) -> Self {
        self.error_code = error_code.into();
        self
    }

    pub fn error_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = error_type;
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub(crate) fn set_status_code(&mut self, status_code: u16) {
        self.status_code = status_code;
    }

    pub(crate) fn set_service_name(&mut self, service_name: &str) {
        self.service_name = service_name.to_owned();
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> u16 {
        self.status_code
    }

    pub fn code(&self) -> &str {
        &self.error_code
    }

    pub fn kind(&self) -> ErrorType {
        self.error_type
    }

    pub fn request_id_value(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn service(&self) -> &str {
        &self.service_name
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} (Service: {}; Status Code: {}; Error Code: {}; Request ID: {})",
            self.message,
            self.service_name,
            self.status_code,
            self.error_code,
            self.request_id.as_deref().unwrap_or("-"),
        )
    }
}

impl std::error::Error for ServiceError {}

/// A failure raised locally: transport problems, unmarshalling problems,
/// non-resettable bodies, or a cancelled backoff wait.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    #[error("Internal SDK error: no execution context specified")]
    MissingExecutionContext,
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("Unable to execute HTTP request: {message}")]
    Transport {
        message: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Unable to unmarshall response ({message}). Response Code: {status}, Response Text: {status_text}")]
    UnmarshalResponse {
        message: String,
        status: u16,
        status_text: String,
        #[source]
        source: BoxError,
    },
    #[error("Unable to unmarshall error response ({message}). Response Code: {status}, Response Text: {status_text}")]
    UnmarshalErrorResponse {
        message: String,
        status: u16,
        status_text: String,
        #[source]
        source: BoxError,
    },
    #[error("Encountered an exception and stream is not resettable")]
    StreamNotResettable {
        #[source]
        source: Box<SdkError>,
    },
    #[error("Encountered an exception and couldn't reset the stream to retry")]
    ResetStreamFailed {
        #[source]
        source: Box<SdkError>,
    },
    #[error("retry backoff interrupted by cancellation")]
    Interrupted,
    #[error("invalid redirect location: {location}")]
    InvalidRedirectLocation { location: String },
}

/// Top-level error surfaced by [`execute`](crate::ServiceClient::execute):
/// either a local failure or an unmarshalled remote one.
#[derive(Debug, Error)]
pub enum SdkError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl SdkError {
    pub fn as_service(&self) -> Option<&ServiceError> {
        match self {
            Self::Service(error) => Some(error),
            Self::Client(_) => None,
        }
    }

    pub fn as_client(&self) -> Option<&ClientError> {
        match self {
            Self::Client(error) => Some(error),
            Self::Service(_) => None,
        }
    }
}

/// Failure reported by a response or error-response handler.
///
/// I/O problems while reading the response content keep their identity so the
/// execution loop can propagate them unwrapped; anything else is wrapped as an
/// unmarshalling failure.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(BoxError),
}

impl HandlerError {
    pub fn other(source: impl Into<BoxError>) -> Self {
        Self::Other(source.into())
    }
}
