use std::fmt;
use std::io;
use std::marker::PhantomData;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{HandlerError, ServiceError};

/// Response payload stream handed back by the transport.
pub trait ResponseContent: Send {
    /// Drains the remaining content.
    fn read_to_bytes(&mut self) -> io::Result<Bytes>;

    /// Releases the underlying connection resources.
    fn close(&mut self) -> io::Result<()>;
}

/// Fully buffered response content.
pub struct BufferedContent {
    bytes: Option<Bytes>,
}

impl BufferedContent {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: Some(bytes.into()),
        }
    }
}

impl ResponseContent for BufferedContent {
    fn read_to_bytes(&mut self) -> io::Result<Bytes> {
        Ok(self.bytes.take().unwrap_or_default())
    }

    fn close(&mut self) -> io::Result<()> {
        self.bytes = None;
        Ok(())
    }
}

/// Transport result owned by the execution loop until handed off or closed.
pub struct HttpResponse {
    status: StatusCode,
    status_text: String,
    headers: HeaderMap,
    content: Option<Box<dyn ResponseContent>>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        let status_text = status.canonical_reason().unwrap_or_default().to_owned();
        Self {
            status,
            status_text,
            headers,
            content: None,
        }
    }

    pub fn status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = status_text.into();
        self
    }

    pub fn content(mut self, content: Box<dyn ResponseContent>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text_value(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    /// Takes ownership of the content stream; the caller becomes responsible
    /// for closing it.
    pub fn take_content(&mut self) -> Option<Box<dyn ResponseContent>> {
        self.content.take()
    }

    pub fn content_mut(&mut self) -> Option<&mut (dyn ResponseContent + '_)> {
        match &mut self.content {
            Some(content) => Some(content.as_mut()),
            None => None,
        }
    }

    /// Closes the content stream if one is still attached. Close errors are
    /// logged and swallowed.
    pub(crate) fn release(&mut self) {
        if let Some(content) = &mut self.content {
            if let Err(error) = content.close() {
                warn!(error = %error, "cannot close the response content");
            }
        }
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .field("has_content", &self.content.is_some())
            .finish()
    }
}

/// Unmarshalled payload plus the raw response it came from.
#[derive(Debug)]
pub struct ServiceResponse<T> {
    payload: T,
    http_response: HttpResponse,
}

impl<T> ServiceResponse<T> {
    pub(crate) fn new(payload: T, http_response: HttpResponse) -> Self {
        Self {
            payload,
            http_response,
        }
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn http_response(&self) -> &HttpResponse {
        &self.http_response
    }
}

/// Unmarshals a successful (2xx) response.
///
/// A handler that reads the content lazily, after returning to the caller,
/// declares `needs_connection_left_open` so the loop does not close the
/// stream on exit.
pub trait ResponseHandler<T>: Send + Sync {
    fn handle(&self, response: &mut HttpResponse) -> Result<T, HandlerError>;

    fn needs_connection_left_open(&self) -> bool {
        false
    }
}

/// Unmarshals a non-2xx response into a [`ServiceError`].
pub trait ErrorResponseHandler: Send + Sync {
    fn handle(&self, response: &mut HttpResponse) -> Result<ServiceError, HandlerError>;

    fn needs_connection_left_open(&self) -> bool {
        false
    }
}

/// Deserializes a JSON payload into `T`.
pub struct JsonResponseHandler<T> {
    marker: PhantomData<fn() -> T>,
}

impl<T> JsonResponseHandler<T> {
    pub fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<T> Default for JsonResponseHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> ResponseHandler<T> for JsonResponseHandler<T> {
    fn handle(&self, response: &mut HttpResponse) -> Result<T, HandlerError> {
        let body = match response.content_mut() {
            Some(content) => content.read_to_bytes()?,
            None => Bytes::new(),
        };
        serde_json::from_slice(&body).map_err(HandlerError::other)
    }
}
