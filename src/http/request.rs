use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

use crate::util::{compose_request_uri, lock_unpoisoned};

/// A streamed request payload.
///
/// A content that supports the mark/reset protocol can be replayed between
/// attempts; one that does not limits the request to a single attempt.
pub trait Content: Send {
    /// Whether mark/reset is supported.
    fn mark_supported(&self) -> bool {
        false
    }

    /// Remembers the current position for a later `reset`.
    fn mark(&mut self) {}

    /// Restores the position stored by the last `mark`.
    fn reset(&mut self) -> io::Result<()>;

    /// Consumes the stream from the current position.
    fn read_to_bytes(&mut self) -> io::Result<Bytes>;

    fn len_hint(&self) -> Option<u64> {
        None
    }
}

/// In-memory content; always rewindable.
pub struct BytesContent {
    bytes: Bytes,
    position: usize,
    marked: usize,
}

impl BytesContent {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            position: 0,
            marked: 0,
        }
    }
}

impl Content for BytesContent {
    fn mark_supported(&self) -> bool {
        true
    }

    fn mark(&mut self) {
        self.marked = self.position;
    }

    fn reset(&mut self) -> io::Result<()> {
        self.position = self.marked;
        Ok(())
    }

    fn read_to_bytes(&mut self) -> io::Result<Bytes> {
        let remaining = self.bytes.slice(self.position..);
        self.position = self.bytes.len();
        Ok(remaining)
    }

    fn len_hint(&self) -> Option<u64> {
        Some((self.bytes.len() - self.position) as u64)
    }
}

/// Shared handle to a request payload stream.
///
/// The execution loop, the per-attempt transport snapshot, and the transport
/// itself all observe the same underlying stream, so a reset between
/// attempts is visible everywhere.
#[derive(Clone)]
pub struct Body {
    inner: Arc<Mutex<Box<dyn Content>>>,
}

impl Body {
    pub fn new(content: Box<dyn Content>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(content)),
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(Box::new(BytesContent::new(bytes)))
    }

    pub fn mark_supported(&self) -> bool {
        lock_unpoisoned(&self.inner).mark_supported()
    }

    pub fn mark(&self) {
        lock_unpoisoned(&self.inner).mark();
    }

    pub fn reset(&self) -> io::Result<()> {
        lock_unpoisoned(&self.inner).reset()
    }

    pub fn read_to_bytes(&self) -> io::Result<Bytes> {
        lock_unpoisoned(&self.inner).read_to_bytes()
    }

    pub fn len_hint(&self) -> Option<u64> {
        lock_unpoisoned(&self.inner).len_hint()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("Body").finish_non_exhaustive()
    }
}

/// Client-option markers the caller attached to the user-level request.
#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    user_agent_marker: Option<String>,
}

impl ClientOptions {
    pub fn user_agent_marker(mut self, marker: impl Into<String>) -> Self {
        self.user_agent_marker = Some(marker.into());
        self
    }

    pub fn user_agent_marker_value(&self) -> Option<&str> {
        self.user_agent_marker.as_deref()
    }
}

/// The immutable user-level request. Opaque to the execution core except for
/// its client-option markers; retry policies may downcast-free inspect it
/// through their own conventions.
#[derive(Clone, Debug, Default)]
pub struct OriginalRequest {
    client_options: ClientOptions,
}

impl OriginalRequest {
    pub fn new(client_options: ClientOptions) -> Self {
        Self { client_options }
    }

    pub fn client_options(&self) -> &ClientOptions {
        &self.client_options
    }
}

/// Mutable outgoing call under construction: mutated in place by the signer
/// and interceptors, restored from a snapshot between attempts.
#[derive(Debug)]
pub struct Request {
    method: Method,
    endpoint: Uri,
    service_name: String,
    resource_path: String,
    parameters: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Body>,
    original: Arc<OriginalRequest>,
}

impl Request {
    pub fn new(method: Method, endpoint: Uri, service_name: impl Into<String>) -> Self {
        Self {
            method,
            endpoint,
            service_name: service_name.into(),
            resource_path: String::new(),
            parameters: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            original: Arc::new(OriginalRequest::default()),
        }
    }

    pub fn resource_path(mut self, resource_path: impl Into<String>) -> Self {
        self.resource_path = resource_path.into();
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn original(mut self, original: OriginalRequest) -> Self {
        self.original = Arc::new(original);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn resource_path_value(&self) -> &str {
        &self.resource_path
    }

    /// Ordered request parameters, serialized into the query string in
    /// insertion order.
    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parameters.push((name.into(), value.into()));
    }

    pub fn set_parameters(&mut self, parameters: Vec<(String, String)>) {
        self.parameters = parameters;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_headers(&mut self, headers: HeaderMap) {
        self.headers = headers;
    }

    pub fn body_value(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn original_request(&self) -> &OriginalRequest {
        &self.original
    }
}

/// Transport-ready snapshot of a [`Request`], recreated for every attempt.
/// A temporary redirect overrides the URI here; the request's endpoint, and
/// therefore the signer, are unaffected.
#[derive(Debug)]
pub struct HttpRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Option<Body>,
}

impl HttpRequest {
    pub fn from_request(request: &Request) -> crate::Result<Self> {
        let uri = compose_request_uri(
            request.endpoint(),
            request.resource_path_value(),
            request.parameters(),
        )?;
        Ok(Self {
            method: request.method().clone(),
            uri,
            headers: request.headers().clone(),
            body: request.body_value().cloned(),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }
}
