use std::io;

use async_trait::async_trait;

use crate::request::HttpRequest;
use crate::response::HttpResponse;

mod hyper;

pub use self::hyper::HyperTransport;

/// Moves one prepared HTTP request over the wire.
///
/// Implementations must not retry internally; the execution loop owns the
/// retry discipline. Cancellation during a send surfaces as an I/O error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> io::Result<HttpResponse>;

    /// Releases transport-held resources. Called from
    /// [`ServiceClient::shutdown`](crate::ServiceClient::shutdown); never
    /// relied on from destructors.
    fn shutdown(&self) {}
}
