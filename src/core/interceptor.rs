use crate::context::Credentials;
use crate::error::SdkError;
use crate::request::Request;
use crate::response::HttpResponse;

/// User-supplied hook invoked around request execution.
///
/// `before_request` runs exactly once per `execute`, before signing; exactly
/// one of `after_response` / `after_error` runs once with the terminal
/// outcome. `after_error` is handed the response of the failing attempt when
/// the terminal error came out of one; transport-level failures carry none.
/// Hooks run in registration order.
///
/// An interceptor that needs the caller's credentials opts in through
/// `wants_credentials`; the loop then calls `set_credentials` before
/// `before_request`. Implementations typically stash them behind a lock.
pub trait Interceptor: Send + Sync {
    fn before_request(&self, _request: &mut Request) {}

    fn after_response(&self, _request: &Request, _response: &HttpResponse) {}

    fn after_error(&self, _request: &Request, _response: Option<&HttpResponse>, _error: &SdkError) {
    }

    fn wants_credentials(&self) -> bool {
        false
    }

    fn set_credentials(&self, _credentials: &Credentials) {}
}
