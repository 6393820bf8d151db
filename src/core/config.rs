use std::time::Duration;

use http::Uri;

use crate::retry::RetryPolicy;

/// User agent sent when the caller does not override it.
pub const DEFAULT_USER_AGENT: &str = concat!("reqcore/", env!("CARGO_PKG_VERSION"));

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;

/// Static client knobs shared by every `execute` call.
///
/// `max_error_retry` overrides the retry policy's own ceiling when set,
/// subject to the policy honoring the override; `None` leaves the policy
/// ceiling in charge.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    user_agent: String,
    max_error_retry: Option<u32>,
    retry_policy: RetryPolicy,
    proxy: Option<Uri>,
    connect_timeout: Duration,
    request_timeout: Duration,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_error_retry: None,
            retry_policy: RetryPolicy::default_policy(),
            proxy: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
        }
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn max_error_retry(mut self, max_error_retry: u32) -> Self {
        self.max_error_retry = Some(max_error_retry);
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn proxy(mut self, proxy: Uri) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host;
        self
    }

    pub fn user_agent_value(&self) -> &str {
        &self.user_agent
    }

    pub fn max_error_retry_value(&self) -> Option<u32> {
        self.max_error_retry
    }

    pub fn retry_policy_value(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn proxy_value(&self) -> Option<&Uri> {
        self.proxy.as_ref()
    }

    pub fn connect_timeout_value(&self) -> Duration {
        self.connect_timeout
    }

    pub fn request_timeout_value(&self) -> Duration {
        self.request_timeout
    }

    pub fn pool_idle_timeout_value(&self) -> Duration {
        self.pool_idle_timeout
    }

    pub fn pool_max_idle_per_host_value(&self) -> usize {
        self.pool_max_idle_per_host
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
