use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::{ClientError, SdkError, ServiceError};
use crate::request::OriginalRequest;

const DEFAULT_MAX_ERROR_RETRY: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_THROTTLED_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(20);

const CLOCK_SKEW_ERROR_CODES: &[&str] = &[
    "RequestTimeTooSkewed",
    "RequestExpired",
    "InvalidSignatureException",
    "SignatureDoesNotMatch",
    "AuthFailure",
    "RequestInTheFuture",
];

const THROTTLING_ERROR_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ProvisionedThroughputExceededException",
    "TooManyRequestsException",
];

/// Decides whether a failed attempt is worth repeating.
pub trait RetryCondition: Send + Sync {
    fn should_retry(
        &self,
        original: &OriginalRequest,
        error: &SdkError,
        retries_attempted: u32,
    ) -> bool;
}

/// Computes the pause before the next attempt. Jitter, if any, lives here.
pub trait BackoffStrategy: Send + Sync {
    fn delay_before_next_retry(
        &self,
        original: &OriginalRequest,
        previous_error: Option<&SdkError>,
        retries_attempted: u32,
    ) -> Duration;
}

/// Pure, shared retry policy: condition + backoff + ceiling + precedence
/// flag against the client-config override.
#[derive(Clone)]
pub struct RetryPolicy {
    condition: Arc<dyn RetryCondition>,
    backoff: Arc<dyn BackoffStrategy>,
    max_error_retry: u32,
    honor_max_error_retry_in_config: bool,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryPolicy")
            .field("max_error_retry", &self.max_error_retry)
            .field(
                "honor_max_error_retry_in_config",
                &self.honor_max_error_retry_in_config,
            )
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(
        condition: Arc<dyn RetryCondition>,
        backoff: Arc<dyn BackoffStrategy>,
        max_error_retry: u32,
        honor_max_error_retry_in_config: bool,
    ) -> Self {
        Self {
            condition,
            backoff,
            max_error_retry,
            honor_max_error_retry_in_config,
        }
    }

    /// Retries transport failures, 5xx availability errors, throttling and
    /// clock-skew errors, with full-jitter exponential backoff.
    pub fn default_policy() -> Self {
        Self::new(
            Arc::new(DefaultRetryCondition),
            Arc::new(FullJitterBackoff::default()),
            DEFAULT_MAX_ERROR_RETRY,
            true,
        )
    }

    pub fn no_retry() -> Self {
        Self::new(
            Arc::new(NeverRetryCondition),
            Arc::new(FixedDelayBackoff(Duration::ZERO)),
            0,
            true,
        )
    }

    pub fn max_error_retry(mut self, max_error_retry: u32) -> Self {
        self.max_error_retry = max_error_retry;
        self
    }

    pub fn condition(mut self, condition: Arc<dyn RetryCondition>) -> Self {
        self.condition = condition;
        self
    }

    pub fn backoff(mut self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn honor_max_error_retry_in_config(mut self, honor: bool) -> Self {
        self.honor_max_error_retry_in_config = honor;
        self
    }

    pub fn max_error_retry_value(&self) -> u32 {
        self.max_error_retry
    }

    pub fn honors_max_error_retry_in_config(&self) -> bool {
        self.honor_max_error_retry_in_config
    }

    pub(crate) fn condition_value(&self) -> &dyn RetryCondition {
        self.condition.as_ref()
    }

    pub(crate) fn backoff_value(&self) -> &dyn BackoffStrategy {
        self.backoff.as_ref()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_policy()
    }
}

/// Retry ceiling after reconciling the client-config override with the
/// policy's own ceiling: the override wins only when it is set and the
/// policy honors it.
pub(crate) fn effective_max_retries(config_override: Option<u32>, policy: &RetryPolicy) -> u32 {
    match config_override {
        Some(limit) if policy.honors_max_error_retry_in_config() => limit,
        _ => policy.max_error_retry_value(),
    }
}

/// Default condition: transport-level failures and retryable service errors.
#[derive(Debug, Default)]
pub struct DefaultRetryCondition;

impl RetryCondition for DefaultRetryCondition {
    fn should_retry(
        &self,
        _original: &OriginalRequest,
        error: &SdkError,
        _retries_attempted: u32,
    ) -> bool {
        match error {
            SdkError::Client(client_error) => matches!(
                client_error,
                ClientError::Transport { .. } | ClientError::Io(_)
            ),
            SdkError::Service(service_error) => {
                matches!(service_error.status(), 500 | 502 | 503 | 504)
                    || is_throttling_error(service_error)
                    || is_clock_skew_error(service_error)
            }
        }
    }
}

#[derive(Debug, Default)]
struct NeverRetryCondition;

impl RetryCondition for NeverRetryCondition {
    fn should_retry(
        &self,
        _original: &OriginalRequest,
        _error: &SdkError,
        _retries_attempted: u32,
    ) -> bool {
        false
    }
}

/// Full-jitter exponential backoff: a uniform sample from zero up to the
/// capped exponential delay. Throttling errors scale from a larger base.
#[derive(Debug)]
pub struct FullJitterBackoff {
    base_delay: Duration,
    throttled_base_delay: Duration,
    max_delay: Duration,
}

impl FullJitterBackoff {
    pub fn new(base_delay: Duration, throttled_base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            throttled_base_delay,
            max_delay,
        }
    }

    fn ceiling_for(&self, previous_error: Option<&SdkError>, retries_attempted: u32) -> Duration {
        let throttled = previous_error
            .and_then(SdkError::as_service)
            .is_some_and(is_throttling_error);
        let base = if throttled {
            self.throttled_base_delay
        } else {
            self.base_delay
        };
        let multiplier = 1_u128 << retries_attempted.min(31);
        let ceiling_ms = base
            .as_millis()
            .saturating_mul(multiplier)
            .min(self.max_delay.as_millis())
            .min(u64::MAX as u128) as u64;
        Duration::from_millis(ceiling_ms)
    }
}

impl Default for FullJitterBackoff {
    fn default() -> Self {
        Self::new(
            DEFAULT_BASE_DELAY,
            DEFAULT_THROTTLED_BASE_DELAY,
            DEFAULT_MAX_BACKOFF,
        )
    }
}

impl BackoffStrategy for FullJitterBackoff {
    fn delay_before_next_retry(
        &self,
        _original: &OriginalRequest,
        previous_error: Option<&SdkError>,
        retries_attempted: u32,
    ) -> Duration {
        let ceiling = self.ceiling_for(previous_error, retries_attempted);
        let ceiling_ms = ceiling.as_millis().min(u64::MAX as u128) as u64;
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(0..=ceiling_ms))
    }
}

/// Constant pause between attempts; useful for tests and tight SLAs.
#[derive(Debug)]
pub struct FixedDelayBackoff(pub Duration);

impl BackoffStrategy for FixedDelayBackoff {
    fn delay_before_next_retry(
        &self,
        _original: &OriginalRequest,
        _previous_error: Option<&SdkError>,
        _retries_attempted: u32,
    ) -> Duration {
        self.0
    }
}

/// Whether the service error indicates the caller's clock disagrees with the
/// server's. Recognized by error code, not by status code alone.
pub fn is_clock_skew_error(error: &ServiceError) -> bool {
    CLOCK_SKEW_ERROR_CODES.contains(&error.code())
}

pub fn is_throttling_error(error: &ServiceError) -> bool {
    THROTTLING_ERROR_CODES.contains(&error.code())
}
