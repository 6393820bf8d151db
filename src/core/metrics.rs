use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::util::lock_unpoisoned;

/// Per-call metric fields recorded by the execution loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Field {
    RequestCount,
    RequestSigningTime,
    HttpRequestTime,
    RetryPauseTime,
    ResponseProcessingTime,
    Exception,
    StatusCode,
    ServiceName,
    ServiceEndpoint,
    RedirectLocation,
    ErrorCode,
    RequestId,
}

impl Field {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequestCount => "request_count",
            Self::RequestSigningTime => "request_signing_time",
            Self::HttpRequestTime => "http_request_time",
            Self::RetryPauseTime => "retry_pause_time",
            Self::ResponseProcessingTime => "response_processing_time",
            Self::Exception => "exception",
            Self::StatusCode => "status_code",
            Self::ServiceName => "service_name",
            Self::ServiceEndpoint => "service_endpoint",
            Self::RedirectLocation => "redirect_location",
            Self::ErrorCode => "error_code",
            Self::RequestId => "request_id",
        }
    }
}

/// Point-in-time copy of everything a call recorded.
#[derive(Clone, Debug, Default)]
pub struct MetricsSnapshot {
    pub timings: BTreeMap<Field, Duration>,
    pub counters: BTreeMap<Field, u64>,
    pub properties: BTreeMap<Field, String>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    timings: Mutex<BTreeMap<Field, Duration>>,
    counters: Mutex<BTreeMap<Field, u64>>,
    properties: Mutex<BTreeMap<Field, String>>,
}

/// Per-call metrics sink carried in the execution context.
///
/// The handle is cheap to clone; a disabled sink makes every recording call a
/// no-op.
#[derive(Clone, Debug, Default)]
pub struct RequestMetrics {
    inner: Option<Arc<MetricsInner>>,
}

impl RequestMetrics {
    pub fn enabled() -> Self {
        Self {
            inner: Some(Arc::new(MetricsInner::default())),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn add_time(&self, field: Field, elapsed: Duration) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut timings = lock_unpoisoned(&inner.timings);
        let total = timings.entry(field).or_insert(Duration::ZERO);
        *total = total.saturating_add(elapsed);
    }

    pub fn set_counter(&self, field: Field, value: u64) {
        let Some(inner) = &self.inner else {
            return;
        };
        lock_unpoisoned(&inner.counters).insert(field, value);
    }

    pub fn increment_counter(&self, field: Field) {
        let Some(inner) = &self.inner else {
            return;
        };
        *lock_unpoisoned(&inner.counters).entry(field).or_insert(0) += 1;
    }

    pub fn add_property(&self, field: Field, value: impl Into<String>) {
        let Some(inner) = &self.inner else {
            return;
        };
        lock_unpoisoned(&inner.properties).insert(field, value.into());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let Some(inner) = &self.inner else {
            return MetricsSnapshot::default();
        };
        MetricsSnapshot {
            timings: lock_unpoisoned(&inner.timings).clone(),
            counters: lock_unpoisoned(&inner.counters).clone(),
            properties: lock_unpoisoned(&inner.properties).clone(),
        }
    }
}
