use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::header::DATE;
use tracing::warn;

use crate::error::ServiceError;
use crate::response::HttpResponse;

/// Source of wall-clock time for signing and skew measurement.
pub trait Clock: Send + Sync {
    fn now_system(&self) -> SystemTime;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Signed device-minus-server offset in whole seconds, shared by every call
/// on a client.
///
/// Initialized to zero and updated when the server reports a clock-skew
/// error; never reset. Last writer wins.
#[derive(Clone, Debug, Default)]
pub struct ClockSkew {
    offset_seconds: Arc<AtomicI64>,
}

impl ClockSkew {
    pub fn offset(&self) -> i64 {
        self.offset_seconds.load(Ordering::Relaxed)
    }

    pub fn set_offset(&self, seconds: i64) {
        self.offset_seconds.store(seconds, Ordering::Relaxed);
    }
}

/// Clock capability handed to signers: device time corrected toward the
/// server's view of "now".
pub struct SigningClock {
    clock: Arc<dyn Clock>,
    skew: ClockSkew,
}

impl SigningClock {
    pub(crate) fn new(clock: Arc<dyn Clock>, skew: ClockSkew) -> Self {
        Self { clock, skew }
    }

    /// Device time shifted by the recorded offset. The offset is device
    /// minus server, so subtracting it approximates the server's clock.
    pub fn now(&self) -> SystemTime {
        let now = self.clock.now_system();
        let offset = self.skew.offset();
        if offset >= 0 {
            now - Duration::from_secs(offset as u64)
        } else {
            now + Duration::from_secs(offset.unsigned_abs())
        }
    }

    pub fn skew_seconds(&self) -> i64 {
        self.skew.offset()
    }
}

/// Recovers the server's clock from a clock-skew error response and returns
/// the device-minus-server offset in whole seconds, truncating toward zero.
///
/// The `Date` header wins when present; otherwise the server timestamp is
/// extracted from the error message body. Any parse failure yields zero.
pub(crate) fn parse_clock_skew_offset(
    clock: &dyn Clock,
    response: &HttpResponse,
    error: &ServiceError,
) -> i64 {
    let device_now = clock.now_system();
    let date_header = response
        .headers()
        .get(DATE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty());

    let server_time = match date_header {
        Some(header) => parse_rfc822_date(header),
        // Some services omit the Date header; their error message carries
        // the server timestamp instead.
        None => server_date_from_message(error.message()).and_then(parse_compressed_iso8601_date),
    };

    let Some(server_time) = server_time else {
        warn!(
            message = error.message(),
            "unable to parse clock skew offset from response"
        );
        return 0;
    };

    (epoch_millis(device_now) - epoch_millis(server_time)) / 1000
}

/// RFC 822 date, the format of the HTTP `Date` header.
pub(crate) fn parse_rfc822_date(text: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(text.trim()).ok()
}

/// Compact ISO 8601 (`YYYYMMDDTHHMMSSZ`), the format embedded in
/// signature-expired error messages.
pub(crate) fn parse_compressed_iso8601_date(text: &str) -> Option<SystemTime> {
    let parsed = chrono::NaiveDateTime::parse_from_str(text.trim(), "%Y%m%dT%H%M%SZ").ok()?;
    let timestamp = parsed.and_utc().timestamp();
    if timestamp >= 0 {
        Some(UNIX_EPOCH + Duration::from_secs(timestamp as u64))
    } else {
        UNIX_EPOCH.checked_sub(Duration::from_secs(timestamp.unsigned_abs()))
    }
}

/// Extracts the server timestamp from an error message shaped like
/// `"Signature expired: ... is now earlier than ... (20130401T040113Z - 15 min.)"`:
/// the first parenthesized group before either `" + 15"` or `" - 15"`.
///
/// Returns `None` when either delimiter is missing or they appear out of
/// order, rather than slicing out of bounds.
pub(crate) fn server_date_from_message(message: &str) -> Option<&str> {
    let open = message.find('(')?;
    let end = match message.find(" + 15") {
        Some(position) => position,
        None => message.find(" - 15")?,
    };
    if end <= open + 1 {
        return None;
    }
    Some(&message[open + 1..end])
}

fn epoch_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis().min(i64::MAX as u128) as i64,
        Err(before_epoch) => -(before_epoch.duration().as_millis().min(i64::MAX as u128) as i64),
    }
}
