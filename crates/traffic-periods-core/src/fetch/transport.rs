//! One HTTP exchange with the traffic report endpoint.
//!
//! [`Transport`] is the seam between the fetcher and the network. The
//! production implementation, [`HttpTransport`], wraps a blocking `reqwest`
//! client; tests script their own implementation.

use std::time::Duration;

use reqwest::{
    StatusCode,
    blocking::{Client, Response},
    header::{HeaderMap, HeaderValue, RETRY_AFTER},
};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    config::ApiKey,
    model::{DateRange, Granularity, SegmentId},
};

const API_KEY_HEADER: &str = "X-Api-Key";
const REPORT_PATH: &str = "/reports/traffic";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%SZ";
const MAX_ERROR_BODY: usize = 500;

/// A single transport failure.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    /// Connection-level failure.
    #[snafu(display("network error: {message}"))]
    Network {
        /// Client error text.
        message: String,
    },

    /// The per-request timeout elapsed.
    #[snafu(display("request timed out"))]
    Timeout,

    /// The server answered with a non-success status other than 429.
    #[snafu(display("server returned HTTP {status}: {body}"))]
    Status {
        /// HTTP status code.
        status: u16,
        /// Start of the response body.
        body: String,
        /// `Retry-After` hint, if sent.
        retry_after: Option<Duration>,
    },

    /// The server rejected the request as too frequent (HTTP 429).
    #[snafu(display("rate limited by server"))]
    RateLimited {
        /// `Retry-After` hint, if sent.
        retry_after: Option<Duration>,
    },

    /// The response body is not a report document.
    #[snafu(display("cannot decode response: {message}"))]
    Decode {
        /// Decoder error text.
        message: String,
    },

    /// The HTTP client could not be built.
    #[snafu(display("cannot set up HTTP client: {message}"))]
    Setup {
        /// Builder error text.
        message: String,
    },
}

impl TransportError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Network { .. }
            | TransportError::Timeout
            | TransportError::RateLimited { .. } => true,
            TransportError::Status { status, .. } => *status >= 500,
            TransportError::Decode { .. } | TransportError::Setup { .. } => false,
        }
    }

    /// Server-provided wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::Status { retry_after, .. }
            | TransportError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Body of one report request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRequest {
    /// Segment id.
    pub id: String,
    /// Start of the span, midnight UTC.
    pub time_start: String,
    /// End of the span (exclusive), midnight UTC after the last day.
    pub time_end: String,
    /// Always `"segments"`.
    pub level: &'static str,
    /// `"per-hour"` or `"per-day"`.
    pub format: &'static str,
}

impl ReportRequest {
    /// Request covering every day of `range`.
    pub fn new(segment: &SegmentId, granularity: Granularity, range: &DateRange) -> Self {
        let start = range.start().and_hms_opt(0, 0, 0).unwrap_or_default();
        let end = range.end_exclusive().and_hms_opt(0, 0, 0).unwrap_or_default();
        Self {
            id: segment.as_str().to_string(),
            time_start: start.format(TIME_FORMAT).to_string(),
            time_end: end.format(TIME_FORMAT).to_string(),
            level: "segments",
            format: granularity.wire_format(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReportResponse {
    #[serde(default)]
    report: Vec<serde_json::Value>,
}

/// Performs one request against the report endpoint.
pub trait Transport {
    /// Send `request` and return the raw records of the `report` array.
    fn send(&self, request: &ReportRequest) -> Result<Vec<serde_json::Value>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: &ReportRequest) -> Result<Vec<serde_json::Value>, TransportError> {
        (**self).send(request)
    }
}

/// Blocking HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    /// Build a client for `api_base` that sends `api_key` with every request.
    pub fn new(api_base: &str, api_key: &ApiKey, timeout: Duration) -> Result<Self, TransportError> {
        let mut key = HeaderValue::from_str(api_key.expose()).map_err(|_| TransportError::Setup {
            message: "API key contains characters not allowed in a header".to_string(),
        })?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Setup {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}{REPORT_PATH}", api_base.trim_end_matches('/')),
        })
    }

    /// Full URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn parse_retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn map_send_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_decode() {
        TransportError::Decode {
            message: e.to_string(),
        }
    } else {
        TransportError::Network {
            message: e.to_string(),
        }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &ReportRequest) -> Result<Vec<serde_json::Value>, TransportError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .map_err(map_send_error)?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return RateLimitedSnafu {
                retry_after: parse_retry_after(&resp),
            }
            .fail();
        }
        if !status.is_success() {
            let retry_after = parse_retry_after(&resp);
            let mut body = resp.text().unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return StatusSnafu {
                status: status.as_u16(),
                body,
                retry_after,
            }
            .fail();
        }

        let parsed: ReportResponse = resp.json().map_err(map_send_error)?;
        Ok(parsed.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn request_body_spans_whole_days() -> Result<(), Box<dyn std::error::Error>> {
        let segment = SegmentId::new("9000001234")?;
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 15).ok_or("date")?,
            NaiveDate::from_ymd_opt(2024, 1, 31).ok_or("date")?,
        )?;

        let req = ReportRequest::new(&segment, Granularity::Hourly, &range);
        let json = serde_json::to_value(&req)?;
        assert_eq!(json["id"], "9000001234");
        assert_eq!(json["time_start"], "2024-01-15 00:00:00Z");
        assert_eq!(json["time_end"], "2024-02-01 00:00:00Z");
        assert_eq!(json["level"], "segments");
        assert_eq!(json["format"], "per-hour");
        Ok(())
    }

    #[test]
    fn transient_classification() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::RateLimited { retry_after: None }.is_transient());
        let server = TransportError::Status {
            status: 503,
            body: String::new(),
            retry_after: Some(Duration::from_secs(4)),
        };
        assert!(server.is_transient());
        assert_eq!(server.retry_after(), Some(Duration::from_secs(4)));

        let client = TransportError::Status {
            status: 403,
            body: "forbidden".to_string(),
            retry_after: None,
        };
        assert!(!client.is_transient());
        assert!(
            !TransportError::Decode {
                message: "x".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn endpoint_joins_base_without_double_slash() -> Result<(), Box<dyn std::error::Error>> {
        let key = ApiKey::new("secret")?;
        let t = HttpTransport::new("https://example.test/v1/", &key, Duration::from_secs(5))?;
        assert_eq!(t.endpoint(), "https://example.test/v1/reports/traffic");
        Ok(())
    }
}
