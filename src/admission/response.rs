//! Ready-to-send rejection responses.

use std::time::Duration;

use http::header::{CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::json;

use crate::ratelimit::duration_millis;

/// A 429 response for a caller that exceeded its quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionResponse {
    status: StatusCode,
    message: String,
    retry_after: Duration,
}

impl RejectionResponse {
    /// A `429 Too Many Requests` with `message` as the JSON error.
    pub fn too_many_requests(message: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: message.into(),
            retry_after,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Time until the caller's window resets.
    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }

    /// The JSON body, `{"error": "<message>"}`.
    pub fn body(&self) -> String {
        json!({ "error": self.message }).to_string()
    }

    /// Response headers: JSON content type and `Retry-After` in whole
    /// seconds, rounded up and at least 1.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let secs = duration_millis(self.retry_after).div_ceil(1000).max(1);
        headers.insert(RETRY_AFTER, HeaderValue::from(secs));
        headers
    }

    /// Build the HTTP response.
    pub fn into_http(self) -> http::Response<String> {
        let headers = self.headers();
        let mut response = http::Response::new(self.body());
        *response.status_mut() = self.status;
        response.headers_mut().extend(headers);
        response
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for RejectionResponse {
    fn into_response(self) -> axum::response::Response {
        self.into_http().map(axum::body::Body::from)
    }
}
