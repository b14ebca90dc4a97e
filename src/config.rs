use std::time::Duration;

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue, USER_AGENT};

const DEFAULT_USER_AGENT: &str = concat!("reqline/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub default_headers: HeaderMap,
    /// Upper bound for one transport dispatch; expiry surfaces as a retryable timeout.
    pub request_timeout: Option<Duration>,
    /// Resume a request automatically the first time its response is awaited.
    pub start_requests_immediately: bool,
    /// Hard cap on retries per request regardless of what retriers answer.
    pub retry_ceiling: Option<u32>,
    pub metrics_enabled: bool,
}

impl SessionConfig {
    pub fn standard() -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        Self {
            default_headers,
            request_timeout: Some(Duration::from_secs(60)),
            start_requests_immediately: true,
            retry_ceiling: None,
            metrics_enabled: true,
        }
    }

    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn without_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }

    pub fn with_start_requests_immediately(mut self, start: bool) -> Self {
        self.start_requests_immediately = start;
        self
    }

    pub fn with_retry_ceiling(mut self, retry_ceiling: u32) -> Self {
        self.retry_ceiling = Some(retry_ceiling);
        self
    }

    pub fn with_metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::standard()
    }
}
