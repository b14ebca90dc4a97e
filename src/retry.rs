use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use futures_util::future::BoxFuture;
use http::{Method, StatusCode};
use rand::Rng;

use crate::error::{Error, TransportErrorKind};
use crate::interceptor::{RequestRetrier, RetryResult};
use crate::request::Request;
use crate::session::Session;

const DEFAULT_RETRY_LIMIT: u32 = 2;
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
const DEFAULT_BACKOFF_SCALE: f64 = 2.0;

/// Exponential backoff retrier.
///
/// A request is retried when its method is retryable, it has been retried
/// fewer than `retry_limit` times, and it failed either with a retryable
/// transport error or with a retryable response status. The n-th retry
/// (counting from 0) waits `base * scale^n`.
#[derive(Clone)]
pub struct RetryPolicy {
    retry_limit: u32,
    exponential_backoff_base: Duration,
    exponential_backoff_scale: f64,
    jitter_ratio: f64,
    retryable_methods: HashSet<Method>,
    retryable_status_codes: BTreeSet<u16>,
    retryable_transport_error_kinds: BTreeSet<TransportErrorKind>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods = self
            .retryable_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>();
        methods.sort_unstable();
        formatter
            .debug_struct("RetryPolicy")
            .field("retry_limit", &self.retry_limit)
            .field("exponential_backoff_base", &self.exponential_backoff_base)
            .field("exponential_backoff_scale", &self.exponential_backoff_scale)
            .field("jitter_ratio", &self.jitter_ratio)
            .field("retryable_methods", &methods)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field(
                "retryable_transport_error_kinds",
                &self.retryable_transport_error_kinds,
            )
            .finish()
    }
}

impl RetryPolicy {
    pub fn standard() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            exponential_backoff_base: DEFAULT_BACKOFF_BASE,
            exponential_backoff_scale: DEFAULT_BACKOFF_SCALE,
            jitter_ratio: 0.0,
            retryable_methods: default_retryable_methods(),
            retryable_status_codes: default_retryable_status_codes(),
            retryable_transport_error_kinds: default_retryable_transport_error_kinds(),
        }
    }

    /// Retries only requests whose connection dropped mid-flight.
    pub fn connection_lost() -> Self {
        Self::standard()
            .retryable_status_codes([])
            .retryable_transport_error_kinds([TransportErrorKind::ConnectionLost])
    }

    pub fn retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn exponential_backoff_base(mut self, base: Duration) -> Self {
        self.exponential_backoff_base = base.max(Duration::from_millis(1));
        self
    }

    pub fn exponential_backoff_scale(mut self, scale: f64) -> Self {
        if scale.is_finite() {
            self.exponential_backoff_scale = scale.max(f64::MIN_POSITIVE);
        }
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = if jitter_ratio.is_nan() {
            0.0
        } else {
            jitter_ratio.clamp(0.0, 1.0)
        };
        self
    }

    pub fn retryable_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.retryable_methods = methods.into_iter().collect();
        self
    }

    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn retryable_transport_error_kinds(
        mut self,
        kinds: impl IntoIterator<Item = TransportErrorKind>,
    ) -> Self {
        self.retryable_transport_error_kinds = kinds.into_iter().collect();
        self
    }

    pub fn configured_retry_limit(&self) -> u32 {
        self.retry_limit
    }

    pub fn is_retryable_method(&self, method: &Method) -> bool {
        self.retryable_methods.contains(method)
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_status_codes.contains(&status.as_u16())
    }

    pub fn is_retryable_transport_error(&self, kind: TransportErrorKind) -> bool {
        self.retryable_transport_error_kinds.contains(&kind)
    }

    /// Whether `error` on `request` is worth retrying, ignoring the retry limit.
    pub fn should_retry(&self, request: &Request, error: &Error) -> bool {
        self.is_retryable_method(&request.current_method())
            && self.is_retryable_outcome(request.response_status(), error)
    }

    pub fn retry_decision(&self, request: &Request, error: &Error) -> RetryResult {
        self.decide(
            &request.current_method(),
            request.retry_count(),
            request.response_status(),
            error,
        )
    }

    pub(crate) fn decide(
        &self,
        method: &Method,
        retry_count: u32,
        status: Option<StatusCode>,
        error: &Error,
    ) -> RetryResult {
        if !self.is_retryable_method(method) {
            return RetryResult::DoNotRetry;
        }
        if retry_count >= self.retry_limit {
            return RetryResult::DoNotRetry;
        }
        if !self.is_retryable_outcome(status, error) {
            return RetryResult::DoNotRetry;
        }
        RetryResult::RetryWithDelay(self.backoff_for_retry(retry_count))
    }

    fn is_retryable_outcome(&self, status: Option<StatusCode>, error: &Error) -> bool {
        if let Some(kind) = error.transport_kind() {
            return self.is_retryable_transport_error(kind);
        }
        match status {
            Some(status) => self.is_retryable_status(status),
            None => false,
        }
    }

    pub fn backoff_for_retry(&self, retry_count: u32) -> Duration {
        let multiplier = self
            .exponential_backoff_scale
            .powf(f64::from(retry_count));
        let seconds = self.exponential_backoff_base.as_secs_f64() * multiplier;
        let backoff = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);
        self.apply_jitter(backoff)
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON || backoff == Duration::MAX {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }

        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(low..=high))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl RequestRetrier for RetryPolicy {
    fn retry<'a>(
        &'a self,
        request: &'a Request,
        _session: &'a Session,
        error: &'a Error,
    ) -> BoxFuture<'a, RetryResult> {
        Box::pin(std::future::ready(self.retry_decision(request, error)))
    }
}

fn default_retryable_methods() -> HashSet<Method> {
    [
        Method::GET,
        Method::HEAD,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
        Method::TRACE,
    ]
    .into_iter()
    .collect()
}

fn default_retryable_status_codes() -> BTreeSet<u16> {
    [408_u16, 500, 502, 503, 504].into_iter().collect()
}

fn default_retryable_transport_error_kinds() -> BTreeSet<TransportErrorKind> {
    [
        TransportErrorKind::Timeout,
        TransportErrorKind::Dns,
        TransportErrorKind::Connect,
        TransportErrorKind::ConnectionLost,
        TransportErrorKind::NotConnected,
        TransportErrorKind::Tls,
        TransportErrorKind::Read,
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::{Method, StatusCode};

    use super::RetryPolicy;
    use crate::error::{Error, TransportError, TransportErrorKind, ValidationFailure};
    use crate::interceptor::RetryResult;

    fn transport_error(kind: TransportErrorKind) -> Error {
        Error::Transport {
            method: Method::GET,
            uri: "https://api.example.com/items".to_owned(),
            source: TransportError::new(kind, "connection dropped"),
        }
    }

    fn status_error(code: u16) -> Error {
        Error::Validation {
            status: code,
            method: Method::GET,
            uri: "https://api.example.com/items".to_owned(),
            reason: ValidationFailure::UnacceptableStatusCode { code },
        }
    }

    fn delay_of(result: &RetryResult) -> Option<Duration> {
        match result {
            RetryResult::RetryWithDelay(delay) => Some(*delay),
            RetryResult::DoNotRetry => None,
            other => panic!("unexpected retry result: {other:?}"),
        }
    }

    #[test]
    fn backoff_grows_exponentially_until_the_retry_limit() {
        let policy = RetryPolicy::standard()
            .retry_limit(2)
            .exponential_backoff_base(Duration::from_millis(500))
            .exponential_backoff_scale(2.0);
        let error = transport_error(TransportErrorKind::Timeout);

        let attempts = (0..3)
            .map(|retry_count| delay_of(&policy.decide(&Method::GET, retry_count, None, &error)))
            .collect::<Vec<_>>();

        assert_eq!(
            attempts,
            vec![
                Some(Duration::from_millis(500)),
                Some(Duration::from_secs(1)),
                None
            ]
        );
    }

    #[test]
    fn default_backoff_doubles_from_half_a_second() {
        let policy = RetryPolicy::standard();

        let delays = (0..4)
            .map(|retry_count| policy.backoff_for_retry(retry_count))
            .collect::<Vec<_>>();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[test]
    fn backoff_values_follow_base_times_scale_power() {
        let policy = RetryPolicy::standard()
            .exponential_backoff_base(Duration::from_millis(100))
            .exponential_backoff_scale(3.0);

        assert_eq!(policy.backoff_for_retry(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_retry(2), Duration::from_millis(900));
    }

    #[test]
    fn idempotent_methods_retry_and_others_never_do() {
        let policy = RetryPolicy::standard();
        let error = transport_error(TransportErrorKind::ConnectionLost);

        for method in [
            Method::GET,
            Method::HEAD,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
            Method::TRACE,
        ] {
            assert!(
                policy.decide(&method, 0, None, &error).is_retry(),
                "{method} should be retried"
            );
        }

        for method in [Method::POST, Method::PATCH, Method::CONNECT] {
            for kind in [
                TransportErrorKind::ConnectionLost,
                TransportErrorKind::Timeout,
                TransportErrorKind::Other,
            ] {
                assert!(
                    !policy
                        .decide(&method, 0, None, &transport_error(kind))
                        .is_retry(),
                    "{method} must not be retried"
                );
            }
            assert!(
                !policy
                    .decide(&method, 0, Some(StatusCode::SERVICE_UNAVAILABLE), &status_error(503))
                    .is_retry()
            );
        }
    }

    #[test]
    fn only_configured_status_codes_are_retried() {
        let policy = RetryPolicy::standard();
        let retryable = [408_u16, 500, 502, 503, 504];

        for code in 100_u16..=599 {
            let status = StatusCode::from_u16(code).expect("status code in range");
            let result = policy.decide(&Method::GET, 0, Some(status), &status_error(code));
            assert_eq!(
                result.is_retry(),
                retryable.contains(&code),
                "unexpected retry decision for {code}"
            );
        }
    }

    #[test]
    fn non_retryable_transport_errors_are_not_retried() {
        let policy = RetryPolicy::standard();

        for kind in [TransportErrorKind::Cancelled, TransportErrorKind::Other] {
            let result = policy.decide(&Method::GET, 0, None, &transport_error(kind));
            assert!(matches!(result, RetryResult::DoNotRetry));
        }
    }

    #[test]
    fn errors_without_status_or_transport_kind_are_not_retried() {
        let policy = RetryPolicy::standard();
        let error = Error::custom("decoder failed");

        assert!(matches!(
            policy.decide(&Method::GET, 0, None, &error),
            RetryResult::DoNotRetry
        ));
    }

    #[test]
    fn zero_retry_limit_disables_retries() {
        let policy = RetryPolicy::standard().retry_limit(0);
        let error = transport_error(TransportErrorKind::Timeout);

        assert!(matches!(
            policy.decide(&Method::GET, 0, None, &error),
            RetryResult::DoNotRetry
        ));
    }

    #[test]
    fn connection_lost_policy_ignores_other_failures() {
        let policy = RetryPolicy::connection_lost();

        assert!(
            policy
                .decide(&Method::GET, 0, None, &transport_error(TransportErrorKind::ConnectionLost))
                .is_retry()
        );
        assert!(
            !policy
                .decide(&Method::GET, 0, None, &transport_error(TransportErrorKind::Timeout))
                .is_retry()
        );
        assert!(
            !policy
                .decide(&Method::GET, 0, Some(StatusCode::SERVICE_UNAVAILABLE), &status_error(503))
                .is_retry()
        );
    }

    #[test]
    fn jittered_backoff_stays_within_ratio() {
        let policy = RetryPolicy::standard()
            .exponential_backoff_base(Duration::from_millis(100))
            .exponential_backoff_scale(2.0)
            .jitter_ratio(0.5);

        for _ in 0..256 {
            let backoff = policy.backoff_for_retry(1);
            assert!(backoff >= Duration::from_millis(100));
            assert!(backoff <= Duration::from_millis(300));
        }
    }

    #[test]
    fn invalid_scale_is_ignored() {
        let policy = RetryPolicy::standard()
            .exponential_backoff_base(Duration::from_secs(1))
            .exponential_backoff_scale(f64::NAN)
            .exponential_backoff_scale(f64::INFINITY);

        assert_eq!(policy.backoff_for_retry(1), Duration::from_secs(2));
    }
}
