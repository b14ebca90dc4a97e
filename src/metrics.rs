use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;
use crate::response::Response;
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionMetricsSnapshot {
    pub requests_created: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub requests_cancelled: u64,
    pub retries: u64,
    pub adaptation_failures: u64,
    pub transport_errors: u64,
    pub validation_failures: u64,
    pub in_flight: u64,
    pub status_counts: BTreeMap<u16, u64>,
    pub error_counts: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct SessionMetrics {
    inner: Option<Arc<SessionMetricsInner>>,
}

#[derive(Debug, Default)]
struct SessionMetricsInner {
    requests_created: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    requests_cancelled: AtomicU64,
    retries: AtomicU64,
    adaptation_failures: AtomicU64,
    transport_errors: AtomicU64,
    validation_failures: AtomicU64,
    in_flight: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

pub(crate) struct InFlightGuard {
    inner: Option<Arc<SessionMetricsInner>>,
}

impl SessionMetrics {
    pub(crate) fn enabled() -> Self {
        Self {
            inner: Some(Arc::new(SessionMetricsInner::default())),
        }
    }

    pub(crate) fn disabled() -> Self {
        Self::default()
    }

    pub(crate) fn record_request_created(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.requests_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_in_flight(&self) -> InFlightGuard {
        match &self.inner {
            Some(inner) => {
                inner.in_flight.fetch_add(1, Ordering::Relaxed);
                InFlightGuard {
                    inner: Some(Arc::clone(inner)),
                }
            }
            None => InFlightGuard { inner: None },
        }
    }

    pub(crate) fn record_retry(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request_completed(&self, result: &Result<Response, Error>) {
        let Some(inner) = &self.inner else {
            return;
        };

        match result {
            Ok(response) => {
                inner.requests_succeeded.fetch_add(1, Ordering::Relaxed);
                self.add_status_count(response.status().as_u16());
            }
            Err(Error::ExplicitlyCancelled) => {
                inner.requests_cancelled.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                inner.requests_failed.fetch_add(1, Ordering::Relaxed);
                self.record_error(inner, error);
            }
        }
    }

    fn record_error(&self, inner: &SessionMetricsInner, error: &Error) {
        match error {
            Error::AdaptationFailed { .. } => {
                inner.adaptation_failures.fetch_add(1, Ordering::Relaxed);
            }
            Error::Transport { source, .. } => {
                inner.transport_errors.fetch_add(1, Ordering::Relaxed);
                self.add_error_count(format!("transport:{}", source.kind()));
                return;
            }
            Error::Validation { status, .. } => {
                inner.validation_failures.fetch_add(1, Ordering::Relaxed);
                self.add_status_count(*status);
            }
            Error::RetryExhausted { last, .. } => {
                self.add_error_count(format!(
                    "{}:{}",
                    error.code().as_str(),
                    last.code().as_str()
                ));
                return;
            }
            _ => {}
        }
        self.add_error_count(error.code().as_str().to_owned());
    }

    fn add_status_count(&self, status: u16) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut counts = lock_unpoisoned(&inner.status_counts);
        *counts.entry(status).or_insert(0) += 1;
    }

    fn add_error_count(&self, key: String) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut counts = lock_unpoisoned(&inner.error_counts);
        *counts.entry(key).or_insert(0) += 1;
    }

    pub(crate) fn snapshot(&self) -> SessionMetricsSnapshot {
        let Some(inner) = &self.inner else {
            return SessionMetricsSnapshot::default();
        };
        SessionMetricsSnapshot {
            requests_created: inner.requests_created.load(Ordering::Relaxed),
            requests_succeeded: inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: inner.requests_failed.load(Ordering::Relaxed),
            requests_cancelled: inner.requests_cancelled.load(Ordering::Relaxed),
            retries: inner.retries.load(Ordering::Relaxed),
            adaptation_failures: inner.adaptation_failures.load(Ordering::Relaxed),
            transport_errors: inner.transport_errors.load(Ordering::Relaxed),
            validation_failures: inner.validation_failures.load(Ordering::Relaxed),
            in_flight: inner.in_flight.load(Ordering::Relaxed),
            status_counts: lock_unpoisoned(&inner.status_counts).clone(),
            error_counts: lock_unpoisoned(&inner.error_counts).clone(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            inner.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
