use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::error::{BoxError, Error};
use crate::request::Request;
use crate::session::Session;

pub type AdaptResult = Result<http::Request<Bytes>, BoxError>;

#[derive(Clone, Debug)]
pub enum RetryResult {
    Retry,
    RetryWithDelay(Duration),
    DoNotRetry,
    DoNotRetryWithError(Error),
}

impl RetryResult {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry | Self::RetryWithDelay(_))
    }

    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::RetryWithDelay(delay) => Some(*delay),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::DoNotRetryWithError(error) => Some(error),
            _ => None,
        }
    }
}

/// How a retrier chain treats [`RetryResult::DoNotRetry`] from a member that is not last.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryChainMode {
    /// `DoNotRetry` defers to the next retrier; any other result stops the chain.
    #[default]
    DeferOnDoNotRetry,
    /// The first retrier's answer is final, including `DoNotRetry`.
    FirstResponse,
}

pub trait RequestAdapter: Send + Sync {
    fn adapt<'a>(
        &'a self,
        request: http::Request<Bytes>,
        session: &'a Session,
    ) -> BoxFuture<'a, AdaptResult>;
}

pub trait RequestRetrier: Send + Sync {
    fn retry<'a>(
        &'a self,
        request: &'a Request,
        session: &'a Session,
        error: &'a Error,
    ) -> BoxFuture<'a, RetryResult>;
}

type AdaptFn =
    dyn Fn(http::Request<Bytes>, Session) -> BoxFuture<'static, AdaptResult> + Send + Sync;
type RetryFn = dyn Fn(Request, Session, Error) -> BoxFuture<'static, RetryResult> + Send + Sync;

/// Closure-backed [`RequestAdapter`].
#[derive(Clone)]
pub struct Adapter {
    handler: Arc<AdaptFn>,
}

impl Adapter {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(http::Request<Bytes>, Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AdaptResult> + Send + 'static,
    {
        Self {
            handler: Arc::new(
                move |request: http::Request<Bytes>,
                      session: Session|
                      -> BoxFuture<'static, AdaptResult> {
                    Box::pin(handler(request, session))
                },
            ),
        }
    }

    pub fn sync<F>(handler: F) -> Self
    where
        F: Fn(http::Request<Bytes>) -> AdaptResult + Send + Sync + 'static,
    {
        Self::new(move |request, _session| std::future::ready(handler(request)))
    }
}

impl RequestAdapter for Adapter {
    fn adapt<'a>(
        &'a self,
        request: http::Request<Bytes>,
        session: &'a Session,
    ) -> BoxFuture<'a, AdaptResult> {
        (self.handler)(request, session.clone())
    }
}

/// Closure-backed [`RequestRetrier`].
#[derive(Clone)]
pub struct Retrier {
    handler: Arc<RetryFn>,
}

impl Retrier {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Request, Session, Error) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RetryResult> + Send + 'static,
    {
        Self {
            handler: Arc::new(
                move |request: Request,
                      session: Session,
                      error: Error|
                      -> BoxFuture<'static, RetryResult> {
                    Box::pin(handler(request, session, error))
                },
            ),
        }
    }

    pub fn sync<F>(handler: F) -> Self
    where
        F: Fn(&Request, &Error) -> RetryResult + Send + Sync + 'static,
    {
        Self::new(move |request, _session, error| std::future::ready(handler(&request, &error)))
    }
}

impl RequestRetrier for Retrier {
    fn retry<'a>(
        &'a self,
        request: &'a Request,
        session: &'a Session,
        error: &'a Error,
    ) -> BoxFuture<'a, RetryResult> {
        (self.handler)(request.clone(), session.clone(), error.clone())
    }
}

/// Ordered adapters and retriers consulted as one.
///
/// Adapters run in insertion order, each seeing the previous one's output; the
/// first failure ends the chain. Retriers run in insertion order and the first
/// decisive result wins (see [`RetryChainMode`]). An empty interceptor adapts
/// to the unchanged request and answers `DoNotRetry`.
#[derive(Clone, Default)]
pub struct Interceptor {
    adapters: Vec<Arc<dyn RequestAdapter>>,
    retriers: Vec<Arc<dyn RequestRetrier>>,
    retry_chain_mode: RetryChainMode,
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Interceptor")
            .field("adapters", &self.adapters.len())
            .field("retriers", &self.retriers.len())
            .field("retry_chain_mode", &self.retry_chain_mode)
            .finish()
    }
}

impl Interceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adapter<A>(self, adapter: A) -> Self
    where
        A: RequestAdapter + 'static,
    {
        self.adapter_arc(Arc::new(adapter))
    }

    pub fn adapter_arc(mut self, adapter: Arc<dyn RequestAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn retrier<R>(self, retrier: R) -> Self
    where
        R: RequestRetrier + 'static,
    {
        self.retrier_arc(Arc::new(retrier))
    }

    pub fn retrier_arc(mut self, retrier: Arc<dyn RequestRetrier>) -> Self {
        self.retriers.push(retrier);
        self
    }

    pub fn retry_chain_mode(mut self, retry_chain_mode: RetryChainMode) -> Self {
        self.retry_chain_mode = retry_chain_mode;
        self
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    pub fn retrier_count(&self) -> usize {
        self.retriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty() && self.retriers.is_empty()
    }

    pub(crate) fn extend(mut self, other: &Interceptor) -> Self {
        self.adapters.extend(other.adapters.iter().cloned());
        self.retriers.extend(other.retriers.iter().cloned());
        self
    }

    /// Session members first, then request members; the session's chain mode applies.
    pub(crate) fn merged(session: &Interceptor, request: &Interceptor) -> Interceptor {
        if request.is_empty() {
            return session.clone();
        }
        session.clone().extend(request)
    }

    pub async fn adapt_request(
        &self,
        request: http::Request<Bytes>,
        session: &Session,
    ) -> AdaptResult {
        let mut current = request;
        for adapter in &self.adapters {
            current = adapter.adapt(current, session).await?;
        }
        Ok(current)
    }

    pub async fn retry_request(
        &self,
        request: &Request,
        session: &Session,
        error: &Error,
    ) -> RetryResult {
        for retrier in &self.retriers {
            let result = retrier.retry(request, session, error).await;
            match (self.retry_chain_mode, &result) {
                (RetryChainMode::DeferOnDoNotRetry, RetryResult::DoNotRetry) => continue,
                _ => return result,
            }
        }
        RetryResult::DoNotRetry
    }
}

impl RequestAdapter for Interceptor {
    fn adapt<'a>(
        &'a self,
        request: http::Request<Bytes>,
        session: &'a Session,
    ) -> BoxFuture<'a, AdaptResult> {
        Box::pin(self.adapt_request(request, session))
    }
}

impl RequestRetrier for Interceptor {
    fn retry<'a>(
        &'a self,
        request: &'a Request,
        session: &'a Session,
        error: &'a Error,
    ) -> BoxFuture<'a, RetryResult> {
        Box::pin(self.retry_request(request, session, error))
    }
}
