use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use http::header::{HeaderName, HeaderValue};
use tokio::runtime::Handle;

use crate::ReqlineResult;
use crate::config::SessionConfig;
use crate::error::{Error, TransportError, TransportErrorKind};
use crate::handlers::{CachedResponseHandler, RedirectHandler};
use crate::interceptor::{Interceptor, RequestAdapter, RequestRetrier, RetryChainMode};
use crate::metrics::{SessionMetrics, SessionMetricsSnapshot};
use crate::observe::SessionObserver;
use crate::request::RequestBuilder;
use crate::transport::{DispatchContext, HyperTransport, Transport, TransportResult};
use crate::util::{parse_header_name, parse_header_value};

pub struct SessionBuilder {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    interceptor: Interceptor,
    redirect_handler: Option<Arc<dyn RedirectHandler>>,
    cached_response_handler: Option<Arc<dyn CachedResponseHandler>>,
    observers: Vec<Arc<dyn SessionObserver>>,
    runtime: Option<Handle>,
}

impl SessionBuilder {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            config: SessionConfig::standard(),
            transport,
            interceptor: Interceptor::new(),
            redirect_handler: None,
            cached_response_handler: None,
            observers: Vec::new(),
            runtime: None,
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.config.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> ReqlineResult<Self> {
        let header_name = parse_header_name(name)?;
        let header_value = parse_header_value(name, value)?;
        Ok(self.default_header(header_name, header_value))
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.config = self.config.with_request_timeout(request_timeout);
        self
    }

    pub fn start_requests_immediately(mut self, start: bool) -> Self {
        self.config.start_requests_immediately = start;
        self
    }

    pub fn retry_ceiling(mut self, retry_ceiling: u32) -> Self {
        self.config.retry_ceiling = Some(retry_ceiling);
        self
    }

    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.config.metrics_enabled = enabled;
        self
    }

    pub fn adapter<A>(mut self, adapter: A) -> Self
    where
        A: RequestAdapter + 'static,
    {
        self.interceptor = self.interceptor.adapter(adapter);
        self
    }

    pub fn retrier<R>(mut self, retrier: R) -> Self
    where
        R: RequestRetrier + 'static,
    {
        self.interceptor = self.interceptor.retrier(retrier);
        self
    }

    /// Appends the members of `interceptor` after those already registered.
    pub fn interceptor(mut self, interceptor: Interceptor) -> Self {
        self.interceptor = self.interceptor.extend(&interceptor);
        self
    }

    pub fn retry_chain_mode(mut self, retry_chain_mode: RetryChainMode) -> Self {
        self.interceptor = self.interceptor.retry_chain_mode(retry_chain_mode);
        self
    }

    pub fn redirect_handler<H>(self, handler: H) -> Self
    where
        H: RedirectHandler + 'static,
    {
        self.redirect_handler_arc(Arc::new(handler))
    }

    pub fn redirect_handler_arc(mut self, handler: Arc<dyn RedirectHandler>) -> Self {
        self.redirect_handler = Some(handler);
        self
    }

    pub fn cached_response_handler<H>(self, handler: H) -> Self
    where
        H: CachedResponseHandler + 'static,
    {
        self.cached_response_handler_arc(Arc::new(handler))
    }

    pub fn cached_response_handler_arc(mut self, handler: Arc<dyn CachedResponseHandler>) -> Self {
        self.cached_response_handler = Some(handler);
        self
    }

    pub fn observer<O>(self, observer: O) -> Self
    where
        O: SessionObserver + 'static,
    {
        self.observer_arc(Arc::new(observer))
    }

    pub fn observer_arc(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Runtime that request drivers are spawned on. Defaults to the runtime
    /// `try_build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn try_build(self) -> ReqlineResult<Session> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| Error::NoRuntime)?,
        };
        let metrics = if self.config.metrics_enabled {
            SessionMetrics::enabled()
        } else {
            SessionMetrics::disabled()
        };

        Ok(Session {
            inner: Arc::new(SessionInner {
                config: self.config,
                transport: self.transport,
                interceptor: self.interceptor,
                redirect_handler: self.redirect_handler,
                cached_response_handler: self.cached_response_handler,
                observers: self.observers,
                metrics,
                runtime,
                next_request_id: AtomicU64::new(1),
            }),
        })
    }

    #[track_caller]
    pub fn build(self) -> Session {
        self.try_build().unwrap_or_else(|error| {
            panic!("failed to build reqline session: {error}; use try_build() to handle configuration errors")
        })
    }
}

/// Shared request factory. Cloning is cheap; every clone refers to the same
/// transport, interceptor and counters.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    interceptor: Interceptor,
    redirect_handler: Option<Arc<dyn RedirectHandler>>,
    cached_response_handler: Option<Arc<dyn CachedResponseHandler>>,
    observers: Vec<Arc<dyn SessionObserver>>,
    metrics: SessionMetrics,
    runtime: Handle,
    next_request_id: AtomicU64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Session")
            .field("config", &self.inner.config)
            .field("interceptor", &self.inner.interceptor)
            .field("observers", &self.inner.observers.len())
            .finish()
    }
}

impl Session {
    pub fn builder<T>(transport: T) -> SessionBuilder
    where
        T: Transport + 'static,
    {
        SessionBuilder::new(Arc::new(transport))
    }

    pub fn builder_arc(transport: Arc<dyn Transport>) -> SessionBuilder {
        SessionBuilder::new(transport)
    }

    /// Builder preconfigured with the plain-HTTP hyper transport.
    pub fn http() -> SessionBuilder {
        Self::builder(HyperTransport::new())
    }

    pub fn request(&self, method: Method, uri: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, uri.into())
    }

    pub fn get(&self, uri: impl Into<String>) -> RequestBuilder {
        self.request(Method::GET, uri)
    }

    pub fn head(&self, uri: impl Into<String>) -> RequestBuilder {
        self.request(Method::HEAD, uri)
    }

    pub fn post(&self, uri: impl Into<String>) -> RequestBuilder {
        self.request(Method::POST, uri)
    }

    pub fn put(&self, uri: impl Into<String>) -> RequestBuilder {
        self.request(Method::PUT, uri)
    }

    pub fn delete(&self, uri: impl Into<String>) -> RequestBuilder {
        self.request(Method::DELETE, uri)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn interceptor(&self) -> &Interceptor {
        &self.inner.interceptor
    }

    pub fn metrics_snapshot(&self) -> SessionMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<SessionInner>) -> Option<Session> {
        inner.upgrade().map(|inner| Session { inner })
    }

    pub(crate) fn next_request_id(&self) -> u64 {
        self.inner.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn metrics(&self) -> &SessionMetrics {
        &self.inner.metrics
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    pub(crate) fn notify_observers(&self, notify: impl Fn(&dyn SessionObserver)) {
        for observer in &self.inner.observers {
            notify(observer.as_ref());
        }
    }

    pub(crate) fn dispatch_context(&self, request_id: u64, retry_count: u32) -> DispatchContext {
        DispatchContext::new(request_id, retry_count)
            .with_redirect_handler(self.inner.redirect_handler.clone())
            .with_cached_response_handler(self.inner.cached_response_handler.clone())
    }

    pub(crate) async fn dispatch(
        &self,
        request: http::Request<Bytes>,
        context: DispatchContext,
    ) -> TransportResult {
        let send = self.inner.transport.send(request, context);
        let Some(request_timeout) = self.inner.config.request_timeout else {
            return send.await;
        };
        match tokio::time::timeout(request_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::new(
                TransportErrorKind::Timeout,
                format!("request timed out after {} ms", request_timeout.as_millis()),
            )),
        }
    }
}
