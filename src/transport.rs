use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::error::{TransportError, TransportErrorKind};
use crate::handlers::{CachedResponse, CachedResponseHandler, RedirectHandler};
use crate::response::ResponseHead;
use crate::util::{is_redirect_status, redact_uri_for_logs, redirect_location, redirect_request};

const DEFAULT_MAX_REDIRECTS: usize = 10;

pub type TransportResult = Result<http::Response<Bytes>, TransportError>;

/// Sends one fully adapted request and delivers the buffered response.
pub trait Transport: Send + Sync {
    fn send(&self, request: http::Request<Bytes>, context: DispatchContext)
    -> BoxFuture<'static, TransportResult>;
}

/// Per-dispatch data the session hands to the transport.
#[derive(Clone)]
pub struct DispatchContext {
    request_id: u64,
    retry_count: u32,
    redirect_handler: Option<Arc<dyn RedirectHandler>>,
    cached_response_handler: Option<Arc<dyn CachedResponseHandler>>,
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DispatchContext")
            .field("request_id", &self.request_id)
            .field("retry_count", &self.retry_count)
            .field("redirect_handler", &self.redirect_handler.is_some())
            .field(
                "cached_response_handler",
                &self.cached_response_handler.is_some(),
            )
            .finish()
    }
}

impl DispatchContext {
    pub fn new(request_id: u64, retry_count: u32) -> Self {
        Self {
            request_id,
            retry_count,
            redirect_handler: None,
            cached_response_handler: None,
        }
    }

    pub fn with_redirect_handler(mut self, handler: Option<Arc<dyn RedirectHandler>>) -> Self {
        self.redirect_handler = handler;
        self
    }

    pub fn with_cached_response_handler(
        mut self,
        handler: Option<Arc<dyn CachedResponseHandler>>,
    ) -> Self {
        self.cached_response_handler = handler;
        self
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Asks the redirect handler about `redirect`; `None` means the redirect must not be followed.
    pub async fn redirect(
        &self,
        redirect: http::Request<Bytes>,
        response: &ResponseHead,
    ) -> Option<http::Request<Bytes>> {
        let Some(handler) = &self.redirect_handler else {
            return Some(redirect);
        };
        let decision = handler.handle_redirect(&redirect, response).await;
        decision.resolve(redirect)
    }

    /// Asks the cache handler about `proposed`; `None` means nothing is stored.
    pub async fn cache(
        &self,
        proposed: CachedResponse,
        request: &http::Request<Bytes>,
    ) -> Option<CachedResponse> {
        let Some(handler) = &self.cached_response_handler else {
            return Some(proposed);
        };
        let decision = handler.handle_cache(&proposed, request).await;
        decision.resolve(proposed)
    }
}

/// Plain-HTTP transport on hyper's pooled client. Follows redirects through the
/// session's redirect handler.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    max_redirects: usize,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperTransport")
            .field("max_redirects", &self.max_redirects)
            .finish()
    }
}

impl HyperTransport {
    pub fn new() -> Self {
        Self::with_connector(HttpConnector::new())
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        Self::with_connector(connector)
    }

    fn with_connector(connector: HttpConnector) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HyperTransport {
    fn send(
        &self,
        request: http::Request<Bytes>,
        context: DispatchContext,
    ) -> BoxFuture<'static, TransportResult> {
        let client = self.client.clone();
        let max_redirects = self.max_redirects;
        Box::pin(send_following_redirects(
            client,
            request,
            context,
            max_redirects,
        ))
    }
}

async fn send_following_redirects(
    client: Client<HttpConnector, Full<Bytes>>,
    request: http::Request<Bytes>,
    context: DispatchContext,
    max_redirects: usize,
) -> TransportResult {
    let mut current = request;
    let mut redirect_count = 0_usize;
    loop {
        let follow_up = crate::util::duplicate_request(&current);
        let response = send_once(&client, current).await?;
        if !is_redirect_status(response.status()) {
            return Ok(response);
        }
        let Some(location) = redirect_location(response.headers()) else {
            return Ok(response);
        };
        let Some(proposed) = redirect_request(&follow_up, response.status(), location) else {
            return Ok(response);
        };

        let (parts, body) = response.into_parts();
        let head = ResponseHead::from(parts);
        let Some(next) = context.redirect(proposed, &head).await else {
            return Ok(rebuild_response(head, body));
        };
        // The limit applies to hops the handler agreed to follow.
        if redirect_count >= max_redirects {
            return Err(TransportError::new(
                TransportErrorKind::Other,
                format!("redirect limit exceeded ({max_redirects})"),
            ));
        }
        redirect_count += 1;
        debug!(
            request_id = context.request_id(),
            redirect_count,
            location = %redact_uri_for_logs(&next.uri().to_string()),
            "following redirect"
        );
        current = next;
    }
}

async fn send_once(
    client: &Client<HttpConnector, Full<Bytes>>,
    request: http::Request<Bytes>,
) -> TransportResult {
    let response = client
        .request(request.map(Full::new))
        .await
        .map_err(|error| TransportError::new(classify_transport_error(&error), error))?;
    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|error| TransportError::new(TransportErrorKind::ConnectionLost, error))?
        .to_bytes();
    Ok(http::Response::from_parts(parts, body))
}

fn rebuild_response(head: ResponseHead, body: Bytes) -> http::Response<Bytes> {
    let mut response = http::Response::new(body);
    *response.status_mut() = head.status();
    *response.version_mut() = head.version();
    *response.headers_mut() = head.headers().clone();
    response
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    let text = error_chain_text(error);
    if error.is_connect() {
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("timed out") {
            return TransportErrorKind::Timeout;
        }
        return TransportErrorKind::Connect;
    }

    if text.contains("connection closed")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("incomplete message")
    {
        return TransportErrorKind::ConnectionLost;
    }
    if text.contains("read") || text.contains("unexpected eof") {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

fn error_chain_text(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text.to_ascii_lowercase()
}
