use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::response::ResponseHead;

/// Verdict a redirect or cache handler gives on a proposed value.
#[derive(Clone, Debug)]
pub enum HandlerDecision<T> {
    Allow,
    Deny,
    Modify(T),
}

impl<T> HandlerDecision<T> {
    /// Applies the verdict to `proposed`; `None` means denied.
    pub fn resolve(self, proposed: T) -> Option<T> {
        match self {
            Self::Allow => Some(proposed),
            Self::Deny => None,
            Self::Modify(replacement) => Some(replacement),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CachedResponse {
    head: ResponseHead,
    body: Bytes,
}

impl CachedResponse {
    pub fn new(head: ResponseHead, body: Bytes) -> Self {
        Self { head, body }
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

pub trait RedirectHandler: Send + Sync {
    fn handle_redirect<'a>(
        &'a self,
        redirect: &'a http::Request<Bytes>,
        response: &'a ResponseHead,
    ) -> BoxFuture<'a, HandlerDecision<http::Request<Bytes>>>;
}

pub trait CachedResponseHandler: Send + Sync {
    fn handle_cache<'a>(
        &'a self,
        proposed: &'a CachedResponse,
        request: &'a http::Request<Bytes>,
    ) -> BoxFuture<'a, HandlerDecision<CachedResponse>>;
}

type RedirectFn =
    dyn Fn(&http::Request<Bytes>, &ResponseHead) -> Option<http::Request<Bytes>> + Send + Sync;
type CacheFn =
    dyn Fn(&CachedResponse, &http::Request<Bytes>) -> Option<CachedResponse> + Send + Sync;

#[derive(Clone)]
pub enum Redirector {
    Follow,
    DoNotFollow,
    /// Returning `None` stops the redirect.
    Modify(Arc<RedirectFn>),
}

impl Redirector {
    pub fn modify<F>(modifier: F) -> Self
    where
        F: Fn(&http::Request<Bytes>, &ResponseHead) -> Option<http::Request<Bytes>>
            + Send
            + Sync
            + 'static,
    {
        Self::Modify(Arc::new(modifier))
    }
}

impl std::fmt::Debug for Redirector {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Follow => formatter.write_str("Follow"),
            Self::DoNotFollow => formatter.write_str("DoNotFollow"),
            Self::Modify(_) => formatter.write_str("Modify(..)"),
        }
    }
}

impl RedirectHandler for Redirector {
    fn handle_redirect<'a>(
        &'a self,
        redirect: &'a http::Request<Bytes>,
        response: &'a ResponseHead,
    ) -> BoxFuture<'a, HandlerDecision<http::Request<Bytes>>> {
        let decision = match self {
            Self::Follow => HandlerDecision::Allow,
            Self::DoNotFollow => HandlerDecision::Deny,
            Self::Modify(modifier) => match modifier(redirect, response) {
                Some(replacement) => HandlerDecision::Modify(replacement),
                None => HandlerDecision::Deny,
            },
        };
        Box::pin(std::future::ready(decision))
    }
}

#[derive(Clone)]
pub enum ResponseCacher {
    Cache,
    DoNotCache,
    /// Returning `None` keeps the response out of the cache.
    Modify(Arc<CacheFn>),
}

impl ResponseCacher {
    pub fn modify<F>(modifier: F) -> Self
    where
        F: Fn(&CachedResponse, &http::Request<Bytes>) -> Option<CachedResponse>
            + Send
            + Sync
            + 'static,
    {
        Self::Modify(Arc::new(modifier))
    }
}

impl std::fmt::Debug for ResponseCacher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache => formatter.write_str("Cache"),
            Self::DoNotCache => formatter.write_str("DoNotCache"),
            Self::Modify(_) => formatter.write_str("Modify(..)"),
        }
    }
}

impl CachedResponseHandler for ResponseCacher {
    fn handle_cache<'a>(
        &'a self,
        proposed: &'a CachedResponse,
        request: &'a http::Request<Bytes>,
    ) -> BoxFuture<'a, HandlerDecision<CachedResponse>> {
        let decision = match self {
            Self::Cache => HandlerDecision::Allow,
            Self::DoNotCache => HandlerDecision::Deny,
            Self::Modify(modifier) => match modifier(proposed, request) {
                Some(replacement) => HandlerDecision::Modify(replacement),
                None => HandlerDecision::Deny,
            },
        };
        Box::pin(std::future::ready(decision))
    }
}

/// Redirect handlers consulted in order.
///
/// Each handler sees the current candidate; `Modify` replaces it for the rest
/// of the chain and `Deny` stops the chain. An empty chain allows everything.
#[derive(Clone, Default)]
pub struct RedirectChain {
    handlers: Vec<Arc<dyn RedirectHandler>>,
}

impl RedirectChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler<H>(mut self, handler: H) -> Self
    where
        H: RedirectHandler + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn handler_arc(mut self, handler: Arc<dyn RedirectHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    async fn resolve(
        &self,
        redirect: &http::Request<Bytes>,
        response: &ResponseHead,
    ) -> HandlerDecision<http::Request<Bytes>> {
        let mut replacement: Option<http::Request<Bytes>> = None;
        for handler in &self.handlers {
            let current = replacement.as_ref().unwrap_or(redirect);
            let decision = handler.handle_redirect(current, response).await;
            match decision {
                HandlerDecision::Allow => {}
                HandlerDecision::Deny => return HandlerDecision::Deny,
                HandlerDecision::Modify(next) => replacement = Some(next),
            }
        }
        match replacement {
            Some(next) => HandlerDecision::Modify(next),
            None => HandlerDecision::Allow,
        }
    }
}

impl RedirectHandler for RedirectChain {
    fn handle_redirect<'a>(
        &'a self,
        redirect: &'a http::Request<Bytes>,
        response: &'a ResponseHead,
    ) -> BoxFuture<'a, HandlerDecision<http::Request<Bytes>>> {
        Box::pin(self.resolve(redirect, response))
    }
}

/// Cached-response handlers consulted in order, with the same contract as [`RedirectChain`].
#[derive(Clone, Default)]
pub struct CacheChain {
    handlers: Vec<Arc<dyn CachedResponseHandler>>,
}

impl CacheChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler<H>(mut self, handler: H) -> Self
    where
        H: CachedResponseHandler + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn handler_arc(mut self, handler: Arc<dyn CachedResponseHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    async fn resolve(
        &self,
        proposed: &CachedResponse,
        request: &http::Request<Bytes>,
    ) -> HandlerDecision<CachedResponse> {
        let mut replacement: Option<CachedResponse> = None;
        for handler in &self.handlers {
            let current = replacement.as_ref().unwrap_or(proposed);
            let decision = handler.handle_cache(current, request).await;
            match decision {
                HandlerDecision::Allow => {}
                HandlerDecision::Deny => return HandlerDecision::Deny,
                HandlerDecision::Modify(next) => replacement = Some(next),
            }
        }
        match replacement {
            Some(next) => HandlerDecision::Modify(next),
            None => HandlerDecision::Allow,
        }
    }
}

impl CachedResponseHandler for CacheChain {
    fn handle_cache<'a>(
        &'a self,
        proposed: &'a CachedResponse,
        request: &'a http::Request<Bytes>,
    ) -> BoxFuture<'a, HandlerDecision<CachedResponse>> {
        Box::pin(self.resolve(proposed, request))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::header::HeaderValue;
    use http::{HeaderMap, StatusCode};

    use super::{
        CacheChain, CachedResponse, CachedResponseHandler, HandlerDecision, RedirectChain,
        RedirectHandler, Redirector, ResponseCacher,
    };
    use crate::response::ResponseHead;

    fn redirect_to(uri: &str) -> http::Request<Bytes> {
        let mut request = http::Request::new(Bytes::new());
        *request.uri_mut() = uri.parse().expect("uri should parse");
        request
    }

    fn found() -> ResponseHead {
        ResponseHead::new(StatusCode::FOUND, HeaderMap::new())
    }

    #[tokio::test]
    async fn empty_redirect_chain_allows() {
        let chain = RedirectChain::new();
        let redirect = redirect_to("http://example.com/next");

        let decision = chain.handle_redirect(&redirect, &found()).await;
        assert!(matches!(decision, HandlerDecision::Allow));
    }

    #[tokio::test]
    async fn redirect_chain_passes_modified_request_downstream_and_stops_on_deny() {
        let chain = RedirectChain::new()
            .handler(Redirector::modify(|redirect, _response| {
                let mut next = crate::util::duplicate_request(redirect);
                next.headers_mut()
                    .insert("x-hop", HeaderValue::from_static("1"));
                Some(next)
            }))
            .handler(Redirector::modify(|redirect, _response| {
                assert_eq!(
                    redirect.headers().get("x-hop"),
                    Some(&HeaderValue::from_static("1"))
                );
                None
            }))
            .handler(Redirector::modify(|_redirect, _response| {
                panic!("handler after a deny must not run")
            }));

        let decision = chain
            .handle_redirect(&redirect_to("http://example.com/next"), &found())
            .await;
        assert!(matches!(decision, HandlerDecision::Deny));
    }

    #[tokio::test]
    async fn redirect_chain_reports_final_modification() {
        let chain = RedirectChain::new()
            .handler(Redirector::Follow)
            .handler(Redirector::modify(|_redirect, _response| {
                Some(redirect_to("http://mirror.example.com/next"))
            }))
            .handler(Redirector::Follow);

        let proposed = redirect_to("http://example.com/next");
        let decision = chain.handle_redirect(&proposed, &found()).await;
        let resolved = decision.resolve(proposed).expect("redirect should be followed");
        assert_eq!(resolved.uri(), "http://mirror.example.com/next");
    }

    #[tokio::test]
    async fn cache_chain_follows_the_same_contract() {
        let request = redirect_to("http://example.com/items");
        let proposed = CachedResponse::new(
            ResponseHead::new(StatusCode::OK, HeaderMap::new()),
            Bytes::from_static(b"payload"),
        );

        let allow_all = CacheChain::new().handler(ResponseCacher::Cache);
        assert!(matches!(
            allow_all.handle_cache(&proposed, &request).await,
            HandlerDecision::Allow
        ));

        let rewrite = CacheChain::new()
            .handler(ResponseCacher::modify(|cached, _request| {
                Some(CachedResponse::new(
                    cached.head().clone(),
                    Bytes::from_static(b"trimmed"),
                ))
            }))
            .handler(ResponseCacher::Cache);
        let resolved = rewrite
            .handle_cache(&proposed, &request)
            .await
            .resolve(proposed.clone())
            .expect("response should be cached");
        assert_eq!(resolved.body(), &Bytes::from_static(b"trimmed"));

        let deny = CacheChain::new()
            .handler(ResponseCacher::DoNotCache)
            .handler(ResponseCacher::Cache);
        assert!(
            deny.handle_cache(&proposed, &request)
                .await
                .resolve(proposed)
                .is_none()
        );
    }
}
