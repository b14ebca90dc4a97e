use std::future::Future;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri};
use tokio::sync::Notify;
use tracing::{Instrument, info_span};

use crate::ReqlineResult;
use crate::error::{Error, ValidationFailure};
use crate::interceptor::{Interceptor, RequestAdapter, RequestRetrier};
use crate::protected::ProtectedState;
use crate::response::{Response, ResponseHead};
use crate::session::{Session, SessionInner};
use crate::state::RequestState;
use crate::util::{
    duplicate_request, merge_headers, parse_header_name, parse_header_value, parse_uri,
    redact_uri_for_logs,
};
use crate::validation::{
    Validator, content_type_validator, default_validator, status_validator, validator,
};

pub struct RequestBuilder {
    session: Session,
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
    interceptor: Interceptor,
    validators: Vec<Validator>,
}

impl RequestBuilder {
    pub(crate) fn new(session: Session, method: Method, uri: String) -> Self {
        Self {
            session,
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            interceptor: Interceptor::new(),
            validators: Vec::new(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> ReqlineResult<Self> {
        let header_name = parse_header_name(name)?;
        let header_value = parse_header_value(name, value)?;
        Ok(self.header(header_name, header_value))
    }

    /// Replaces every name present in `headers`, keeping all of its values.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = merge_headers(&self.headers, &headers);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Runs after the session's adapters, for this request only.
    pub fn adapter<A>(mut self, adapter: A) -> Self
    where
        A: RequestAdapter + 'static,
    {
        self.interceptor = self.interceptor.adapter(adapter);
        self
    }

    /// Consulted after the session's retriers, for this request only.
    pub fn retrier<R>(mut self, retrier: R) -> Self
    where
        R: RequestRetrier + 'static,
    {
        self.interceptor = self.interceptor.retrier(retrier);
        self
    }

    pub fn interceptor(mut self, interceptor: Interceptor) -> Self {
        self.interceptor = self.interceptor.extend(&interceptor);
        self
    }

    /// Accept 2xx responses whose content type matches the request's `Accept` header.
    pub fn validate(self) -> Self {
        self.validate_with(default_validator())
    }

    pub fn validate_status(self, acceptable: impl IntoIterator<Item = u16>) -> Self {
        self.validate_with(status_validator(acceptable))
    }

    pub fn validate_content_type<I, S>(self, acceptable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validate_with(content_type_validator(acceptable))
    }

    pub fn validate_with(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn build(self) -> ReqlineResult<Request> {
        let uri = parse_uri(&self.uri)?;
        let mut original = http::Request::new(self.body);
        *original.method_mut() = self.method;
        *original.uri_mut() = uri;
        *original.headers_mut() =
            merge_headers(&self.session.config().default_headers, &self.headers);
        Ok(Request::new(
            &self.session,
            original,
            self.interceptor,
            self.validators,
        ))
    }

    /// Builds, starts and awaits the request.
    pub async fn send(self) -> ReqlineResult<Response> {
        let request = self.build()?;
        request.resume();
        request.response().await
    }
}

/// Handle to one logical request. Clones share the same state, so any clone
/// may suspend, resume or cancel it from any thread.
#[derive(Clone)]
pub struct Request {
    shared: Arc<RequestShared>,
}

struct RequestShared {
    id: u64,
    original: http::Request<Bytes>,
    redacted_uri: String,
    session: Weak<SessionInner>,
    interceptor: Interceptor,
    validators: ProtectedState<Vec<Validator>>,
    mutable: ProtectedState<MutableState>,
    changed: Notify,
}

#[derive(Default)]
struct MutableState {
    state: RequestState,
    retry_count: u32,
    driver_started: bool,
    current_request: Option<http::Request<Bytes>>,
    response: Option<ResponseHead>,
    last_error: Option<Error>,
    result: Option<Result<Response, Error>>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Request")
            .field("id", &self.shared.id)
            .field("method", self.shared.original.method())
            .field("uri", &self.shared.redacted_uri)
            .field("state", &self.state())
            .field("retry_count", &self.retry_count())
            .finish()
    }
}

impl Request {
    fn new(
        session: &Session,
        original: http::Request<Bytes>,
        interceptor: Interceptor,
        validators: Vec<Validator>,
    ) -> Self {
        let redacted_uri = redact_uri_for_logs(&original.uri().to_string());
        let request = Self {
            shared: Arc::new(RequestShared {
                id: session.next_request_id(),
                original,
                redacted_uri,
                session: session.downgrade(),
                interceptor,
                validators: ProtectedState::new(validators),
                mutable: ProtectedState::default(),
                changed: Notify::new(),
            }),
        };
        session.metrics().record_request_created();
        session.notify_observers(|observer| observer.on_request_created(&request));
        request
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn method(&self) -> &Method {
        self.shared.original.method()
    }

    pub fn uri(&self) -> &Uri {
        self.shared.original.uri()
    }

    /// The request as built, before any adapter ran.
    pub fn original_request(&self) -> http::Request<Bytes> {
        duplicate_request(&self.shared.original)
    }

    /// The adapted request of the latest attempt.
    pub fn current_request(&self) -> Option<http::Request<Bytes>> {
        self.shared
            .mutable
            .read(|mutable| mutable.current_request.as_ref().map(duplicate_request))
    }

    /// Method of the latest adapted request, falling back to the original one.
    pub fn current_method(&self) -> Method {
        self.shared.mutable.read(|mutable| {
            mutable
                .current_request
                .as_ref()
                .map(|request| request.method().clone())
                .unwrap_or_else(|| self.shared.original.method().clone())
        })
    }

    pub fn state(&self) -> RequestState {
        self.shared.mutable.read(|mutable| mutable.state)
    }

    pub fn retry_count(&self) -> u32 {
        self.shared.mutable.read(|mutable| mutable.retry_count)
    }

    /// Response head of the latest attempt, if one arrived.
    pub fn response_head(&self) -> Option<ResponseHead> {
        self.shared.mutable.read(|mutable| mutable.response.clone())
    }

    pub fn response_status(&self) -> Option<StatusCode> {
        self.shared
            .mutable
            .read(|mutable| mutable.response.as_ref().map(ResponseHead::status))
    }

    /// Most recent failure, including ones a retrier chose to retry.
    pub fn error(&self) -> Option<Error> {
        self.shared.mutable.read(|mutable| mutable.last_error.clone())
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == RequestState::Cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.state() == RequestState::Finished
    }

    pub fn session(&self) -> Option<Session> {
        Session::upgrade(&self.shared.session)
    }

    pub fn validate(&self) -> &Self {
        self.validate_with(default_validator())
    }

    pub fn validate_status(&self, acceptable: impl IntoIterator<Item = u16>) -> &Self {
        self.validate_with(status_validator(acceptable))
    }

    /// Adds a validator; it applies to responses that have not been validated yet.
    pub fn validate_with(&self, validator: Validator) -> &Self {
        self.shared
            .validators
            .write(|validators| validators.push(validator));
        self
    }

    pub fn validate_fn<F>(&self, check: F) -> &Self
    where
        F: Fn(Option<&http::Request<Bytes>>, &ResponseHead, &Bytes) -> Result<(), ValidationFailure>
            + Send
            + Sync
            + 'static,
    {
        self.validate_with(validator(check))
    }

    /// Starts the request, or continues it after `suspend`. Returns `false` when
    /// the current state does not allow resuming.
    pub fn resume(&self) -> bool {
        let resumed = self.shared.mutable.write(|mutable| {
            if !mutable.state.can_transition_to(RequestState::Resumed) {
                return None;
            }
            let from = mutable.state;
            mutable.state = RequestState::Resumed;
            let start_driver = !mutable.driver_started;
            mutable.driver_started = true;
            Some((from, start_driver))
        });
        let Some((from, start_driver)) = resumed else {
            return false;
        };
        self.publish_transition(from, RequestState::Resumed);
        if start_driver {
            self.start_driver();
        }
        true
    }

    /// Pauses the request at its next step boundary. An attempt already on the
    /// wire completes, but no adapter, retrier or new attempt runs until `resume`.
    pub fn suspend(&self) -> bool {
        let suspended = self.shared.mutable.write(|mutable| {
            if !mutable.state.can_transition_to(RequestState::Suspended) {
                return false;
            }
            mutable.state = RequestState::Suspended;
            true
        });
        if suspended {
            self.publish_transition(RequestState::Resumed, RequestState::Suspended);
        }
        suspended
    }

    /// Cancels the request. Pending work is interrupted; the outcome becomes
    /// `Error::ExplicitlyCancelled`. Returns `false` once the request is terminal.
    pub fn cancel(&self) -> bool {
        let cancelled = self.shared.mutable.write(|mutable| {
            if !mutable.state.can_transition_to(RequestState::Cancelled) {
                return None;
            }
            let from = mutable.state;
            mutable.state = RequestState::Cancelled;
            mutable.last_error = Some(Error::ExplicitlyCancelled);
            mutable.result = Some(Err(Error::ExplicitlyCancelled));
            Some(from)
        });
        let Some(from) = cancelled else {
            return false;
        };
        self.publish_transition(from, RequestState::Cancelled);
        self.publish_result(&Err(Error::ExplicitlyCancelled));
        true
    }

    /// Waits for the final outcome.
    ///
    /// An initialized request is resumed first when the session starts requests
    /// immediately. Otherwise the caller must `resume` it or this never resolves.
    pub async fn response(&self) -> Result<Response, Error> {
        if self.state() == RequestState::Initialized {
            match self.session() {
                Some(session) if session.config().start_requests_immediately => {
                    self.resume();
                }
                Some(_) => {}
                None => return Err(Error::SessionDropped { id: self.id() }),
            }
        }

        loop {
            let notified = self.shared.changed.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();
            if let Some(result) = self.shared.mutable.read(|mutable| mutable.result.clone()) {
                return result;
            }
            notified.await;
        }
    }

    fn start_driver(&self) {
        let Some(session) = self.session() else {
            self.try_finish(&Err(Error::SessionDropped { id: self.id() }));
            return;
        };
        let span = info_span!(
            "reqline.request",
            request_id = self.id(),
            method = %self.method(),
            uri = %self.shared.redacted_uri,
        );
        session
            .runtime()
            .spawn(crate::execute::drive(self.clone()).instrument(span));
    }

    fn publish_transition(&self, from: RequestState, to: RequestState) {
        self.shared.changed.notify_waiters();
        if let Some(session) = self.session() {
            session.notify_observers(|observer| observer.on_state_changed(self, from, to));
        }
    }

    fn publish_result(&self, result: &Result<Response, Error>) {
        if let Some(session) = self.session() {
            session.metrics().record_request_completed(result);
            session.notify_observers(|observer| observer.on_request_finished(self, result));
        }
    }

    pub(crate) fn interceptor(&self) -> &Interceptor {
        &self.shared.interceptor
    }

    /// Resolves to `None` as soon as the request is cancelled.
    pub(crate) async fn until_cancelled<F>(&self, future: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            output = future => Some(output),
        }
    }

    async fn cancelled(&self) {
        loop {
            let notified = self.shared.changed.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Blocks while suspended. `false` means the request reached a terminal state.
    pub(crate) async fn wait_until_runnable(&self) -> bool {
        loop {
            let notified = self.shared.changed.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();
            match self.state() {
                RequestState::Resumed => return true,
                RequestState::Cancelled | RequestState::Finished => return false,
                RequestState::Initialized | RequestState::Suspended => notified.await,
            }
        }
    }

    pub(crate) fn record_attempt(&self, adapted: http::Request<Bytes>) {
        self.shared.mutable.write(|mutable| {
            mutable.current_request = Some(adapted);
            mutable.response = None;
        });
    }

    pub(crate) fn record_response(&self, head: ResponseHead) {
        self.shared
            .mutable
            .write(|mutable| mutable.response = Some(head));
    }

    pub(crate) fn record_error(&self, error: Error) {
        self.shared
            .mutable
            .write(|mutable| mutable.last_error = Some(error));
    }

    /// Counts one more retry unless the request already ended; returns the new count.
    pub(crate) fn commit_retry(&self) -> Option<u32> {
        self.shared.mutable.write(|mutable| {
            if mutable.state.is_terminal() {
                return None;
            }
            mutable.retry_count += 1;
            Some(mutable.retry_count)
        })
    }

    pub(crate) fn validate_response(
        &self,
        head: &ResponseHead,
        body: &Bytes,
    ) -> Result<(), ValidationFailure> {
        let validators = self.shared.validators.get();
        let current = self.current_request();
        for validator in &validators {
            validator(current.as_ref(), head, body)?;
        }
        Ok(())
    }

    /// Publishes the outcome once the request is runnable again. Cancellation
    /// that wins the race keeps its own outcome.
    pub(crate) async fn complete(&self, result: Result<Response, Error>) {
        loop {
            if !self.wait_until_runnable().await {
                return;
            }
            if self.try_finish(&result) {
                return;
            }
        }
    }

    fn try_finish(&self, result: &Result<Response, Error>) -> bool {
        let finished = self.shared.mutable.write(|mutable| {
            if mutable.state != RequestState::Resumed {
                return false;
            }
            mutable.state = RequestState::Finished;
            if let Err(error) = result {
                mutable.last_error = Some(error.clone());
            }
            mutable.result = Some(result.clone());
            true
        });
        if finished {
            self.publish_transition(RequestState::Resumed, RequestState::Finished);
            self.publish_result(result);
        }
        finished
    }
}
