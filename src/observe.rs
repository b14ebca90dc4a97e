use std::time::Duration;

use bytes::Bytes;

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::state::RequestState;

/// Session-wide lifecycle hooks. Called outside any request lock, from whichever
/// task or thread drove the event.
pub trait SessionObserver: Send + Sync {
    fn on_request_created(&self, _request: &Request) {}

    fn on_state_changed(&self, _request: &Request, _from: RequestState, _to: RequestState) {}

    fn on_request_adapted(&self, _request: &Request, _adapted: &http::Request<Bytes>) {}

    fn on_retry_scheduled(&self, _request: &Request, _retry_count: u32, _delay: Duration) {}

    fn on_request_finished(&self, _request: &Request, _result: &Result<Response, Error>) {}
}
