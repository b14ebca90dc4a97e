//! `reqline` is an HTTP client runtime built around a per-request state machine
//! and an ordered interceptor chain.
//!
//! Every request passes through the session's adapters (and its own) before it
//! is dispatched, and every failure is offered to the retriers, which decide
//! whether and when to try again. Requests can be suspended, resumed and
//! cancelled from any thread while in flight.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use reqline::prelude::{Adapter, RetryPolicy, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::http()
//!         .request_timeout(Duration::from_secs(10))
//!         .adapter(Adapter::sync(|mut request| {
//!             request
//!                 .headers_mut()
//!                 .insert("authorization", "Bearer demo".parse()?);
//!             Ok(request)
//!         }))
//!         .retrier(RetryPolicy::standard().exponential_backoff_base(Duration::from_millis(200)))
//!         .try_build()?;
//!
//!     let response = session
//!         .get("http://api.example.com/v1/items")
//!         .validate()
//!         .send()
//!         .await?;
//!
//!     println!("status={} retries={}", response.status(), response.retry_count());
//!     Ok(())
//! }
//! ```
//!
//! # Recommended Defaults
//!
//! - `RetryPolicy::standard()` retries idempotent methods on transient failures.
//! - Register credential adapters on the session, not per request.
//! - Call `validate()` so 4xx and 5xx answers reach the retriers as errors.

mod config;
mod error;
mod execute;
mod handlers;
mod interceptor;
mod metrics;
mod observe;
mod protected;
mod request;
mod response;
mod retry;
mod session;
mod state;
mod transport;
mod util;
mod validation;

pub use crate::config::SessionConfig;
pub use crate::error::{
    BoxError, Error, ErrorCode, SharedError, TransportError, TransportErrorKind, ValidationFailure,
};
pub use crate::handlers::{
    CacheChain, CachedResponse, CachedResponseHandler, HandlerDecision, RedirectChain,
    RedirectHandler, Redirector, ResponseCacher,
};
pub use crate::interceptor::{
    AdaptResult, Adapter, Interceptor, RequestAdapter, RequestRetrier, Retrier, RetryChainMode,
    RetryResult,
};
pub use crate::metrics::SessionMetricsSnapshot;
pub use crate::observe::SessionObserver;
pub use crate::protected::ProtectedState;
pub use crate::request::{Request, RequestBuilder};
pub use crate::response::{Response, ResponseHead};
pub use crate::retry::RetryPolicy;
pub use crate::session::{Session, SessionBuilder};
pub use crate::state::RequestState;
pub use crate::transport::{DispatchContext, HyperTransport, Transport, TransportResult};
pub use crate::util::duplicate_request;
pub use crate::validation::{
    Validator, content_type_validator, default_validator, status_validator, validator,
};

pub type ReqlineResult<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Adapter, Error, ErrorCode, Interceptor, ReqlineResult, Request, RequestAdapter,
        RequestRetrier, RequestState, Response, Retrier, RetryChainMode, RetryPolicy, RetryResult,
        Session, SessionConfig, TransportErrorKind,
    };
}
