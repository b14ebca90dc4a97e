use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Error;
use crate::interceptor::{Interceptor, RetryResult};
use crate::request::Request;
use crate::response::{Response, ResponseHead};
use crate::util::{duplicate_request, redact_uri_for_logs};

/// Background task behind one request: adapt, dispatch, validate and retry
/// until an outcome is reached, then publish it.
pub(crate) async fn drive(request: Request) {
    let _in_flight = request
        .session()
        .map(|session| session.metrics().enter_in_flight());
    let Some(result) = run(&request).await else {
        debug!("request cancelled before completion");
        return;
    };
    match &result {
        Ok(response) => debug!(
            status = response.status().as_u16(),
            retry_count = response.retry_count(),
            "request finished"
        ),
        Err(error) => warn!(error = %error, code = error.code().as_str(), "request failed"),
    }
    request.complete(result).await;
}

/// `None` means cancellation interrupted the run and already owns the outcome.
async fn run(request: &Request) -> Option<Result<Response, Error>> {
    loop {
        if !request.wait_until_runnable().await {
            return None;
        }
        let Some(session) = request.session() else {
            return Some(Err(Error::SessionDropped { id: request.id() }));
        };
        let retry_count = request.retry_count();
        let chain = Interceptor::merged(session.interceptor(), request.interceptor());

        debug!(retry_count, adapters = chain.adapter_count(), "adapting request");
        let adapted = match request
            .until_cancelled(chain.adapt_request(request.original_request(), &session))
            .await?
        {
            Ok(adapted) => adapted,
            Err(source) => {
                let error = Error::adaptation_failed(source);
                warn!(error = %error, "request adaptation failed");
                return Some(Err(error));
            }
        };
        request.record_attempt(duplicate_request(&adapted));
        session.notify_observers(|observer| observer.on_request_adapted(request, &adapted));

        let method = adapted.method().clone();
        let uri = redact_uri_for_logs(&adapted.uri().to_string());
        let context = session.dispatch_context(request.id(), retry_count);
        let outcome = request
            .until_cancelled(session.dispatch(adapted, context))
            .await?;

        let error = match outcome {
            Ok(response) => {
                let (parts, body) = response.into_parts();
                let head = ResponseHead::from(parts);
                request.record_response(head.clone());
                match request.validate_response(&head, &body) {
                    Ok(()) => {
                        return Some(Ok(Response::new(request.id(), retry_count, head, body)));
                    }
                    Err(reason) => Error::Validation {
                        status: head.status().as_u16(),
                        method,
                        uri,
                        reason,
                    },
                }
            }
            Err(source) => Error::Transport {
                method,
                uri,
                source,
            },
        };
        request.record_error(error.clone());
        debug!(
            error = %error,
            retriers = chain.retrier_count(),
            "attempt failed"
        );

        let decision = request
            .until_cancelled(chain.retry_request(request, &session, &error))
            .await?;
        let delay = match decision {
            RetryResult::Retry => Duration::ZERO,
            RetryResult::RetryWithDelay(delay) => delay,
            RetryResult::DoNotRetry => return Some(Err(error)),
            RetryResult::DoNotRetryWithError(replacement) => return Some(Err(replacement)),
        };

        if let Some(ceiling) = session.config().retry_ceiling
            && retry_count >= ceiling
        {
            warn!(retry_count, ceiling, "retry ceiling reached");
            return Some(Err(Error::RetryExhausted {
                attempts: retry_count,
                last: Box::new(error),
            }));
        }

        let scheduled = request.commit_retry()?;
        session.metrics().record_retry();
        session.notify_observers(|observer| observer.on_retry_scheduled(request, scheduled, delay));
        debug!(
            retry_count = scheduled,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );
        drop(session);
        if !delay.is_zero() {
            request.until_cancelled(tokio::time::sleep(delay)).await?;
        }
    }
}
