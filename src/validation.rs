use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use http::header::ACCEPT;
use mime::Mime;

use crate::error::ValidationFailure;
use crate::response::ResponseHead;

/// Checks a completed response; `None` request means the adapted request was unavailable.
pub type Validator = Arc<
    dyn Fn(Option<&http::Request<Bytes>>, &ResponseHead, &Bytes) -> Result<(), ValidationFailure>
        + Send
        + Sync,
>;

pub fn validator<F>(check: F) -> Validator
where
    F: Fn(Option<&http::Request<Bytes>>, &ResponseHead, &Bytes) -> Result<(), ValidationFailure>
        + Send
        + Sync
        + 'static,
{
    Arc::new(check)
}

pub fn status_validator(acceptable: impl IntoIterator<Item = u16>) -> Validator {
    let acceptable = acceptable.into_iter().collect::<BTreeSet<_>>();
    validator(move |_request, head, _body| check_status(&acceptable, head))
}

pub fn content_type_validator<I, S>(acceptable: I) -> Validator
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let acceptable = acceptable.into_iter().map(Into::into).collect::<Vec<_>>();
    validator(move |_request, head, body| check_content_type(&acceptable, head, body))
}

/// 2xx status plus whatever the request's `Accept` header asked for.
pub fn default_validator() -> Validator {
    let success = (200_u16..300).collect::<BTreeSet<_>>();
    validator(move |request, head, body| {
        check_status(&success, head)?;
        let acceptable = request
            .map(accepted_content_types)
            .unwrap_or_else(|| vec!["*/*".to_owned()]);
        check_content_type(&acceptable, head, body)
    })
}

fn check_status(acceptable: &BTreeSet<u16>, head: &ResponseHead) -> Result<(), ValidationFailure> {
    let code = head.status().as_u16();
    if acceptable.contains(&code) {
        Ok(())
    } else {
        Err(ValidationFailure::UnacceptableStatusCode { code })
    }
}

fn check_content_type(
    acceptable: &[String],
    head: &ResponseHead,
    body: &Bytes,
) -> Result<(), ValidationFailure> {
    if body.is_empty() {
        return Ok(());
    }

    let patterns = acceptable
        .iter()
        .filter_map(|text| text.parse::<Mime>().ok())
        .collect::<Vec<_>>();

    let Some(response_type) = head
        .content_type()
        .and_then(|value| value.parse::<Mime>().ok())
    else {
        if patterns
            .iter()
            .any(|pattern| pattern.type_() == mime::STAR && pattern.subtype() == mime::STAR)
        {
            return Ok(());
        }
        return Err(ValidationFailure::MissingContentType {
            acceptable: acceptable.to_vec(),
        });
    };

    if patterns
        .iter()
        .any(|pattern| mime_accepts(pattern, &response_type))
    {
        Ok(())
    } else {
        Err(ValidationFailure::UnacceptableContentType {
            acceptable: acceptable.to_vec(),
            response: response_type.essence_str().to_owned(),
        })
    }
}

/// Wildcards only count on the `pattern` side.
pub(crate) fn mime_accepts(pattern: &Mime, response: &Mime) -> bool {
    let type_matches = pattern.type_() == mime::STAR || pattern.type_() == response.type_();
    let subtype_matches =
        pattern.subtype() == mime::STAR || pattern.subtype() == response.subtype();
    type_matches && subtype_matches
}

fn accepted_content_types(request: &http::Request<Bytes>) -> Vec<String> {
    let accepted = request
        .headers()
        .get_all(ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();
    if accepted.is_empty() {
        vec!["*/*".to_owned()]
    } else {
        accepted
    }
}
