use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};

#[derive(Clone, Debug)]
pub struct ResponseHead {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

impl From<http::response::Parts> for ResponseHead {
    fn from(parts: http::response::Parts) -> Self {
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Response {
    request_id: u64,
    retry_count: u32,
    head: ResponseHead,
    body: Bytes,
}

impl Response {
    pub(crate) fn new(request_id: u64, retry_count: u32, head: ResponseHead, body: Bytes) -> Self {
        Self {
            request_id,
            retry_count,
            head,
            body,
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Number of retries the request went through before this response.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn status(&self) -> StatusCode {
        self.head.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }
}
