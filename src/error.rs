use std::sync::Arc;

use http::Method;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shareable error source; keeps [`Error`] cheap to clone across observers.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Timeout,
    Dns,
    Connect,
    ConnectionLost,
    NotConnected,
    Tls,
    Read,
    Cancelled,
    Other,
}

impl TransportErrorKind {
    /// Stable numeric code reported alongside the kind.
    pub const fn code(self) -> i32 {
        match self {
            Self::Timeout => -1001,
            Self::Dns => -1003,
            Self::Connect => -1004,
            Self::ConnectionLost => -1005,
            Self::NotConnected => -1009,
            Self::Read => -1011,
            Self::Tls => -1200,
            Self::Cancelled => -999,
            Self::Other => -1,
        }
    }

    pub const fn from_code(code: i32) -> Self {
        match code {
            -1001 => Self::Timeout,
            -1003 => Self::Dns,
            -1004 => Self::Connect,
            -1005 => Self::ConnectionLost,
            -1009 => Self::NotConnected,
            -1011 => Self::Read,
            -1200 => Self::Tls,
            -999 => Self::Cancelled,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::ConnectionLost => "connection_lost",
            Self::NotConnected => "not_connected",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Debug, Error)]
#[error("{kind} transport error (code {code}): {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    code: i32,
    #[source]
    source: SharedError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self::with_code(kind, kind.code(), source)
    }

    pub fn with_code(kind: TransportErrorKind, code: i32, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            code,
            source: Arc::from(source.into()),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn code(&self) -> i32 {
        self.code
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ValidationFailure {
    #[error("response status code {code} is not acceptable")]
    UnacceptableStatusCode { code: u16 },
    #[error("response has no content type; acceptable: {}", acceptable.join(", "))]
    MissingContentType { acceptable: Vec<String> },
    #[error("response content type {response} is not acceptable; acceptable: {}", acceptable.join(", "))]
    UnacceptableContentType {
        acceptable: Vec<String>,
        response: String,
    },
    #[error("{message}")]
    Custom { message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    AdaptationFailed,
    Transport,
    Validation,
    RetryExhausted,
    ExplicitlyCancelled,
    SessionDropped,
    InvalidUri,
    InvalidHeaderName,
    InvalidHeaderValue,
    NoRuntime,
    Custom,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AdaptationFailed => "adaptation_failed",
            Self::Transport => "transport",
            Self::Validation => "validation",
            Self::RetryExhausted => "retry_exhausted",
            Self::ExplicitlyCancelled => "explicitly_cancelled",
            Self::SessionDropped => "session_dropped",
            Self::InvalidUri => "invalid_uri",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::NoRuntime => "no_runtime",
            Self::Custom => "custom",
        }
    }
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("request adaptation failed: {source}")]
    AdaptationFailed {
        #[source]
        source: SharedError,
    },
    #[error("http transport failed for {method} {uri}: {source}")]
    Transport {
        method: Method,
        uri: String,
        #[source]
        source: TransportError,
    },
    #[error("response validation failed with status {status} for {method} {uri}: {reason}")]
    Validation {
        status: u16,
        method: Method,
        uri: String,
        #[source]
        reason: ValidationFailure,
    },
    #[error("retry ceiling reached after {attempts} retries: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },
    #[error("request was explicitly cancelled")]
    ExplicitlyCancelled,
    #[error("session was dropped before request {id} completed")]
    SessionDropped { id: u64 },
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: SharedError,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: SharedError,
    },
    #[error("no tokio runtime is available to drive requests")]
    NoRuntime,
    #[error("{source}")]
    Custom {
        #[source]
        source: SharedError,
    },
}

impl Error {
    pub fn custom(source: impl Into<BoxError>) -> Self {
        Self::Custom {
            source: Arc::from(source.into()),
        }
    }

    pub(crate) fn adaptation_failed(source: BoxError) -> Self {
        Self::AdaptationFailed {
            source: Arc::from(source),
        }
    }

    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::AdaptationFailed { .. } => ErrorCode::AdaptationFailed,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Validation { .. } => ErrorCode::Validation,
            Self::RetryExhausted { .. } => ErrorCode::RetryExhausted,
            Self::ExplicitlyCancelled => ErrorCode::ExplicitlyCancelled,
            Self::SessionDropped { .. } => ErrorCode::SessionDropped,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::NoRuntime => ErrorCode::NoRuntime,
            Self::Custom { .. } => ErrorCode::Custom,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::ExplicitlyCancelled)
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { source, .. } => Some(source.kind()),
            _ => None,
        }
    }

    pub fn validation_failure(&self) -> Option<&ValidationFailure> {
        match self {
            Self::Validation { reason, .. } => Some(reason),
            _ => None,
        }
    }
}
