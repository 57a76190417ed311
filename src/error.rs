use std::{fmt, sync::Arc};

use crate::ApiResponse;

/// Error type returned by this crate.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GuacError {
    /// Authentication rejected (401) or the token exchange failed.
    #[error("authentication error: {0}")]
    Auth(HttpFailure),
    /// Authenticated but not allowed (403).
    #[error("permission error: {0}")]
    Permission(HttpFailure),
    /// Resource does not exist (404).
    #[error("not found: {0}")]
    NotFound(HttpFailure),
    /// Request timeout or throttling (408, 429).
    #[error("rate limited: {0}")]
    RateLimit(HttpFailure),
    /// Upstream 5xx failure.
    #[error("server error: {0}")]
    Server(HttpFailure),
    /// Any other non-success HTTP status.
    #[error("http error: {0}")]
    Http(HttpFailure),
    /// A successful response whose body could not be decoded.
    #[error("decode error: {0}")]
    Decode(HttpFailure),
    /// Network or request execution failure.
    #[error("transport error: {0}")]
    Transport(TransportError),
    /// The call was cancelled through its [`CallContext`](crate::CallContext).
    #[error("request cancelled")]
    Cancelled,
    /// The call's deadline elapsed before it completed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
    /// Invalid client configuration or request construction.
    #[error("configuration error: {0}")]
    Config(String),
}

impl GuacError {
    /// Returns the HTTP details for status-derived variants.
    pub fn http_failure(&self) -> Option<&HttpFailure> {
        match self {
            Self::Auth(failure)
            | Self::Permission(failure)
            | Self::NotFound(failure)
            | Self::RateLimit(failure)
            | Self::Server(failure)
            | Self::Http(failure)
            | Self::Decode(failure) => Some(failure),
            _ => None,
        }
    }

    /// HTTP status code, when the error came from a response.
    pub fn status(&self) -> Option<u16> {
        self.http_failure().map(|failure| failure.status)
    }

    /// Machine-readable server error code, when one was extracted.
    pub fn code(&self) -> Option<&str> {
        self.http_failure()?.code.as_deref()
    }

    /// Raw response that produced this error, if retained.
    pub fn response(&self) -> Option<&ApiResponse> {
        self.http_failure()?.response.as_ref()
    }

    /// True for [`GuacError::Cancelled`] and [`GuacError::DeadlineExceeded`].
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Details shared by every error derived from an HTTP response.
#[derive(Clone, Debug)]
pub struct HttpFailure {
    /// Response status code.
    pub status: u16,
    /// Human readable detail from the body, or a fallback message.
    pub detail: String,
    /// Optional server error code.
    pub code: Option<String>,
    /// The raw response, when available.
    pub response: Option<ApiResponse>,
}

impl HttpFailure {
    pub fn new(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            code: None,
            response: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_response(mut self, response: ApiResponse) -> Self {
        self.response = Some(response);
        self
    }
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}, {}", self.status, self.detail)?;
        if let Some(code) = &self.code {
            write!(f, " (code={code})")?;
        }
        Ok(())
    }
}

/// Coarse classification of transport failures used by retry policies.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TransportErrorKind {
    /// Connection could not be established.
    Connect,
    /// Connection attempt timed out.
    ConnectTimeout,
    /// Request or response read timed out.
    Timeout,
    /// The peer violated the HTTP protocol or closed the connection early.
    Protocol,
    /// Reading the response body failed.
    Body,
    /// Anything else (builder errors, redirects, ...).
    Other,
}

/// A failure below the HTTP status layer.
///
/// Built from `reqwest` errors with the request URL stripped, since the URL
/// carries the session token.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<Arc<reqwest::Error>>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Timeout | TransportErrorKind::ConnectTimeout
        )
    }

    /// Underlying `reqwest` error, when the failure came from the default transport.
    pub fn reqwest_error(&self) -> Option<&reqwest::Error> {
        self.source.as_deref()
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        let kind = if err.is_connect() && err.is_timeout() {
            TransportErrorKind::ConnectTimeout
        } else if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else if err.is_request() {
            TransportErrorKind::Protocol
        } else {
            TransportErrorKind::Other
        };

        Self {
            kind,
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }
}

impl From<TransportError> for GuacError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}
