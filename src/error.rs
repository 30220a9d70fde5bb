use http::Method;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const MAX_ERROR_BODY_LEN: usize = 2048;

/// Closed classification of transport-level failures.
///
/// Retry policies match on these codes instead of downcasting error
/// sources, so transports must map whatever their underlying stack
/// produces onto this enumeration, using `Other` for anything that has
/// no stable meaning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorCode {
    TimedOut,
    CannotConnect,
    ConnectionLost,
    Dns,
    HostUnreachable,
    NetworkDown,
    Tls,
    BadUrl,
    ClientCertificate,
    Other,
}

impl std::fmt::Display for TransportErrorCode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::TimedOut => "timed_out",
            Self::CannotConnect => "cannot_connect",
            Self::ConnectionLost => "connection_lost",
            Self::Dns => "dns",
            Self::HostUnreachable => "host_unreachable",
            Self::NetworkDown => "network_down",
            Self::Tls => "tls",
            Self::BadUrl => "bad_url",
            Self::ClientCertificate => "client_certificate",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Stable machine-readable code for every [`Error`] variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUrl,
    InvalidMethod,
    InvalidHeader,
    Encode,
    Transport,
    Status,
    Validation,
    Decode,
    Adapt,
    Retrier,
    Cancelled,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::InvalidMethod => "invalid_method",
            Self::InvalidHeader => "invalid_header",
            Self::Encode => "encode",
            Self::Transport => "transport",
            Self::Status => "status",
            Self::Validation => "validation",
            Self::Decode => "decode",
            Self::Adapt => "adapt",
            Self::Retrier => "retrier",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request url: {url}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid request method: {method}")]
    InvalidMethod { method: String },
    #[error("invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },
    #[error("failed to encode request body: {source}")]
    Encode {
        #[source]
        source: BoxError,
    },
    #[error("transport failure ({code}) for {method} {url}")]
    Transport {
        code: TransportErrorCode,
        method: Method,
        url: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("unacceptable status code {status} for {method} {url}")]
    Status {
        status: u16,
        method: Method,
        url: String,
    },
    #[error("response validation failed: {source}")]
    Validation {
        #[source]
        source: BoxError,
    },
    #[error("failed to decode response body: {source}; body={body}")]
    Decode {
        #[source]
        source: BoxError,
        body: String,
    },
    #[error("request adaptor failed: {source}")]
    Adapt {
        #[source]
        source: BoxError,
    },
    #[error("retrier failed: {source}")]
    Retrier {
        #[source]
        source: BoxError,
    },
    #[error("request cancelled for {url}")]
    Cancelled { url: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::InvalidMethod { .. } => ErrorCode::InvalidMethod,
            Self::InvalidHeader { .. } => ErrorCode::InvalidHeader,
            Self::Encode { .. } => ErrorCode::Encode,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Status { .. } => ErrorCode::Status,
            Self::Validation { .. } => ErrorCode::Validation,
            Self::Decode { .. } => ErrorCode::Decode,
            Self::Adapt { .. } => ErrorCode::Adapt,
            Self::Retrier { .. } => ErrorCode::Retrier,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
        }
    }

    /// Wraps an adaptor-supplied failure.
    pub fn adapt(source: impl Into<BoxError>) -> Self {
        Self::Adapt {
            source: source.into(),
        }
    }

    /// Wraps a validator-supplied failure.
    pub fn validation(source: impl Into<BoxError>) -> Self {
        Self::Validation {
            source: source.into(),
        }
    }

    /// Wraps a retrier-supplied failure.
    pub fn retrier(source: impl Into<BoxError>) -> Self {
        Self::Retrier {
            source: source.into(),
        }
    }

    pub(crate) fn cancelled(url: &url::Url) -> Self {
        Self::Cancelled {
            url: url.to_string(),
        }
    }

    pub(crate) fn decode(source: impl Into<BoxError>, body: &[u8]) -> Self {
        let mut preview = String::from_utf8_lossy(body).into_owned();
        if preview.len() > MAX_ERROR_BODY_LEN {
            let mut cut = MAX_ERROR_BODY_LEN;
            while !preview.is_char_boundary(cut) {
                cut -= 1;
            }
            preview.truncate(cut);
        }
        Self::Decode {
            source: source.into(),
            body: preview,
        }
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Offending status code, when this error is a status rejection.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Transport failure classification, when this is a transport error.
    pub const fn transport_code(&self) -> Option<TransportErrorCode> {
        match self {
            Self::Transport { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCode, TransportErrorCode};
    use http::Method;

    #[test]
    fn status_error_exposes_offending_code() {
        let error = Error::Status {
            status: 503,
            method: Method::GET,
            url: "https://api.example.com/v1/items".to_owned(),
        };
        assert_eq!(error.status(), Some(503));
        assert_eq!(error.code(), ErrorCode::Status);
        assert_eq!(error.code().as_str(), "status");
    }

    #[test]
    fn transport_error_exposes_classification() {
        let error = Error::Transport {
            code: TransportErrorCode::TimedOut,
            method: Method::GET,
            url: "https://api.example.com/v1/items".to_owned(),
            source: None,
        };
        assert_eq!(error.transport_code(), Some(TransportErrorCode::TimedOut));
        assert!(!error.is_cancelled());
    }

    #[test]
    fn decode_error_truncates_long_body_preview() {
        let body = vec![b'x'; 10_000];
        let error = Error::decode(
            serde_json::from_slice::<serde_json::Value>(b"not json")
                .expect_err("body should not parse"),
            &body,
        );
        match error {
            Error::Decode { body, .. } => assert_eq!(body.len(), 2048),
            other => panic!("unexpected error variant: {other}"),
        }
    }
}
