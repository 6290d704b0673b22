use std::hash::Hash;

use http::StatusCode;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Possible errors when coordinating work with `throttle_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The caller's cancellation signal fired while it was suspended
    #[error("Operation was canceled while waiting")]
    Canceled,
    /// The gate or pipeline was closed and accepts no more work
    #[error("Cannot submit work: the queue or gate has been closed")]
    Closed,
    /// A primitive was constructed with a size of zero or one that is too
    /// large. Holds the name of the offending parameter.
    #[error("Invalid configuration: {0} is out of range")]
    InvalidConfiguration(&'static str),
    /// A header value for the request client is invalid
    #[error("Header could not be parsed: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
    /// The request client could not be created
    #[error("Error creating request client: {0}")]
    BuildRequestClient(#[source] reqwest::Error),
    /// Network error while handling a request
    #[error("Network error while trying to connect to an endpoint via reqwest: {0}")]
    NetworkRequest(#[source] reqwest::Error),
    /// The endpoint answered with a status code outside of the success range
    #[error("Endpoint responded with non-success status code {0}")]
    RejectedStatusCode(StatusCode),
    /// The response body could not be read
    #[error("Error reading response body: {0}")]
    ReadResponseBody(#[source] reqwest::Error),
    /// The given string can not be parsed into a valid URL
    #[error("Cannot parse string `{1}` as website url: {0}")]
    ParseUrl(#[source] url::ParseError, String),
}

impl ErrorKind {
    /// Returns `true` if the error was caused by a fired cancellation signal
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Return more details about the given [`ErrorKind`]
    ///
    /// Which additional information we can extract depends on the underlying
    /// request type. The output is purely meant for humans and future changes
    /// are expected.
    #[must_use]
    pub fn details(&self) -> Option<String> {
        match self {
            Self::NetworkRequest(e) if e.is_connect() => {
                Some("Connection failed. Check network connectivity and endpoint availability".into())
            }
            Self::NetworkRequest(e) if e.is_timeout() => Some("Request timed out".into()),
            Self::RejectedStatusCode(code) => code.canonical_reason().map(String::from),
            _ => None,
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NetworkRequest(e1), Self::NetworkRequest(e2))
            | (Self::ReadResponseBody(e1), Self::ReadResponseBody(e2))
            | (Self::BuildRequestClient(e1), Self::BuildRequestClient(e2)) => {
                e1.to_string() == e2.to_string()
            }
            (Self::InvalidConfiguration(n1), Self::InvalidConfiguration(n2)) => n1 == n2,
            (Self::InvalidHeader(e1), Self::InvalidHeader(e2)) => e1.to_string() == e2.to_string(),
            (Self::RejectedStatusCode(c1), Self::RejectedStatusCode(c2)) => c1 == c2,
            (Self::ParseUrl(e1, s1), Self::ParseUrl(e2, s2)) => e1 == e2 && s1 == s2,
            (Self::Canceled, Self::Canceled) | (Self::Closed, Self::Closed) => true,
            _ => false,
        }
    }
}

impl Eq for ErrorKind {}

impl Hash for ErrorKind {
    fn hash<H>(&self, state: &mut H)
    where
        H: std::hash::Hasher,
    {
        match self {
            Self::NetworkRequest(e) | Self::ReadResponseBody(e) | Self::BuildRequestClient(e) => {
                e.to_string().hash(state);
            }
            Self::InvalidConfiguration(name) => name.hash(state),
            Self::InvalidHeader(e) => e.to_string().hash(state),
            Self::RejectedStatusCode(code) => code.hash(state),
            Self::ParseUrl(e, s) => (e.to_string(), s).hash(state),
            Self::Canceled | Self::Closed => std::mem::discriminant(self).hash(state),
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}
