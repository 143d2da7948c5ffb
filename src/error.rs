use std::sync::Arc;
use std::time::Duration;

/// Result type used throughout the SDK, with [`Error`] as the error variant.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Flagstream SDK.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The server returned a payload we could not decode. Not retried; surfaced as a remote-call
    /// failure.
    #[error("failed to decode server payload: {0}")]
    Decode(String),

    /// Network-level failure talking to the server.
    #[error(transparent)]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(Arc<reqwest::Error>),

    /// The server answered with a non-success status code.
    #[error("server responded with status {0}")]
    Status(u16),

    /// The call-level deadline was exceeded.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The feature was absent from a successful server response. Either it has been deleted or
    /// the client key is not authorized for it.
    #[error("feature `{0}` is missing from the server response; it may have been deleted or your key may not be authorized for it")]
    FeatureNotFound(String),

    /// A value was requested with an incompatible type, or a cross-type boolean cast was
    /// attempted under the strict cast strategy.
    #[error("cannot interpret {actual} value as {requested}")]
    TypeMismatch {
        /// Type the caller asked for.
        requested: &'static str,
        /// Actual type of the value.
        actual: &'static str,
    },

    /// No overload key qualified during rule resolution. Indicates a malformed feature record:
    /// the server contract guarantees an empty-context fallback overload.
    #[error("no overload matches context `{0}`; feature record is missing its default context")]
    InvariantViolation(String),

    /// Invalid base_url configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The feature was not part of the request its results are being read from.
    #[error("feature `{0}` was not part of this request")]
    NotRequested(String),

    /// Raised by the `Fail` error strategy, carrying the underlying failure message.
    #[error("{0}")]
    StrategyFailed(String),
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
