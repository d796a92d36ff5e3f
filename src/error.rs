//! Error types for Shopline API calls.
//!
//! Every failed call surfaces exactly one [`Error`]. Variants that originate from
//! an HTTP response keep the status, headers, trace id and raw body so that a
//! failure can be debugged without re-issuing the request.

use crate::circuit_breaker::CircuitRejection;
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::time::Duration;

/// Boxed error used for failures reported by pluggable collaborators
/// (token refreshers and token stores).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for Shopline API calls.
///
/// # Examples
///
/// ```no_run
/// use slshop::{Client, Error};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder().handle("open001").access_token("token").build()?;
/// let cancel = CancellationToken::new();
///
/// match client.get::<serde_json::Value>(&cancel, "/admin/openapi/v20251201/shop.json", None).await {
///     Ok(shop) => println!("shop: {}", shop.data),
///     Err(Error::RateLimited { retry_after, .. }) => {
///         eprintln!("throttled, try again in {retry_after:?}");
///     }
///     Err(Error::Api(api)) => {
///         eprintln!("{} (trace id {:?}): {}", api.status, api.trace_id, api.details());
///     }
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No response was received (DNS failure, refused connection, timeout).
    ///
    /// Surfaced once all retries have been spent; `attempts` counts every try.
    #[error("request failed after {attempts} attempt(s): {source}")]
    Network {
        /// Number of attempts made, including the first one.
        attempts: usize,
        /// The last transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The API answered 429 and no retries were left.
    #[error("rate limited (429), retry after {retry_after:?}{}", api_trace_suffix(.error))]
    RateLimited {
        /// Suggested delay before the next call.
        retry_after: Duration,
        /// The parsed error response.
        error: ApiError,
    },

    /// The API answered 503 and no retries were left.
    #[error("service unavailable (503){}", api_trace_suffix(.error))]
    ServiceUnavailable {
        /// Delay from the `Retry-After` header, when the server sent one.
        retry_after: Option<Duration>,
        /// The parsed error response.
        error: ApiError,
    },

    /// Any other non-2xx response. Never retried.
    #[error("{0}")]
    Api(ApiError),

    /// A 2xx response whose body could not be decoded into the requested type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize.
        raw_response: String,
        /// The serde error message.
        serde_error: String,
        /// The HTTP status code.
        status: StatusCode,
    },

    /// The circuit breaker rejected the call before any network I/O.
    #[error("circuit breaker rejected request: {0}")]
    CircuitOpen(CircuitRejection),

    /// The token refresher failed.
    #[error("token refresh failed for {handle}: {source}")]
    TokenRefresh {
        /// Store handle the token belongs to.
        handle: String,
        /// Error reported by the refresher.
        #[source]
        source: BoxError,
    },

    /// A token store operation failed.
    #[error("token store operation failed for key {key}: {source}")]
    TokenStore {
        /// Store key of the token.
        key: String,
        /// Error reported by the store.
        #[source]
        source: BoxError,
    },

    /// The OAuth token endpoint answered with a non-success code.
    #[error("{endpoint} token request failed: {message} (code: {code}{})", trace_suffix_inline(.trace_id))]
    TokenEndpoint {
        /// `create` or `refresh`.
        endpoint: &'static str,
        /// Platform status code from the body.
        code: i64,
        /// Platform message.
        message: String,
        /// Trace id from the body, if any.
        trace_id: Option<String>,
    },

    /// The caller's cancellation token fired while the call was suspended.
    #[error("cancelled while {0}")]
    Cancelled(Suspension),

    /// Reading a response body failed after the status line was received.
    #[error("failed to read response body (status {status}): {source}")]
    BodyRead {
        /// The HTTP status code.
        status: StatusCode,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// Invalid client or request configuration.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Where a call was suspended when it got cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    /// Sleeping between retry attempts.
    Backoff,
    /// Waiting for, or performing, an access token refresh.
    TokenRefresh,
    /// Sending a request or reading its response.
    Request,
}

impl fmt::Display for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Suspension::Backoff => "waiting to retry",
            Suspension::TokenRefresh => "waiting for token refresh",
            Suspension::Request => "sending request",
        })
    }
}

impl Error {
    /// Returns `true` for conditions the executor retries on its own:
    /// transport failures, 429 and 503.
    ///
    /// # Examples
    ///
    /// ```
    /// use slshop::{ApiError, Error};
    /// use http::StatusCode;
    ///
    /// let err = Error::Api(ApiError::new(StatusCode::NOT_FOUND));
    /// assert!(!err.is_retryable());
    ///
    /// let err = Error::ServiceUnavailable {
    ///     retry_after: None,
    ///     error: ApiError::new(StatusCode::SERVICE_UNAVAILABLE),
    /// };
    /// assert!(err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network { .. } | Error::RateLimited { .. } | Error::ServiceUnavailable { .. }
        )
    }

    /// Returns `true` if the caller's cancellation token ended the call.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// Returns the HTTP status code if this error came from a response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::RateLimited { error, .. }
            | Error::ServiceUnavailable { error, .. }
            | Error::Api(error) => Some(error.status),
            Error::DeserializationFailed { status, .. } | Error::BodyRead { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::RateLimited { error, .. }
            | Error::ServiceUnavailable { error, .. }
            | Error::Api(error) => Some(&error.raw_body),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns the platform trace id, when the response carried one.
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Error::RateLimited { error, .. }
            | Error::ServiceUnavailable { error, .. }
            | Error::Api(error) => error.trace_id.as_deref(),
            Error::TokenEndpoint { trace_id, .. } => trace_id.as_deref(),
            _ => None,
        }
    }

    /// Returns the suggested delay before calling again, if the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => Some(*retry_after),
            Error::ServiceUnavailable { retry_after, .. } => *retry_after,
            Error::CircuitOpen(CircuitRejection::Open { remaining }) => Some(*remaining),
            _ => None,
        }
    }
}

/// An error response returned by the Shopline API.
///
/// The platform is inconsistent about where it puts the human readable message:
/// `message` is preferred, `error` is used as a fallback and a non-JSON body
/// becomes the message verbatim. `errors` can be a string, a list or a map
/// depending on the endpoint, so it is preserved as raw JSON.
#[derive(Debug, Clone)]
pub struct ApiError {
    /// The HTTP status code.
    pub status: StatusCode,
    /// Best-effort human readable message.
    pub message: Option<String>,
    /// The `traceId` field of the body.
    pub trace_id: Option<String>,
    /// The `errors` field of the body, untouched.
    pub errors: Option<serde_json::Value>,
    /// The raw (size bounded) response body.
    pub raw_body: String,
    /// The response headers.
    pub headers: HeaderMap,
}

impl ApiError {
    /// Creates an empty error for the given status.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
            trace_id: None,
            errors: None,
            raw_body: String::new(),
            headers: HeaderMap::new(),
        }
    }

    /// Builds an error from a response status, headers and the already-read body.
    pub fn from_response(status: StatusCode, headers: HeaderMap, body: &[u8]) -> Self {
        let mut error = Self::new(status);
        error.raw_body = String::from_utf8_lossy(body).into_owned();
        error.headers = headers;

        if body.is_empty() {
            return error;
        }

        match serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(body) {
            Ok(parsed) => {
                error.message = parsed
                    .get("message")
                    .and_then(|v| v.as_str())
                    .filter(|m| !m.is_empty())
                    .map(str::to_owned);
                error.trace_id = parsed
                    .get("traceId")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned);
                error.errors = parsed.get("errors").filter(|v| !v.is_null()).cloned();
                if error.message.is_none() {
                    error.message = parsed
                        .get("error")
                        .and_then(|v| v.as_str())
                        .map(str::to_owned);
                }
            }
            Err(_) => error.message = Some(error.raw_body.clone()),
        }

        error
    }

    /// Flattens `errors` into one line: strings as-is, lists joined with `; `,
    /// maps as `key: value` pairs joined with `; `.
    ///
    /// # Examples
    ///
    /// ```
    /// use slshop::ApiError;
    /// use http::{HeaderMap, StatusCode};
    ///
    /// let body = br#"{"errors": ["title is blank", "price is negative"]}"#;
    /// let err = ApiError::from_response(StatusCode::UNPROCESSABLE_ENTITY, HeaderMap::new(), body);
    /// assert_eq!(err.details(), "title is blank; price is negative");
    /// ```
    pub fn details(&self) -> String {
        match &self.errors {
            None => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(display_json)
                .collect::<Vec<_>>()
                .join("; "),
            Some(serde_json::Value::Object(map)) => map
                .iter()
                .map(|(key, value)| format!("{key}: {}", display_json(value)))
                .collect::<Vec<_>>()
                .join("; "),
            Some(other) => other.to_string(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP error {}", self.status.as_u16())?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        } else if self.errors.is_some() {
            write!(f, ": {}", self.details())?;
        }
        f.write_str(&trace_suffix(&self.trace_id))
    }
}

impl std::error::Error for ApiError {}

fn display_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn api_trace_suffix(error: &ApiError) -> String {
    trace_suffix(&error.trace_id)
}

fn trace_suffix(trace_id: &Option<String>) -> String {
    match trace_id {
        Some(id) => format!(" (traceId: {id})"),
        None => String::new(),
    }
}

fn trace_suffix_inline(trace_id: &Option<String>) -> String {
    match trace_id {
        Some(id) => format!(", traceId: {id}"),
        None => String::new(),
    }
}

/// A specialized `Result` type for Shopline API calls.
pub type Result<T> = std::result::Result<T, Error>;
