//! Decoded responses together with their HTTP details.
//!
//! A [`Response`] keeps the size-bounded raw body, status, headers, total latency
//! and the number of attempts next to the decoded data, so a call that only
//! succeeded after retries can still be told apart in logs and metrics.

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A successful (2xx) API response.
///
/// # Examples
///
/// ```no_run
/// use slshop::Client;
/// use serde::Deserialize;
/// use tokio_util::sync::CancellationToken;
///
/// #[derive(Deserialize)]
/// struct ShopEnvelope {
///     data: serde_json::Value,
/// }
///
/// # async fn example() -> Result<(), slshop::Error> {
/// let client = Client::builder().handle("open001").access_token("token").build()?;
/// let path = client.create_path("merchants/shop.json");
///
/// let response = client.get::<ShopEnvelope>(&CancellationToken::new(), &path, None).await?;
/// println!("Shop: {}", response.data.data);
/// println!("Took {:?} over {} attempt(s)", response.latency, response.attempts);
/// println!("Trace id: {:?}", response.header("traceid"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The deserialized response data.
    pub data: T,

    /// The raw response body, capped at the client's body size limit.
    pub raw_body: String,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// Time from the first attempt until the body was read, including every
    /// retry wait.
    pub latency: Duration,

    /// The number of attempts made; `1` when no retry was needed.
    pub attempts: usize,
}

impl<T> Response<T> {
    /// Creates a new `Response`.
    pub fn new(
        data: T,
        raw_body: String,
        status: StatusCode,
        headers: HeaderMap,
        latency: Duration,
        attempts: usize,
    ) -> Self {
        Self {
            data,
            raw_body,
            status,
            headers,
            latency,
            attempts,
        }
    }

    /// Maps the response data, keeping the HTTP details.
    ///
    /// # Examples
    ///
    /// ```
    /// # use slshop::Response;
    /// # use http::{HeaderMap, StatusCode};
    /// # use std::time::Duration;
    /// let response = Response::new(
    ///     vec![1, 2, 3],
    ///     "[1,2,3]".to_string(),
    ///     StatusCode::OK,
    ///     HeaderMap::new(),
    ///     Duration::from_millis(100),
    ///     1,
    /// );
    ///
    /// let count = response.map(|ids| ids.len());
    /// assert_eq!(count.data, 3);
    /// ```
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    /// Returns the decoded data, dropping the HTTP details.
    pub fn into_data(self) -> T {
        self.data
    }

    /// Returns `true` if the request required retries.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
