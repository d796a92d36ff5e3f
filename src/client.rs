//! The Shopline API client and its request executor.
//!
//! The [`Client`] type is the main entry point for making API calls. Use
//! [`ClientBuilder`] to configure and create clients.

use crate::{
    circuit_breaker::{Admission, CircuitBreaker},
    error::{ApiError, Suspension},
    metadata::RequestMetadata,
    query::QueryOptions,
    rate_limit::{retry_after_from_headers, RATE_LIMIT_DEFAULT_DELAY},
    retry::{backoff_duration, sleep_with_cancel},
    token_manager::TokenManager,
    Error, Response, Result,
};
use bytes::{Bytes, BytesMut};
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// API version used when none is configured.
pub const DEFAULT_API_VERSION: &str = "v20251201";

/// Per-request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Base delay for transport-error backoff. Throttled responses back off from
/// twice this value.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Response bodies are truncated at this many bytes.
pub const MAX_RESPONSE_BODY_SIZE: usize = 10 * 1024 * 1024;

/// At most this much of a retried response's body is read before the
/// connection is given up.
const MAX_DRAIN_SIZE: usize = 64 * 1024;

/// `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("slshop-rust/", env!("CARGO_PKG_VERSION"));

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// A client for the Shopline Admin API.
///
/// Cloning is cheap and clones share the connection pool, the token manager
/// and the circuit breaker. Every call takes a [`CancellationToken`];
/// cancelling it aborts the call at its next suspension point with
/// [`Error::Cancelled`].
///
/// # Examples
///
/// ```no_run
/// use slshop::Client;
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// #[derive(Serialize)]
/// struct NewProduct {
///     title: String,
/// }
///
/// #[derive(Deserialize)]
/// struct ProductEnvelope {
///     product: serde_json::Value,
/// }
///
/// # async fn example() -> Result<(), slshop::Error> {
/// let client = Client::builder()
///     .handle("open001")
///     .access_token("access-token")
///     .max_retries(3)
///     .timeout(Duration::from_secs(10))
///     .circuit_breaker(5, Duration::from_secs(30))
///     .build()?;
/// let cancel = CancellationToken::new();
///
/// let path = client.create_path("products/products.json");
/// let body = NewProduct { title: "Linen shirt".to_string() };
/// let created = client
///     .post::<_, ProductEnvelope>(&cancel, &path, &body)
///     .await?;
/// println!("Created: {}", created.data.product);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    base_url: Url,
    handle: String,
    api_version: String,
    access_token: Option<String>,
    token_manager: Option<Arc<TokenManager>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    default_headers: HeaderMap,
    max_retries: usize,
    timeout: Duration,
    backoff_base: Duration,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Builds the API path for a resource:
    /// `/admin/openapi/{version}/{resource}`.
    ///
    /// # Examples
    ///
    /// ```
    /// # fn example() -> Result<(), slshop::Error> {
    /// let client = slshop::Client::builder().handle("open001").build()?;
    /// assert_eq!(
    ///     client.create_path("products/products.json"),
    ///     "/admin/openapi/v20251201/products/products.json"
    /// );
    /// # Ok(())
    /// # }
    /// ```
    pub fn create_path(&self, resource: &str) -> String {
        format!("/admin/openapi/{}/{}", self.inner.api_version, resource)
    }

    /// The store handle, e.g. `open001`.
    pub fn handle(&self) -> &str {
        &self.inner.handle
    }

    /// The API version embedded in paths built by [`create_path`](Self::create_path).
    pub fn api_version(&self) -> &str {
        &self.inner.api_version
    }

    /// The URL request paths are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// The token manager, when the client was configured with one.
    pub fn token_manager(&self) -> Option<&Arc<TokenManager>> {
        self.inner.token_manager.as_ref()
    }

    /// The circuit breaker, when the client was configured with one.
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.inner.circuit_breaker.as_ref()
    }

    /// Executes a request with retries and decodes the JSON response.
    ///
    /// The body is serialised once and replayed on every attempt, and the
    /// access token is resolved once per call. Transport errors, 429 and 503
    /// are retried up to the configured limit; other responses are final.
    /// An empty 2xx body decodes as JSON `null`, so `()`, `Option<T>` and
    /// [`serde::de::IgnoredAny`] accept it.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use slshop::{metadata::RequestMetadata, query::ListOptions, Client};
    /// use http::Method;
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # async fn example() -> Result<(), slshop::Error> {
    /// let client = Client::builder().handle("open001").access_token("token").build()?;
    ///
    /// let metadata = RequestMetadata::new(Method::GET, client.create_path("orders/orders.json"))
    ///     .with_query(&ListOptions { limit: 50, ..Default::default() });
    /// let orders = client
    ///     .call::<(), serde_json::Value>(&CancellationToken::new(), metadata, None)
    ///     .await?;
    /// println!("{} attempt(s): {}", orders.attempts, orders.data);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call<Req, Res>(
        &self,
        cancel: &CancellationToken,
        metadata: RequestMetadata,
        body: Option<&Req>,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let start_time = Instant::now();
        let url = self.inner.base_url.join(&metadata.path_and_query())?;

        let body = body
            .map(|body| serde_json::to_vec(body).map(Bytes::from))
            .transpose()
            .map_err(|e| Error::SerializationFailed(e.to_string()))?;

        let headers = self.request_headers(cancel, &metadata).await?;
        let max_retries = self.inner.max_retries;
        let mut attempt = 0;

        loop {
            let permit = self.admit()?;
            let attempts = attempt + 1;

            tracing::debug!(
                method = %metadata.method,
                url = %url,
                attempt = attempts,
                "Executing HTTP request"
            );

            let mut request = self
                .inner
                .http_client
                .request(metadata.method.clone(), url.clone())
                .headers(headers.clone())
                .timeout(self.inner.timeout);
            if let Some(body) = &body {
                request = request.body(body.clone());
            }

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled(Suspension::Request)),
                sent = request.send() => sent,
            };

            let mut response = match sent {
                Ok(response) => response,
                Err(source) => {
                    permit.failure();
                    if attempt < max_retries {
                        let delay = backoff_duration(attempt as u32, self.inner.backoff_base);
                        tracing::warn!(
                            error = %source,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Request failed, retrying after backoff"
                        );
                        sleep_with_cancel(cancel, delay).await?;
                        attempt += 1;
                        continue;
                    }
                    tracing::error!(error = %source, attempts = attempts, "Request failed");
                    return Err(Error::Network { attempts, source });
                }
            };

            let status = response.status();
            if is_throttled(status) {
                permit.failure();
                if attempt < max_retries {
                    let delay = retry_after_from_headers(response.headers()).unwrap_or_else(|| {
                        backoff_duration(attempt as u32, self.inner.backoff_base.saturating_mul(2))
                    });
                    tracing::info!(
                        status = status.as_u16(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited or unavailable, retrying after delay"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {}
                        _ = read_body_limited(&mut response, MAX_DRAIN_SIZE) => {}
                    }
                    drop(response);
                    sleep_with_cancel(cancel, delay).await?;
                    attempt += 1;
                    continue;
                }
            } else if status.is_success() {
                permit.success();
            } else {
                permit.release();
            }

            let response_headers = response.headers().clone();
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled(Suspension::Request)),
                read = read_body_limited(&mut response, MAX_RESPONSE_BODY_SIZE) => read,
            };
            let raw = read.map_err(|source| Error::BodyRead { status, source })?;

            let latency = start_time.elapsed();
            tracing::info!(
                status = status.as_u16(),
                latency_ms = latency.as_millis() as u64,
                attempts = attempts,
                "Received HTTP response"
            );

            return parse_response(status, response_headers, raw, latency, attempts);
        }
    }

    fn admit(&self) -> Result<BreakerPermit<'_>> {
        let breaker = match self.inner.circuit_breaker.as_deref() {
            Some(breaker) => {
                let admission = breaker.allow().map_err(|rejection| {
                    tracing::debug!(reason = %rejection, "Circuit breaker rejected request");
                    Error::CircuitOpen(rejection)
                })?;
                Some((breaker, admission))
            }
            None => None,
        };
        Ok(BreakerPermit {
            breaker,
            settled: false,
        })
    }

    async fn request_headers(
        &self,
        cancel: &CancellationToken,
        metadata: &RequestMetadata,
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));

        for (name, value) in &self.inner.default_headers {
            headers.insert(name, value.clone());
        }
        for (name, value) in &metadata.headers {
            headers.insert(name, value.clone());
        }

        let token = match &self.inner.token_manager {
            Some(manager) => Some(manager.get_token(cancel).await?),
            None => self.inner.access_token.clone(),
        };
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::try_from(format!("Bearer {}", token)).map_err(|_| {
                Error::ConfigurationError("access token is not a valid header value".to_string())
            })?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        Ok(headers)
    }

    /// Makes a GET request, appending `query` to the path.
    pub async fn get<Res>(
        &self,
        cancel: &CancellationToken,
        path: &str,
        query: Option<&dyn QueryOptions>,
    ) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let mut metadata = RequestMetadata::new(Method::GET, path);
        if let Some(query) = query {
            metadata = metadata.with_query(query);
        }
        self.call::<(), Res>(cancel, metadata, None).await
    }

    /// Makes a POST request with a JSON body.
    pub async fn post<Req, Res>(
        &self,
        cancel: &CancellationToken,
        path: &str,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::POST, path);
        self.call(cancel, metadata, Some(body)).await
    }

    /// Makes a PUT request with a JSON body.
    pub async fn put<Req, Res>(
        &self,
        cancel: &CancellationToken,
        path: &str,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::PUT, path);
        self.call(cancel, metadata, Some(body)).await
    }

    /// Makes a DELETE request.
    pub async fn delete<Res>(&self, cancel: &CancellationToken, path: &str) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::DELETE, path);
        self.call::<(), Res>(cancel, metadata, None).await
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("handle", &self.inner.handle)
            .field("base_url", &self.inner.base_url.as_str())
            .field("api_version", &self.inner.api_version)
            .field("max_retries", &self.inner.max_retries)
            .field("token_manager", &self.inner.token_manager.is_some())
            .field("circuit_breaker", &self.inner.circuit_breaker)
            .finish()
    }
}

fn is_throttled(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

/// Turns a fully read response into a typed result.
fn parse_response<Res>(
    status: StatusCode,
    headers: HeaderMap,
    raw: Bytes,
    latency: Duration,
    attempts: usize,
) -> Result<Response<Res>>
where
    Res: DeserializeOwned,
{
    if !status.is_success() {
        let error = ApiError::from_response(status, headers, &raw);

        if status.is_client_error() {
            tracing::error!(
                status = status.as_u16(),
                trace_id = error.trace_id.as_deref().unwrap_or(""),
                response = %error.raw_body,
                "Client error (4xx)"
            );
        } else {
            tracing::warn!(
                status = status.as_u16(),
                trace_id = error.trace_id.as_deref().unwrap_or(""),
                response = %error.raw_body,
                "Server error"
            );
        }

        return Err(match status {
            StatusCode::TOO_MANY_REQUESTS => Error::RateLimited {
                retry_after: retry_after_from_headers(&error.headers)
                    .unwrap_or(RATE_LIMIT_DEFAULT_DELAY),
                error,
            },
            StatusCode::SERVICE_UNAVAILABLE => Error::ServiceUnavailable {
                retry_after: retry_after_from_headers(&error.headers),
                error,
            },
            _ => Error::Api(error),
        });
    }

    let decoded = if raw.iter().all(u8::is_ascii_whitespace) {
        Res::deserialize(serde_json::Value::Null)
    } else {
        serde_json::from_slice::<Res>(&raw)
    };
    let raw_body = String::from_utf8_lossy(&raw).into_owned();

    match decoded {
        Ok(data) => Ok(Response::new(data, raw_body, status, headers, latency, attempts)),
        Err(e) => {
            tracing::error!(
                error = %e,
                raw_response = %raw_body,
                "Failed to deserialize response"
            );

            Err(Error::DeserializationFailed {
                raw_response: raw_body,
                serde_error: e.to_string(),
                status,
            })
        }
    }
}

/// Reads at most `limit` bytes of the body. Anything beyond is left unread and
/// discarded with the response.
pub(crate) async fn read_body_limited(
    response: &mut reqwest::Response,
    limit: usize,
) -> reqwest::Result<Bytes> {
    let mut body = BytesMut::new();
    while let Some(chunk) = response.chunk().await? {
        let remaining = limit - body.len();
        if chunk.len() >= remaining {
            body.extend_from_slice(&chunk[..remaining]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// The breaker outcome of one admitted attempt.
///
/// An attempt that ends without an outcome (cancelled, or its future dropped)
/// releases its half-open probe so the breaker does not wait forever. Only the
/// probe's own admission can release it.
struct BreakerPermit<'a> {
    breaker: Option<(&'a CircuitBreaker, Admission)>,
    settled: bool,
}

impl BreakerPermit<'_> {
    fn success(mut self) {
        self.settled = true;
        if let Some((breaker, _)) = self.breaker {
            breaker.record_success();
        }
    }

    fn failure(mut self) {
        self.settled = true;
        if let Some((breaker, _)) = self.breaker {
            breaker.record_failure();
        }
    }

    fn release(self) {}
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some((breaker, admission)) = self.breaker {
            breaker.release_probe(admission);
        }
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use slshop::ClientBuilder;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), slshop::Error> {
/// let client = ClientBuilder::new()
///     .handle("open001")
///     .access_token("access-token")
///     .api_version("v20251201")
///     .max_retries(3)
///     .backoff_base(Duration::from_millis(500))
///     .default_header("X-Request-Source", "inventory-sync")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    handle: String,
    access_token: Option<String>,
    api_version: String,
    max_retries: usize,
    http_client: Option<reqwest::Client>,
    timeout: Duration,
    base_url: Option<Url>,
    backoff_base: Duration,
    token_manager: Option<Arc<TokenManager>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    default_headers: HeaderMap,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            handle: String::new(),
            access_token: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            max_retries: 0,
            http_client: None,
            timeout: DEFAULT_TIMEOUT,
            base_url: None,
            backoff_base: DEFAULT_BACKOFF_BASE,
            token_manager: None,
            circuit_breaker: None,
            default_headers: HeaderMap::new(),
        }
    }

    /// Sets the store handle; requests go to `https://{handle}.myshopline.com`
    /// unless a base URL is set.
    pub fn handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = handle.into();
        self
    }

    /// Sets a static access token. Ignored when a token manager is configured.
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Sets the API version used by [`Client::create_path`].
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Sets how many times a failed attempt is retried. Defaults to zero.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Uses a preconfigured `reqwest::Client` instead of the default pool.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the timeout of each attempt. Defaults to 30 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the base URL (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the base delay of the exponential backoff. Defaults to one second.
    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Resolves the access token through `manager` on every call.
    pub fn token_manager(mut self, manager: impl Into<Arc<TokenManager>>) -> Self {
        self.token_manager = Some(manager.into());
        self
    }

    /// Guards calls with a circuit breaker that opens after `threshold`
    /// consecutive failures and probes again after `cooldown`.
    pub fn circuit_breaker(mut self, threshold: u32, cooldown: Duration) -> Self {
        self.circuit_breaker = Some(Arc::new(CircuitBreaker::new(threshold, cooldown)));
        self
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if neither a handle nor a base URL was provided, or if
    /// the HTTP client cannot be built.
    pub fn build(self) -> Result<Client> {
        let base_url = match self.base_url {
            Some(url) => url,
            None if self.handle.is_empty() => {
                return Err(Error::ConfigurationError(
                    "a store handle or a base URL is required".to_string(),
                ))
            }
            None => Url::parse(&format!("https://{}.myshopline.com", self.handle))?,
        };

        let http_client = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .timeout(self.timeout)
                .pool_max_idle_per_host(10)
                .pool_idle_timeout(Duration::from_secs(90))
                .build()
                .map_err(|e| {
                    Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
                })?,
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                http_client,
                base_url,
                handle: self.handle,
                api_version: self.api_version,
                access_token: self.access_token,
                token_manager: self.token_manager,
                circuit_breaker: self.circuit_breaker,
                default_headers: self.default_headers,
                max_retries: self.max_retries,
                timeout: self.timeout,
                backoff_base: self.backoff_base,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
