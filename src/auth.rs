//! App credentials, request signing and the OAuth token endpoint.
//!
//! Shopline signs token requests with HMAC-SHA256 over the sorted request
//! parameters, keyed by the app secret. [`TokenEndpoint`] performs the signed
//! `create` (authorization code exchange) and `refresh` calls and plugs into a
//! [`TokenManager`](crate::TokenManager) as its [`TokenRefresher`].

use crate::client::{read_body_limited, MAX_RESPONSE_BODY_SIZE};
use crate::error::{BoxError, Error, Result};
use crate::token_manager::{TokenGrant, TokenRefresher};
use async_trait::async_trait;
use http::HeaderValue;
use ring::hmac;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

/// Timeout applied to token endpoint calls.
pub const TOKEN_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

const SIGN_PARAM: &str = "sign";

/// Credentials of a Shopline application.
#[derive(Clone)]
pub struct App {
    /// Application key from the developer center.
    pub app_key: String,
    /// Application secret used for signing.
    pub app_secret: String,
}

impl App {
    /// Creates app credentials.
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
        }
    }

    /// Signs `params` with the app secret.
    ///
    /// Keys are sorted, rendered as `key=value`, joined with `&` and the result
    /// is HMAC-SHA256'd; the digest is returned as lowercase hex. A `sign`
    /// entry is ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use slshop::auth::App;
    /// use std::collections::BTreeMap;
    ///
    /// let app = App::new("key", "secret");
    /// let params = BTreeMap::from([
    ///     ("timestamp".to_string(), "1700000000000".to_string()),
    ///     ("appkey".to_string(), "key".to_string()),
    /// ]);
    /// let sign = app.generate_signature(&params);
    /// assert_eq!(sign.len(), 64);
    /// ```
    pub fn generate_signature(&self, params: &BTreeMap<String, String>) -> String {
        hex::encode(self.sign(&canonical_message(params)).as_ref())
    }

    /// Checks the `sign` entry of a callback's parameters.
    ///
    /// Returns `false` when `sign` is missing or not valid hex. The comparison
    /// is constant-time.
    pub fn verify_signature(&self, params: &BTreeMap<String, String>) -> bool {
        let Some(sign) = params.get(SIGN_PARAM).filter(|s| !s.is_empty()) else {
            return false;
        };
        let Ok(tag) = hex::decode(sign) else {
            return false;
        };

        let key = hmac::Key::new(hmac::HMAC_SHA256, self.app_secret.as_bytes());
        hmac::verify(&key, canonical_message(params).as_bytes(), &tag).is_ok()
    }

    fn sign(&self, message: &str) -> hmac::Tag {
        let key = hmac::Key::new(hmac::HMAC_SHA256, self.app_secret.as_bytes());
        hmac::sign(&key, message.as_bytes())
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("app_key", &self.app_key)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

fn canonical_message(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .filter(|(k, _)| k.as_str() != SIGN_PARAM)
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Body of a token endpoint response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// Platform status code; `200` on success.
    pub code: i64,
    /// Localisation key for `message`.
    #[serde(default)]
    pub i18n_code: Option<String>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Issued token, present on success.
    #[serde(default)]
    pub data: Option<TokenData>,
    /// Trace id for support requests.
    #[serde(default)]
    pub trace_id: Option<String>,
}

/// The token issued by the endpoint.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    /// The bearer token.
    pub access_token: String,
    /// Expiry as an RFC 3339 timestamp.
    #[serde(default)]
    pub expire_time: String,
    /// Granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenData")
            .field("access_token", &"<redacted>")
            .field("expire_time", &self.expire_time)
            .field("scope", &self.scope)
            .finish()
    }
}

impl From<TokenData> for TokenGrant {
    fn from(data: TokenData) -> Self {
        TokenGrant {
            access_token: data.access_token,
            expire_time: data.expire_time,
            scope: data.scope.filter(|s| !s.is_empty()),
        }
    }
}

/// Client for `/admin/oauth/token/{create,refresh}`.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    app: App,
    http_client: reqwest::Client,
    base_url: Option<Url>,
}

impl TokenEndpoint {
    /// Creates an endpoint client with its own connection pool and a 30 second
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the HTTP client cannot be built.
    pub fn new(app: App) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(TOKEN_ENDPOINT_TIMEOUT)
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            app,
            http_client,
            base_url: None,
        })
    }

    /// Sends every request to `url` instead of `https://{handle}.myshopline.com`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// The app whose credentials sign the requests.
    pub fn app(&self) -> &App {
        &self.app
    }

    /// Exchanges an authorization code for a token.
    pub async fn create_token(&self, handle: &str, code: &str) -> Result<TokenResponse> {
        let body = serde_json::json!({ "code": code });
        self.request(handle, "create", Some(body)).await
    }

    /// Issues a fresh token for a store the app is already installed on.
    pub async fn refresh_token(&self, handle: &str) -> Result<TokenResponse> {
        self.request(handle, "refresh", None).await
    }

    fn endpoint_url(&self, handle: &str, endpoint: &str) -> Result<Url> {
        let path = format!("/admin/oauth/token/{}", endpoint);
        match &self.base_url {
            Some(base) => Ok(base.join(&path)?),
            None => Ok(Url::parse(&format!("https://{}.myshopline.com{}", handle, path))?),
        }
    }

    async fn request(
        &self,
        handle: &str,
        endpoint: &'static str,
        body: Option<serde_json::Value>,
    ) -> Result<TokenResponse> {
        if handle.is_empty() {
            return Err(Error::ConfigurationError(
                "handle must not be empty".to_string(),
            ));
        }

        let timestamp = current_time_millis().to_string();
        let sign = self.app.generate_signature(&BTreeMap::from([
            ("appkey".to_string(), self.app.app_key.clone()),
            ("timestamp".to_string(), timestamp.clone()),
        ]));
        let url = self.endpoint_url(handle, endpoint)?;

        tracing::debug!(handle = %handle, endpoint = endpoint, "Calling token endpoint");

        let mut request = self
            .http_client
            .post(url)
            .header(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .header("appkey", &self.app.app_key)
            .header("timestamp", &timestamp)
            .header("sign", &sign);
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        let mut response = request
            .send()
            .await
            .map_err(|source| Error::Network { attempts: 1, source })?;
        let status = response.status();
        let raw = read_body_limited(&mut response, MAX_RESPONSE_BODY_SIZE)
            .await
            .map_err(|source| Error::BodyRead { status, source })?;

        let token_response: TokenResponse =
            serde_json::from_slice(&raw).map_err(|e| Error::DeserializationFailed {
                raw_response: String::from_utf8_lossy(&raw).into_owned(),
                serde_error: e.to_string(),
                status,
            })?;

        if token_response.code != 200 {
            tracing::warn!(
                handle = %handle,
                endpoint = endpoint,
                code = token_response.code,
                trace_id = token_response.trace_id.as_deref().unwrap_or(""),
                "Token endpoint rejected request"
            );
            return Err(Error::TokenEndpoint {
                endpoint,
                code: token_response.code,
                message: token_response.message.unwrap_or_default(),
                trace_id: token_response.trace_id,
            });
        }

        Ok(token_response)
    }
}

#[async_trait]
impl TokenRefresher for TokenEndpoint {
    async fn refresh(&self, handle: &str) -> std::result::Result<TokenGrant, BoxError> {
        let response = self.refresh_token(handle).await?;
        let data = response
            .data
            .ok_or("token endpoint returned no token data")?;
        Ok(data.into())
    }
}

fn current_time_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_signature_matches_reference_hmac() {
        let app = App::new("key", "secret");
        let sign = app.generate_signature(&params(&[("b", "2"), ("a", "1")]));

        let key = hmac::Key::new(hmac::HMAC_SHA256, b"secret");
        let expected = hex::encode(hmac::sign(&key, b"a=1&b=2").as_ref());
        assert_eq!(sign, expected);
    }

    #[test]
    fn test_signature_ignores_sign_param() {
        let app = App::new("key", "secret");
        let without = app.generate_signature(&params(&[("a", "1")]));
        let with = app.generate_signature(&params(&[("a", "1"), ("sign", "whatever")]));
        assert_eq!(without, with);
    }

    #[test]
    fn test_verify_signature() {
        let app = App::new("key", "secret");
        let mut query = params(&[("appkey", "key"), ("handle", "open001"), ("timestamp", "1")]);
        let sign = app.generate_signature(&query);
        query.insert("sign".to_string(), sign);
        assert!(app.verify_signature(&query));

        query.insert("handle".to_string(), "tampered".to_string());
        assert!(!app.verify_signature(&query));
    }

    #[test]
    fn test_verify_signature_rejects_missing_or_malformed_sign() {
        let app = App::new("key", "secret");
        assert!(!app.verify_signature(&params(&[("a", "1")])));
        assert!(!app.verify_signature(&params(&[("a", "1"), ("sign", "")])));
        assert!(!app.verify_signature(&params(&[("a", "1"), ("sign", "not-hex")])));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", App::new("key", "top-secret"));
        assert!(!rendered.contains("top-secret"));
    }

    fn endpoint(server: &MockServer) -> TokenEndpoint {
        TokenEndpoint::new(App::new("test-key", "test-secret"))
            .unwrap()
            .base_url(server.uri())
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_token_sends_signed_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/oauth/token/create"))
            .and(header("appkey", "test-key"))
            .and(header_exists("timestamp"))
            .and(header_exists("sign"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({ "code": "auth-code" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 200,
                "i18nCode": "SUCCESS",
                "message": "success",
                "data": {
                    "accessToken": "new-token",
                    "expireTime": "2030-01-01T00:00:00Z",
                    "scope": "read_products"
                },
                "traceId": "trace-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = endpoint(&server)
            .create_token("open001", "auth-code")
            .await
            .unwrap();

        let data = response.data.unwrap();
        assert_eq!(data.access_token, "new-token");
        assert_eq!(data.expire_time, "2030-01-01T00:00:00Z");
        assert_eq!(response.trace_id.as_deref(), Some("trace-1"));
    }

    #[tokio::test]
    async fn test_sign_header_verifies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/oauth/token/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 200,
                "data": { "accessToken": "t", "expireTime": "2030-01-01T00:00:00Z" }
            })))
            .mount(&server)
            .await;

        let endpoint = endpoint(&server);
        endpoint.refresh_token("open001").await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let headers = &requests[0].headers;
        let value = |name: &str| headers.get(name).unwrap().to_str().unwrap().to_string();
        let (appkey, timestamp, sign) = (value("appkey"), value("timestamp"), value("sign"));
        let signed = params(&[
            ("appkey", appkey.as_str()),
            ("timestamp", timestamp.as_str()),
            ("sign", sign.as_str()),
        ]);
        assert!(endpoint.app().verify_signature(&signed));
    }

    #[tokio::test]
    async fn test_non_200_code_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/oauth/token/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 401,
                "message": "invalid sign",
                "traceId": "trace-9"
            })))
            .mount(&server)
            .await;

        let err = endpoint(&server).refresh_token("open001").await.unwrap_err();
        match err {
            Error::TokenEndpoint {
                endpoint,
                code,
                message,
                trace_id,
            } => {
                assert_eq!(endpoint, "refresh");
                assert_eq!(code, 401);
                assert_eq!(message, "invalid sign");
                assert_eq!(trace_id.as_deref(), Some("trace-9"));
            }
            other => panic!("expected TokenEndpoint error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparsable_response_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let err = endpoint(&server).refresh_token("open001").await.unwrap_err();
        assert_eq!(err.raw_response(), Some("<html>bad gateway</html>"));
    }

    #[tokio::test]
    async fn test_empty_handle_is_rejected() {
        let endpoint = TokenEndpoint::new(App::new("k", "s")).unwrap();
        let err = endpoint.refresh_token("").await.unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn test_refresher_maps_response_to_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/oauth/token/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 200,
                "data": {
                    "accessToken": "refreshed",
                    "expireTime": "2030-01-01T00:00:00Z",
                    "scope": ""
                }
            })))
            .mount(&server)
            .await;

        let grant = endpoint(&server).refresh("open001").await.unwrap();
        assert_eq!(grant.access_token, "refreshed");
        assert_eq!(grant.scope, None);
    }
}
