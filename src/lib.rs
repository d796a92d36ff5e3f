//! # slshop - a resilient client core for the Shopline Admin API
//!
//! `slshop` is the request layer resource services are built on. It sends
//! JSON requests with the right headers and credentials, retries throttled
//! and failed attempts with jittered backoff, honours `Retry-After`, guards
//! the API with an optional circuit breaker and keeps OAuth access tokens
//! fresh without stampeding the token endpoint.
//!
//! ## Quick Start
//!
//! ```no_run
//! use serde::Deserialize;
//! use slshop::query::ListOptions;
//! use slshop::Client;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Deserialize)]
//! struct Products {
//!     products: Vec<serde_json::Value>,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), slshop::Error> {
//!     let client = Client::builder()
//!         .handle("open001")
//!         .access_token("access-token")
//!         .max_retries(3)
//!         .circuit_breaker(5, Duration::from_secs(30))
//!         .build()?;
//!
//!     let cancel = CancellationToken::new();
//!     let path = client.create_path("products/products.json");
//!     let opts = ListOptions { limit: 50, ..Default::default() };
//!
//!     let response = client.get::<Products>(&cancel, &path, Some(&opts)).await?;
//!     println!(
//!         "{} products in {:?} ({} attempt(s))",
//!         response.data.products.len(),
//!         response.latency,
//!         response.attempts
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Automatic token refresh
//!
//! ```no_run
//! use slshop::auth::{App, TokenEndpoint};
//! use slshop::{Client, FileTokenStore, TokenManager};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), slshop::Error> {
//! let app = App::new("app-key", "app-secret");
//! let manager = TokenManager::builder("open001", &app.app_key, Arc::new(TokenEndpoint::new(app.clone())?))
//!     .store(Arc::new(FileTokenStore::new("/var/lib/myapp/tokens")))
//!     .build();
//!
//! let client = Client::builder()
//!     .handle("open001")
//!     .token_manager(manager)
//!     .max_retries(2)
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every failure is one [`Error`] variant. Response-derived errors keep the
//! status, headers, trace id and raw body:
//!
//! ```no_run
//! use slshop::{Client, Error};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().handle("open001").build()?;
//! let cancel = CancellationToken::new();
//! match client.get::<serde_json::Value>(&cancel, "/admin/openapi/v20251201/orders/1.json", None).await {
//!     Ok(response) => println!("Success: {:?}", response.data),
//!     Err(Error::DeserializationFailed { raw_response, serde_error, status }) => {
//!         eprintln!("Failed to deserialize (status {}): {}", status, serde_error);
//!         eprintln!("  Raw response: {}", raw_response);
//!     }
//!     Err(Error::Api(api)) => eprintln!("{} (traceId {:?})", api, api.trace_id),
//!     Err(e) if e.is_retryable() => eprintln!("Gave up after retries: {}", e),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The crate logs through [`tracing`]. Without a subscriber every event is a
//! no-op; install one (for example `tracing-subscriber`) to see retries,
//! breaker transitions and token refreshes. Access tokens and secrets are
//! never logged.

pub mod auth;
pub mod circuit_breaker;
mod client;
mod error;
pub mod metadata;
pub mod query;
pub mod rate_limit;
mod requester;
mod response;
pub mod retry;
pub mod token;
pub mod token_manager;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitRejection, CircuitState};
pub use client::{
    Client, ClientBuilder, DEFAULT_API_VERSION, DEFAULT_BACKOFF_BASE, DEFAULT_TIMEOUT,
    MAX_RESPONSE_BODY_SIZE, USER_AGENT,
};
pub use error::{ApiError, BoxError, Error, Result, Suspension};
pub use requester::Requester;
pub use response::Response;
pub use token::{FileTokenStore, ManagedToken, MemoryTokenStore, TokenStore};
pub use token_manager::{TokenGrant, TokenManager, TokenManagerBuilder, TokenRefresher};
