//! The interface resource services are written against.
//!
//! Services take any `R: Requester` rather than a concrete [`Client`], so they
//! can be exercised with a fake in tests and never depend on client
//! internals.
//!
//! ```no_run
//! use serde::Deserialize;
//! use slshop::query::CountOptions;
//! use slshop::{Requester, Result};
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Deserialize)]
//! struct Count {
//!     count: u64,
//! }
//!
//! struct ProductService<R> {
//!     requester: R,
//! }
//!
//! impl<R: Requester> ProductService<R> {
//!     async fn count(&self, cancel: &CancellationToken, opts: &CountOptions) -> Result<u64> {
//!         let path = self.requester.create_path("products/count.json");
//!         let count: Count = self.requester.get(cancel, &path, Some(opts)).await?;
//!         Ok(count.count)
//!     }
//! }
//! ```

use crate::query::QueryOptions;
use crate::{Client, Response, Result};
use async_trait::async_trait;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Issues API requests and decodes their JSON responses.
#[async_trait]
pub trait Requester: Send + Sync {
    /// GETs `path` with the query parameters of `query` appended.
    async fn get<T>(
        &self,
        cancel: &CancellationToken,
        path: &str,
        query: Option<&dyn QueryOptions>,
    ) -> Result<T>
    where
        T: DeserializeOwned + Send;

    /// POSTs `body` as JSON to `path`.
    async fn post<B, T>(&self, cancel: &CancellationToken, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned + Send;

    /// PUTs `body` as JSON to `path`.
    async fn put<B, T>(&self, cancel: &CancellationToken, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned + Send;

    /// DELETEs `path`, discarding any response body.
    async fn delete(&self, cancel: &CancellationToken, path: &str) -> Result<()>;

    /// Builds the versioned API path for `resource`.
    fn create_path(&self, resource: &str) -> String;
}

#[async_trait]
impl Requester for Client {
    async fn get<T>(
        &self,
        cancel: &CancellationToken,
        path: &str,
        query: Option<&dyn QueryOptions>,
    ) -> Result<T>
    where
        T: DeserializeOwned + Send,
    {
        Client::get(self, cancel, path, query)
            .await
            .map(Response::into_data)
    }

    async fn post<B, T>(&self, cancel: &CancellationToken, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned + Send,
    {
        Client::post(self, cancel, path, body)
            .await
            .map(Response::into_data)
    }

    async fn put<B, T>(&self, cancel: &CancellationToken, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned + Send,
    {
        Client::put(self, cancel, path, body)
            .await
            .map(Response::into_data)
    }

    async fn delete(&self, cancel: &CancellationToken, path: &str) -> Result<()> {
        Client::delete::<IgnoredAny>(self, cancel, path).await?;
        Ok(())
    }

    fn create_path(&self, resource: &str) -> String {
        Client::create_path(self, resource)
    }
}
