//! Per-request method, path, headers and query parameters.

use crate::query::{QueryOptions, QueryPairs};
use http::{HeaderMap, HeaderName, HeaderValue, Method};

/// Metadata for an individual API request.
///
/// `path` is relative to the client's base URL and may already carry a query
/// string; parameters added here are appended after it.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// The HTTP method (GET, POST, etc.).
    pub method: Method,

    /// The request path, e.g. `/admin/openapi/v20251201/products.json`.
    pub path: String,

    /// Additional headers for this request.
    pub headers: HeaderMap,

    /// Query parameters for this request.
    pub query: QueryPairs,
}

impl RequestMetadata {
    /// Creates a new `RequestMetadata` with the given method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: QueryPairs::new(),
        }
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, crate::Error> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| crate::Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| crate::Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds the parameters described by an options struct.
    pub fn with_query<O: QueryOptions + ?Sized>(mut self, options: &O) -> Self {
        self.query.flatten(options);
        self
    }

    /// The path with the query parameters appended.
    pub fn path_and_query(&self) -> String {
        crate::query::append_to_path(&self.path, &self.query.encode())
    }
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}
