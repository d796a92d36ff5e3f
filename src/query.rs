//! Query string construction for list and count endpoints.
//!
//! Option structs describe their query parameters by implementing
//! [`QueryOptions`]: each field is added with its wire name and an [`Omit`]
//! rule. Embedded option groups are added with [`QueryPairs::flatten`].
//!
//! ```
//! use slshop::query::{ListOptions, Omit, QueryOptions, QueryPairs};
//!
//! #[derive(Default)]
//! struct ProductListOptions {
//!     list: ListOptions,
//!     ids: Vec<i64>,
//!     status: String,
//! }
//!
//! impl QueryOptions for ProductListOptions {
//!     fn append_query(&self, query: &mut QueryPairs) {
//!         query.flatten(&self.list);
//!         query.list("ids", &self.ids, Omit::IfZero);
//!         query.field("status", &self.status, Omit::IfZero);
//!     }
//! }
//!
//! let opts = ProductListOptions {
//!     list: ListOptions { limit: 50, ..Default::default() },
//!     ids: vec![3, 1],
//!     ..Default::default()
//! };
//! assert_eq!(opts.to_query_string(), "ids=3&ids=1&limit=50");
//! ```

use std::collections::BTreeMap;

/// Whether a parameter is dropped when its value is the zero value of its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Omit {
    /// Drop empty strings, `0`, `false`, `None` and empty lists.
    IfZero,
    /// Always send the parameter.
    Never,
}

/// A value that can appear in a query string.
pub trait QueryValue {
    /// Returns `true` for the type's zero value.
    fn is_zero(&self) -> bool;

    /// Renders the value as it appears on the wire (before percent-encoding).
    fn to_query_value(&self) -> String;
}

impl QueryValue for str {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }

    fn to_query_value(&self) -> String {
        self.to_owned()
    }
}

impl QueryValue for String {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }

    fn to_query_value(&self) -> String {
        self.clone()
    }
}

impl QueryValue for bool {
    fn is_zero(&self) -> bool {
        !*self
    }

    fn to_query_value(&self) -> String {
        self.to_string()
    }
}

macro_rules! impl_query_value_for_numbers {
    ($($ty:ty),*) => {
        $(
            impl QueryValue for $ty {
                fn is_zero(&self) -> bool {
                    *self == (0 as $ty)
                }

                fn to_query_value(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

impl_query_value_for_numbers!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64);

impl<T: QueryValue> QueryValue for Option<T> {
    fn is_zero(&self) -> bool {
        self.is_none()
    }

    fn to_query_value(&self) -> String {
        self.as_ref().map(T::to_query_value).unwrap_or_default()
    }
}

impl<T: QueryValue + ?Sized> QueryValue for &T {
    fn is_zero(&self) -> bool {
        (**self).is_zero()
    }

    fn to_query_value(&self) -> String {
        (**self).to_query_value()
    }
}

/// Accumulated query parameters.
///
/// Keys are emitted in sorted order; repeated values of one key keep the order
/// in which they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPairs {
    pairs: BTreeMap<String, Vec<String>>,
}

impl QueryPairs {
    /// Creates an empty set of parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scalar parameter.
    pub fn field<V: QueryValue + ?Sized>(&mut self, name: &str, value: &V, omit: Omit) -> &mut Self {
        if omit == Omit::IfZero && value.is_zero() {
            return self;
        }
        self.push(name, value.to_query_value());
        self
    }

    /// Adds one `name=value` pair per element. Lists are never comma-joined.
    ///
    /// With [`Omit::IfZero`] an empty list adds nothing; with [`Omit::Never`]
    /// it adds `name=` so the parameter is still present.
    pub fn list<V: QueryValue>(&mut self, name: &str, values: &[V], omit: Omit) -> &mut Self {
        if values.is_empty() {
            if omit == Omit::Never {
                self.push(name, String::new());
            }
            return self;
        }
        for value in values {
            self.push(name, value.to_query_value());
        }
        self
    }

    /// Adds the parameters of an embedded option group.
    pub fn flatten<O: QueryOptions + ?Sized>(&mut self, nested: &O) -> &mut Self {
        nested.append_query(self);
        self
    }

    /// Returns `true` if no parameter has been added.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterates over `(name, value)` pairs in encoding order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    /// Encodes the parameters as `application/x-www-form-urlencoded`.
    pub fn encode(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in self.iter() {
            serializer.append_pair(name, value);
        }
        serializer.finish()
    }

    fn push(&mut self, name: &str, value: String) {
        self.pairs.entry(name.to_owned()).or_default().push(value);
    }
}

/// Implemented by option structs that serialise to a query string.
pub trait QueryOptions: Send + Sync {
    /// Adds this struct's parameters to `query`.
    fn append_query(&self, query: &mut QueryPairs);

    /// Collects the parameters into a fresh [`QueryPairs`].
    fn to_query_pairs(&self) -> QueryPairs {
        let mut query = QueryPairs::new();
        self.append_query(&mut query);
        query
    }

    /// Encodes the parameters; empty when every field was omitted.
    fn to_query_string(&self) -> String {
        self.to_query_pairs().encode()
    }
}

impl QueryOptions for QueryPairs {
    fn append_query(&self, query: &mut QueryPairs) {
        for (name, values) in &self.pairs {
            for value in values {
                query.push(name, value.clone());
            }
        }
    }
}

/// Pagination and date filters shared by list endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Page number, starting at 1.
    pub page: i32,
    /// Maximum number of records per page.
    pub limit: i32,
    /// Only records with an id greater than this.
    pub since_id: i64,
    /// Created at or after this ISO 8601 time.
    pub created_at_min: String,
    /// Created at or before this ISO 8601 time.
    pub created_at_max: String,
    /// Updated at or after this ISO 8601 time.
    pub updated_at_min: String,
    /// Updated at or before this ISO 8601 time.
    pub updated_at_max: String,
    /// Comma separated list of fields to return.
    pub fields: String,
}

impl QueryOptions for ListOptions {
    fn append_query(&self, query: &mut QueryPairs) {
        query
            .field("page", &self.page, Omit::IfZero)
            .field("limit", &self.limit, Omit::IfZero)
            .field("since_id", &self.since_id, Omit::IfZero)
            .field("created_at_min", &self.created_at_min, Omit::IfZero)
            .field("created_at_max", &self.created_at_max, Omit::IfZero)
            .field("updated_at_min", &self.updated_at_min, Omit::IfZero)
            .field("updated_at_max", &self.updated_at_max, Omit::IfZero)
            .field("fields", &self.fields, Omit::IfZero);
    }
}

/// Date filters shared by count endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountOptions {
    /// Created at or after this ISO 8601 time.
    pub created_at_min: String,
    /// Created at or before this ISO 8601 time.
    pub created_at_max: String,
    /// Updated at or after this ISO 8601 time.
    pub updated_at_min: String,
    /// Updated at or before this ISO 8601 time.
    pub updated_at_max: String,
}

impl QueryOptions for CountOptions {
    fn append_query(&self, query: &mut QueryPairs) {
        query
            .field("created_at_min", &self.created_at_min, Omit::IfZero)
            .field("created_at_max", &self.created_at_max, Omit::IfZero)
            .field("updated_at_min", &self.updated_at_min, Omit::IfZero)
            .field("updated_at_max", &self.updated_at_max, Omit::IfZero);
    }
}

/// Appends `query` to `path` with `?`, or `&` if the path already has a query.
pub(crate) fn append_to_path(path: &str, query: &str) -> String {
    if query.is_empty() {
        return path.to_owned();
    }
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}{query}")
}
