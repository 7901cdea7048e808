//! Discovery, query building and caching on top of `emsly-api`.
//!
//! - **[`Session`]**: facade owning one [`EmsClient`](emsly_api::EmsClient)
//!   and the discovery caches. [`Session::with_deadline`] gives a handle
//!   with a different per-request deadline over the same state.
//!
//! - **[`DiscoveryService`]**: cached listings of systems, databases,
//!   fields, analytics and assets; name-to-id resolution; bounded deep
//!   field search.
//!
//! - **[`QueryService`]**: database queries and concurrent per-flight
//!   analytics with per-flight failure reporting. Never cached.
//!
//! - **[`query`]**: pure translation from [`QuerySpec`] / [`FilterSpec`]
//!   into the server's query documents, including discrete-value checks.
//!
//! - **[`EntityCache`]**: TTL cache with single-flight misses.

pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod query;
pub mod query_service;
pub mod refs;
pub mod session;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cache::{EntityCache, Lookup};
pub use config::{DEFAULT_CACHE_TTL, SessionConfig, TlsVerification};
pub use discovery::{DeepSearchLimits, DeepSearchOutcome, DiscoveryService, FieldMatch};
pub use error::CoreError;
pub use query::{
    Aggregate, Condition, DiscreteMode, FilterSpec, Operator, OrderBy, QuerySpec, ResultFormat,
    SampleWindow, SelectField, SortDirection,
};
pub use query_service::{FlightAnalytics, FlightSeries, QueryResult, QueryService};
pub use refs::{AnalyticRef, DatabaseRef, FieldRef, ResolvedAnalytic};
pub use session::Session;

// Wire-level types callers need alongside the services.
pub use emsly_api::models;
pub use emsly_api::{Error as ApiError, ErrorKind};
