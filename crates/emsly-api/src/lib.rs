// emsly-api: Async Rust client for the EMS flight-data analytics API
//
// Token lifecycle, per-cost-class rate limiting, and a retrying executor
// in front of typed endpoint methods. Higher-level discovery, caching and
// query building live in `emsly-core`.

pub mod auth;
pub mod client;
pub mod clock;
mod endpoints;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod retry;
pub mod transport;

pub use auth::{Credential, IssuedToken, PasswordGrant, TokenManager, TokenSource};
pub use client::{ApiRequest, ApiResponse, ClientOptions, EmsClient};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{Error, ErrorKind};
pub use rate_limit::{CostClass, RateLimit, RateLimiter, RateLimits};
pub use retry::{Backoff, RetryPolicy};
pub use transport::{TlsMode, TransportConfig};
