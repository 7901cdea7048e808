use std::time::Duration;

use strum::{Display, EnumString};
use thiserror::Error;

/// Coarse classification of an [`Error`].
///
/// Callers branch on this instead of matching individual variants, which
/// keeps retry and reporting logic stable when variants gain fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    Authorization,
    NotFound,
    Validation,
    RateLimit,
    Server,
    Network,
    Timeout,
    MaxRetriesExceeded,
    Decode,
    Configuration,
}

/// Top-level error type for the `emsly-api` crate.
///
/// A closed set of failure modes across credential exchange, transport, and
/// the EMS REST surface. Every variant carries owned strings only, so the
/// type is `Clone` and a single failure can be handed to every waiter of a
/// shared refresh or fetch. Credentials never appear in any message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Credential exchange rejected, or a request was still unauthorized
    /// after one forced refresh.
    #[error("Authentication failed: {message}{}", render_detail(detail.as_deref()))]
    Authentication {
        message: String,
        detail: Option<String>,
    },

    /// HTTP 403.
    #[error("Access denied: {message}{}", render_detail(detail.as_deref()))]
    Authorization {
        message: String,
        detail: Option<String>,
    },

    // ── Request outcome ─────────────────────────────────────────────
    /// HTTP 404.
    #[error("Not found: {message}{}", render_detail(detail.as_deref()))]
    NotFound {
        message: String,
        detail: Option<String>,
    },

    /// Any other 4xx, or a request rejected before it was sent.
    #[error("Invalid request{}: {message}{}", render_status(*status), render_detail(detail.as_deref()))]
    Validation {
        message: String,
        detail: Option<String>,
        status: Option<u16>,
    },

    /// HTTP 429 after the rate-limit retry allowance was used up.
    #[error("Rate limited after {attempts} attempt(s)")]
    RateLimited {
        attempts: u32,
        retry_after_secs: Option<u64>,
    },

    /// HTTP 5xx after the server-error retry allowance was used up.
    #[error("Server error (HTTP {status}): {message}{}", render_detail(detail.as_deref()))]
    Server {
        status: u16,
        message: String,
        detail: Option<String>,
    },

    // ── Transport ───────────────────────────────────────────────────
    /// Connect, DNS, or per-attempt timeout failure after retries.
    #[error("Network error after {attempts} attempt(s): {message}")]
    Network { message: String, attempts: u32 },

    /// The caller-supplied deadline passed before a terminal outcome.
    #[error("Deadline of {}ms exceeded", deadline.as_millis())]
    Timeout { deadline: Duration },

    /// The total retry budget ran out before any per-category allowance did.
    #[error("Retry budget of {}ms exhausted after {attempts} attempt(s); last failure: {last}", budget.as_millis())]
    MaxRetriesExceeded {
        budget: Duration,
        attempts: u32,
        last: String,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// A success body did not match the expected record shape.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Setup ───────────────────────────────────────────────────────
    /// Invalid base URL, TLS material, or builder input.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

fn render_detail(detail: Option<&str>) -> String {
    detail.map(|d| format!(" ({d})")).unwrap_or_default()
}

fn render_status(status: Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl Error {
    /// The coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Server { .. } => ErrorKind::Server,
            Self::Network { .. } => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::MaxRetriesExceeded { .. } => ErrorKind::MaxRetriesExceeded,
            Self::Deserialization { .. } => ErrorKind::Decode,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Returns `true` for the kinds the retrying client handles locally
    /// before surfacing them.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network | ErrorKind::Server | ErrorKind::RateLimit
        )
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Shorthand for a locally detected validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            detail: None,
            status: None,
        }
    }

    /// The upstream detail string, if the server supplied one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Authentication { detail, .. }
            | Self::Authorization { detail, .. }
            | Self::NotFound { detail, .. }
            | Self::Validation { detail, .. }
            | Self::Server { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::Configuration(format!("invalid URL: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct_per_variant() {
        let errors = [
            Error::Authentication {
                message: "bad".into(),
                detail: None,
            },
            Error::Authorization {
                message: "no".into(),
                detail: None,
            },
            Error::NotFound {
                message: "gone".into(),
                detail: None,
            },
            Error::validation("bad input"),
            Error::RateLimited {
                attempts: 3,
                retry_after_secs: Some(5),
            },
            Error::Server {
                status: 503,
                message: "down".into(),
                detail: None,
            },
            Error::Network {
                message: "refused".into(),
                attempts: 4,
            },
            Error::Timeout {
                deadline: Duration::from_secs(1),
            },
            Error::MaxRetriesExceeded {
                budget: Duration::from_secs(1),
                attempts: 2,
                last: "HTTP 503".into(),
            },
        ];

        let kinds: std::collections::HashSet<ErrorKind> =
            errors.iter().map(Error::kind).collect();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn only_retryable_kinds_are_transient() {
        assert!(
            Error::Network {
                message: "x".into(),
                attempts: 1
            }
            .is_transient()
        );
        assert!(!Error::validation("x").is_transient());
        assert!(
            !Error::NotFound {
                message: "x".into(),
                detail: None
            }
            .is_transient()
        );
    }

    #[test]
    fn display_includes_upstream_detail_verbatim() {
        let err = Error::Validation {
            message: "Invalid query".into(),
            detail: Some("Field [x] is not selectable".into()),
            status: Some(400),
        };
        assert_eq!(
            err.to_string(),
            "Invalid request (HTTP 400): Invalid query (Field [x] is not selectable)"
        );
        assert_eq!(err.detail(), Some("Field [x] is not selectable"));
    }

    #[test]
    fn kind_renders_snake_case() {
        assert_eq!(ErrorKind::MaxRetriesExceeded.to_string(), "max_retries_exceeded");
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }
}
