// ── Core error types ──
//
// Errors surfaced by discovery, query building and the session facade.
// Wire-level failures keep their `emsly_api::Error` classification intact;
// local failures (pre-flight validation, name resolution) get their own
// variants but report the same `ErrorKind` vocabulary.

use emsly_api::{Error as ApiError, ErrorKind};
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // ── API errors (classified by emsly-api) ─────────────────────────
    #[error(transparent)]
    Api(ApiError),

    // ── Pre-flight validation ────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Ambiguous {entity} name '{name}': matches {}", candidates.join(", "))]
    Ambiguous {
        entity: &'static str,
        name: String,
        candidates: Vec<String>,
    },

    // ── Resolution errors ────────────────────────────────────────────
    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    /// A flight whose analytics came back as a full-size all-zero series.
    #[error("No data for flight {flight}: {samples} samples, all zero (flight id is probably invalid)")]
    ZeroFilledFlight { flight: i64, samples: usize },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    /// Classification shared with `emsly_api::Error`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api(err) => err.kind(),
            Self::ValidationFailed { .. } | Self::Ambiguous { .. } => ErrorKind::Validation,
            Self::NotFound { .. } | Self::ZeroFilledFlight { .. } => ErrorKind::NotFound,
            Self::Config { .. } => ErrorKind::Configuration,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// The wrapped API error, if this failure came off the wire.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(err) => Some(err),
            _ => None,
        }
    }
}

// ── Conversion from wire-level errors ────────────────────────────────

impl From<ApiError> for CoreError {
    fn from(err: ApiError) -> Self {
        match err {
            // Builder-style validation raised inside emsly-api (no HTTP status)
            // is a local pre-flight failure here too.
            ApiError::Validation {
                message,
                status: None,
                detail: None,
            } => Self::ValidationFailed { message },
            ApiError::Configuration(message) => Self::Config { message },
            other => Self::Api(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_wrapped_api_error() {
        let err = CoreError::from(ApiError::Server {
            status: 502,
            message: "Bad Gateway".into(),
            detail: None,
        });
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(err.api_error().is_some());
    }

    #[test]
    fn local_failures_map_to_shared_kinds() {
        assert_eq!(CoreError::validation("bad").kind(), ErrorKind::Validation);
        assert_eq!(
            CoreError::ZeroFilledFlight {
                flight: 999_999,
                samples: 5000
            }
            .kind(),
            ErrorKind::NotFound
        );
        let ambiguous = CoreError::Ambiguous {
            entity: "field",
            name: "altitude".into(),
            candidates: vec!["Altitude AGL".into(), "Altitude MSL".into()],
        };
        assert_eq!(ambiguous.kind(), ErrorKind::Validation);
        assert_eq!(
            ambiguous.to_string(),
            "Ambiguous field name 'altitude': matches Altitude AGL, Altitude MSL"
        );
    }

    #[test]
    fn status_less_validation_becomes_local() {
        let err = CoreError::from(ApiError::validation("limit must be positive"));
        assert_eq!(
            err,
            CoreError::ValidationFailed {
                message: "limit must be positive".into()
            }
        );
    }
}
