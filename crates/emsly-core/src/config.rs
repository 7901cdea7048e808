// ── Runtime session configuration ──
//
// These types describe *how* to talk to an EMS server. They carry
// credential data and client tuning, but never touch disk or the
// environment; `emsly-config` builds a `SessionConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use emsly_api::models::SystemId;
use emsly_api::{ClientOptions, RateLimits, RetryPolicy, SharedClock, TlsMode, TransportConfig};
use secrecy::SecretString;
use url::Url;

use crate::query::DiscreteMode;

/// Default lifetime of cached discovery data.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (lab servers with self-signed certs).
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => Self::System,
            TlsVerification::CustomCa(path) => Self::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => Self::DangerAcceptInvalid,
        }
    }
}

/// Configuration for one session against a single EMS server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server root, e.g. `https://ems.example.com` (no trailing `/api`).
    pub base_url: Url,
    pub username: String,
    pub password: SecretString,
    /// System used when the caller does not name one.
    pub default_system: Option<SystemId>,
    /// Lifetime of cached discovery data.
    pub cache_ttl: Duration,
    /// Bound on one logical request, retries included.
    pub deadline: Duration,
    /// Bound on a single HTTP attempt.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_limits: RateLimits,
    pub tls: TlsVerification,
    /// How filters on discrete fields are checked before sending.
    pub discrete_mode: DiscreteMode,
    /// Report full-size all-zero analytics series as a missing flight.
    pub detect_zero_fill: bool,
    pub clock: Option<SharedClock>,
}

impl SessionConfig {
    /// Configuration with defaults for everything but the server and
    /// credentials.
    pub fn new(base_url: Url, username: impl Into<String>, password: SecretString) -> Self {
        let defaults = ClientOptions::default();
        Self {
            base_url,
            username: username.into(),
            password,
            default_system: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            deadline: defaults.deadline,
            request_timeout: defaults.transport.attempt_timeout,
            retry: defaults.retry,
            rate_limits: defaults.rate_limits,
            tls: TlsVerification::default(),
            discrete_mode: DiscreteMode::default(),
            detect_zero_fill: true,
            clock: None,
        }
    }

    /// Options for the underlying `EmsClient`.
    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions {
            transport: TransportConfig {
                tls: TlsMode::from(&self.tls),
                attempt_timeout: self.request_timeout,
                ..TransportConfig::default()
            },
            retry: self.retry.clone(),
            rate_limits: self.rate_limits,
            deadline: self.deadline,
            ..ClientOptions::default()
        };
        if let Some(clock) = &self.clock {
            options.clock = clock.clone();
        }
        options
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_client_defaults() {
        let config = SessionConfig::new(
            "https://ems.example.com".parse().unwrap(),
            "analyst",
            SecretString::from("hunter2".to_owned()),
        );
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert!(config.detect_zero_fill);

        let options = config.client_options();
        assert_eq!(options.transport.attempt_timeout, Duration::from_secs(120));
        assert_eq!(options.deadline, config.deadline);
        assert!(matches!(options.transport.tls, TlsMode::System));
    }

    #[test]
    fn debug_output_hides_password() {
        let config = SessionConfig::new(
            "https://ems.example.com".parse().unwrap(),
            "analyst",
            SecretString::from("hunter2".to_owned()),
        );
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
