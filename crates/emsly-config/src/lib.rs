//! Configuration loading for emsly sessions.
//!
//! Layered settings (defaults, `config.toml`, `EMS_*` environment
//! variables), base URL normalisation, password resolution through the
//! OS keyring, and translation to [`emsly_core::SessionConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use emsly_api::ClientOptions;
use emsly_core::models::SystemId;
use emsly_core::{DEFAULT_CACHE_TTL, DiscreteMode, SessionConfig, TlsVerification};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Keyring service under which passwords are stored, keyed by username.
pub const KEYRING_SERVICE: &str = "emsly";

/// Prefix of the environment variables read by [`load_settings`].
pub const ENV_PREFIX: &str = "EMS_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password for EMS user '{username}' (set EMS_PASSWORD or store one in the keyring)")]
    NoCredentials { username: String },

    #[error("failed to serialize settings: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("settings loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── Settings ────────────────────────────────────────────────────────

/// Everything needed to open a session, as read from file and environment.
///
/// Durations are whole seconds. The password is never written back to disk.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmsSettings {
    /// Server root, e.g. `https://ems.example.com`. A trailing `/api` is
    /// accepted and stripped.
    pub base_url: Option<String>,

    pub username: Option<String>,

    /// Plaintext password (prefer `EMS_PASSWORD` or the keyring).
    #[serde(skip_serializing)]
    pub password: Option<SecretString>,

    pub default_system: Option<SystemId>,

    pub cache_ttl: u64,

    /// Bound on a single HTTP attempt.
    pub request_timeout: u64,

    /// Bound on one logical request, retries included.
    pub deadline: u64,

    pub max_retries: u32,

    pub discrete_mode: DiscreteMode,

    pub detect_zero_fill: bool,

    /// Keep `http://` base URLs instead of upgrading them.
    pub allow_insecure_http: bool,

    /// Skip TLS certificate verification.
    pub insecure: bool,

    /// Custom CA certificate (PEM).
    pub ca_cert: Option<PathBuf>,
}

impl Default for EmsSettings {
    fn default() -> Self {
        let client = ClientOptions::default();
        Self {
            base_url: None,
            username: None,
            password: None,
            default_system: None,
            cache_ttl: DEFAULT_CACHE_TTL.as_secs(),
            request_timeout: client.transport.attempt_timeout.as_secs(),
            deadline: client.deadline.as_secs(),
            max_retries: client.retry.max_retries,
            discrete_mode: DiscreteMode::default(),
            detect_zero_fill: true,
            allow_insecure_http: false,
            insecure: false,
            ca_cert: None,
        }
    }
}

impl EmsSettings {
    /// Validate and translate into a [`SessionConfig`], resolving the
    /// password from the settings or the OS keyring.
    pub fn into_session_config(self) -> Result<SessionConfig, ConfigError> {
        self.into_session_config_with(keyring_password)
    }

    /// [`into_session_config`](Self::into_session_config) with a custom
    /// stored-password lookup.
    pub fn into_session_config_with(
        self,
        stored_password: impl FnOnce(&str) -> Option<SecretString>,
    ) -> Result<SessionConfig, ConfigError> {
        let raw_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| ConfigError::invalid("base_url", "not set (EMS_BASE_URL)"))?;
        let base_url = normalize_base_url(raw_url, self.allow_insecure_http)?;

        let username = self
            .username
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ConfigError::invalid("username", "not set (EMS_USERNAME)"))?;

        let cache_ttl = seconds("cache_ttl", self.cache_ttl)?;
        let request_timeout = seconds("request_timeout", self.request_timeout)?;
        let deadline = seconds("deadline", self.deadline)?;

        let password = resolve_password_with(&username, self.password, stored_password)?;

        let tls = if self.insecure {
            TlsVerification::DangerAcceptInvalid
        } else if let Some(ca_path) = self.ca_cert {
            TlsVerification::CustomCa(ca_path)
        } else {
            TlsVerification::SystemDefaults
        };

        let mut config = SessionConfig::new(base_url, username, password);
        config.default_system = self.default_system;
        config.cache_ttl = cache_ttl;
        config.request_timeout = request_timeout;
        config.deadline = deadline;
        config.retry.max_retries = self.max_retries;
        config.discrete_mode = self.discrete_mode;
        config.detect_zero_fill = self.detect_zero_fill;
        config.tls = tls;
        Ok(config)
    }
}

fn seconds(field: &str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be at least 1 second"));
    }
    Ok(Duration::from_secs(value))
}

// ── Base URL ────────────────────────────────────────────────────────

/// Canonical server root: trailing `/` and `/api` removed, `http` upgraded
/// to `https` unless `allow_insecure_http`.
pub fn normalize_base_url(raw: &str, allow_insecure_http: bool) -> Result<Url, ConfigError> {
    let mut trimmed = raw.trim().trim_end_matches('/');
    if let Some(stripped) = trimmed.strip_suffix("/api") {
        trimmed = stripped.trim_end_matches('/');
    }

    let mut url = Url::parse(trimmed)
        .map_err(|e| ConfigError::invalid("base_url", format!("'{raw}' is not a URL: {e}")))?;

    let scheme = url.scheme().to_owned();
    match scheme.as_str() {
        "https" => {}
        "http" if allow_insecure_http => {
            warn!(base_url = %url, "using plain HTTP, credentials will be sent unencrypted");
        }
        "http" => {
            url.set_scheme("https").map_err(|()| {
                ConfigError::invalid("base_url", format!("cannot upgrade '{raw}' to https"))
            })?;
            debug!(base_url = %url, "upgraded base URL to https");
        }
        other => {
            return Err(ConfigError::invalid(
                "base_url",
                format!("unsupported scheme '{other}', expected https"),
            ));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigError::invalid("base_url", format!("'{raw}' has no host")));
    }
    Ok(url)
}

// ── Settings file path ──────────────────────────────────────────────

/// Resolve the settings file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "emsly", "emsly").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("emsly");
    p
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load settings from the canonical file plus `EMS_*` environment variables.
pub fn load_settings() -> Result<EmsSettings, ConfigError> {
    load_settings_from(&config_path())
}

/// Load settings from `path` (optional) plus `EMS_*` environment variables.
///
/// Later layers win: defaults, then the file, then the environment.
pub fn load_settings_from(path: &Path) -> Result<EmsSettings, ConfigError> {
    debug!(path = %path.display(), "loading EMS settings");
    let settings: EmsSettings = Figment::new()
        .merge(Serialized::defaults(EmsSettings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX))
        .extract()?;
    Ok(settings)
}

// ── Saving ──────────────────────────────────────────────────────────

/// Write settings to the canonical path. The password is never written.
pub fn save_settings(settings: &EmsSettings) -> Result<(), ConfigError> {
    save_settings_to(settings, &config_path())
}

pub fn save_settings_to(settings: &EmsSettings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(settings)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credentials ─────────────────────────────────────────────────────

/// Password for `username`: the explicit value if given, else the keyring.
pub fn resolve_password(
    username: &str,
    explicit: Option<SecretString>,
) -> Result<SecretString, ConfigError> {
    resolve_password_with(username, explicit, keyring_password)
}

fn resolve_password_with(
    username: &str,
    explicit: Option<SecretString>,
    stored_password: impl FnOnce(&str) -> Option<SecretString>,
) -> Result<SecretString, ConfigError> {
    if let Some(password) = explicit {
        return Ok(password);
    }
    if let Some(password) = stored_password(username) {
        debug!(username, "using password from keyring");
        return Ok(password);
    }
    Err(ConfigError::NoCredentials {
        username: username.into(),
    })
}

fn keyring_password(username: &str) -> Option<SecretString> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, username).ok()?;
    match entry.get_password() {
        Ok(secret) => Some(SecretString::from(secret)),
        Err(keyring::Error::NoEntry) => None,
        Err(err) => {
            warn!(username, error = %err, "keyring lookup failed");
            None
        }
    }
}

/// Store `password` for `username` in the OS keyring.
pub fn store_password(username: &str, password: &SecretString) -> Result<(), ConfigError> {
    use secrecy::ExposeSecret;

    let entry = keyring::Entry::new(KEYRING_SERVICE, username)?;
    entry.set_password(password.expose_secret())?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use secrecy::ExposeSecret;

    use super::*;

    fn settings(base_url: &str) -> EmsSettings {
        EmsSettings {
            base_url: Some(base_url.into()),
            username: Some("analyst".into()),
            password: Some(SecretString::from("hunter2".to_owned())),
            ..EmsSettings::default()
        }
    }

    fn no_keyring(_: &str) -> Option<SecretString> {
        None
    }

    #[test]
    fn defaults_without_file_or_env() {
        Jail::expect_with(|_jail| {
            let loaded = load_settings_from(Path::new("missing.toml")).unwrap();
            assert_eq!(loaded.base_url, None);
            assert_eq!(loaded.cache_ttl, 3600);
            assert_eq!(loaded.max_retries, 3);
            assert_eq!(loaded.discrete_mode, DiscreteMode::PassThrough);
            assert!(loaded.detect_zero_fill);
            assert!(!loaded.allow_insecure_http);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                    base_url = "https://ems.example.com/api"
                    username = "analyst"
                    cache_ttl = 60
                    discrete_mode = "strict"
                "#,
            )?;
            jail.set_env("EMS_CACHE_TTL", "120");
            jail.set_env("EMS_DEFAULT_SYSTEM", "3");
            jail.set_env("EMS_MAX_RETRIES", "5");
            jail.set_env("EMS_PASSWORD", "from-env");

            let loaded = load_settings_from(Path::new("config.toml")).unwrap();
            assert_eq!(loaded.cache_ttl, 120);
            assert_eq!(loaded.default_system, Some(3));
            assert_eq!(loaded.discrete_mode, DiscreteMode::Strict);

            let config = loaded.into_session_config_with(no_keyring).unwrap();
            assert_eq!(config.base_url.as_str(), "https://ems.example.com/");
            assert_eq!(config.username, "analyst");
            assert_eq!(config.password.expose_secret(), "from-env");
            assert_eq!(config.cache_ttl, Duration::from_secs(120));
            assert_eq!(config.retry.max_retries, 5);
            assert_eq!(config.default_system, Some(3));
            Ok(())
        });
    }

    #[test]
    fn malformed_file_is_figment_error() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "cache_ttl = \"soon\"")?;
            let err = load_settings_from(Path::new("config.toml")).unwrap_err();
            assert!(matches!(err, ConfigError::Figment(_)));
            Ok(())
        });
    }

    #[test]
    fn base_url_normalisation() {
        let url = normalize_base_url("http://ems.example.com/api/", false).unwrap();
        assert_eq!(url.as_str(), "https://ems.example.com/");

        let url = normalize_base_url(" https://ems.example.com:8443/ ", false).unwrap();
        assert_eq!(url.as_str(), "https://ems.example.com:8443/");

        let url = normalize_base_url("http://localhost:8080", true).unwrap();
        assert_eq!(url.scheme(), "http");
    }

    #[test]
    fn bad_base_urls_are_rejected() {
        for raw in ["ftp://ems.example.com", "not a url", ""] {
            let err = normalize_base_url(raw, false).unwrap_err();
            assert!(
                matches!(err, ConfigError::Validation { ref field, .. } if field == "base_url"),
                "{raw}: {err}"
            );
        }
    }

    #[test]
    fn keyring_is_consulted_only_without_explicit_password() {
        let explicit = resolve_password_with(
            "analyst",
            Some(SecretString::from("explicit".to_owned())),
            |_| panic!("keyring must not be read"),
        )
        .unwrap();
        assert_eq!(explicit.expose_secret(), "explicit");

        let stored = resolve_password_with("analyst", None, |user| {
            assert_eq!(user, "analyst");
            Some(SecretString::from("stored".to_owned()))
        })
        .unwrap();
        assert_eq!(stored.expose_secret(), "stored");

        let err = resolve_password_with("analyst", None, no_keyring).unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { ref username } if username == "analyst"));
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn missing_fields_and_zero_durations_fail_validation() {
        let mut no_url = settings("https://ems.example.com");
        no_url.base_url = None;
        let err = no_url.into_session_config_with(no_keyring).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "base_url"));

        let mut no_user = settings("https://ems.example.com");
        no_user.username = Some("  ".into());
        let err = no_user.into_session_config_with(no_keyring).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "username"));

        let mut zero = settings("https://ems.example.com");
        zero.request_timeout = 0;
        let err = zero.into_session_config_with(no_keyring).unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation { ref field, .. } if field == "request_timeout")
        );
    }

    #[test]
    fn tls_options_map_to_verification_mode() {
        let mut s = settings("https://ems.example.com");
        s.ca_cert = Some(PathBuf::from("/etc/ems/ca.pem"));
        let config = s.clone().into_session_config_with(no_keyring).unwrap();
        assert_eq!(config.tls, TlsVerification::CustomCa(PathBuf::from("/etc/ems/ca.pem")));

        s.insecure = true;
        let config = s.into_session_config_with(no_keyring).unwrap();
        assert_eq!(config.tls, TlsVerification::DangerAcceptInvalid);
    }

    #[test]
    fn saved_settings_omit_password() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("nested").join("config.toml");
            let mut original = settings("https://ems.example.com");
            original.default_system = Some(2);
            save_settings_to(&original, &path).unwrap();

            let written = std::fs::read_to_string(&path).unwrap();
            assert!(written.contains("base_url = \"https://ems.example.com\""));
            assert!(!written.contains("hunter2"));

            let reloaded = load_settings_from(&path).unwrap();
            assert_eq!(reloaded.default_system, Some(2));
            assert!(reloaded.password.is_none());
            Ok(())
        });
    }

    #[test]
    fn debug_output_redacts_password() {
        let rendered = format!("{:?}", settings("https://ems.example.com"));
        assert!(!rendered.contains("hunter2"));
    }
}
