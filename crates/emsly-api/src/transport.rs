// Shared transport configuration for building reqwest::Client instances.
//
// One pooled client per `EmsClient`, reused by the token exchange and every
// API call so connections are shared across concurrent requests.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};

use crate::error::Error;

/// Application name the EMS server uses to attribute API traffic.
pub const APPLICATION_NAME: &str = "emsly";

/// TLS verification mode.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (lab installations with self-signed certs).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Upper bound for a single HTTP attempt. Exceeding it counts as a
    /// transport failure and is retried.
    pub attempt_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            attempt_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("emsly/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.attempt_timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(&self.user_agent)
            .default_headers(default_headers());

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Configuration(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Configuration(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        "X-Adi-Application-Name",
        HeaderValue::from_static(APPLICATION_NAME),
    );
    headers
}
