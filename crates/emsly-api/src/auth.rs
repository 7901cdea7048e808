// Bearer credential lifecycle
//
// `TokenManager` owns the one credential an `EmsClient` uses. The refresh is
// a single-flight critical section: callers that queue up behind an
// in-flight refresh receive its outcome instead of starting their own.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::clock::SharedClock;
use crate::error::Error;
use crate::retry::RetryPolicy;

/// Safety margin: a credential is refreshed once less than this much of
/// its lifetime remains.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(60);

// ── Credential ──────────────────────────────────────────────────────

/// A bearer token with its absolute expiry.
///
/// Replaced wholesale on refresh. `serial` identifies which refresh
/// produced it, so a 401 can invalidate exactly the credential that failed.
#[derive(Clone)]
pub struct Credential {
    token: SecretString,
    expires_at: Instant,
    serial: u64,
}

impl Credential {
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// `true` while more than `buffer` of the lifetime remains at `now`.
    pub fn is_fresh_at(&self, now: Instant, buffer: Duration) -> bool {
        now.checked_add(buffer)
            .is_some_and(|threshold| threshold < self.expires_at)
    }

    /// The `Authorization` header value, flagged sensitive so it is
    /// redacted from reqwest's debug output.
    pub fn bearer_header(&self) -> Result<HeaderValue, Error> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.token.expose_secret()))
            .map_err(|_| Error::Authentication {
                message: "access token contains characters not allowed in a header".into(),
                detail: None,
            })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("serial", &self.serial)
            .finish()
    }
}

// ── Token sources ───────────────────────────────────────────────────

/// What a credential exchange hands back.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: SecretString,
    pub expires_in: Duration,
}

/// Performs one credential exchange.
///
/// The production implementation is [`PasswordGrant`]; tests substitute
/// counting or failing sources.
pub trait TokenSource: Send + Sync + fmt::Debug {
    fn issue(&self) -> BoxFuture<'_, Result<IssuedToken, Error>>;
}

/// `POST /api/token` response body. `token_type` is always "bearer".
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// `{error, error_description}` body returned by a rejected exchange.
#[derive(Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// OAuth2 resource-owner password grant against `POST /api/token`.
///
/// Transport failures and 5xx answers are retried with the same bounds as
/// any other request; a rejected exchange is never retried.
pub struct PasswordGrant {
    http: reqwest::Client,
    token_url: Url,
    username: String,
    password: SecretString,
    retry: RetryPolicy,
}

impl fmt::Debug for PasswordGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordGrant")
            .field("token_url", &self.token_url.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl PasswordGrant {
    pub fn new(
        http: reqwest::Client,
        base_url: &Url,
        username: impl Into<String>,
        password: SecretString,
        retry: RetryPolicy,
    ) -> Result<Self, Error> {
        let mut token_url = base_url.clone();
        token_url
            .path_segments_mut()
            .map_err(|()| Error::Configuration(format!("base URL cannot carry a path: {base_url}")))?
            .pop_if_empty()
            .extend(["api", "token"]);

        Ok(Self {
            http,
            token_url,
            username: username.into(),
            password,
            retry,
        })
    }

    async fn exchange(&self) -> Result<IssuedToken, Error> {
        let mut attempt: u32 = 0;
        loop {
            debug!(url = %self.token_url, attempt, "requesting access token");
            let form = [
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.expose_secret()),
            ];
            let failure = match self.http.post(self.token_url.clone()).form(&form).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return parse_token_response(&body);
                    }
                    if !status.is_server_error() {
                        return Err(rejected_exchange(status.as_u16(), &body));
                    }
                    if attempt >= self.retry.max_retries {
                        return Err(Error::Server {
                            status: status.as_u16(),
                            message: "token endpoint unavailable".into(),
                            detail: non_empty(&body),
                        });
                    }
                    format!("HTTP {status}")
                }
                Err(e) => {
                    if attempt >= self.retry.max_retries {
                        return Err(Error::Network {
                            message: e.without_url().to_string(),
                            attempts: attempt + 1,
                        });
                    }
                    e.without_url().to_string()
                }
            };

            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "token exchange failed ({failure}), retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl TokenSource for PasswordGrant {
    fn issue(&self) -> BoxFuture<'_, Result<IssuedToken, Error>> {
        Box::pin(self.exchange())
    }
}

fn parse_token_response(body: &str) -> Result<IssuedToken, Error> {
    let parsed: TokenResponse = serde_json::from_str(body).map_err(|e| Error::Deserialization {
        message: format!("token response: {e}"),
        // The body holds the token itself; never echo it.
        body: String::new(),
    })?;
    Ok(IssuedToken {
        access_token: SecretString::from(parsed.access_token),
        expires_in: Duration::from_secs(parsed.expires_in),
    })
}

fn rejected_exchange(status: u16, body: &str) -> Error {
    match serde_json::from_str::<OAuthErrorResponse>(body) {
        Ok(oauth) => Error::Authentication {
            message: oauth
                .error_description
                .unwrap_or_else(|| format!("token request rejected (HTTP {status})")),
            detail: Some(oauth.error),
        },
        Err(_) => Error::Authentication {
            message: format!("token request rejected (HTTP {status})"),
            detail: non_empty(body),
        },
    }
}

fn non_empty(body: &str) -> Option<String> {
    let trimmed = body.trim();
    (!trimmed.is_empty()).then(|| trimmed.chars().take(200).collect())
}

// ── TokenManager ────────────────────────────────────────────────────

#[derive(Default)]
struct TokenState {
    credential: Option<Credential>,
    /// Outcome of the latest refresh when it failed; handed to callers that
    /// were queued behind it.
    last_error: Option<Error>,
    serial: u64,
}

/// Owns the current bearer credential and refreshes it before expiry.
pub struct TokenManager {
    source: Arc<dyn TokenSource>,
    clock: SharedClock,
    buffer: Duration,
    state: Mutex<TokenState>,
    /// Bumped after every refresh attempt, successful or not.
    epoch: AtomicU64,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("source", &self.source)
            .field("buffer", &self.buffer)
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(source: Arc<dyn TokenSource>, clock: SharedClock) -> Self {
        Self::with_buffer(source, clock, DEFAULT_REFRESH_BUFFER)
    }

    pub fn with_buffer(source: Arc<dyn TokenSource>, clock: SharedClock, buffer: Duration) -> Self {
        Self {
            source,
            clock,
            buffer,
            state: Mutex::new(TokenState::default()),
            epoch: AtomicU64::new(0),
        }
    }

    /// A credential valid for at least the refresh buffer past return.
    ///
    /// At most one exchange runs at a time. Callers that waited on the lock
    /// while another caller refreshed share that refresh's result,
    /// including its failure.
    pub async fn get_valid_credential(&self) -> Result<Credential, Error> {
        let observed = self.epoch.load(Ordering::Acquire);
        let mut state = self.state.lock().await;

        if let Some(credential) = state.credential.as_ref().filter(|c| self.is_fresh(c)) {
            return Ok(credential.clone());
        }

        if self.epoch.load(Ordering::Acquire) != observed {
            if let Some(err) = &state.last_error {
                return Err(err.clone());
            }
        }

        self.refresh(&mut state).await
    }

    /// Drop the current credential; the next call refreshes unconditionally.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.credential = None;
        state.last_error = None;
        debug!("credential invalidated");
    }

    /// Drop the current credential only if it is the one that was rejected.
    ///
    /// Concurrent requests that all saw a 401 for the same credential cause
    /// one refresh, not one each.
    pub async fn invalidate_stale(&self, rejected: &Credential) {
        let mut state = self.state.lock().await;
        if state
            .credential
            .as_ref()
            .is_some_and(|current| current.serial == rejected.serial)
        {
            state.credential = None;
            state.last_error = None;
            debug!(serial = rejected.serial, "rejected credential invalidated");
        }
    }

    /// Whether a credential is held and fresh, without refreshing.
    pub async fn has_valid_credential(&self) -> bool {
        let state = self.state.lock().await;
        state.credential.as_ref().is_some_and(|c| self.is_fresh(c))
    }

    fn is_fresh(&self, credential: &Credential) -> bool {
        credential.is_fresh_at(self.clock.now(), self.buffer)
    }

    async fn refresh(&self, state: &mut TokenState) -> Result<Credential, Error> {
        let requested_at = self.clock.now();
        let outcome = self.source.issue().await;
        self.epoch.fetch_add(1, Ordering::AcqRel);

        match outcome {
            Ok(issued) => {
                if issued.expires_in <= self.buffer {
                    warn!(
                        expires_in_secs = issued.expires_in.as_secs(),
                        "issued token lifetime is shorter than the refresh buffer"
                    );
                }
                state.serial += 1;
                let credential = Credential {
                    token: issued.access_token,
                    expires_at: requested_at + issued.expires_in,
                    serial: state.serial,
                };
                info!(
                    serial = credential.serial,
                    expires_in_secs = issued.expires_in.as_secs(),
                    "access token refreshed"
                );
                state.credential = Some(credential.clone());
                state.last_error = None;
                Ok(credential)
            }
            Err(err) => {
                warn!(kind = %err.kind(), "access token refresh failed");
                state.credential = None;
                state.last_error = Some(err.clone());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;

    #[derive(Debug)]
    struct CountingSource {
        calls: AtomicUsize,
        lifetime: Duration,
        fail: bool,
        delay: Duration,
    }

    impl CountingSource {
        fn ok(lifetime: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                lifetime,
                fail: false,
                delay: Duration::ZERO,
            })
        }

        fn slow(lifetime: Duration, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                lifetime,
                fail: false,
                delay,
            })
        }

        fn failing(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                lifetime: Duration::ZERO,
                fail: true,
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenSource for CountingSource {
        fn issue(&self) -> BoxFuture<'_, Result<IssuedToken, Error>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if self.fail {
                    return Err(Error::Authentication {
                        message: "The user name or password is incorrect.".into(),
                        detail: Some("invalid_grant".into()),
                    });
                }
                Ok(IssuedToken {
                    access_token: SecretString::from(format!("token-{n}")),
                    expires_in: self.lifetime,
                })
            })
        }
    }

    fn manager(source: Arc<CountingSource>, clock: &ManualClock) -> TokenManager {
        TokenManager::new(source, Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn fresh_credential_is_reused_without_refresh() {
        let clock = ManualClock::new();
        let source = CountingSource::ok(Duration::from_secs(1799));
        let tokens = manager(source.clone(), &clock);

        let first = tokens.get_valid_credential().await.unwrap();
        clock.advance(Duration::from_secs(1000));
        let second = tokens.get_valid_credential().await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(first.serial(), second.serial());
    }

    #[tokio::test]
    async fn credential_inside_buffer_is_refreshed() {
        let clock = ManualClock::new();
        let source = CountingSource::ok(Duration::from_secs(1799));
        let tokens = manager(source.clone(), &clock);

        let first = tokens.get_valid_credential().await.unwrap();
        clock.advance(Duration::from_secs(1750));
        let second = tokens.get_valid_credential().await.unwrap();

        assert_eq!(source.calls(), 2);
        assert_ne!(first.serial(), second.serial());
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let clock = ManualClock::new();
        let source = CountingSource::slow(Duration::from_secs(1799), Duration::from_millis(50));
        let tokens = Arc::new(manager(source.clone(), &clock));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tokens = Arc::clone(&tokens);
                tokio::spawn(async move { tokens.get_valid_credential().await })
            })
            .collect();

        let mut serials = Vec::new();
        for handle in handles {
            serials.push(handle.await.unwrap().unwrap().serial());
        }

        assert_eq!(source.calls(), 1);
        assert!(serials.iter().all(|s| *s == serials[0]));
    }

    #[tokio::test]
    async fn waiters_share_a_failed_refresh() {
        let clock = ManualClock::new();
        let source = CountingSource::failing(Duration::from_millis(50));
        let tokens = Arc::new(manager(source.clone(), &clock));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tokens = Arc::clone(&tokens);
                tokio::spawn(async move { tokens.get_valid_credential().await })
            })
            .collect();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Authentication);
            assert_eq!(err.detail(), Some("invalid_grant"));
        }
        assert_eq!(source.calls(), 1);

        // A later caller that did not queue behind the failure tries again.
        assert!(tokens.get_valid_credential().await.is_err());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let clock = ManualClock::new();
        let source = CountingSource::ok(Duration::from_secs(1799));
        let tokens = manager(source.clone(), &clock);

        tokens.get_valid_credential().await.unwrap();
        tokens.invalidate().await;
        assert!(!tokens.has_valid_credential().await);
        tokens.get_valid_credential().await.unwrap();

        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn invalidate_stale_ignores_superseded_credentials() {
        let clock = ManualClock::new();
        let source = CountingSource::ok(Duration::from_secs(1799));
        let tokens = manager(source.clone(), &clock);

        let old = tokens.get_valid_credential().await.unwrap();
        tokens.invalidate_stale(&old).await;
        let current = tokens.get_valid_credential().await.unwrap();

        // A late 401 for the old credential must not discard the new one.
        tokens.invalidate_stale(&old).await;
        let still = tokens.get_valid_credential().await.unwrap();

        assert_eq!(source.calls(), 2);
        assert_eq!(current.serial(), still.serial());
    }

    #[test]
    fn debug_output_redacts_token() {
        let credential = Credential {
            token: SecretString::from("super-secret".to_string()),
            expires_at: Instant::now(),
            serial: 1,
        };
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(credential.bearer_header().unwrap().is_sensitive());
    }

    #[test]
    fn oauth_rejection_keeps_upstream_description() {
        let err = rejected_exchange(
            400,
            r#"{"error":"invalid_grant","error_description":"The user name or password is incorrect."}"#,
        );
        assert_eq!(
            err.to_string(),
            "Authentication failed: The user name or password is incorrect. (invalid_grant)"
        );
    }
}
