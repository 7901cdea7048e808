// EMS API HTTP client
//
// Executes one logical request with bounded retries. Each attempt takes a
// credential from `TokenManager` and a token from the request's cost-class
// `RateLimiter`. Endpoint methods are implemented as inherent methods in
// `endpoints/` so this module stays focused on transport mechanics.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use url::Url;

use crate::auth::{DEFAULT_REFRESH_BUFFER, PasswordGrant, TokenManager, TokenSource};
use crate::clock::{SharedClock, system_clock};
use crate::error::Error;
use crate::models::ApiErrorBody;
use crate::rate_limit::{CostClass, Limiters, RateLimits};
use crate::retry::RetryPolicy;
use crate::transport::TransportConfig;

/// Default bound on one logical request, retries included.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(300);

const BODY_PREVIEW_CHARS: usize = 200;

// ── Options ─────────────────────────────────────────────────────────

/// Everything an [`EmsClient`] needs besides the base URL and credentials.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub transport: TransportConfig,
    pub retry: RetryPolicy,
    pub rate_limits: RateLimits,
    /// Deadline applied to requests that don't carry their own.
    pub deadline: Duration,
    /// How long before expiry a credential is refreshed.
    pub refresh_buffer: Duration,
    pub clock: SharedClock,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            retry: RetryPolicy::default(),
            rate_limits: RateLimits::default(),
            deadline: DEFAULT_DEADLINE,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            clock: system_clock(),
        }
    }
}

// ── Request / response ──────────────────────────────────────────────

/// One logical API call, independent of how many attempts it takes.
///
/// Path segments are percent-encoded individually, so opaque ids containing
/// `[`, `]`, `:` or spaces travel as a single segment.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    body: Option<Value>,
    cost: CostClass,
    deadline: Option<Duration>,
}

impl ApiRequest {
    fn new<I, S>(method: Method, segments: I, cost: CostClass) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: None,
            cost,
            deadline: None,
        }
    }

    /// A `GET`, charged to the discovery bucket.
    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::GET, segments, CostClass::Discovery)
    }

    /// A `POST`, charged to the query bucket.
    pub fn post<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::POST, segments, CostClass::Query)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn query_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn cost(mut self, cost: CostClass) -> Self {
        self.cost = cost;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn cost_class(&self) -> CostClass {
        self.cost
    }

    /// Unencoded path, for logs.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    fn url(&self, base: &Url) -> Result<Url, Error> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Configuration(format!("base URL cannot carry a path: {base}")))?
            .pop_if_empty()
            .extend(&self.segments);
        Ok(url)
    }
}

/// A successful (2xx) response with its body read.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: u16,
    body: String,
}

impl ApiResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    /// Decode the body into a typed record.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_str(&self.body).map_err(|e| {
            let preview = preview(&self.body);
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: self.body.clone(),
            }
        })
    }
}

fn preview(body: &str) -> String {
    body.trim().chars().take(BODY_PREVIEW_CHARS).collect()
}

// ── Client ──────────────────────────────────────────────────────────

struct ClientInner {
    http: reqwest::Client,
    base_url: Url,
    tokens: TokenManager,
    limiters: Limiters,
    retry: RetryPolicy,
}

/// Client for one EMS server.
///
/// Holds its own credential, rate limiters and connection pool, so several
/// isolated clients can live in one process. Cloning is cheap and shares
/// all of that state.
#[derive(Clone)]
pub struct EmsClient {
    inner: Arc<ClientInner>,
    deadline: Duration,
}

impl fmt::Debug for EmsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmsClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl EmsClient {
    /// Client authenticating with the password grant against `POST /api/token`.
    pub fn new(
        base_url: Url,
        username: impl Into<String>,
        password: SecretString,
        options: ClientOptions,
    ) -> Result<Self, Error> {
        let http = options.transport.build_client()?;
        let grant = PasswordGrant::new(
            http.clone(),
            &base_url,
            username,
            password,
            options.retry.clone(),
        )?;
        Self::assemble(http, base_url, Arc::new(grant), options)
    }

    /// Client taking credentials from a custom [`TokenSource`].
    pub fn with_token_source(
        base_url: Url,
        source: Arc<dyn TokenSource>,
        options: ClientOptions,
    ) -> Result<Self, Error> {
        let http = options.transport.build_client()?;
        Self::assemble(http, base_url, source, options)
    }

    fn assemble(
        http: reqwest::Client,
        base_url: Url,
        source: Arc<dyn TokenSource>,
        options: ClientOptions,
    ) -> Result<Self, Error> {
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::Configuration(format!(
                "base URL must be an http(s) URL: {base_url}"
            )));
        }

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                tokens: TokenManager::with_buffer(source, options.clock, options.refresh_buffer),
                limiters: Limiters::new(options.rate_limits)?,
                retry: options.retry,
            }),
            deadline: options.deadline,
        })
    }

    /// A handle sharing this client's state whose requests default to
    /// `deadline`.
    pub fn with_deadline(&self, deadline: Duration) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            deadline,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.inner.tokens
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// Execute `request` and decode its body.
    pub async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, Error> {
        self.execute(request).await?.json()
    }

    /// Execute one logical request.
    ///
    /// Transport failures and 5xx answers are retried up to
    /// `max_retries` times each, 429 answers up to `max_rate_limit_retries`
    /// times (honouring `Retry-After`), and a 401 once after a forced
    /// credential refresh. 403, 404 and other 4xx answers fail at once.
    /// The whole call, refreshes and sleeps included, is bounded by the
    /// request's deadline.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, Error> {
        let deadline = request.deadline.unwrap_or(self.deadline);
        let url = request.url(&self.inner.base_url)?;
        let expires = Instant::now() + deadline;

        match tokio::time::timeout_at(expires, self.run(&request, url, expires, deadline)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    method = %request.method,
                    path = %request.path(),
                    deadline_ms = millis(deadline),
                    "request deadline exceeded"
                );
                Err(Error::Timeout { deadline })
            }
        }
    }

    async fn run(
        &self,
        request: &ApiRequest,
        url: Url,
        expires: Instant,
        deadline: Duration,
    ) -> Result<ApiResponse, Error> {
        let policy = &self.inner.retry;
        let limiter = self.inner.limiters.for_class(request.cost);
        let mut state = Attempts::default();
        let started = Instant::now();

        loop {
            state.total += 1;
            let credential = self.inner.tokens.get_valid_credential().await?;
            let bearer = credential.bearer_header()?;
            limiter.acquire().await;

            debug!(
                method = %request.method,
                path = %request.path(),
                attempt = state.total,
                cost = %request.cost,
                "sending request"
            );

            let (delay, reason) = match self.send(request, &url, bearer).await {
                Err(err) => {
                    if err.is_builder() {
                        return Err(Error::Configuration(format!(
                            "failed to build request: {}",
                            err.without_url()
                        )));
                    }
                    let message = err.without_url().to_string();
                    (state.transport_failure(policy, &message)?, message)
                }
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        match resp.text().await {
                            Ok(body) => {
                                trace!(status = status.as_u16(), bytes = body.len(), "response received");
                                return Ok(ApiResponse {
                                    status: status.as_u16(),
                                    body,
                                });
                            }
                            Err(err) => {
                                let message =
                                    format!("failed to read response body: {}", err.without_url());
                                (state.transport_failure(policy, &message)?, message)
                            }
                        }
                    } else {
                        let retry_after = retry_after_secs(resp.headers());
                        let body = resp.text().await.unwrap_or_default();
                        match status {
                            StatusCode::UNAUTHORIZED => {
                                if state.reauthenticated {
                                    let (message, detail) = upstream_message(status, &body);
                                    return Err(Error::Authentication { message, detail });
                                }
                                state.reauthenticated = true;
                                debug!(path = %request.path(), "HTTP 401, forcing credential refresh");
                                self.inner.tokens.invalidate_stale(&credential).await;
                                continue;
                            }
                            StatusCode::TOO_MANY_REQUESTS => (
                                state.rate_limited(policy, retry_after)?,
                                "HTTP 429".to_owned(),
                            ),
                            s if s.is_server_error() => {
                                (state.server_failure(policy, s, &body)?, format!("HTTP {}", s.as_u16()))
                            }
                            s => return Err(client_error(s, &body)),
                        }
                    }
                }
            };

            if started.elapsed() + delay > policy.budget {
                warn!(
                    path = %request.path(),
                    attempts = state.total,
                    elapsed_ms = millis(started.elapsed()),
                    "retry budget exhausted"
                );
                return Err(Error::MaxRetriesExceeded {
                    budget: policy.budget,
                    attempts: state.total,
                    last: reason,
                });
            }
            if Instant::now() + delay >= expires {
                return Err(Error::Timeout { deadline });
            }

            warn!(
                method = %request.method,
                path = %request.path(),
                attempt = state.total,
                delay_ms = millis(delay),
                "{reason}, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn send(
        &self,
        request: &ApiRequest,
        url: &Url,
        bearer: HeaderValue,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), url.clone())
            .header(AUTHORIZATION, bearer);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder.send().await
    }
}

/// Per-request retry bookkeeping.
#[derive(Debug, Default)]
struct Attempts {
    total: u32,
    transport: u32,
    server: u32,
    rate_limited: u32,
    reauthenticated: bool,
}

impl Attempts {
    fn transport_failure(&mut self, policy: &RetryPolicy, message: &str) -> Result<Duration, Error> {
        if self.transport >= policy.max_retries {
            return Err(Error::Network {
                message: message.to_owned(),
                attempts: self.total,
            });
        }
        let delay = policy.delay_for_attempt(self.transport);
        self.transport += 1;
        Ok(delay)
    }

    fn server_failure(
        &mut self,
        policy: &RetryPolicy,
        status: StatusCode,
        body: &str,
    ) -> Result<Duration, Error> {
        if self.server >= policy.max_retries {
            let (message, detail) = upstream_message(status, body);
            return Err(Error::Server {
                status: status.as_u16(),
                message,
                detail,
            });
        }
        let delay = policy.delay_for_attempt(self.server);
        self.server += 1;
        Ok(delay)
    }

    fn rate_limited(
        &mut self,
        policy: &RetryPolicy,
        retry_after: Option<u64>,
    ) -> Result<Duration, Error> {
        if self.rate_limited >= policy.max_rate_limit_retries {
            return Err(Error::RateLimited {
                attempts: self.total,
                retry_after_secs: retry_after,
            });
        }
        let delay = retry_after
            .map_or_else(|| policy.delay_for_attempt(self.rate_limited), Duration::from_secs);
        self.rate_limited += 1;
        Ok(delay)
    }
}

/// Map a non-retryable 4xx to its error kind.
fn client_error(status: StatusCode, body: &str) -> Error {
    let (message, detail) = upstream_message(status, body);
    match status {
        StatusCode::FORBIDDEN => Error::Authorization { message, detail },
        StatusCode::NOT_FOUND => Error::NotFound { message, detail },
        _ => Error::Validation {
            message,
            detail,
            status: Some(status.as_u16()),
        },
    }
}

/// `(message, messageDetail)` from an EMS error body, or a preview of the
/// raw body when it isn't one.
fn upstream_message(status: StatusCode, body: &str) -> (String, Option<String>) {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        return (parsed.message, parsed.message_detail);
    }
    let raw = preview(body);
    if raw.is_empty() {
        (
            status
                .canonical_reason()
                .map_or_else(|| format!("HTTP {}", status.as_u16()), str::to_owned),
            None,
        )
    } else {
        (raw, None)
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Path segments under `/api/v2/ems-systems/{system}`.
pub(crate) fn system_path<I, S>(system: i64, rest: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ["api", "v2", "ems-systems"]
        .into_iter()
        .map(str::to_owned)
        .chain(std::iter::once(system.to_string()))
        .chain(rest.into_iter().map(Into::into))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn opaque_ids_are_encoded_as_one_segment() {
        let base = Url::parse("https://ems.example.com").unwrap();
        let field = "[-hub-][field][[[ems-core][entity-type][foqa-flights]][[ems-core][base-field][flight.uid]]]";
        let request = ApiRequest::get(system_path(
            1,
            ["databases", "[ems-core][entity-type][foqa-flights]", "fields", field],
        ));
        let url = request.url(&base).unwrap();

        let segments: Vec<&str> = url.path_segments().unwrap().collect();
        assert_eq!(segments.len(), 8);
        assert_eq!(segments[7], field);
        assert!(url.path().starts_with("/api/v2/ems-systems/1/databases/"));

        let spaced = ApiRequest::get(["fields", "a b/c"]).url(&base).unwrap();
        assert_eq!(spaced.path(), "/fields/a%20b%2Fc");
    }

    #[test]
    fn base_path_prefix_is_preserved() {
        let base = Url::parse("https://host/ems/").unwrap();
        let url = ApiRequest::get(["api", "token"]).url(&base).unwrap();
        assert_eq!(url.as_str(), "https://host/ems/api/token");
    }

    #[test]
    fn upstream_message_prefers_ems_error_body() {
        let (message, detail) = upstream_message(
            StatusCode::BAD_REQUEST,
            r#"{"message":"Invalid query","messageDetail":"Unknown field","unexpected":false}"#,
        );
        assert_eq!(message, "Invalid query");
        assert_eq!(detail.as_deref(), Some("Unknown field"));

        let (message, detail) = upstream_message(StatusCode::BAD_GATEWAY, "");
        assert_eq!(message, "Bad Gateway");
        assert!(detail.is_none());
    }

    #[test]
    fn client_errors_classify_by_status() {
        use crate::error::ErrorKind;
        assert_eq!(client_error(StatusCode::FORBIDDEN, "").kind(), ErrorKind::Authorization);
        assert_eq!(client_error(StatusCode::NOT_FOUND, "").kind(), ErrorKind::NotFound);
        assert_eq!(client_error(StatusCode::CONFLICT, "").kind(), ErrorKind::Validation);
    }

    #[test]
    fn retry_after_parses_delta_seconds_only() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(retry_after_secs(&headers), Some(7));
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after_secs(&headers), None);
    }
}
