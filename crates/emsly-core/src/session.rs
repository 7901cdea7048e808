// ── Session facade ──
//
// One `Session` per EMS server: it owns the client (credential, rate
// limiters, connection pool) and the discovery caches, and hands out the
// discovery and query services that share them.

use std::time::Duration;

use emsly_api::EmsClient;
use emsly_api::clock::system_clock;
use emsly_api::models::SystemId;
use tracing::info;

use crate::config::SessionConfig;
use crate::discovery::DiscoveryService;
use crate::error::CoreError;
use crate::query_service::QueryService;

/// Entry point for discovery and queries against one EMS server.
///
/// Cloning is cheap; clones share the credential, rate limiters and
/// caches. Several sessions in one process are fully isolated.
#[derive(Debug, Clone)]
pub struct Session {
    client: EmsClient,
    discovery: DiscoveryService,
    queries: QueryService,
    default_system: Option<SystemId>,
}

impl Session {
    /// Build a session that authenticates with the configured password.
    pub fn new(config: &SessionConfig) -> Result<Self, CoreError> {
        let client = EmsClient::new(
            config.base_url.clone(),
            config.username.clone(),
            config.password.clone(),
            config.client_options(),
        )?;
        info!(base_url = %config.base_url, "EMS session created");
        Ok(Self::with_client(client, config))
    }

    /// Build a session around an existing client (custom token source,
    /// shared connection pool).
    pub fn with_client(client: EmsClient, config: &SessionConfig) -> Self {
        let clock = config.clock.clone().unwrap_or_else(system_clock);
        let discovery = DiscoveryService::new(client.clone(), &clock, config.cache_ttl);
        let queries = QueryService::new(
            client.clone(),
            discovery.clone(),
            config.discrete_mode,
            config.detect_zero_fill,
        );
        Self {
            client,
            discovery,
            queries,
            default_system: config.default_system,
        }
    }

    /// A handle whose requests default to `deadline`, sharing all state
    /// with this one.
    pub fn with_deadline(&self, deadline: Duration) -> Self {
        let client = self.client.with_deadline(deadline);
        let discovery = self.discovery.with_client(client.clone());
        let queries = self.queries.rebind(client.clone(), discovery.clone());
        Self {
            client,
            discovery,
            queries,
            default_system: self.default_system,
        }
    }

    pub fn client(&self) -> &EmsClient {
        &self.client
    }

    pub fn discovery(&self) -> &DiscoveryService {
        &self.discovery
    }

    pub fn queries(&self) -> &QueryService {
        &self.queries
    }

    pub fn default_system(&self) -> Option<SystemId> {
        self.default_system
    }

    /// `explicit` if given, else the configured default.
    pub fn system_or_default(&self, explicit: Option<SystemId>) -> Result<SystemId, CoreError> {
        explicit.or(self.default_system).ok_or_else(|| {
            CoreError::validation("no EMS system id given and no default system configured")
        })
    }

    /// Drop every cached discovery entry. Credentials are kept.
    pub fn clear_cache(&self) {
        self.discovery.clear_cache();
    }
}
