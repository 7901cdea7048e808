// EMS system endpoints
//
// System listing is server-scoped; ping is scoped to one system and is
// never worth caching.

use tracing::debug;

use crate::client::{ApiRequest, EmsClient, system_path};
use crate::error::Error;
use crate::models::{EmsSystem, PingStatus, SystemId};

impl EmsClient {
    /// List the EMS systems visible to the authenticated user.
    ///
    /// `GET /api/v2/ems-systems`
    pub async fn list_systems(&self) -> Result<Vec<EmsSystem>, Error> {
        debug!("listing EMS systems");
        self.fetch(ApiRequest::get(["api", "v2", "ems-systems"]))
            .await
    }

    /// Check that a system is reachable.
    ///
    /// `GET /api/v2/ems-systems/{id}/ping`
    pub async fn ping(&self, system: SystemId) -> Result<PingStatus, Error> {
        debug!(system, "pinging EMS system");
        self.fetch(ApiRequest::get(system_path(system, ["ping"])))
            .await
    }
}
