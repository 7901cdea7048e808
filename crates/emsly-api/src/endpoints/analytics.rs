use tracing::debug;

use crate::client::{ApiRequest, EmsClient, system_path};
use crate::error::Error;
use crate::models::{AnalyticInfo, GroupId, SystemId};

impl EmsClient {
    /// Search analytics (time-series parameters) by name.
    ///
    /// `GET /api/v2/ems-systems/{id}/analytics?text=&groupId=`
    pub async fn search_analytics(
        &self,
        system: SystemId,
        text: &str,
        group: Option<&GroupId>,
    ) -> Result<Vec<AnalyticInfo>, Error> {
        debug!(system, text, "searching analytics");
        let request = ApiRequest::get(system_path(system, ["analytics"]))
            .query("text", text)
            .query_opt("groupId", group.map(GroupId::as_str));
        self.fetch(request).await
    }
}
