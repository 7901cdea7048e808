// Query endpoints
//
// Request bodies are built and validated by the caller; this layer only
// posts them. Query results are never cached.

use serde_json::Value;
use tracing::debug;

use crate::client::{ApiRequest, EmsClient, system_path};
use crate::error::Error;
use crate::models::{AnalyticsResponse, DatabaseId, FlightId, QueryResponse, SystemId, TimeSeries};

impl EmsClient {
    /// Run a record query.
    ///
    /// `POST /api/v2/ems-systems/{id}/databases/{db}/query`
    pub async fn query_database(
        &self,
        system: SystemId,
        database: &DatabaseId,
        body: Value,
    ) -> Result<QueryResponse, Error> {
        debug!(system, database = database.as_str(), "querying database");
        let request = ApiRequest::post(system_path(
            system,
            ["databases", database.as_str(), "query"],
        ))
        .json(body);
        self.fetch(request).await
    }

    /// Fetch analytic time series for one flight.
    ///
    /// `POST /api/v2/ems-systems/{id}/flights/{flightId}/analytics/query`
    pub async fn query_analytics(
        &self,
        system: SystemId,
        flight: FlightId,
        body: Value,
    ) -> Result<TimeSeries, Error> {
        debug!(system, flight, "querying flight analytics");
        let request = ApiRequest::post(system_path(
            system,
            [
                "flights".to_owned(),
                flight.to_string(),
                "analytics".to_owned(),
                "query".to_owned(),
            ],
        ))
        .json(body);
        let response: AnalyticsResponse = self.fetch(request).await?;
        TimeSeries::try_from(response)
    }
}
