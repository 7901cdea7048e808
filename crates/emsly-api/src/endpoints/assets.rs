// Asset endpoints
//
// Listings live under `/assets/{kind}`; single records under
// `/assets/{kind}/{id}`.

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::client::{ApiRequest, EmsClient, system_path};
use crate::error::Error;
use crate::models::{Aircraft, Airport, Fleet, FlightPhase, SystemId};

impl EmsClient {
    /// `GET /api/v2/ems-systems/{id}/assets/fleets`
    pub async fn list_fleets(&self, system: SystemId) -> Result<Vec<Fleet>, Error> {
        self.list_assets(system, "fleets", None).await
    }

    /// `GET /api/v2/ems-systems/{id}/assets/aircraft?fleetId=`
    pub async fn list_aircraft(
        &self,
        system: SystemId,
        fleet: Option<i64>,
    ) -> Result<Vec<Aircraft>, Error> {
        self.list_assets(system, "aircraft", fleet).await
    }

    /// `GET /api/v2/ems-systems/{id}/assets/airports`
    pub async fn list_airports(&self, system: SystemId) -> Result<Vec<Airport>, Error> {
        self.list_assets(system, "airports", None).await
    }

    /// `GET /api/v2/ems-systems/{id}/assets/flight-phases`
    pub async fn list_flight_phases(&self, system: SystemId) -> Result<Vec<FlightPhase>, Error> {
        self.list_assets(system, "flight-phases", None).await
    }

    /// `GET /api/v2/ems-systems/{id}/assets/fleets/{fleetId}`
    pub async fn get_fleet(&self, system: SystemId, id: i64) -> Result<Fleet, Error> {
        self.get_asset(system, "fleets", id).await
    }

    /// `GET /api/v2/ems-systems/{id}/assets/aircraft/{aircraftId}`
    pub async fn get_aircraft(&self, system: SystemId, id: i64) -> Result<Aircraft, Error> {
        self.get_asset(system, "aircraft", id).await
    }

    /// `GET /api/v2/ems-systems/{id}/assets/airports/{airportId}`
    pub async fn get_airport(&self, system: SystemId, id: i64) -> Result<Airport, Error> {
        self.get_asset(system, "airports", id).await
    }

    /// `GET /api/v2/ems-systems/{id}/assets/flight-phases/{phaseId}`
    pub async fn get_flight_phase(&self, system: SystemId, id: i64) -> Result<FlightPhase, Error> {
        self.get_asset(system, "flight-phases", id).await
    }

    async fn list_assets<T: DeserializeOwned>(
        &self,
        system: SystemId,
        kind: &str,
        fleet: Option<i64>,
    ) -> Result<Vec<T>, Error> {
        debug!(system, kind, fleet, "listing assets");
        let request = ApiRequest::get(system_path(system, ["assets", kind]))
            .query_opt("fleetId", fleet.map(|id| id.to_string()));
        self.fetch(request).await
    }

    async fn get_asset<T: DeserializeOwned>(
        &self,
        system: SystemId,
        kind: &str,
        id: i64,
    ) -> Result<T, Error> {
        debug!(system, kind, id, "fetching asset");
        self.fetch(ApiRequest::get(system_path(
            system,
            ["assets".to_owned(), kind.to_owned(), id.to_string()],
        )))
        .await
    }
}
