// ── Query service ──
//
// Runs database queries and per-flight analytics. Results are never
// cached. Field metadata used for discrete checks and analytic name
// resolution do go through the discovery caches.

use emsly_api::EmsClient;
use emsly_api::models::{ColumnHeader, FlightId, QueryResponse, SystemId, TimeSeries};
use futures_util::future::{join_all, try_join_all};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::discovery::DiscoveryService;
use crate::error::CoreError;
use crate::query::{
    DiscreteMode, FieldCatalog, QuerySpec, SampleWindow, SelectField, build_analytics_document,
    check_analytics_request,
};
use crate::refs::{AnalyticRef, ResolvedAnalytic};

/// Series at least this long that hold nothing but zeros are treated as a
/// missing flight.
pub const ZERO_FILL_MIN_SAMPLES: usize = 100;

// ── Results ──────────────────────────────────────────────────────────

/// Rows of a database query with caller aliases applied to the headers.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnHeader>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    fn from_response(response: QueryResponse, select: &[SelectField]) -> Self {
        let mut columns = response.header;
        for (column, selected) in columns.iter_mut().zip(select) {
            if let Some(alias) = &selected.alias {
                column.name.clone_from(alias);
            }
        }
        Self {
            columns,
            rows: response.rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as `column name -> value` maps. Missing cells are null.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .enumerate()
                    .map(|(i, column)| {
                        (column.name.clone(), row.get(i).cloned().unwrap_or(Value::Null))
                    })
                    .collect()
            })
            .collect()
    }
}

/// Outcome for one flight of an analytics fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightSeries {
    pub flight: FlightId,
    pub result: Result<TimeSeries, CoreError>,
}

/// Per-flight analytics. Individual flights may fail without failing the
/// whole call.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightAnalytics {
    /// Resolved analytics, in request order.
    pub analytics: Vec<ResolvedAnalytic>,
    /// One entry per requested flight, in request order.
    pub flights: Vec<FlightSeries>,
}

impl FlightAnalytics {
    pub fn successes(&self) -> impl Iterator<Item = (FlightId, &TimeSeries)> {
        self.flights
            .iter()
            .filter_map(|f| f.result.as_ref().ok().map(|series| (f.flight, series)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (FlightId, &CoreError)> {
        self.flights
            .iter()
            .filter_map(|f| f.result.as_ref().err().map(|err| (f.flight, err)))
    }
}

// ── Service ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct QueryService {
    client: EmsClient,
    discovery: DiscoveryService,
    discrete_mode: DiscreteMode,
    detect_zero_fill: bool,
}

impl QueryService {
    pub fn new(
        client: EmsClient,
        discovery: DiscoveryService,
        discrete_mode: DiscreteMode,
        detect_zero_fill: bool,
    ) -> Self {
        Self {
            client,
            discovery,
            discrete_mode,
            detect_zero_fill,
        }
    }

    pub(crate) fn rebind(&self, client: EmsClient, discovery: DiscoveryService) -> Self {
        Self {
            client,
            discovery,
            ..self.clone()
        }
    }

    pub fn discrete_mode(&self) -> DiscreteMode {
        self.discrete_mode
    }

    /// Run a database query. Validation happens before any request.
    pub async fn query_database(&self, spec: &QuerySpec) -> Result<QueryResult, CoreError> {
        // Shape checks first so a malformed query never costs a metadata fetch.
        let mut document = spec.build(DiscreteMode::PassThrough, &FieldCatalog::new())?;
        if self.discrete_mode != DiscreteMode::PassThrough {
            let catalog = self.field_catalog(spec).await;
            document = spec.build(self.discrete_mode, &catalog)?;
        }

        debug!(
            system = spec.system,
            database = spec.database.as_str(),
            columns = document.select.len(),
            top = document.top,
            "running database query"
        );
        let response = self
            .client
            .query_database(spec.system, &spec.database, to_body(&document)?)
            .await?;
        Ok(QueryResult::from_response(response, &spec.select))
    }

    /// Discrete metadata for every filtered field. Fields whose metadata
    /// cannot be fetched are left out and their values pass through.
    async fn field_catalog(&self, spec: &QuerySpec) -> FieldCatalog {
        let fields = spec.filtered_fields();
        let lookups = fields.iter().map(|field| {
            self.discovery
                .get_field_info(spec.system, &spec.database, field)
        });

        let mut catalog = FieldCatalog::new();
        for (field, info) in fields.iter().zip(join_all(lookups).await) {
            match info {
                Ok(info) => {
                    catalog.insert(field.clone(), info);
                }
                Err(err) => {
                    warn!(field = field.as_str(), error = %err, "field metadata unavailable, skipping discrete check");
                }
            }
        }
        catalog
    }

    /// Fetch analytics for up to ten flights concurrently.
    ///
    /// Analytic names are resolved once up front. Each flight's request is
    /// rate limited and retried on its own; a flight that still fails is
    /// reported in its [`FlightSeries`] entry rather than failing the call.
    pub async fn query_flight_analytics(
        &self,
        system: SystemId,
        flights: &[FlightId],
        analytics: &[AnalyticRef],
        window: SampleWindow,
    ) -> Result<FlightAnalytics, CoreError> {
        check_analytics_request(flights.len(), analytics.len(), &window)?;

        let resolved = try_join_all(
            analytics
                .iter()
                .map(|analytic| self.discovery.resolve_analytic(system, analytic)),
        )
        .await?;
        let ids: Vec<_> = resolved.iter().map(|a| a.id.clone()).collect();
        let body = to_body(&build_analytics_document(flights, &ids, &window)?)?;

        debug!(
            system,
            flights = flights.len(),
            analytics = resolved.len(),
            "fanning out analytics query"
        );
        let outcomes = join_all(
            flights
                .iter()
                .map(|&flight| self.flight_series(system, flight, body.clone(), &resolved)),
        )
        .await;

        Ok(FlightAnalytics {
            analytics: resolved,
            flights: flights
                .iter()
                .zip(outcomes)
                .map(|(&flight, result)| FlightSeries { flight, result })
                .collect(),
        })
    }

    async fn flight_series(
        &self,
        system: SystemId,
        flight: FlightId,
        body: Value,
        analytics: &[ResolvedAnalytic],
    ) -> Result<TimeSeries, CoreError> {
        let mut series = self.client.query_analytics(system, flight, body).await?;

        for column in &mut series.columns {
            if let Some(analytic) = analytics.iter().find(|a| a.id.as_str() == column.label) {
                column.label.clone_from(&analytic.name);
            }
        }

        if self.detect_zero_fill && series.is_zero_filled(ZERO_FILL_MIN_SAMPLES) {
            warn!(flight, samples = series.len(), "analytics are all zero, treating flight as missing");
            return Err(CoreError::ZeroFilledFlight {
                flight,
                samples: series.len(),
            });
        }
        Ok(series)
    }
}

fn to_body(document: &impl Serialize) -> Result<Value, CoreError> {
    serde_json::to_value(document).map_err(|e| CoreError::Config {
        message: format!("request body could not be encoded: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn header(name: &str) -> ColumnHeader {
        ColumnHeader {
            name: name.to_owned(),
            kind: None,
            units: None,
        }
    }

    #[test]
    fn aliases_rename_headers_and_records_zip_rows() {
        let response = QueryResponse {
            header: vec![header("Flight Record"), header("Takeoff Airport")],
            rows: vec![vec![json!(1), json!("YSSY")], vec![json!(2)]],
        };
        let select = [
            SelectField::new("flight.uid"),
            SelectField::new("takeoff.airport").alias("airport"),
        ];

        let result = QueryResult::from_response(response, &select);
        assert_eq!(result.columns[1].name, "airport");
        assert_eq!(result.len(), 2);

        let records = result.records();
        assert_eq!(Value::Object(records[0].clone()), json!({"Flight Record": 1, "airport": "YSSY"}));
        assert_eq!(records[1]["airport"], Value::Null);
    }
}
