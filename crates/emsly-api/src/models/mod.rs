// Typed wire records for the EMS REST surface
//
// Unknown fields in responses are ignored; a missing required field is a
// decode error, never a silent default.

pub mod assets;
pub mod discovery;
pub mod ids;
pub mod query;

pub use assets::{Aircraft, Airport, Asset, Fleet, FlightPhase, PingStatus};
pub use discovery::{
    AnalyticInfo, DatabaseGroup, DatabaseSummary, DiscreteValue, DiscreteValues, EmsSystem,
    FieldGroup, FieldInfo, FieldSummary, FieldType, GroupSummary,
};
pub use ids::{AnalyticId, DatabaseId, FieldId, FlightId, GroupId, SystemId};
pub use query::{AnalyticValues, AnalyticsResponse, ColumnHeader, QueryResponse, SeriesColumn, TimeSeries};

/// Standard EMS error body: `{message, messageDetail, unexpected}`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
    #[serde(rename = "messageDetail", default)]
    pub message_detail: Option<String>,
    #[serde(default)]
    pub unexpected: bool,
}
