// ── Query documents ──
//
// `QuerySpec` describes a database query in caller terms; `QueryDocument`
// is the body posted to `.../databases/{db}/query`. `AnalyticsDocument`
// plays the same role for per-flight analytics.

use emsly_api::models::{AnalyticId, DatabaseId, FieldId, FlightId, SystemId};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::filter::{
    DiscreteMode, FieldCatalog, FilterBuilder, FilterSpec, WireFilter, validate_field_id,
};
use crate::error::CoreError;

/// Rows returned when the caller does not set a limit.
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

/// Hard cap on `QuerySpec::limit`. Larger values fail validation.
pub const MAX_QUERY_LIMIT: u32 = 10_000;

pub const MAX_FLIGHTS_PER_REQUEST: usize = 10;
pub const MAX_ANALYTICS_PER_REQUEST: usize = 20;

/// Samples requested when the window is open-ended.
pub const DEFAULT_SAMPLE_COUNT: u64 = 5000;

// ── Select / order ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Avg,
    Count,
    Max,
    Min,
    Stdev,
    Sum,
    Var,
}

/// One selected column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectField {
    pub field: FieldId,
    /// Column name in the result; defaults to the field id.
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub aggregate: Option<Aggregate>,
}

impl SelectField {
    pub fn new(field: impl Into<FieldId>) -> Self {
        Self {
            field: field.into(),
            alias: None,
            aggregate: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = Some(aggregate);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: FieldId,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<FieldId>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<FieldId>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Value rendering requested from the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ResultFormat {
    /// Human-readable values (discrete labels, formatted dates).
    #[default]
    Display,
    /// Raw stored values (discrete codes).
    Raw,
}

impl ResultFormat {
    fn wire_name(self) -> &'static str {
        match self {
            Self::Display => "display",
            Self::Raw => "none",
        }
    }
}

// ── QuerySpec ────────────────────────────────────────────────────────

/// A database query in caller terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub system: SystemId,
    pub database: DatabaseId,
    pub select: Vec<SelectField>,
    /// Top-level filters; several are joined with `and`.
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    /// Row cap, `1..=MAX_QUERY_LIMIT`. `None` means [`DEFAULT_QUERY_LIMIT`].
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub format: ResultFormat,
}

impl QuerySpec {
    pub fn new(system: SystemId, database: impl Into<DatabaseId>) -> Self {
        Self {
            system,
            database: database.into(),
            select: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            format: ResultFormat::default(),
        }
    }

    pub fn select(mut self, field: SelectField) -> Self {
        self.select.push(field);
        self
    }

    pub fn filter(mut self, filter: impl Into<FilterSpec>) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn format(mut self, format: ResultFormat) -> Self {
        self.format = format;
        self
    }

    /// The limit after defaulting, validated against [`MAX_QUERY_LIMIT`].
    pub fn effective_limit(&self) -> Result<u32, CoreError> {
        match self.limit.unwrap_or(DEFAULT_QUERY_LIMIT) {
            0 => Err(CoreError::validation("limit must be at least 1")),
            limit if limit > MAX_QUERY_LIMIT => Err(CoreError::validation(format!(
                "limit {limit} exceeds the maximum of {MAX_QUERY_LIMIT}"
            ))),
            limit => Ok(limit),
        }
    }

    /// Fields whose filter values may need discrete-code checks.
    pub fn filtered_fields(&self) -> Vec<FieldId> {
        let mut fields: Vec<FieldId> = self
            .filters
            .iter()
            .flat_map(FilterSpec::conditions)
            .map(|condition| condition.field.clone())
            .collect();
        fields.sort();
        fields.dedup();
        fields
    }

    /// Validate and translate into the wire document.
    pub fn build(
        &self,
        mode: DiscreteMode,
        fields: &FieldCatalog,
    ) -> Result<QueryDocument, CoreError> {
        if self.database.as_str().trim().is_empty() {
            return Err(CoreError::validation("database id must not be empty"));
        }
        if self.select.is_empty() {
            return Err(CoreError::validation("select at least one field"));
        }
        let top = self.effective_limit()?;

        let aggregating = self.select.iter().any(|s| s.aggregate.is_some());
        let mut select = Vec::with_capacity(self.select.len());
        let mut group_by = Vec::new();
        for entry in &self.select {
            validate_field_id(&entry.field)?;
            select.push(WireSelect {
                field_id: entry.field.clone(),
                aggregate: entry
                    .aggregate
                    .map_or_else(|| "none".to_owned(), |a| a.to_string()),
                alias: entry
                    .alias
                    .clone()
                    .unwrap_or_else(|| entry.field.as_str().to_owned()),
            });
            if aggregating && entry.aggregate.is_none() {
                group_by.push(WireFieldRef {
                    field_id: entry.field.clone(),
                });
            }
        }

        let mut order_by = Vec::with_capacity(self.order_by.len());
        for order in &self.order_by {
            validate_field_id(&order.field)?;
            order_by.push(WireOrder {
                field_id: order.field.clone(),
                order: order.direction,
            });
        }

        let filter = FilterBuilder::new(mode)
            .with_fields(fields)
            .build_all(&self.filters)?;

        Ok(QueryDocument {
            select,
            group_by,
            filter,
            order_by,
            top,
            format: self.format.wire_name(),
        })
    }
}

// ── Wire document ────────────────────────────────────────────────────

/// Body of `POST .../databases/{db}/query`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDocument {
    pub select: Vec<WireSelect>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<WireFieldRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<WireFilter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<WireOrder>,
    pub top: u32,
    pub format: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSelect {
    pub field_id: FieldId,
    pub aggregate: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFieldRef {
    pub field_id: FieldId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOrder {
    pub field_id: FieldId,
    pub order: SortDirection,
}

// ── Analytics ────────────────────────────────────────────────────────

/// Time window and sampling for a per-flight analytics query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleWindow {
    /// Seconds from flight start.
    pub start: Option<f64>,
    pub end: Option<f64>,
    /// Samples per second.
    pub sample_rate: f64,
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            sample_rate: 1.0,
        }
    }
}

impl SampleWindow {
    pub fn between(start: f64, end: f64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Self::default()
        }
    }

    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    fn validate(&self) -> Result<(), CoreError> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(CoreError::validation(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start >= end {
                return Err(CoreError::validation(format!(
                    "start offset {start} must be before end offset {end}"
                )));
            }
        }
        Ok(())
    }

    /// `floor((end - start) * rate)` for a bounded window, else
    /// [`DEFAULT_SAMPLE_COUNT`].
    pub fn sample_count(&self) -> u64 {
        let (Some(start), Some(end)) = (self.start, self.end) else {
            return DEFAULT_SAMPLE_COUNT;
        };
        let samples = ((end - start) * self.sample_rate).floor();
        if samples >= 1.0 {
            saturating_u64(samples)
        } else {
            DEFAULT_SAMPLE_COUNT
        }
    }
}

// `as` saturates for out-of-range floats.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
fn saturating_u64(value: f64) -> u64 {
    value as u64
}

/// Validated per-flight analytics request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsDocument {
    pub select: Vec<AnalyticSelect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticSelect {
    pub analytic_id: AnalyticId,
}

/// Validate request sizes and the window without building anything, so
/// callers can fail before resolving analytic names.
pub fn check_analytics_request(
    flights: usize,
    analytics: usize,
    window: &SampleWindow,
) -> Result<(), CoreError> {
    check_count("flight", flights, MAX_FLIGHTS_PER_REQUEST)?;
    check_count("analytic", analytics, MAX_ANALYTICS_PER_REQUEST)?;
    window.validate()
}

/// Check flight and analytic counts and the window, then build the body
/// shared by every flight's request.
pub fn build_analytics_document(
    flights: &[FlightId],
    analytics: &[AnalyticId],
    window: &SampleWindow,
) -> Result<AnalyticsDocument, CoreError> {
    check_analytics_request(flights.len(), analytics.len(), window)?;

    Ok(AnalyticsDocument {
        select: analytics
            .iter()
            .map(|id| AnalyticSelect {
                analytic_id: id.clone(),
            })
            .collect(),
        start: window.start,
        end: window.end,
        size: window.sample_count(),
    })
}

fn check_count(what: &str, count: usize, max: usize) -> Result<(), CoreError> {
    if count == 0 || count > max {
        return Err(CoreError::validation(format!(
            "between 1 and {max} {what} ids are required, got {count}"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::query::Condition;

    fn spec() -> QuerySpec {
        QuerySpec::new(1, "[ems-core][entity-type][foqa-flights]")
            .select(SelectField::new("flight.uid"))
            .select(SelectField::new("takeoff.airport").alias("Airport"))
    }

    fn build(spec: &QuerySpec) -> Result<serde_json::Value, CoreError> {
        spec.build(DiscreteMode::PassThrough, &FieldCatalog::new())
            .map(|doc| serde_json::to_value(doc).unwrap())
    }

    #[test]
    fn minimal_document_defaults_limit_and_alias() {
        assert_eq!(
            build(&spec()).unwrap(),
            json!({
                "select": [
                    {"fieldId": "flight.uid", "aggregate": "none", "alias": "flight.uid"},
                    {"fieldId": "takeoff.airport", "aggregate": "none", "alias": "Airport"}
                ],
                "top": 100,
                "format": "display"
            })
        );
    }

    #[test]
    fn full_document_preserves_caller_order() {
        let spec = spec()
            .filter(Condition::new("flight.uid", "greaterThan", 10))
            .filter(Condition::unary("takeoff.airport", "isNotNull"))
            .order_by(OrderBy::desc("takeoff.airport"))
            .order_by(OrderBy::asc("flight.uid"))
            .limit(10_000)
            .format(ResultFormat::Raw);

        let doc = build(&spec).unwrap();
        assert_eq!(doc["top"], 10_000);
        assert_eq!(doc["format"], "none");
        assert_eq!(doc["filter"]["operator"], "and");
        assert_eq!(
            doc["orderBy"],
            json!([
                {"fieldId": "takeoff.airport", "order": "desc"},
                {"fieldId": "flight.uid", "order": "asc"}
            ])
        );
    }

    #[test]
    fn aggregates_group_by_the_plain_columns() {
        let spec = QuerySpec::new(1, "db")
            .select(SelectField::new("airport"))
            .select(SelectField::new("flight.uid").aggregate(Aggregate::Count).alias("Flights"));

        let doc = build(&spec).unwrap();
        assert_eq!(doc["select"][1]["aggregate"], "count");
        assert_eq!(doc["groupBy"], json!([{"fieldId": "airport"}]));
    }

    #[test]
    fn limit_outside_bounds_fails_before_any_call() {
        for limit in [0, 10_001, 50_000] {
            let err = build(&spec().limit(limit)).unwrap_err();
            assert!(matches!(err, CoreError::ValidationFailed { .. }), "{limit}");
        }
    }

    #[test]
    fn empty_select_is_rejected() {
        assert!(build(&QuerySpec::new(1, "db")).is_err());
    }

    #[test]
    fn filtered_fields_are_unique() {
        let spec = spec()
            .filter(Condition::new("b", "equal", 1))
            .filter(Condition::new("a", "equal", 1))
            .filter(Condition::new("b", "notEqual", 2));
        assert_eq!(spec.filtered_fields(), vec![FieldId::new("a"), FieldId::new("b")]);
    }

    #[test]
    fn analytics_size_follows_window() {
        assert_eq!(SampleWindow::between(100.0, 160.5).sample_rate(2.0).sample_count(), 121);
        assert_eq!(SampleWindow::default().sample_count(), 5000);
        assert_eq!(
            SampleWindow {
                start: Some(10.0),
                ..SampleWindow::default()
            }
            .sample_count(),
            5000
        );
    }

    #[test]
    fn analytics_document_shape() {
        let doc = build_analytics_document(
            &[1],
            &[AnalyticId::new("alt"), AnalyticId::new("ias")],
            &SampleWindow::between(0.0, 60.0),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(doc).unwrap(),
            json!({
                "select": [{"analyticId": "alt"}, {"analyticId": "ias"}],
                "start": 0.0,
                "end": 60.0,
                "size": 60
            })
        );
    }

    #[test]
    fn analytics_inputs_are_bounded() {
        let one = [AnalyticId::new("alt")];
        let window = SampleWindow::default();
        assert!(build_analytics_document(&[], &one, &window).is_err());
        assert!(build_analytics_document(&[1; 11], &one, &window).is_err());
        let many: Vec<AnalyticId> = (0..21).map(|i| AnalyticId::new(format!("a{i}"))).collect();
        assert!(build_analytics_document(&[1], &many, &window).is_err());
        assert!(build_analytics_document(&[1], &one, &window.sample_rate(0.0)).is_err());
        assert!(build_analytics_document(&[1], &one, &SampleWindow::between(5.0, 5.0)).is_err());
    }
}
