use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::AnalyticId;
use crate::error::Error;

// ── Database query ──────────────────────────────────────────────────

/// Column description in a tabular response. Some installations send bare
/// strings instead of objects; both decode here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawHeader")]
pub struct ColumnHeader {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawHeader {
    Described {
        name: String,
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        units: Option<String>,
    },
    Bare(String),
}

impl From<RawHeader> for ColumnHeader {
    fn from(raw: RawHeader) -> Self {
        match raw {
            RawHeader::Described { name, kind, units } => Self { name, kind, units },
            RawHeader::Bare(name) => Self {
                name,
                kind: None,
                units: None,
            },
        }
    }
}

/// `{header, rows}` body of a database query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub header: Vec<ColumnHeader>,
    pub rows: Vec<Vec<Value>>,
}

// ── Analytics query ─────────────────────────────────────────────────

/// One analytic's samples in the columnar response shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticValues {
    pub analytic_id: AnalyticId,
    #[serde(default)]
    pub values: Vec<Value>,
}

/// Body of `POST .../flights/{flightId}/analytics/query`.
///
/// Older installations answer with the tabular `{header, rows}` shape whose
/// first column is the offset; newer ones with `{offsets, results}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalyticsResponse {
    Columnar {
        offsets: Vec<Value>,
        results: Vec<AnalyticValues>,
    },
    Tabular(QueryResponse),
}

/// Samples for one analytic within a [`TimeSeries`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesColumn {
    /// Analytic id (columnar shape) or column header name (tabular shape).
    pub label: String,
    pub values: Vec<Value>,
}

/// Per-flight time series normalised from either response shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Seconds from flight start, one per sample.
    pub offsets: Vec<f64>,
    pub columns: Vec<SeriesColumn>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// `true` when the series has at least `min_samples` samples and every
    /// analytic value is `0` or null. This is how the server answers for a
    /// flight id it does not have.
    pub fn is_zero_filled(&self, min_samples: usize) -> bool {
        self.len() >= min_samples
            && !self.columns.is_empty()
            && self
                .columns
                .iter()
                .all(|c| c.values.iter().all(is_zero_or_null))
    }
}

fn is_zero_or_null(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.abs() < f64::EPSILON),
        _ => false,
    }
}

fn offset_value(value: &Value) -> Result<f64, Error> {
    value.as_f64().ok_or_else(|| Error::Deserialization {
        message: format!("analytics offset is not a number: {value}"),
        body: String::new(),
    })
}

impl TryFrom<AnalyticsResponse> for TimeSeries {
    type Error = Error;

    fn try_from(response: AnalyticsResponse) -> Result<Self, Error> {
        match response {
            AnalyticsResponse::Columnar { offsets, results } => Ok(Self {
                offsets: offsets.iter().map(offset_value).collect::<Result<_, _>>()?,
                columns: results
                    .into_iter()
                    .map(|r| SeriesColumn {
                        label: r.analytic_id.into_inner(),
                        values: r.values,
                    })
                    .collect(),
            }),
            AnalyticsResponse::Tabular(table) => {
                let mut columns: Vec<SeriesColumn> = table
                    .header
                    .iter()
                    .skip(1)
                    .map(|h| SeriesColumn {
                        label: h.name.clone(),
                        values: Vec::with_capacity(table.rows.len()),
                    })
                    .collect();

                let mut offsets = Vec::with_capacity(table.rows.len());
                for row in table.rows {
                    let mut cells = row.into_iter();
                    let offset = cells.next().unwrap_or(Value::Null);
                    offsets.push(offset_value(&offset)?);
                    for column in &mut columns {
                        column.values.push(cells.next().unwrap_or(Value::Null));
                    }
                }
                Ok(Self { offsets, columns })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn columnar_response_normalises() {
        let response: AnalyticsResponse = serde_json::from_value(json!({
            "offsets": [0.0, 1.0, 2.0],
            "results": [{"analyticId": "alt", "values": [100, 110, 120]}]
        }))
        .unwrap();
        let series = TimeSeries::try_from(response).unwrap();
        assert_eq!(series.offsets, vec![0.0, 1.0, 2.0]);
        assert_eq!(series.columns[0].label, "alt");
        assert_eq!(series.columns[0].values, vec![json!(100), json!(110), json!(120)]);
    }

    #[test]
    fn tabular_response_normalises_with_offset_column() {
        let response: AnalyticsResponse = serde_json::from_value(json!({
            "header": [{"name": "Offset"}, {"name": "Pressure Altitude", "units": "ft"}, "Airspeed"],
            "rows": [[0, 1000, 140], [1, 1010]]
        }))
        .unwrap();
        let series = TimeSeries::try_from(response).unwrap();
        assert_eq!(series.offsets, vec![0.0, 1.0]);
        assert_eq!(series.columns.len(), 2);
        assert_eq!(series.columns[1].label, "Airspeed");
        assert_eq!(series.columns[1].values, vec![json!(140), Value::Null]);
    }

    #[test]
    fn zero_fill_needs_minimum_samples() {
        let zeros = TimeSeries {
            offsets: (0..100).map(f64::from).collect(),
            columns: vec![SeriesColumn {
                label: "alt".into(),
                values: vec![json!(0); 100],
            }],
        };
        assert!(zeros.is_zero_filled(100));

        let short = TimeSeries {
            offsets: vec![0.0; 10],
            columns: vec![SeriesColumn {
                label: "alt".into(),
                values: vec![json!(0); 10],
            }],
        };
        assert!(!short.is_zero_filled(100));
        assert!(!TimeSeries::default().is_zero_filled(100));
    }
}
