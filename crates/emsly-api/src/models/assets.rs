// Asset records: fleets, aircraft, airports, flight phases.
//
// `name` is optional on every asset type; some installations leave it empty
// and carry the readable value in `description`. `Asset::display_name`
// is the one place that falls back, so callers opt into it explicitly.

use serde::{Deserialize, Serialize};

/// Shared read surface of asset records.
pub trait Asset {
    fn id(&self) -> i64;
    fn name(&self) -> Option<&str>;
    fn description(&self) -> Option<&str>;

    /// `name` if present and non-blank, otherwise `description`.
    fn display_name(&self) -> Option<&str> {
        self.name()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.description().filter(|d| !d.trim().is_empty()))
    }
}

macro_rules! impl_asset {
    ($ty:ty) => {
        impl Asset for $ty {
            fn id(&self) -> i64 {
                self.id
            }

            fn name(&self) -> Option<&str> {
                self.name.as_deref()
            }

            fn description(&self) -> Option<&str> {
                self.description.as_deref()
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fleet {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aircraft {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fleet_id: Option<i64>,
    #[serde(default)]
    pub fleet_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Airport {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub code_icao: Option<String>,
    #[serde(default)]
    pub code_iata: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightPhase {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl_asset!(Fleet);
impl_asset!(Aircraft);
impl_asset!(Airport);
impl_asset!(FlightPhase);

/// Body of `GET /api/v2/ems-systems/{id}/ping`.
///
/// Installations answer with a bare boolean, a bare string, or an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PingStatus {
    Flag(bool),
    Message(String),
    Details(serde_json::Map<String, serde_json::Value>),
}

impl PingStatus {
    /// `false` only for an explicit `false` answer.
    pub fn is_reachable(&self) -> bool {
        !matches!(self, Self::Flag(false))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn display_name_falls_back_to_description() {
        let phase: FlightPhase =
            serde_json::from_value(json!({"id": 3, "description": "Climb"})).unwrap();
        assert_eq!(phase.name(), None);
        assert_eq!(phase.display_name(), Some("Climb"));

        let fleet: Fleet =
            serde_json::from_value(json!({"id": 1, "name": "A320", "description": "Narrowbody"}))
                .unwrap();
        assert_eq!(fleet.display_name(), Some("A320"));
    }

    #[test]
    fn ping_accepts_every_shape() {
        assert_eq!(
            serde_json::from_value::<PingStatus>(json!(true)).unwrap(),
            PingStatus::Flag(true)
        );
        assert!(matches!(
            serde_json::from_value::<PingStatus>(json!("pong")).unwrap(),
            PingStatus::Message(_)
        ));
        let details = serde_json::from_value::<PingStatus>(json!({"status": "ok"})).unwrap();
        assert!(details.is_reachable());
        assert!(!PingStatus::Flag(false).is_reachable());
    }
}
