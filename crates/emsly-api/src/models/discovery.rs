use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use super::ids::{AnalyticId, DatabaseId, FieldId, GroupId, SystemId};

/// One EMS installation, from `GET /api/v2/ems-systems`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmsSystem {
    pub id: SystemId,
    pub name: String,
    pub description: String,
}

/// Child group reference inside a database or field group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: GroupId,
    #[serde(default)]
    pub name: String,
}

// ── Databases ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSummary {
    pub id: DatabaseId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub plural_name: Option<String>,
    #[serde(default)]
    pub singular_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl DatabaseSummary {
    /// First of `name`, `pluralName`, `singularName`; falls back to the id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.plural_name.as_deref())
            .or(self.singular_name.as_deref())
            .unwrap_or(self.id.as_str())
    }

    /// Every name this database answers to.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        [&self.name, &self.plural_name, &self.singular_name]
            .into_iter()
            .filter_map(|n| n.as_deref())
    }
}

/// One level of the database tree. `id` is absent at the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseGroup {
    #[serde(default)]
    pub id: Option<GroupId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub databases: Vec<DatabaseSummary>,
    #[serde(default)]
    pub groups: Vec<GroupSummary>,
}

// ── Fields ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Boolean,
    DateTime,
    Discrete,
    Number,
    String,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::DateTime => "datetime",
            Self::Discrete => "discrete",
            Self::Number => "number",
            Self::String => "string",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A field as listed in a field group or search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub id: FieldId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub units: Option<String>,
}

/// One level of the field tree for a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldGroup {
    #[serde(default)]
    pub id: Option<GroupId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSummary>,
    #[serde(default)]
    pub groups: Vec<GroupSummary>,
}

/// Full field metadata from `GET .../fields/{fieldId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldInfo {
    pub id: FieldId,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub discrete_values: DiscreteValues,
}

impl FieldInfo {
    pub fn is_discrete(&self) -> bool {
        self.field_type == FieldType::Discrete
    }
}

// ── Discrete values ─────────────────────────────────────────────────

/// One code/label pair of an enumerated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscreteValue {
    #[serde(rename = "value", alias = "code", deserialize_with = "deserialize_code")]
    pub code: i64,
    pub label: String,
}

/// The ordered code/label table of a discrete field.
///
/// The server sends either `[{value, label}, ...]` or `{"code": "label"}`;
/// both decode to the same list. Map entries are ordered by code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DiscreteValues(Vec<DiscreteValue>);

impl DiscreteValues {
    pub fn new(values: Vec<DiscreteValue>) -> Self {
        Self(values)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DiscreteValue> {
        self.0.iter()
    }

    pub fn contains_code(&self, code: i64) -> bool {
        self.0.iter().any(|v| v.code == code)
    }

    /// Case-insensitive label lookup.
    pub fn code_for_label(&self, label: &str) -> Option<i64> {
        self.0
            .iter()
            .find(|v| v.label.eq_ignore_ascii_case(label))
            .map(|v| v.code)
    }

    pub fn label_for_code(&self, code: i64) -> Option<&str> {
        self.0
            .iter()
            .find(|v| v.code == code)
            .map(|v| v.label.as_str())
    }
}

impl<'a> IntoIterator for &'a DiscreteValues {
    type Item = &'a DiscreteValue;
    type IntoIter = std::slice::Iter<'a, DiscreteValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for DiscreteValues {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            List(Vec<DiscreteValue>),
            Map(BTreeMap<String, String>),
            Null(()),
        }

        match Raw::deserialize(deserializer)? {
            Raw::List(values) => Ok(Self(values)),
            Raw::Map(map) => {
                let mut values = map
                    .into_iter()
                    .map(|(code, label)| {
                        code.trim()
                            .parse::<i64>()
                            .map(|code| DiscreteValue { code, label })
                            .map_err(|_| {
                                de::Error::custom(format!("discrete value code {code:?} is not an integer"))
                            })
                    })
                    .collect::<Result<Vec<_>, D::Error>>()?;
                values.sort_by_key(|v| v.code);
                Ok(Self(values))
            }
            Raw::Null(()) => Ok(Self::default()),
        }
    }
}

fn deserialize_code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Int(i64),
        Text(String),
    }

    match Code::deserialize(deserializer)? {
        Code::Int(code) => Ok(code),
        Code::Text(code) => code
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("discrete value code {code:?} is not an integer"))),
    }
}

// ── Analytics ───────────────────────────────────────────────────────

/// An analytic search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticInfo {
    pub id: AnalyticId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}
