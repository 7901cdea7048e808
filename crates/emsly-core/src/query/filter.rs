// ── Filter trees ──
//
// `FilterSpec` is the caller's declarative filter; `WireFilter` is the
// nested `{operator, args}` tree the query endpoint expects. Translation is
// pure and deterministic: the same filter tree always serializes to the same bytes.

use std::collections::HashMap;

use emsly_api::models::{FieldId, FieldInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::error::CoreError;

/// Labels shown when a discrete value is rejected.
const LABEL_SAMPLE: usize = 10;

/// Field metadata available to the builder, keyed by field id.
pub type FieldCatalog = HashMap<FieldId, FieldInfo>;

// ── Operators ────────────────────────────────────────────────────────

/// Comparison operators accepted in a filter condition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    #[strum(to_string = "betweenInclusive", serialize = "between")]
    #[serde(alias = "between")]
    BetweenInclusive,
    DateRelative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arity {
    /// Field only.
    Unary,
    /// Field and one constant.
    Binary,
    /// Field and a non-empty list of constants.
    List,
    /// Field, lower and upper bound.
    Range,
    /// Field and either one constant or a list of constants sent as given.
    Relative,
}

impl Operator {
    fn arity(self) -> Arity {
        match self {
            Self::IsNull | Self::IsNotNull => Arity::Unary,
            Self::In | Self::NotIn => Arity::List,
            Self::BetweenInclusive => Arity::Range,
            Self::DateRelative => Arity::Relative,
            _ => Arity::Binary,
        }
    }

    /// Operators whose values are checked against a discrete field's codes.
    fn compares_codes(self) -> bool {
        matches!(self, Self::Equal | Self::NotEqual | Self::In | Self::NotIn)
    }

    /// Parse an operator name, accepting `between` for `betweenInclusive`.
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        name.trim().parse().map_err(|_| {
            let valid: Vec<String> = Self::iter().map(|op| op.to_string()).collect();
            CoreError::validation(format!(
                "unknown filter operator '{name}'; valid operators: {}",
                valid.join(", ")
            ))
        })
    }
}

// ── Caller-facing filters ────────────────────────────────────────────

/// One `field <operator> value` comparison.
///
/// The operator is kept as text so that specs decoded from untyped input
/// are validated at build time, with the offending name in the error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: FieldId,
    pub operator: String,
    /// Constant, list of constants (`in`, `notIn`, `dateRelative`),
    /// `[min, max]` (`betweenInclusive`), or null (`isNull`, `isNotNull`).
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<FieldId>, operator: impl AsRef<str>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: operator.as_ref().to_owned(),
            value: value.into(),
        }
    }

    /// A condition without a value (`isNull`, `isNotNull`).
    pub fn unary(field: impl Into<FieldId>, operator: impl AsRef<str>) -> Self {
        Self::new(field, operator, Value::Null)
    }
}

/// Declarative filter tree.
///
/// Combinators collapse when built: an `and`/`or` with one child becomes
/// that child, one with no children disappears, and `not` over several
/// children negates their conjunction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterSpec {
    Condition(Condition),
    And(Vec<FilterSpec>),
    Or(Vec<FilterSpec>),
    Not(Vec<FilterSpec>),
}

impl From<Condition> for FilterSpec {
    fn from(condition: Condition) -> Self {
        Self::Condition(condition)
    }
}

impl FilterSpec {
    pub fn and(children: impl IntoIterator<Item = FilterSpec>) -> Self {
        Self::And(children.into_iter().collect())
    }

    pub fn or(children: impl IntoIterator<Item = FilterSpec>) -> Self {
        Self::Or(children.into_iter().collect())
    }

    pub fn not(child: impl Into<FilterSpec>) -> Self {
        Self::Not(vec![child.into()])
    }

    /// Every condition in the tree, depth first.
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_conditions(&mut out);
        out
    }

    fn collect_conditions<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            Self::Condition(condition) => out.push(condition),
            Self::And(children) | Self::Or(children) | Self::Not(children) => {
                for child in children {
                    child.collect_conditions(out);
                }
            }
        }
    }
}

// ── Wire format ──────────────────────────────────────────────────────

/// `{"operator": ..., "args": [...]}` as sent to the query endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireFilter {
    pub operator: String,
    pub args: Vec<WireArg>,
}

/// One argument of a [`WireFilter`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum WireArg {
    Field(FieldId),
    Constant(Value),
    Filter(Box<WireFilter>),
}

impl WireArg {
    fn filter(filter: WireFilter) -> Self {
        Self::Filter(Box::new(filter))
    }
}

// ── Discrete handling ────────────────────────────────────────────────

/// How filter values on discrete (coded) fields are checked.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DiscreteMode {
    /// Send values as given; the server validates.
    #[default]
    PassThrough,
    /// Values must be integer codes present in the field's code table.
    Strict,
    /// String labels are replaced by their codes; integer codes pass.
    ResolveLabels,
}

// ── Builder ──────────────────────────────────────────────────────────

/// Translates [`FilterSpec`] trees into [`WireFilter`] trees.
///
/// Discrete checks only apply to fields present in the supplied
/// [`FieldCatalog`]; fields without metadata pass through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterBuilder<'a> {
    mode: DiscreteMode,
    fields: Option<&'a FieldCatalog>,
}

impl<'a> FilterBuilder<'a> {
    pub fn new(mode: DiscreteMode) -> Self {
        Self { mode, fields: None }
    }

    pub fn with_fields(mut self, fields: &'a FieldCatalog) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Build one filter tree. `Ok(None)` means the tree collapsed to
    /// nothing (for example an empty `and`).
    pub fn build(&self, spec: &FilterSpec) -> Result<Option<WireFilter>, CoreError> {
        match spec {
            FilterSpec::Condition(condition) => self.condition(condition).map(Some),
            FilterSpec::And(children) => self.junction("and", children),
            FilterSpec::Or(children) => self.junction("or", children),
            FilterSpec::Not(children) => {
                let inner = self.junction("and", children)?.ok_or_else(|| {
                    CoreError::validation("'not' filter needs at least one condition")
                })?;
                Ok(Some(WireFilter {
                    operator: "not".to_owned(),
                    args: vec![WireArg::filter(inner)],
                }))
            }
        }
    }

    /// Build a list of top-level filters. Several are joined with an
    /// implicit `and`; a single one passes through unwrapped.
    pub fn build_all(&self, specs: &[FilterSpec]) -> Result<Option<WireFilter>, CoreError> {
        self.junction("and", specs)
    }

    fn junction(
        &self,
        operator: &str,
        children: &[FilterSpec],
    ) -> Result<Option<WireFilter>, CoreError> {
        let mut built = Vec::with_capacity(children.len());
        for child in children {
            if let Some(filter) = self.build(child)? {
                built.push(filter);
            }
        }

        if built.len() > 1 {
            return Ok(Some(WireFilter {
                operator: operator.to_owned(),
                args: built.into_iter().map(WireArg::filter).collect(),
            }));
        }
        Ok(built.pop())
    }

    fn condition(&self, condition: &Condition) -> Result<WireFilter, CoreError> {
        validate_field_id(&condition.field)?;
        let operator = Operator::parse(&condition.operator)?;
        let field = &condition.field;
        let value = &condition.value;

        let mut args = vec![WireArg::Field(field.clone())];
        match operator.arity() {
            Arity::Unary => {}
            Arity::Binary => {
                if value.is_null() || value.is_array() || value.is_object() {
                    return Err(CoreError::validation(format!(
                        "'{operator}' filter on {field} needs a single value, got {value}"
                    )));
                }
                if matches!(operator, Operator::Like | Operator::NotLike) && !value.is_string() {
                    return Err(CoreError::validation(format!(
                        "'{operator}' filter on {field} needs a text pattern, got {value}"
                    )));
                }
                args.push(WireArg::Constant(self.constant(operator, field, value)?));
            }
            Arity::List => {
                let items = value.as_array().filter(|items| !items.is_empty()).ok_or_else(|| {
                    CoreError::validation(format!(
                        "'{operator}' filter on {field} needs a non-empty list, got {value}"
                    ))
                })?;
                for item in items {
                    args.push(WireArg::Constant(self.constant(operator, field, item)?));
                }
            }
            Arity::Range => match value.as_array().map(Vec::as_slice) {
                Some([low, high]) => {
                    args.push(WireArg::Constant(low.clone()));
                    args.push(WireArg::Constant(high.clone()));
                }
                _ => {
                    return Err(CoreError::validation(format!(
                        "'{operator}' filter on {field} needs a [min, max] pair, got {value}"
                    )));
                }
            },
            Arity::Relative => match value {
                Value::Array(items) if !items.is_empty() => {
                    args.extend(items.iter().cloned().map(WireArg::Constant));
                }
                Value::Null | Value::Object(_) | Value::Array(_) => {
                    return Err(CoreError::validation(format!(
                        "'{operator}' filter on {field} needs a value or a non-empty argument list, got {value}"
                    )));
                }
                other => args.push(WireArg::Constant(other.clone())),
            },
        }

        Ok(WireFilter {
            operator: operator.to_string(),
            args,
        })
    }

    /// Apply the discrete mode to one constant.
    fn constant(&self, operator: Operator, field: &FieldId, value: &Value) -> Result<Value, CoreError> {
        if self.mode == DiscreteMode::PassThrough || !operator.compares_codes() {
            return Ok(value.clone());
        }
        let Some(info) = self.fields.and_then(|fields| fields.get(field)) else {
            return Ok(value.clone());
        };
        if !info.is_discrete() || info.discrete_values.is_empty() {
            return Ok(value.clone());
        }

        let codes = &info.discrete_values;
        match (self.mode, value.as_i64(), value.as_str()) {
            (DiscreteMode::Strict, Some(code), _) if codes.contains_code(code) => Ok(value.clone()),
            (DiscreteMode::ResolveLabels, Some(_), _) => Ok(value.clone()),
            (DiscreteMode::ResolveLabels, None, Some(label)) => codes
                .code_for_label(label)
                .map(Value::from)
                .ok_or_else(|| {
                    CoreError::validation(format!(
                        "discrete value '{label}' not found for field '{}'; available values include: {}",
                        info.name,
                        sample_labels(info)
                    ))
                }),
            _ => Err(CoreError::validation(format!(
                "{value} is not a discrete code of field '{}'; valid codes include: {}",
                info.name,
                sample_labels(info)
            ))),
        }
    }
}

fn sample_labels(info: &FieldInfo) -> String {
    let values = &info.discrete_values;
    let mut out = values
        .iter()
        .take(LABEL_SAMPLE)
        .map(|v| format!("{} ({})", v.label, v.code))
        .collect::<Vec<_>>()
        .join(", ");
    if values.len() > LABEL_SAMPLE {
        out.push_str(&format!(" and {} more", values.len() - LABEL_SAMPLE));
    }
    out
}

/// Field ids are opaque, but never blank or padded.
pub(crate) fn validate_field_id(field: &FieldId) -> Result<(), CoreError> {
    let id = field.as_str();
    if id.trim().is_empty() || id.trim() != id {
        return Err(CoreError::validation(format!(
            "field id {id:?} must be non-empty without surrounding whitespace"
        )));
    }
    Ok(())
}
