// ── Identifier newtypes ──
//
// Field, analytic, database and group ids are opaque strings handed out by
// discovery responses. They are compared byte-for-byte and passed back to
// the server unmodified; nothing here parses them.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(
    /// Bracket-encoded field identifier, e.g.
    /// `[-hub-][field][[[ems-core][entity-type][foqa-flights]][[ems-core][base-field][flight.uid]]]`.
    FieldId
);

opaque_id!(
    /// Analytic (time-series parameter) identifier. Arbitrary encoding.
    AnalyticId
);

opaque_id!(
    /// Database identifier, e.g. `[ems-core][entity-type][foqa-flights]`.
    DatabaseId
);

opaque_id!(
    /// Database-group or field-group identifier.
    GroupId
);

/// Integer id of one EMS installation.
pub type SystemId = i64;

/// Integer flight record id.
pub type FlightId = i64;

impl DatabaseId {
    /// Entity-type databases hold flight records. Their field search endpoint
    /// is unavailable, so name lookups walk the field tree instead.
    pub fn is_entity_type(&self) -> bool {
        self.0.contains("[entity-type]") && !self.0.contains("[entity-type-group]")
    }
}
