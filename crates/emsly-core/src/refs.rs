// ── Id-or-name references ──
//
// Callers say explicitly whether they hold an opaque id or a display name;
// ids pass straight through, names go through `DiscoveryService::resolve_*`.

use emsly_api::models::{AnalyticId, DatabaseId, FieldId};
use serde::{Deserialize, Serialize};

macro_rules! id_or_name {
    ($(#[$meta:meta])* $name:ident, $id:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            Id($id),
            Name(String),
        }

        impl $name {
            pub fn id(id: impl Into<$id>) -> Self {
                Self::Id(id.into())
            }

            pub fn name(name: impl Into<String>) -> Self {
                Self::Name(name.into())
            }
        }

        impl From<$id> for $name {
            fn from(id: $id) -> Self {
                Self::Id(id)
            }
        }
    };
}

id_or_name!(
    /// A database by id or by its name, plural name, or singular name.
    DatabaseRef,
    DatabaseId
);

id_or_name!(
    /// A field by id or by display name.
    FieldRef,
    FieldId
);

id_or_name!(
    /// An analytic by id or by display name.
    AnalyticRef,
    AnalyticId
);

/// An analytic after name resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAnalytic {
    /// Display name, or the id itself when the caller passed an id.
    pub name: String,
    pub id: AnalyticId,
}
