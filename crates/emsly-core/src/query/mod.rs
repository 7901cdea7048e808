// ── Query building ──
//
// Pure translation from caller specs to wire documents. Nothing in this
// module performs I/O; field metadata for discrete checks is passed in.

mod filter;
mod spec;

pub use filter::{
    Condition, DiscreteMode, FieldCatalog, FilterBuilder, FilterSpec, Operator, WireArg,
    WireFilter,
};
pub use spec::{
    Aggregate, AnalyticSelect, AnalyticsDocument, DEFAULT_QUERY_LIMIT, DEFAULT_SAMPLE_COUNT,
    MAX_ANALYTICS_PER_REQUEST, MAX_FLIGHTS_PER_REQUEST, MAX_QUERY_LIMIT, OrderBy, QueryDocument,
    QuerySpec, ResultFormat, SampleWindow, SelectField, SortDirection, WireFieldRef, WireOrder,
    WireSelect, build_analytics_document, check_analytics_request,
};
