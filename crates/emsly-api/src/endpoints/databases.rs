// Database and field discovery endpoints
//
// Both trees are navigated one level per call. An absent `groupId` means
// the root level.

use tracing::debug;

use crate::client::{ApiRequest, EmsClient, system_path};
use crate::error::Error;
use crate::models::{
    DatabaseGroup, DatabaseId, FieldGroup, FieldId, FieldInfo, FieldSummary, GroupId, SystemId,
};

impl EmsClient {
    /// One level of the database tree.
    ///
    /// `GET /api/v2/ems-systems/{id}/database-groups?groupId=`
    pub async fn database_group(
        &self,
        system: SystemId,
        group: Option<&GroupId>,
    ) -> Result<DatabaseGroup, Error> {
        debug!(system, group = group.map(GroupId::as_str), "listing database group");
        let request = ApiRequest::get(system_path(system, ["database-groups"]))
            .query_opt("groupId", group.map(GroupId::as_str));
        self.fetch(request).await
    }

    /// One level of a database's field tree.
    ///
    /// `GET /api/v2/ems-systems/{id}/databases/{db}/field-groups?groupId=`
    pub async fn field_group(
        &self,
        system: SystemId,
        database: &DatabaseId,
        group: Option<&GroupId>,
    ) -> Result<FieldGroup, Error> {
        debug!(
            system,
            database = database.as_str(),
            group = group.map(GroupId::as_str),
            "listing field group"
        );
        let request = ApiRequest::get(system_path(
            system,
            ["databases", database.as_str(), "field-groups"],
        ))
        .query_opt("groupId", group.map(GroupId::as_str));
        self.fetch(request).await
    }

    /// Server-side field name search.
    ///
    /// `GET /api/v2/ems-systems/{id}/databases/{db}/fields?text=`
    ///
    /// Entity-type databases answer 405 here; see
    /// [`DatabaseId::is_entity_type`].
    pub async fn search_fields(
        &self,
        system: SystemId,
        database: &DatabaseId,
        text: &str,
    ) -> Result<Vec<FieldSummary>, Error> {
        debug!(system, database = database.as_str(), text, "searching fields");
        let request = ApiRequest::get(system_path(
            system,
            ["databases", database.as_str(), "fields"],
        ))
        .query("text", text);
        self.fetch(request).await
    }

    /// Full metadata for one field, including discrete values.
    ///
    /// `GET /api/v2/ems-systems/{id}/databases/{db}/fields/{fieldId}`
    pub async fn field_info(
        &self,
        system: SystemId,
        database: &DatabaseId,
        field: &FieldId,
    ) -> Result<FieldInfo, Error> {
        debug!(system, database = database.as_str(), field = field.as_str(), "fetching field info");
        self.fetch(ApiRequest::get(system_path(
            system,
            ["databases", database.as_str(), "fields", field.as_str()],
        )))
        .await
    }
}
