//! # Export Module
//!
//! Projects a persisted API back into the definition wire format. The set of export
//! versions is closed; each [`ApiSerializer`] handles exactly one of them and the
//! [`SerializerChain`] picks the serializer matching the version tag the API carries.
//!
//! Sub-collections are read live from the repositories at export time, each of them
//! emitted in a stable order so that the same state always produces the same document.

use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::core::error::{ManagementError, ManagementResult};
use crate::core::types::{
    Api, MemberType, MembershipReference, PageQuery, Plan, PlanQuery, PlanStatus, RoleScope,
};
use crate::observability::metrics;
use crate::repository::RepositoryGateway;

/// Export schema versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExportVersion {
    Default,
    V1_15,
}

impl ExportVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportVersion::Default => "default",
            ExportVersion::V1_15 => "1.15",
        }
    }
}

impl fmt::Display for ExportVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportVersion {
    type Err = ManagementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "default" => Ok(ExportVersion::Default),
            "1.15" => Ok(ExportVersion::V1_15),
            other => Err(ManagementError::NoSerializerForVersion {
                version: other.to_string(),
            }),
        }
    }
}

/// Sections of the export that can be filtered out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExportSection {
    Groups,
    Members,
    Pages,
    Plans,
}

impl ExportSection {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "groups" => Some(ExportSection::Groups),
            "members" => Some(ExportSection::Members),
            "pages" => Some(ExportSection::Pages),
            "plans" => Some(ExportSection::Plans),
            _ => None,
        }
    }
}

/// Sections left out of an export
pub type FilteredFields = BTreeSet<ExportSection>;

/// Parse a comma separated list of section names, ignoring unknown names
pub fn parse_filtered_fields(list: &str) -> FilteredFields {
    list.split(',').filter_map(ExportSection::parse).collect()
}

/// Insert unless the value is null or an empty collection
fn put(document: &mut Map<String, Value>, key: &str, value: Value) {
    let empty = match &value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    };
    if !empty {
        document.insert(key.to_string(), value);
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> ManagementResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Serializer of one export version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiSerializer {
    version: ExportVersion,
}

impl ApiSerializer {
    pub fn new(version: ExportVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> ExportVersion {
        self.version
    }

    /// Whether the API's recorded export version is this serializer's
    pub fn can_handle(&self, api: &Api) -> bool {
        api.export_version() == Some(self.version.as_str())
    }

    pub async fn serialize(
        &self,
        gateway: &RepositoryGateway,
        api: &Api,
        filtered: &FilteredFields,
    ) -> ManagementResult<Value> {
        let mut document = Map::new();

        document.insert("name".to_string(), json!(api.name));
        document.insert("version".to_string(), json!(api.version));
        put(&mut document, "description", to_value(&api.description)?);
        document.insert("visibility".to_string(), to_value(&api.visibility)?);
        put(&mut document, "tags", to_value(&api.tags)?);
        put(&mut document, "picture", to_value(&api.picture)?);
        put(&mut document, "proxy", to_value(&api.proxy)?);
        put(&mut document, "paths", to_value(&api.paths)?);
        put(&mut document, "services", to_value(&api.services)?);
        put(&mut document, "resources", to_value(&api.resources)?);
        put(&mut document, "properties", to_value(&api.properties)?);
        put(&mut document, "views", to_value(&api.views)?);
        put(&mut document, "labels", to_value(&api.labels)?);

        match self.version {
            ExportVersion::Default => {
                put(&mut document, "path_mappings", to_value(&api.path_mappings)?);
                put(&mut document, "response_templates", to_value(&api.response_templates)?);
            }
            ExportVersion::V1_15 => {}
        }

        if !filtered.contains(&ExportSection::Groups) {
            put(&mut document, "groups", self.groups(gateway, api).await?);
        }
        if !filtered.contains(&ExportSection::Members) {
            put(&mut document, "members", self.members(gateway, api).await?);
        }
        if !filtered.contains(&ExportSection::Pages) {
            put(&mut document, "pages", self.pages(gateway, api).await?);
        }
        if !filtered.contains(&ExportSection::Plans) {
            put(&mut document, "plans", self.plans(gateway, api).await?);
        }

        Ok(Value::Object(document))
    }

    /// Group names, sorted
    async fn groups(&self, gateway: &RepositoryGateway, api: &Api) -> ManagementResult<Value> {
        if api.groups.is_empty() {
            return Ok(Value::Null);
        }
        let names: BTreeSet<String> = gateway
            .groups
            .find_by_ids(&api.groups)
            .await?
            .into_iter()
            .map(|group| group.name)
            .collect();
        to_value(&names)
    }

    /// `{source, reference, role, type}` only, sorted by (reference, role)
    async fn members(&self, gateway: &RepositoryGateway, api: &Api) -> ManagementResult<Value> {
        let mut members: Vec<(String, String, Option<String>, MemberType)> = gateway
            .memberships
            .get_members(&MembershipReference::api(api.id.clone()), RoleScope::Api)
            .await?
            .into_iter()
            .map(|member| {
                let reference = member.reference.unwrap_or(member.id);
                (reference, member.role, member.source, member.member_type)
            })
            .collect();
        members.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        let projected = members
            .into_iter()
            .map(|(reference, role, source, member_type)| -> ManagementResult<Value> {
                let mut entry = Map::new();
                put(&mut entry, "source", to_value(&source)?);
                entry.insert("reference".to_string(), Value::String(reference));
                entry.insert("role".to_string(), Value::String(role));
                entry.insert("type".to_string(), to_value(&member_type)?);
                Ok(Value::Object(entry))
            })
            .collect::<ManagementResult<Vec<_>>>()?;
        Ok(Value::Array(projected))
    }

    /// Pages without ids, sorted by (order, name)
    async fn pages(&self, gateway: &RepositoryGateway, api: &Api) -> ManagementResult<Value> {
        let listed = gateway.pages.search(&PageQuery::by_api(api.id.clone())).await?;

        let mut pages = Vec::with_capacity(listed.len());
        for item in listed {
            match gateway.pages.find_by_id(&item.id).await? {
                Some(page) => pages.push(page),
                None => debug!(page_id = %item.id, "Listed page vanished before export"),
            }
        }
        pages.sort_by(|a, b| (a.order, &a.name).cmp(&(b.order, &b.name)));

        let projected = pages
            .iter()
            .map(|page| -> ManagementResult<Value> {
                let mut entry = Map::new();
                entry.insert("name".to_string(), json!(page.name));
                entry.insert("type".to_string(), to_value(&page.page_type)?);
                put(&mut entry, "content", to_value(&page.content)?);
                entry.insert("order".to_string(), json!(page.order));
                entry.insert("published".to_string(), json!(page.published));
                entry.insert("homepage".to_string(), json!(page.homepage));
                put(&mut entry, "configuration", to_value(&page.configuration)?);
                put(&mut entry, "source", to_value(&page.source)?);
                Ok(Value::Object(entry))
            })
            .collect::<ManagementResult<Vec<_>>>()?;
        Ok(Value::Array(projected))
    }

    /// Plans not CLOSED, sorted by (order, name)
    async fn plans(&self, gateway: &RepositoryGateway, api: &Api) -> ManagementResult<Value> {
        let mut plans: Vec<Plan> = gateway
            .plans
            .search(&PlanQuery::by_api(api.id.clone()))
            .await?
            .into_iter()
            .filter(|plan| plan.status != PlanStatus::Closed)
            .collect();
        plans.sort_by(|a, b| (a.order, &a.name).cmp(&(b.order, &b.name)));

        let projected = plans
            .iter()
            .map(|plan| self.plan(plan))
            .collect::<ManagementResult<Vec<_>>>()?;
        Ok(Value::Array(projected))
    }

    fn plan(&self, plan: &Plan) -> ManagementResult<Value> {
        let mut entry = Map::new();
        entry.insert("name".to_string(), json!(plan.name));
        put(&mut entry, "description", to_value(&plan.description)?);
        entry.insert("security".to_string(), to_value(&plan.security)?);
        put(&mut entry, "securityDefinition", to_value(&plan.security_definition)?);
        entry.insert("validation".to_string(), to_value(&plan.validation)?);
        entry.insert("status".to_string(), to_value(&plan.status)?);
        entry.insert("order".to_string(), json!(plan.order));
        put(&mut entry, "characteristics", to_value(&plan.characteristics)?);
        put(&mut entry, "paths", to_value(&plan.paths)?);

        match self.version {
            ExportVersion::Default => {
                put(&mut entry, "tags", to_value(&plan.tags)?);
                put(&mut entry, "excluded_groups", to_value(&plan.excluded_groups)?);
                put(&mut entry, "selection_rule", to_value(&plan.selection_rule)?);
                entry.insert("comment_required".to_string(), json!(plan.comment_required));
            }
            ExportVersion::V1_15 => {}
        }

        Ok(Value::Object(entry))
    }
}

/// Ordered list of serializers, dispatched on the API's export version tag
#[derive(Clone)]
pub struct SerializerChain {
    gateway: RepositoryGateway,
    serializers: Vec<ApiSerializer>,
}

impl SerializerChain {
    /// Chain with every supported version registered
    pub fn new(gateway: RepositoryGateway) -> Self {
        Self::with_serializers(
            gateway,
            vec![
                ApiSerializer::new(ExportVersion::Default),
                ApiSerializer::new(ExportVersion::V1_15),
            ],
        )
    }

    pub fn with_serializers(gateway: RepositoryGateway, serializers: Vec<ApiSerializer>) -> Self {
        Self {
            gateway,
            serializers,
        }
    }

    /// First registered serializer able to handle the API
    pub fn select(&self, api: &Api) -> ManagementResult<&ApiSerializer> {
        self.serializers
            .iter()
            .find(|serializer| serializer.can_handle(api))
            .ok_or_else(|| ManagementError::NoSerializerForVersion {
                version: api.export_version().unwrap_or("<none>").to_string(),
            })
    }

    /// Serialize with the version the API was tagged with, or `requested` if it has none
    pub async fn serialize(
        &self,
        api: &Api,
        requested: ExportVersion,
        filtered: &FilteredFields,
    ) -> ManagementResult<Value> {
        if api.export_version().is_some() {
            return self.serialize_tagged(api, filtered).await;
        }

        let mut tagged = api.clone();
        tagged.set_export_version(requested.as_str());
        self.serialize_tagged(&tagged, filtered).await
    }

    /// Serialize in the requested version whatever the API was tagged with
    pub async fn export(
        &self,
        api: &Api,
        requested: ExportVersion,
        filtered: &FilteredFields,
    ) -> ManagementResult<Value> {
        let mut tagged = api.clone();
        tagged.set_export_version(requested.as_str());
        self.serialize_tagged(&tagged, filtered).await
    }

    async fn serialize_tagged(&self, api: &Api, filtered: &FilteredFields) -> ManagementResult<Value> {
        let serializer = self.select(api)?;
        debug!(api_id = %api.id, version = %serializer.version(), "Exporting API");

        let document = serializer.serialize(&self.gateway, api, filtered).await?;
        metrics::record_export(serializer.version().as_str());
        Ok(document)
    }
}
