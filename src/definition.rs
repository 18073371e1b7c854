//! # Definition Module
//!
//! Parses the wire format of an API definition into a [`DefinitionDocument`], the desired
//! state a single import reconciles toward. Parsing is side-effect free.
//!
//! JSON payloads are recognised by their leading `{`; anything else is read as YAML.
//! Optional sections (`members`, `pages`, `plans`, `groups`) may be absent or `null`.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::core::error::{ManagementError, ManagementResult};
use crate::core::types::{
    Api, NewPage, NewPlan, PageType, PlanSecurityType, PlanStatus, PlanValidation, UpdatePage,
    UpdatePlan, Visibility,
};

/// Desired state of an API and its sub-collections
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionDocument {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    pub tags: BTreeSet<String>,
    pub picture: Option<String>,
    pub proxy: Option<Value>,
    pub paths: BTreeMap<String, Value>,
    pub services: Option<Value>,
    pub resources: Vec<Value>,
    pub properties: Option<Value>,
    pub views: BTreeSet<String>,
    pub labels: Vec<String>,
    pub path_mappings: BTreeSet<String>,
    pub response_templates: Option<Value>,
    pub members: Vec<MemberSpec>,
    pub pages: Vec<PageSpec>,
    pub plans: Vec<PlanSpec>,
    /// Group names
    pub groups: Vec<String>,
}

/// A desired membership on the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSpec {
    pub reference: String,
    pub source: Option<String>,
    /// Role name within the API scope, upper-cased
    pub role: String,
}

/// A desired documentation page, keyed by name
#[derive(Debug, Clone, PartialEq)]
pub struct PageSpec {
    pub name: String,
    pub page_type: PageType,
    pub content: Option<String>,
    pub order: i32,
    pub published: bool,
    pub homepage: bool,
    pub configuration: BTreeMap<String, String>,
    pub source: Option<Value>,
}

/// A desired plan, keyed by (name, security)
#[derive(Debug, Clone, PartialEq)]
pub struct PlanSpec {
    pub name: String,
    pub description: Option<String>,
    pub security: PlanSecurityType,
    pub security_definition: Option<String>,
    pub validation: PlanValidation,
    pub status: PlanStatus,
    pub order: i32,
    pub characteristics: Vec<String>,
    pub paths: BTreeMap<String, Value>,
    pub tags: BTreeSet<String>,
    pub excluded_groups: Vec<String>,
    pub selection_rule: Option<String>,
    pub comment_required: bool,
}

/// Parse a raw definition payload
pub fn parse(raw: &[u8]) -> ManagementResult<DefinitionDocument> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| ManagementError::malformed(format!("definition is not valid UTF-8: {}", e)))?;
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Err(ManagementError::malformed("definition is empty"));
    }

    let document: RawDefinition = if trimmed.starts_with('{') {
        serde_json::from_str(trimmed).map_err(|e| ManagementError::malformed(e.to_string()))?
    } else {
        serde_yaml::from_str(trimmed).map_err(|e| ManagementError::malformed(e.to_string()))?
    };

    document.into_document()
}

impl DefinitionDocument {
    /// Copy the API-level fields of the definition onto an API record.
    /// Identity, ownership and timestamps are left to the caller.
    pub fn apply_to(&self, api: &mut Api) {
        api.name = self.name.clone();
        api.version = self.version.clone();
        api.description = self.description.clone();
        api.visibility = self.visibility;
        api.tags = self.tags.clone();
        api.picture = self.picture.clone();
        api.proxy = self.proxy.clone();
        api.paths = self.paths.clone();
        api.services = self.services.clone();
        api.resources = self.resources.clone();
        api.properties = self.properties.clone();
        api.views = self.views.clone();
        api.labels = self.labels.clone();
        api.path_mappings = self.path_mappings.clone();
        api.response_templates = self.response_templates.clone();
    }
}

impl PageSpec {
    pub fn to_new_page(&self, contributor: Option<&str>) -> NewPage {
        NewPage {
            name: self.name.clone(),
            page_type: self.page_type,
            content: self.content.clone(),
            order: self.order,
            published: self.published,
            homepage: self.homepage,
            configuration: self.configuration.clone(),
            source: self.source.clone(),
            last_contributor: contributor.map(str::to_string),
        }
    }

    pub fn to_update_page(&self, contributor: Option<&str>) -> UpdatePage {
        UpdatePage {
            name: self.name.clone(),
            content: self.content.clone(),
            order: self.order,
            published: self.published,
            homepage: self.homepage,
            configuration: self.configuration.clone(),
            source: self.source.clone(),
            last_contributor: contributor.map(str::to_string),
        }
    }
}

impl PlanSpec {
    pub fn natural_key(&self) -> (String, PlanSecurityType) {
        (self.name.clone(), self.security)
    }

    pub fn to_new_plan(&self, api_id: &str) -> NewPlan {
        NewPlan {
            api_id: api_id.to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            security: self.security,
            security_definition: self.security_definition.clone(),
            validation: self.validation,
            status: self.status,
            order: self.order,
            characteristics: self.characteristics.clone(),
            paths: self.paths.clone(),
            tags: self.tags.clone(),
            excluded_groups: self.excluded_groups.clone(),
            selection_rule: self.selection_rule.clone(),
            comment_required: self.comment_required,
        }
    }

    pub fn to_update_plan(&self, plan_id: &str) -> UpdatePlan {
        UpdatePlan {
            id: plan_id.to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            security_definition: self.security_definition.clone(),
            validation: self.validation,
            order: self.order,
            characteristics: self.characteristics.clone(),
            paths: self.paths.clone(),
            tags: self.tags.clone(),
            excluded_groups: self.excluded_groups.clone(),
            selection_rule: self.selection_rule.clone(),
            comment_required: self.comment_required,
        }
    }
}

/// Treat an explicit `null` like an absent field
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct RawDefinition {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    visibility: Option<Visibility>,
    #[serde(default, deserialize_with = "nullable")]
    tags: BTreeSet<String>,
    picture: Option<String>,
    proxy: Option<Value>,
    #[serde(default, deserialize_with = "nullable")]
    paths: BTreeMap<String, Value>,
    services: Option<Value>,
    #[serde(default, deserialize_with = "nullable")]
    resources: Vec<Value>,
    properties: Option<Value>,
    #[serde(default, deserialize_with = "nullable")]
    views: BTreeSet<String>,
    #[serde(default, deserialize_with = "nullable")]
    labels: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    path_mappings: BTreeSet<String>,
    response_templates: Option<Value>,
    #[serde(default, deserialize_with = "nullable")]
    members: Vec<RawMember>,
    #[serde(default, deserialize_with = "nullable")]
    pages: Vec<RawPage>,
    #[serde(default, deserialize_with = "nullable")]
    plans: Vec<RawPlan>,
    #[serde(default, deserialize_with = "nullable")]
    groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawMember {
    #[serde(alias = "sourceId", alias = "username")]
    reference: Option<String>,
    source: Option<String>,
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    name: Option<String>,
    #[serde(rename = "type")]
    page_type: Option<PageType>,
    content: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    order: i32,
    #[serde(default, deserialize_with = "nullable")]
    published: bool,
    #[serde(default, deserialize_with = "nullable")]
    homepage: bool,
    #[serde(default, deserialize_with = "nullable")]
    configuration: BTreeMap<String, String>,
    source: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    name: Option<String>,
    description: Option<String>,
    security: Option<PlanSecurityType>,
    #[serde(rename = "securityDefinition")]
    security_definition: Option<String>,
    validation: Option<PlanValidation>,
    status: Option<PlanStatus>,
    #[serde(default, deserialize_with = "nullable")]
    order: i32,
    #[serde(default, deserialize_with = "nullable")]
    characteristics: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    paths: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "nullable")]
    tags: BTreeSet<String>,
    #[serde(default, deserialize_with = "nullable")]
    excluded_groups: Vec<String>,
    selection_rule: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    comment_required: bool,
}

fn required(value: Option<String>, what: &str) -> ManagementResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ManagementError::malformed(format!("missing required field '{}'", what))),
    }
}

impl RawDefinition {
    fn into_document(self) -> ManagementResult<DefinitionDocument> {
        let name = required(self.name, "name")?;
        let version = required(self.version, "version")?;

        let members = self
            .members
            .into_iter()
            .enumerate()
            .map(|(index, member)| -> ManagementResult<MemberSpec> {
                let reference = required(member.reference, &format!("members[{}].reference", index))?;
                let role = required(member.role, &format!("members[{}].role", index))?;
                Ok(MemberSpec {
                    reference,
                    source: member.source.filter(|s| !s.trim().is_empty()),
                    role: role.trim().to_uppercase(),
                })
            })
            .collect::<ManagementResult<Vec<_>>>()?;

        let pages = self
            .pages
            .into_iter()
            .enumerate()
            .map(|(index, page)| -> ManagementResult<PageSpec> {
                Ok(PageSpec {
                    name: required(page.name, &format!("pages[{}].name", index))?,
                    page_type: page.page_type.unwrap_or_default(),
                    content: page.content,
                    order: page.order,
                    published: page.published,
                    homepage: page.homepage,
                    configuration: page.configuration,
                    source: page.source,
                })
            })
            .collect::<ManagementResult<Vec<_>>>()?;

        let plans = self
            .plans
            .into_iter()
            .enumerate()
            .map(|(index, plan)| -> ManagementResult<PlanSpec> {
                Ok(PlanSpec {
                    name: required(plan.name, &format!("plans[{}].name", index))?,
                    description: plan.description,
                    security: plan.security.unwrap_or_default(),
                    security_definition: plan.security_definition,
                    validation: plan.validation.unwrap_or_default(),
                    status: plan.status.unwrap_or_default(),
                    order: plan.order,
                    characteristics: plan.characteristics,
                    paths: plan.paths,
                    tags: plan.tags,
                    excluded_groups: plan.excluded_groups,
                    selection_rule: plan.selection_rule,
                    comment_required: plan.comment_required,
                })
            })
            .collect::<ManagementResult<Vec<_>>>()?;

        Ok(DefinitionDocument {
            name,
            version,
            description: self.description,
            visibility: self.visibility.unwrap_or_default(),
            tags: self.tags,
            picture: self.picture,
            proxy: self.proxy,
            paths: self.paths,
            services: self.services,
            resources: self.resources,
            properties: self.properties,
            views: self.views,
            labels: self.labels,
            path_mappings: self.path_mappings,
            response_templates: self.response_templates,
            members,
            pages,
            plans,
            groups: self.groups.into_iter().filter(|g| !g.trim().is_empty()).collect(),
        })
    }
}
