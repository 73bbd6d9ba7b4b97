use std::collections::BTreeMap;

use odata_edm::FullQualifiedName;
use serde::Serialize;

use crate::query_options::QueryOptions;
use crate::resource::{TypeInfo, UriResource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UriInfoKind {
    Resource,
    Service,
    Metadata,
    Batch,
    CrossJoin,
    All,
    EntityId,
}

/// Result of parsing a request URI against a model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UriInfo {
    pub kind: UriInfoKind,
    pub resource_parts: Vec<UriResource>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub crossjoin_entity_sets: Vec<String>,
    /// `$entity/ns.Type`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type_cast: Option<FullQualifiedName>,
    pub options: QueryOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skiptoken: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deltatoken: Option<String>,
    /// `@name` options, raw text.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_options: BTreeMap<String, String>,
}

impl UriInfo {
    #[must_use]
    pub fn new(kind: UriInfoKind) -> Self {
        Self {
            kind,
            resource_parts: Vec::new(),
            crossjoin_entity_sets: Vec::new(),
            entity_type_cast: None,
            options: QueryOptions::default(),
            skiptoken: None,
            format: None,
            id: None,
            deltatoken: None,
            aliases: BTreeMap::new(),
            custom_options: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn last_part(&self) -> Option<&UriResource> {
        self.resource_parts.last()
    }

    /// Type of the addressed resource, skipping `$count`, `$value` and `$ref`.
    #[must_use]
    pub fn target_type(&self) -> Option<TypeInfo> {
        self.resource_parts
            .iter()
            .rev()
            .find(|r| {
                !matches!(
                    r,
                    UriResource::Count | UriResource::Value | UriResource::Ref
                )
            })
            .and_then(UriResource::type_info)
    }
}
