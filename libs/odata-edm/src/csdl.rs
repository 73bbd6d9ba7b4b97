//! Plain serde data holders describing a service schema.
//!
//! Type references are written as in CSDL: `Edm.String`, `Demo.Address`,
//! `D.Address` (alias) or `Collection(Demo.Address)`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlSchema {
    pub namespace: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub enum_types: Vec<CsdlEnumType>,
    #[serde(default)]
    pub type_definitions: Vec<CsdlTypeDefinition>,
    #[serde(default)]
    pub complex_types: Vec<CsdlStructuredType>,
    #[serde(default)]
    pub entity_types: Vec<CsdlStructuredType>,
    #[serde(default)]
    pub actions: Vec<CsdlOperation>,
    #[serde(default)]
    pub functions: Vec<CsdlOperation>,
    #[serde(default)]
    pub entity_container: Option<CsdlEntityContainer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlEnumType {
    pub name: String,
    #[serde(default = "default_enum_underlying")]
    pub underlying_type: String,
    #[serde(default)]
    pub is_flags: bool,
    pub members: Vec<CsdlEnumMember>,
}

fn default_enum_underlying() -> String {
    "Edm.Int32".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlEnumMember {
    pub name: String,
    /// Defaults to the member's position (or `1 << position` for flags).
    #[serde(default)]
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlTypeDefinition {
    pub name: String,
    pub underlying_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlStructuredType {
    pub name: String,
    #[serde(default)]
    pub base_type: Option<String>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub open_type: bool,
    #[serde(default)]
    pub has_stream: bool,
    /// Entity types only.
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub properties: Vec<CsdlProperty>,
    #[serde(default)]
    pub navigation_properties: Vec<CsdlNavigationProperty>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default)]
    pub scale: Option<u32>,
    #[serde(default)]
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlNavigationProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub partner: Option<String>,
    #[serde(default)]
    pub contains_target: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlOperation {
    pub name: String,
    #[serde(default)]
    pub is_bound: bool,
    /// Functions only.
    #[serde(default)]
    pub is_composable: bool,
    #[serde(default)]
    pub parameters: Vec<CsdlParameter>,
    #[serde(default)]
    pub return_type: Option<CsdlReturnType>,
    #[serde(default)]
    pub entity_set_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlReturnType {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlEntityContainer {
    pub name: String,
    #[serde(default)]
    pub entity_sets: Vec<CsdlEntitySet>,
    #[serde(default)]
    pub singletons: Vec<CsdlSingleton>,
    #[serde(default)]
    pub action_imports: Vec<CsdlActionImport>,
    #[serde(default)]
    pub function_imports: Vec<CsdlFunctionImport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlEntitySet {
    pub name: String,
    pub entity_type: String,
    #[serde(default = "default_true")]
    pub include_in_service_document: bool,
    #[serde(default)]
    pub navigation_bindings: Vec<CsdlNavigationBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlSingleton {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub navigation_bindings: Vec<CsdlNavigationBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlNavigationBinding {
    pub path: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlActionImport {
    pub name: String,
    pub action: String,
    #[serde(default)]
    pub entity_set: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsdlFunctionImport {
    pub name: String,
    pub function: String,
    #[serde(default)]
    pub entity_set: Option<String>,
    #[serde(default)]
    pub include_in_service_document: bool,
}

fn default_true() -> bool {
    true
}

/// Splits `Collection(X)` into `(X, true)`.
#[must_use]
pub fn split_collection(type_name: &str) -> (&str, bool) {
    type_name
        .strip_prefix("Collection(")
        .and_then(|rest| rest.strip_suffix(')'))
        .map_or((type_name, false), |inner| (inner, true))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn collection_type_names() {
        assert_eq!(split_collection("Collection(Edm.String)"), ("Edm.String", true));
        assert_eq!(split_collection("Demo.Address"), ("Demo.Address", false));
        assert_eq!(split_collection("Collection(Demo.A"), ("Collection(Demo.A", false));
    }

    #[test]
    fn defaults_apply() {
        let p: CsdlProperty =
            serde_json::from_str(r#"{"name":"Name","type":"Edm.String"}"#).unwrap();
        assert!(p.nullable);
        let e: CsdlEnumType =
            serde_json::from_str(r#"{"name":"Color","members":[{"name":"Red"}]}"#).unwrap();
        assert_eq!(e.underlying_type, "Edm.Int32");
        assert!(e.members[0].value.is_none());
    }

    #[test]
    fn unknown_fields_rejected() {
        let res: Result<CsdlProperty, _> =
            serde_json::from_str(r#"{"name":"Name","type":"Edm.String","bogus":1}"#);
        assert!(res.is_err());
    }
}
