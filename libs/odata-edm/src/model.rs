//! Resolved, immutable metadata elements.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::fqn::FullQualifiedName;
use crate::primitive::PrimitiveKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Primitive,
    Enum,
    Definition,
    Complex,
    Entity,
}

/// Reference to any type of the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdmType {
    Primitive(PrimitiveKind),
    Enum(FullQualifiedName),
    Definition(FullQualifiedName),
    Complex(FullQualifiedName),
    Entity(FullQualifiedName),
}

impl EdmType {
    #[must_use]
    pub fn kind(&self) -> TypeKind {
        match self {
            Self::Primitive(_) => TypeKind::Primitive,
            Self::Enum(_) => TypeKind::Enum,
            Self::Definition(_) => TypeKind::Definition,
            Self::Complex(_) => TypeKind::Complex,
            Self::Entity(_) => TypeKind::Entity,
        }
    }

    #[must_use]
    pub fn primitive(&self) -> Option<PrimitiveKind> {
        match self {
            Self::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    /// Name of a non-primitive type.
    #[must_use]
    pub fn fqn(&self) -> Option<&FullQualifiedName> {
        match self {
            Self::Primitive(_) => None,
            Self::Enum(n) | Self::Definition(n) | Self::Complex(n) | Self::Entity(n) => Some(n),
        }
    }

    #[must_use]
    pub fn structured(&self) -> Option<&FullQualifiedName> {
        match self {
            Self::Complex(n) | Self::Entity(n) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Complex(_) | Self::Entity(_))
    }

    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::Primitive(_))
    }
}

impl fmt::Display for EdmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => p.fmt(f),
            Self::Enum(n) | Self::Definition(n) | Self::Complex(n) | Self::Entity(n) => n.fmt(f),
        }
    }
}

impl Serialize for EdmType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<PrimitiveKind> for EdmType {
    fn from(value: PrimitiveKind) -> Self {
        Self::Primitive(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Property {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: EdmType,
    pub collection: bool,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl Property {
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        !self.ty.is_structured()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationProperty {
    pub name: String,
    pub target: FullQualifiedName,
    pub collection: bool,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner: Option<String>,
    pub contains_target: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredKind {
    Entity,
    Complex,
}

/// Entity or complex type with its declared members. Inherited members are
/// reached through `Edm`, which walks the base-type chain.
#[derive(Debug, Clone, Serialize)]
pub struct StructuredType {
    pub fqn: FullQualifiedName,
    pub kind: StructuredKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<FullQualifiedName>,
    pub is_abstract: bool,
    pub open_type: bool,
    pub has_stream: bool,
    /// Declared key; empty for complex types and derived entity types.
    pub key: Vec<String>,
    pub properties: Vec<Property>,
    pub navigation_properties: Vec<NavigationProperty>,
}

impl StructuredType {
    #[must_use]
    pub fn declared_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn declared_navigation(&self, name: &str) -> Option<&NavigationProperty> {
        self.navigation_properties.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn edm_type(&self) -> EdmType {
        match self.kind {
            StructuredKind::Entity => EdmType::Entity(self.fqn.clone()),
            StructuredKind::Complex => EdmType::Complex(self.fqn.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnumType {
    pub fqn: FullQualifiedName,
    pub underlying: PrimitiveKind,
    pub is_flags: bool,
    pub members: Vec<EnumMember>,
}

impl EnumType {
    #[must_use]
    pub fn member(&self, name: &str) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Accepts a member name or its numeric value.
    #[must_use]
    pub fn member_value(&self, text: &str) -> Option<i64> {
        if let Some(m) = self.member(text) {
            return Some(m.value);
        }
        let n: i64 = text.parse().ok()?;
        self.members.iter().find(|m| m.value == n).map(|m| m.value)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeDefinition {
    pub fqn: FullQualifiedName,
    pub underlying: PrimitiveKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Action,
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: EdmType,
    pub collection: bool,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReturnType {
    #[serde(rename = "type")]
    pub ty: EdmType,
    pub collection: bool,
    pub nullable: bool,
}

/// Action or function overload.
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub fqn: FullQualifiedName,
    pub kind: OperationKind,
    pub bound: bool,
    pub composable: bool,
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<ReturnType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_set_path: Option<String>,
}

impl Operation {
    #[must_use]
    pub fn binding_parameter(&self) -> Option<&Parameter> {
        if self.bound {
            self.parameters.first()
        } else {
            None
        }
    }

    /// Parameters that appear in a call's parentheses.
    pub fn call_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().skip(usize::from(self.bound))
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.call_parameters().find(|p| p.name == name)
    }

    /// Order-insensitive match on call parameter names.
    #[must_use]
    pub fn matches_parameter_names(&self, names: &[&str]) -> bool {
        let own: Vec<&str> = self.call_parameters().map(|p| p.name.as_str()).collect();
        own.len() == names.len() && names.iter().all(|n| own.contains(n))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NavigationBinding {
    pub path: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitySet {
    pub name: String,
    pub entity_type: FullQualifiedName,
    pub include_in_service_document: bool,
    pub navigation_bindings: Vec<NavigationBinding>,
}

impl EntitySet {
    #[must_use]
    pub fn binding_target(&self, path: &str) -> Option<&str> {
        binding_target(&self.navigation_bindings, path)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Singleton {
    pub name: String,
    pub entity_type: FullQualifiedName,
    pub navigation_bindings: Vec<NavigationBinding>,
}

impl Singleton {
    #[must_use]
    pub fn binding_target(&self, path: &str) -> Option<&str> {
        binding_target(&self.navigation_bindings, path)
    }
}

fn binding_target<'a>(bindings: &'a [NavigationBinding], path: &str) -> Option<&'a str> {
    bindings
        .iter()
        .find(|b| b.path == path)
        .map(|b| b.target.as_str())
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionImport {
    pub name: String,
    pub action: FullQualifiedName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_set: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionImport {
    pub name: String,
    pub function: FullQualifiedName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_set: Option<String>,
    pub include_in_service_document: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EntityContainer {
    pub name: String,
    pub entity_sets: Vec<EntitySet>,
    pub singletons: Vec<Singleton>,
    pub action_imports: Vec<ActionImport>,
    pub function_imports: Vec<FunctionImport>,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn edm_type_display() {
        assert_eq!(
            EdmType::Primitive(PrimitiveKind::Int32).to_string(),
            "Edm.Int32"
        );
        assert_eq!(
            EdmType::Complex(FullQualifiedName::new("Demo", "Address")).to_string(),
            "Demo.Address"
        );
    }

    #[test]
    fn enum_member_by_name_or_value() {
        let e = EnumType {
            fqn: FullQualifiedName::new("Demo", "Color"),
            underlying: PrimitiveKind::Int32,
            is_flags: false,
            members: vec![
                EnumMember {
                    name: "Red".to_owned(),
                    value: 1,
                },
                EnumMember {
                    name: "Green".to_owned(),
                    value: 2,
                },
            ],
        };
        assert_eq!(e.member_value("Green"), Some(2));
        assert_eq!(e.member_value("1"), Some(1));
        assert_eq!(e.member_value("7"), None);
        assert_eq!(e.member_value("Blue"), None);
    }
}
