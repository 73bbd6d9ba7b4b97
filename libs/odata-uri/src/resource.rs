//! Resolved resource path segments.

use odata_edm::{EdmType, FullQualifiedName, PrimitiveKind, ReturnType};
use serde::Serialize;

use crate::expression::Expression;
use crate::literal::Literal;

/// One key value of a key predicate, already checked against the key type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyPredicate {
    pub name: String,
    pub value: Literal,
    /// Set when the value came from a parameter alias (`Id=@k`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionParameter {
    pub name: String,
    pub value: Expression,
    /// Text as written in the request.
    pub text: String,
}

/// Effective type of a segment: the type cast if present, else the declared
/// type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub ty: EdmType,
    pub collection: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UriResource {
    EntitySet {
        name: String,
        entity_type: FullQualifiedName,
        keys: Vec<KeyPredicate>,
        #[serde(skip_serializing_if = "Option::is_none")]
        type_filter: Option<FullQualifiedName>,
    },
    Singleton {
        name: String,
        entity_type: FullQualifiedName,
        #[serde(skip_serializing_if = "Option::is_none")]
        type_filter: Option<FullQualifiedName>,
    },
    Navigation {
        name: String,
        target: FullQualifiedName,
        collection: bool,
        keys: Vec<KeyPredicate>,
        #[serde(skip_serializing_if = "Option::is_none")]
        type_filter: Option<FullQualifiedName>,
    },
    PrimitiveProperty {
        name: String,
        #[serde(rename = "type")]
        ty: EdmType,
        collection: bool,
    },
    ComplexProperty {
        name: String,
        #[serde(rename = "type")]
        ty: FullQualifiedName,
        collection: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        type_filter: Option<FullQualifiedName>,
    },
    /// Property introduced by `$apply` (aggregate or compute alias).
    DynamicProperty {
        name: String,
        #[serde(rename = "type")]
        ty: Option<EdmType>,
    },
    Count,
    Value,
    Ref,
    Action {
        action: FullQualifiedName,
        #[serde(skip_serializing_if = "Option::is_none")]
        import: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        return_type: Option<ReturnType>,
    },
    Function {
        function: FullQualifiedName,
        #[serde(skip_serializing_if = "Option::is_none")]
        import: Option<String>,
        parameters: Vec<FunctionParameter>,
        #[serde(skip_serializing_if = "Option::is_none")]
        return_type: Option<ReturnType>,
        keys: Vec<KeyPredicate>,
        #[serde(skip_serializing_if = "Option::is_none")]
        type_filter: Option<FullQualifiedName>,
    },
    /// Explicit `$it`.
    It {
        #[serde(rename = "type")]
        ty: EdmType,
        collection: bool,
    },
    LambdaVariable {
        name: String,
        #[serde(rename = "type")]
        ty: EdmType,
        collection: bool,
    },
    Any {
        #[serde(skip_serializing_if = "Option::is_none")]
        variable: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        expression: Option<Box<Expression>>,
    },
    All {
        variable: String,
        expression: Box<Expression>,
    },
}

impl UriResource {
    /// Type and cardinality after applying the segment's type cast and keys.
    /// `None` for `$value`, `$ref` and operations without a return type.
    #[must_use]
    pub fn type_info(&self) -> Option<TypeInfo> {
        let info = |ty, collection| Some(TypeInfo { ty, collection });
        match self {
            Self::EntitySet {
                entity_type,
                keys,
                type_filter,
                ..
            } => info(
                EdmType::Entity(type_filter.as_ref().unwrap_or(entity_type).clone()),
                keys.is_empty(),
            ),
            Self::Singleton {
                entity_type,
                type_filter,
                ..
            } => info(
                EdmType::Entity(type_filter.as_ref().unwrap_or(entity_type).clone()),
                false,
            ),
            Self::Navigation {
                target,
                collection,
                keys,
                type_filter,
                ..
            } => info(
                EdmType::Entity(type_filter.as_ref().unwrap_or(target).clone()),
                *collection && keys.is_empty(),
            ),
            Self::PrimitiveProperty { ty, collection, .. }
            | Self::It { ty, collection }
            | Self::LambdaVariable { ty, collection, .. } => info(ty.clone(), *collection),
            Self::ComplexProperty {
                ty,
                collection,
                type_filter,
                ..
            } => info(
                EdmType::Complex(type_filter.as_ref().unwrap_or(ty).clone()),
                *collection,
            ),
            Self::DynamicProperty { ty, .. } => ty.clone().and_then(|t| info(t, false)),
            Self::Count => info(EdmType::Primitive(PrimitiveKind::Int64), false),
            Self::Any { .. } | Self::All { .. } => {
                info(EdmType::Primitive(PrimitiveKind::Boolean), false)
            }
            Self::Value | Self::Ref => None,
            Self::Action { return_type, .. } => return_type
                .as_ref()
                .and_then(|r| info(r.ty.clone(), r.collection)),
            Self::Function {
                return_type,
                keys,
                type_filter,
                ..
            } => return_type.as_ref().and_then(|r| {
                let ty = match (type_filter, &r.ty) {
                    (Some(f), EdmType::Complex(_)) => EdmType::Complex(f.clone()),
                    (Some(f), _) => EdmType::Entity(f.clone()),
                    (None, ty) => ty.clone(),
                };
                info(ty, r.collection && keys.is_empty())
            }),
        }
    }

    #[must_use]
    pub fn edm_type(&self) -> Option<EdmType> {
        self.type_info().map(|t| t.ty)
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.type_info().is_some_and(|t| t.collection)
    }

    /// Name of a property, navigation or dynamic property segment.
    #[must_use]
    pub fn property_name(&self) -> Option<&str> {
        match self {
            Self::PrimitiveProperty { name, .. }
            | Self::ComplexProperty { name, .. }
            | Self::Navigation { name, .. }
            | Self::DynamicProperty { name, .. } => Some(name),
            _ => None,
        }
    }

    #[must_use]
    pub fn keys(&self) -> &[KeyPredicate] {
        match self {
            Self::EntitySet { keys, .. }
            | Self::Navigation { keys, .. }
            | Self::Function { keys, .. } => keys,
            _ => &[],
        }
    }

    #[must_use]
    pub fn type_filter(&self) -> Option<&FullQualifiedName> {
        match self {
            Self::EntitySet { type_filter, .. }
            | Self::Singleton { type_filter, .. }
            | Self::Navigation { type_filter, .. }
            | Self::ComplexProperty { type_filter, .. }
            | Self::Function { type_filter, .. } => type_filter.as_ref(),
            _ => None,
        }
    }

    /// Segment as it would be written in a URL, without key predicates.
    #[must_use]
    pub fn segment(&self) -> String {
        match self {
            Self::EntitySet { name, .. }
            | Self::Singleton { name, .. }
            | Self::Navigation { name, .. }
            | Self::PrimitiveProperty { name, .. }
            | Self::ComplexProperty { name, .. }
            | Self::DynamicProperty { name, .. }
            | Self::LambdaVariable { name, .. } => name.clone(),
            Self::Count => "$count".to_owned(),
            Self::Value => "$value".to_owned(),
            Self::Ref => "$ref".to_owned(),
            Self::It { .. } => "$it".to_owned(),
            Self::Action { action, import, .. } => {
                import.clone().unwrap_or_else(|| action.to_string())
            }
            Self::Function {
                function, import, ..
            } => import.clone().unwrap_or_else(|| function.to_string()),
            Self::Any { .. } => "any".to_owned(),
            Self::All { .. } => "all".to_owned(),
        }
    }
}
