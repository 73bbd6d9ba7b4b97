//! Parsed system query options.

use odata_edm::FullQualifiedName;
use serde::Serialize;

use crate::apply::ApplyOption;
use crate::expression::Expression;
use crate::resource::UriResource;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Expression>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub orderby: Vec<OrderByItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<SelectOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expand: Option<ExpandOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchExpression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplyOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<bool>,
    /// Only inside `$expand` options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<Levels>,
}

impl QueryOptions {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderByItem {
    pub expression: Expression,
    pub descending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectOption {
    pub items: Vec<SelectItem>,
}

impl SelectOption {
    #[must_use]
    pub fn is_star(&self) -> bool {
        self.items.iter().any(|i| i.star)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectItem {
    pub star: bool,
    /// `ns.*`: all operations of the namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_operations: Option<String>,
    /// Property segments; complex properties carry their own casts.
    pub path: Vec<UriResource>,
    /// Cast in front of the path (`Demo.Employee/Budget`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_filter: Option<FullQualifiedName>,
    /// Bound action or function name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<FullQualifiedName>,
}

impl SelectItem {
    /// Property names along the path (`HomeAddress/City`).
    #[must_use]
    pub fn path_names(&self) -> Vec<&str> {
        self.path
            .iter()
            .filter_map(UriResource::property_name)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpandOption {
    pub items: Vec<ExpandItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpandItem {
    pub star: bool,
    pub is_ref: bool,
    pub is_count: bool,
    /// Complex properties leading to the navigation, then the navigation.
    pub path: Vec<UriResource>,
    /// Cast in front of the path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_filter: Option<FullQualifiedName>,
    #[serde(skip_serializing_if = "QueryOptions::is_empty")]
    pub options: QueryOptions,
}

impl ExpandItem {
    /// The navigation segment being expanded.
    #[must_use]
    pub fn navigation(&self) -> Option<&UriResource> {
        self.path
            .iter()
            .rev()
            .find(|r| matches!(r, UriResource::Navigation { .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Levels {
    Max,
    Value(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchExpression {
    Term { text: String },
    Phrase { text: String },
    Not { operand: Box<SearchExpression> },
    And {
        left: Box<SearchExpression>,
        right: Box<SearchExpression>,
    },
    Or {
        left: Box<SearchExpression>,
        right: Box<SearchExpression>,
    },
}
