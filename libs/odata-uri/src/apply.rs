//! `$apply` transformation tree.

use odata_edm::{EdmType, FullQualifiedName};
use serde::Serialize;

use crate::expression::{Expression, Member};
use crate::query_options::{ExpandItem, SearchExpression};
use crate::resource::{FunctionParameter, UriResource};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyOption {
    /// Transformations in application order.
    pub items: Vec<ApplyItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplyItem {
    Aggregate { expressions: Vec<AggregateExpression> },
    BottomTop(BottomTop),
    Compute { items: Vec<Compute> },
    Concat { branches: Vec<ApplyOption> },
    Expand { item: ExpandItem },
    Filter { expression: Expression },
    GroupBy(GroupBy),
    Identity,
    Search { expression: SearchExpression },
    CustomFunction {
        function: FullQualifiedName,
        parameters: Vec<FunctionParameter>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StandardMethod {
    Sum,
    Min,
    Max,
    Average,
    CountDistinct,
}

impl StandardMethod {
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "sum" => Self::Sum,
            "min" => Self::Min,
            "max" => Self::Max,
            "average" => Self::Average,
            "countdistinct" => Self::CountDistinct,
            _ => return None,
        })
    }
}

/// One item of `aggregate(...)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateExpression {
    /// Path to the aggregated value (`Amount`, `Orders/Amount`).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<UriResource>,
    /// Aggregated expression when not a plain path (`Amount mul 2`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard_method: Option<StandardMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_method: Option<FullQualifiedName>,
    /// Custom aggregate declared on the model, used by name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_aggregate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// `Nav(...)`: aggregation through a navigation path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline: Option<Box<AggregateExpression>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<AggregateExpression>,
    /// `$count as alias` or `path/$count as alias`.
    pub count: bool,
    /// Type of the dynamic property the alias introduces.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<EdmType>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupBy {
    pub items: Vec<GroupByItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplyOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Member>,
    /// `rollup($all, ...)`.
    pub rollup_all: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rollup: Vec<GroupByItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BottomTopMethod {
    TopCount,
    BottomCount,
    TopPercent,
    BottomPercent,
    TopSum,
    BottomSum,
}

impl BottomTopMethod {
    pub const ALL: [(&'static str, Self); 6] = [
        ("topcount", Self::TopCount),
        ("bottomcount", Self::BottomCount),
        ("toppercent", Self::TopPercent),
        ("bottompercent", Self::BottomPercent),
        ("topsum", Self::TopSum),
        ("bottomsum", Self::BottomSum),
    ];

    #[must_use]
    pub fn is_top(self) -> bool {
        matches!(self, Self::TopCount | Self::TopPercent | Self::TopSum)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BottomTop {
    pub method: BottomTopMethod,
    pub number: Expression,
    pub value: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Compute {
    pub expression: Expression,
    pub alias: String,
}
