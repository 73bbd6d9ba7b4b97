//! OData v4 request URI parsing.
//!
//! [`Parser::parse_uri`] resolves the resource path and parses the system
//! query options into a [`UriInfo`]: typed resource segments, expression
//! trees for `$filter` and `$orderby`, and the `$select`, `$expand`,
//! `$search` and `$apply` structures.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod apply;
pub mod decoder;
pub mod error;
pub mod expression;
pub mod literal;
pub mod parser;
mod problem_mapping;
pub mod query_options;
pub mod resource;
pub mod tokenizer;
pub mod uri_info;
pub mod validator;

pub use error::{SemanticKey, SyntaxKey, UriError, UriResult, ValidationKey};
pub use expression::{
    BinaryOperator, Expression, ExpressionVisitor, Member, MemberStart, MethodKind, UnaryOperator,
};
pub use literal::{Literal, LiteralValue};
pub use parser::Parser;
pub use query_options::{
    ExpandItem, ExpandOption, Levels, OrderByItem, QueryOptions, SearchExpression, SelectItem,
    SelectOption,
};
pub use resource::{FunctionParameter, KeyPredicate, TypeInfo, UriResource};
pub use uri_info::{UriInfo, UriInfoKind};
pub use validator::{SystemQueryOption, UriValidator};
