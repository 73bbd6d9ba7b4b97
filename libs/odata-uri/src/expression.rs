//! Typed expression tree produced by `$filter`, `$orderby`, `$apply` and
//! lambda parsing.

use odata_edm::{EdmType, FullQualifiedName, PrimitiveKind};
use serde::Serialize;

use crate::literal::Literal;
use crate::resource::UriResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOperator {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Has,
    Add,
    Sub,
    Mul,
    Div,
    DivBy,
    Mod,
}

impl BinaryOperator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Or => "or",
            Self::And => "and",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Has => "has",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::DivBy => "divby",
            Self::Mod => "mod",
        }
    }

    #[must_use]
    pub fn is_logical(self) -> bool {
        matches!(self, Self::Or | Self::And)
    }

    #[must_use]
    pub fn is_equality(self) -> bool {
        matches!(self, Self::Eq | Self::Ne)
    }

    #[must_use]
    pub fn is_ordering(self) -> bool {
        matches!(self, Self::Gt | Self::Ge | Self::Lt | Self::Le)
    }

    #[must_use]
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::DivBy | Self::Mod
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOperator {
    Not,
    Minus,
}

/// Built-in canonical functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    Contains,
    StartsWith,
    EndsWith,
    Length,
    IndexOf,
    Substring,
    ToLower,
    ToUpper,
    Trim,
    Concat,
    MatchesPattern,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    FractionalSeconds,
    TotalSeconds,
    Date,
    Time,
    TotalOffsetMinutes,
    MinDateTime,
    MaxDateTime,
    Now,
    Round,
    Floor,
    Ceiling,
    Cast,
    IsOf,
}

impl MethodKind {
    pub const ALL: [Self; 30] = [
        Self::Contains,
        Self::StartsWith,
        Self::EndsWith,
        Self::Length,
        Self::IndexOf,
        Self::Substring,
        Self::ToLower,
        Self::ToUpper,
        Self::Trim,
        Self::Concat,
        Self::MatchesPattern,
        Self::Year,
        Self::Month,
        Self::Day,
        Self::Hour,
        Self::Minute,
        Self::Second,
        Self::FractionalSeconds,
        Self::TotalSeconds,
        Self::Date,
        Self::Time,
        Self::TotalOffsetMinutes,
        Self::MinDateTime,
        Self::MaxDateTime,
        Self::Now,
        Self::Round,
        Self::Floor,
        Self::Ceiling,
        Self::Cast,
        Self::IsOf,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::Length => "length",
            Self::IndexOf => "indexof",
            Self::Substring => "substring",
            Self::ToLower => "tolower",
            Self::ToUpper => "toupper",
            Self::Trim => "trim",
            Self::Concat => "concat",
            Self::MatchesPattern => "matchesPattern",
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Second => "second",
            Self::FractionalSeconds => "fractionalseconds",
            Self::TotalSeconds => "totalseconds",
            Self::Date => "date",
            Self::Time => "time",
            Self::TotalOffsetMinutes => "totaloffsetminutes",
            Self::MinDateTime => "mindatetime",
            Self::MaxDateTime => "maxdatetime",
            Self::Now => "now",
            Self::Round => "round",
            Self::Floor => "floor",
            Self::Ceiling => "ceiling",
            Self::Cast => "cast",
            Self::IsOf => "isof",
        }
    }
}

/// Where a member path starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStart {
    /// The current instance, implicit or written as `$it`.
    It,
    /// `$root`: the path starts at the entity container.
    Root,
    LambdaVariable(String),
}

/// A path expression such as `HomeAddress/City` or `o/Amount`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Member {
    pub start: MemberStart,
    /// Type cast directly on the start (`$it/Demo.Employee/Budget`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_filter: Option<FullQualifiedName>,
    pub path: Vec<UriResource>,
}

impl Member {
    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.path.last().is_some_and(UriResource::is_collection)
    }

    #[must_use]
    pub fn edm_type(&self) -> Option<EdmType> {
        self.path.last().and_then(UriResource::edm_type)
    }

    /// Property names along the path, `/`-joined (`HomeAddress/City`).
    #[must_use]
    pub fn path_string(&self) -> String {
        self.path
            .iter()
            .filter_map(UriResource::property_name)
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    Literal(Literal),
    Member(Member),
    /// `@name`; `value` is the parsed alias value, absent when the request
    /// does not define it (treated as null).
    Alias {
        name: String,
        value: Option<Box<Expression>>,
    },
    Enum {
        #[serde(rename = "type")]
        ty: FullQualifiedName,
        members: Vec<String>,
        /// Members OR-ed together.
        value: i64,
    },
    TypeLiteral {
        #[serde(rename = "type")]
        ty: EdmType,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
        #[serde(rename = "type")]
        ty: Option<EdmType>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
        #[serde(rename = "type")]
        ty: Option<EdmType>,
    },
    In {
        left: Box<Expression>,
        list: Vec<Expression>,
    },
    Method {
        method: MethodKind,
        args: Vec<Expression>,
        #[serde(rename = "type")]
        ty: Option<EdmType>,
    },
}

impl Expression {
    /// Result type; `None` for `null`, type literals and untyped aliases.
    #[must_use]
    pub fn edm_type(&self) -> Option<EdmType> {
        match self {
            Self::Literal(l) => l.kind.map(EdmType::Primitive),
            Self::Member(m) => m.edm_type(),
            Self::Alias { value, .. } => value.as_ref().and_then(|v| v.edm_type()),
            Self::Enum { ty, .. } => Some(EdmType::Enum(ty.clone())),
            Self::TypeLiteral { .. } => None,
            Self::Unary { ty, .. } | Self::Binary { ty, .. } | Self::Method { ty, .. } => {
                ty.clone()
            }
            Self::In { .. } => Some(EdmType::Primitive(PrimitiveKind::Boolean)),
        }
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        match self {
            Self::Member(m) => m.is_collection(),
            Self::Alias { value, .. } => value.as_ref().is_some_and(|v| v.is_collection()),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        match self {
            Self::Literal(l) => l.is_null(),
            Self::Alias { value, .. } => value.as_ref().is_none_or(|v| v.is_null()),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_member(&self) -> Option<&Member> {
        match self {
            Self::Member(m) => Some(m),
            _ => None,
        }
    }

    /// Follows alias indirection.
    #[must_use]
    pub fn resolved(&self) -> &Self {
        match self {
            Self::Alias { value: Some(v), .. } => v.resolved(),
            _ => self,
        }
    }

    /// Every member path in the tree, including those inside lambdas.
    #[must_use]
    pub fn members(&self) -> Vec<&Member> {
        let mut out = Vec::new();
        collect_members(self, &mut out);
        out
    }

    /// Walks the tree bottom-up, handing child results to the parent callback.
    ///
    /// # Errors
    /// Propagates the first error returned by the visitor.
    pub fn accept<V: ExpressionVisitor>(&self, visitor: &mut V) -> Result<V::Output, V::Error> {
        match self {
            Self::Literal(l) => visitor.visit_literal(l),
            Self::Member(m) => visitor.visit_member(m),
            Self::Alias { name, value } => {
                let inner = value.as_ref().map(|v| v.accept(visitor)).transpose()?;
                visitor.visit_alias(name, inner)
            }
            Self::Enum { ty, members, value } => visitor.visit_enum(ty, members, *value),
            Self::TypeLiteral { ty } => visitor.visit_type_literal(ty),
            Self::Unary { op, operand, .. } => {
                let operand = operand.accept(visitor)?;
                visitor.visit_unary(*op, operand)
            }
            Self::Binary {
                op, left, right, ..
            } => {
                let l = left.accept(visitor)?;
                let r = right.accept(visitor)?;
                visitor.visit_binary(*op, l, r)
            }
            Self::In { left, list } => {
                let l = left.accept(visitor)?;
                let items = list
                    .iter()
                    .map(|e| e.accept(visitor))
                    .collect::<Result<Vec<_>, _>>()?;
                visitor.visit_in(l, items)
            }
            Self::Method { method, args, .. } => {
                let args = args
                    .iter()
                    .map(|e| e.accept(visitor))
                    .collect::<Result<Vec<_>, _>>()?;
                visitor.visit_method(*method, args)
            }
        }
    }
}

fn collect_members<'a>(expr: &'a Expression, out: &mut Vec<&'a Member>) {
    match expr {
        Expression::Member(m) => {
            out.push(m);
            for seg in &m.path {
                if let UriResource::Any {
                    expression: Some(e),
                    ..
                }
                | UriResource::All { expression: e, .. } = seg
                {
                    collect_members(e, out);
                }
            }
        }
        Expression::Alias { value: Some(v), .. } => collect_members(v, out),
        Expression::Unary { operand, .. } => collect_members(operand, out),
        Expression::Binary { left, right, .. } => {
            collect_members(left, out);
            collect_members(right, out);
        }
        Expression::In { left, list } => {
            collect_members(left, out);
            for e in list {
                collect_members(e, out);
            }
        }
        Expression::Method { args, .. } => {
            for e in args {
                collect_members(e, out);
            }
        }
        Expression::Literal(_)
        | Expression::Alias { value: None, .. }
        | Expression::Enum { .. }
        | Expression::TypeLiteral { .. } => {}
    }
}

/// Bottom-up visitor over [`Expression`]. Children are visited first and
/// their results passed to the parent's callback.
pub trait ExpressionVisitor {
    type Output;
    type Error;

    /// # Errors
    /// Visitor-defined.
    fn visit_literal(&mut self, literal: &Literal) -> Result<Self::Output, Self::Error>;
    /// # Errors
    /// Visitor-defined.
    fn visit_member(&mut self, member: &Member) -> Result<Self::Output, Self::Error>;
    /// # Errors
    /// Visitor-defined.
    fn visit_alias(
        &mut self,
        name: &str,
        value: Option<Self::Output>,
    ) -> Result<Self::Output, Self::Error>;
    /// # Errors
    /// Visitor-defined.
    fn visit_enum(
        &mut self,
        ty: &FullQualifiedName,
        members: &[String],
        value: i64,
    ) -> Result<Self::Output, Self::Error>;
    /// # Errors
    /// Visitor-defined.
    fn visit_type_literal(&mut self, ty: &EdmType) -> Result<Self::Output, Self::Error>;
    /// # Errors
    /// Visitor-defined.
    fn visit_unary(
        &mut self,
        op: UnaryOperator,
        operand: Self::Output,
    ) -> Result<Self::Output, Self::Error>;
    /// # Errors
    /// Visitor-defined.
    fn visit_binary(
        &mut self,
        op: BinaryOperator,
        left: Self::Output,
        right: Self::Output,
    ) -> Result<Self::Output, Self::Error>;
    /// # Errors
    /// Visitor-defined.
    fn visit_in(
        &mut self,
        left: Self::Output,
        list: Vec<Self::Output>,
    ) -> Result<Self::Output, Self::Error>;
    /// # Errors
    /// Visitor-defined.
    fn visit_method(
        &mut self,
        method: MethodKind,
        args: Vec<Self::Output>,
    ) -> Result<Self::Output, Self::Error>;
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::convert::Infallible;

    /// Renders the tree back to a compact prefix form.
    struct Printer;

    impl ExpressionVisitor for Printer {
        type Output = String;
        type Error = Infallible;

        fn visit_literal(&mut self, literal: &Literal) -> Result<String, Infallible> {
            Ok(literal.text.clone())
        }
        fn visit_member(&mut self, member: &Member) -> Result<String, Infallible> {
            Ok(member.path_string())
        }
        fn visit_alias(&mut self, name: &str, value: Option<String>) -> Result<String, Infallible> {
            Ok(value.unwrap_or_else(|| name.to_owned()))
        }
        fn visit_enum(
            &mut self,
            ty: &FullQualifiedName,
            members: &[String],
            _value: i64,
        ) -> Result<String, Infallible> {
            Ok(format!("{ty}'{}'", members.join(",")))
        }
        fn visit_type_literal(&mut self, ty: &EdmType) -> Result<String, Infallible> {
            Ok(ty.to_string())
        }
        fn visit_unary(&mut self, op: UnaryOperator, operand: String) -> Result<String, Infallible> {
            Ok(format!("({op:?} {operand})"))
        }
        fn visit_binary(
            &mut self,
            op: BinaryOperator,
            left: String,
            right: String,
        ) -> Result<String, Infallible> {
            Ok(format!("({} {left} {right})", op.as_str()))
        }
        fn visit_in(&mut self, left: String, list: Vec<String>) -> Result<String, Infallible> {
            Ok(format!("(in {left} [{}])", list.join(",")))
        }
        fn visit_method(
            &mut self,
            method: MethodKind,
            args: Vec<String>,
        ) -> Result<String, Infallible> {
            Ok(format!("{}({})", method.name(), args.join(",")))
        }
    }

    fn member(name: &str) -> Expression {
        Expression::Member(Member {
            start: MemberStart::It,
            type_filter: None,
            path: vec![UriResource::PrimitiveProperty {
                name: name.to_owned(),
                ty: EdmType::Primitive(PrimitiveKind::String),
                collection: false,
            }],
        })
    }

    #[test]
    fn visitor_sees_children_first() {
        let expr = Expression::Binary {
            op: BinaryOperator::And,
            left: Box::new(Expression::Method {
                method: MethodKind::Contains,
                args: vec![member("Name"), Expression::Literal(Literal::string("x"))],
                ty: Some(EdmType::Primitive(PrimitiveKind::Boolean)),
            }),
            right: Box::new(Expression::In {
                left: Box::new(member("Status")),
                list: vec![Expression::Literal(Literal::string("a"))],
            }),
            ty: Some(EdmType::Primitive(PrimitiveKind::Boolean)),
        };
        let out = expr.accept(&mut Printer).unwrap();
        assert_eq!(out, "(and contains(Name,'x') (in Status ['a']))");
        assert_eq!(expr.members().len(), 2);
    }

    #[test]
    fn undefined_alias_is_null() {
        let alias = Expression::Alias {
            name: "p".to_owned(),
            value: None,
        };
        assert!(alias.is_null());
        assert!(alias.edm_type().is_none());
    }
}
