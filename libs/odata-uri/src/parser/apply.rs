//! `$apply` transformations.
//!
//! Each alias introduced by `aggregate`, `compute` or a `groupby` nested
//! aggregate becomes a dynamic property of the context type, visible to the
//! following transformations and to `$filter`, `$orderby` and `$select`.

use odata_edm::{EdmType, FullQualifiedName, PrimitiveKind};

use crate::apply::{
    AggregateExpression, ApplyItem, ApplyOption, BottomTop, BottomTopMethod, Compute, GroupBy,
    GroupByItem, StandardMethod,
};
use crate::error::{SemanticKey, UriError, UriResult};
use crate::expression::{Expression, Member};
use crate::parser::context::Scope;
use crate::parser::expand::{self, ExpandPath};
use crate::parser::expression::ExpressionParser;
use crate::parser::helper::{self, expect, lookahead};
use crate::parser::search;
use crate::query_options::{ExpandItem, ExpandOption};
use crate::resource::UriResource;
use crate::tokenizer::{TokenKind, Tokenizer};

/// # Errors
/// Syntax errors, unknown names, alias clashes and type mismatches.
pub fn parse(p: &mut ExpressionParser<'_>, tok: &mut Tokenizer<'_>) -> UriResult<ApplyOption> {
    let mut items = Vec::new();
    loop {
        tok.skip_ws();
        items.push(transformation(p, tok)?);
        tok.skip_ws();
        if !tok.next(TokenKind::Slash) {
            return Ok(ApplyOption { items });
        }
    }
}

fn transformation(p: &mut ExpressionParser<'_>, tok: &mut Tokenizer<'_>) -> UriResult<ApplyItem> {
    if tok.next(TokenKind::Call("aggregate")) {
        return aggregate(p, tok);
    }
    if tok.next(TokenKind::Keyword("identity")) {
        return Ok(ApplyItem::Identity);
    }
    if tok.next(TokenKind::Call("compute")) {
        return compute(p, tok);
    }
    if tok.next(TokenKind::Call("concat")) {
        return concat(p, tok);
    }
    if tok.next(TokenKind::Call("expand")) {
        return Ok(ApplyItem::Expand {
            item: expand_item(p, tok)?,
        });
    }
    if tok.next(TokenKind::Call("filter")) {
        tok.skip_ws();
        let expression = p.parse_boolean(tok)?;
        close(tok)?;
        return Ok(ApplyItem::Filter { expression });
    }
    if tok.next(TokenKind::Call("groupby")) {
        return group_by(p, tok);
    }
    if tok.next(TokenKind::Call("search")) {
        let expression = search::parse(tok)?;
        close(tok)?;
        return Ok(ApplyItem::Search { expression });
    }
    for (name, method) in BottomTopMethod::ALL {
        if tok.next(TokenKind::Call(name)) {
            return bottom_top(p, tok, method);
        }
    }
    if tok.next(TokenKind::QualifiedName) {
        let name = tok.text();
        return custom_function(p, tok, name);
    }
    Err(tok.error("expected a $apply transformation"))
}

fn close(tok: &mut Tokenizer<'_>) -> UriResult<()> {
    tok.skip_ws();
    expect(tok, TokenKind::Close, "')'")
}

fn is_numeric(p: &ExpressionParser<'_>, ty: Option<&EdmType>) -> bool {
    ty.is_none_or(|t| {
        p.edm()
            .underlying_primitive(t)
            .is_some_and(PrimitiveKind::is_numeric)
    })
}

/// Registers an alias as a dynamic property.
fn add_alias(p: &mut ExpressionParser<'_>, alias: &str, ty: Option<EdmType>) -> UriResult<()> {
    let edm = p.edm();
    let declared = p.context_type().is_some_and(|owner| {
        edm.property(owner, alias).is_some() || edm.navigation_property(owner, alias).is_some()
    });
    if declared || p.scope().dynamic_property(alias).is_some() {
        return Err(UriError::semantic(
            SemanticKey::IsProperty,
            format!("alias '{alias}' is already a property"),
        ));
    }
    p.scope_mut().add_dynamic(alias.to_owned(), ty);
    Ok(())
}

fn alias(tok: &mut Tokenizer<'_>) -> UriResult<String> {
    expect(tok, TokenKind::As, "'as'")?;
    expect(tok, TokenKind::Identifier, "alias")?;
    Ok(tok.text().to_owned())
}

/* ---------- aggregate ---------- */

fn aggregate(p: &mut ExpressionParser<'_>, tok: &mut Tokenizer<'_>) -> UriResult<ApplyItem> {
    let mut expressions = Vec::new();
    loop {
        tok.skip_ws();
        let expression = aggregate_expression(p, tok)?;
        register(p, &expression)?;
        expressions.push(expression);
        tok.skip_ws();
        if !tok.next(TokenKind::Comma) {
            break;
        }
    }
    close(tok)?;
    Ok(ApplyItem::Aggregate { expressions })
}

fn register(p: &mut ExpressionParser<'_>, expression: &AggregateExpression) -> UriResult<()> {
    if let Some(inline) = &expression.inline {
        return register(p, inline);
    }
    match (&expression.alias, &expression.custom_aggregate) {
        (Some(alias), _) | (None, Some(alias)) => add_alias(p, alias, expression.ty.clone()),
        (None, None) => Ok(()),
    }
}

fn aggregate_expression(
    p: &mut ExpressionParser<'_>,
    tok: &mut Tokenizer<'_>,
) -> UriResult<AggregateExpression> {
    if tok.next(TokenKind::Keyword("$count")) {
        return Ok(AggregateExpression {
            count: true,
            alias: Some(alias(tok)?),
            ty: Some(EdmType::Primitive(PrimitiveKind::Int64)),
            ..AggregateExpression::default()
        });
    }
    if let Some(out) = inline_or_custom(p, tok)? {
        return Ok(out);
    }

    let expression = p.parse(tok)?;
    if let Some(member) = expression.as_member()
        && matches!(member.path.last(), Some(UriResource::Count))
    {
        let mut path = member.path.clone();
        path.pop();
        return Ok(AggregateExpression {
            path,
            count: true,
            alias: Some(alias(tok)?),
            ty: Some(EdmType::Primitive(PrimitiveKind::Int64)),
            ..AggregateExpression::default()
        });
    }

    let mut out = AggregateExpression::default();
    with_method(p, tok, &mut out, expression.edm_type())?;
    out.expression = Some(expression);
    while tok.next(TokenKind::From) {
        let grouping = p.parse(tok)?;
        if grouping.as_member().is_none() {
            return Err(tok.error("expected a property path after 'from'"));
        }
        let mut from = AggregateExpression::default();
        with_method(p, tok, &mut from, out.ty.clone())?;
        from.expression = Some(grouping);
        out.from.push(from);
    }
    out.alias = Some(alias(tok)?);
    Ok(out)
}

/// `with method`, setting the method and the result type.
fn with_method(
    p: &ExpressionParser<'_>,
    tok: &mut Tokenizer<'_>,
    out: &mut AggregateExpression,
    input: Option<EdmType>,
) -> UriResult<()> {
    expect(tok, TokenKind::With, "'with'")?;
    if tok.next(TokenKind::QualifiedName) {
        let name = tok.text();
        out.custom_method =
            Some(FullQualifiedName::parse(name).ok_or_else(|| tok.error("invalid name"))?);
        return Ok(());
    }
    expect(tok, TokenKind::Identifier, "aggregation method")?;
    let name = tok.text();
    let method = StandardMethod::parse(name).ok_or_else(|| {
        UriError::semantic(
            SemanticKey::FunctionNotFound,
            format!("unknown aggregation method '{name}'"),
        )
    })?;
    if matches!(method, StandardMethod::Sum | StandardMethod::Average)
        && !is_numeric(p, input.as_ref())
    {
        return Err(UriError::type_mismatch(format!(
            "'{name}' needs a numeric value"
        )));
    }
    out.ty = match method {
        StandardMethod::Sum | StandardMethod::Average | StandardMethod::CountDistinct => {
            Some(EdmType::Primitive(PrimitiveKind::Decimal))
        }
        StandardMethod::Min | StandardMethod::Max => input,
    };
    out.standard_method = Some(method);
    Ok(())
}

/// `Nav(aggregate)` or a custom aggregate name. Leaves the tokenizer
/// untouched when neither applies.
fn inline_or_custom(
    p: &mut ExpressionParser<'_>,
    tok: &mut Tokenizer<'_>,
) -> UriResult<Option<AggregateExpression>> {
    let pos = tok.position();
    if !tok.next(TokenKind::Identifier) {
        return Ok(None);
    }
    let name = tok.text();
    let Some(owner) = p.context_type().cloned() else {
        tok.reset(pos);
        return Ok(None);
    };
    let edm = p.edm();

    if let Some(navigation) = edm.navigation_property(&owner, name)
        && tok.next(TokenKind::Open)
    {
        let mut nested = p.nested(Scope::for_type(
            EdmType::Entity(navigation.target.clone()),
            false,
        ));
        nested.check_depth()?;
        tok.skip_ws();
        let inner = aggregate_expression(&mut nested, tok)?;
        close(tok)?;
        return Ok(Some(AggregateExpression {
            path: vec![UriResource::Navigation {
                name: navigation.name.clone(),
                target: navigation.target.clone(),
                collection: navigation.collection,
                keys: Vec::new(),
                type_filter: None,
            }],
            inline: Some(Box::new(inner)),
            ..AggregateExpression::default()
        }));
    }

    let known = edm.property(&owner, name).is_some()
        || edm.navigation_property(&owner, name).is_some()
        || p.scope().dynamic_property(name).is_some()
        || p.scope().lambda_variable(name).is_some();
    let after = tok.position();
    let has_alias = lookahead(tok, TokenKind::As);
    tok.skip_ws();
    let ends =
        has_alias || lookahead(tok, TokenKind::Comma) || lookahead(tok, TokenKind::Close);
    if known || !ends {
        tok.reset(pos);
        return Ok(None);
    }
    tok.reset(after);
    let mut out = AggregateExpression {
        custom_aggregate: Some(name.to_owned()),
        ..AggregateExpression::default()
    };
    if has_alias {
        out.alias = Some(alias(tok)?);
    }
    Ok(Some(out))
}

/* ---------- compute, concat, expand ---------- */

fn compute(p: &mut ExpressionParser<'_>, tok: &mut Tokenizer<'_>) -> UriResult<ApplyItem> {
    let mut items = Vec::new();
    loop {
        tok.skip_ws();
        let expression = p.parse(tok)?;
        let alias = alias(tok)?;
        add_alias(p, &alias, expression.edm_type())?;
        items.push(Compute { expression, alias });
        tok.skip_ws();
        if !tok.next(TokenKind::Comma) {
            break;
        }
    }
    close(tok)?;
    Ok(ApplyItem::Compute { items })
}

/// Branches run on copies of the scope; their aliases are merged afterwards.
fn concat(p: &mut ExpressionParser<'_>, tok: &mut Tokenizer<'_>) -> UriResult<ApplyItem> {
    let mut branches = Vec::new();
    let mut dynamic = Vec::new();
    loop {
        let mut branch = p.nested(p.scope().clone());
        branch.check_depth()?;
        branches.push(parse(&mut branch, tok)?);
        dynamic.extend(branch.scope().dynamic.iter().cloned());
        tok.skip_ws();
        if !tok.next(TokenKind::Comma) {
            break;
        }
    }
    close(tok)?;
    if branches.len() < 2 {
        return Err(UriError::syntax(
            crate::error::SyntaxKey::Syntax,
            "concat needs at least two branches",
        ));
    }
    for d in dynamic {
        p.scope_mut().add_dynamic(d.name, d.ty);
    }
    Ok(ApplyItem::Concat { branches })
}

/// `expand(Nav, filter(...), expand(...))` through the closing parenthesis.
fn expand_item(p: &ExpressionParser<'_>, tok: &mut Tokenizer<'_>) -> UriResult<ExpandItem> {
    let owner = p.context_type().cloned().ok_or_else(|| {
        UriError::semantic(SemanticKey::PropertyNotFound, "expand needs a structured type")
    })?;
    tok.skip_ws();
    let ExpandPath { path, target, .. } = expand::parse_item_path(p, tok, &owner)?;
    let mut item = ExpandItem {
        path,
        ..ExpandItem::default()
    };
    let mut nested = p.nested(Scope::for_type(EdmType::Entity(target), false));
    nested.check_depth()?;
    loop {
        tok.skip_ws();
        if !tok.next(TokenKind::Comma) {
            break;
        }
        tok.skip_ws();
        if tok.next(TokenKind::Call("filter")) {
            if item.options.filter.is_some() {
                return Err(tok.error("filter given twice in expand"));
            }
            tok.skip_ws();
            item.options.filter = Some(nested.parse_boolean(tok)?);
            close(tok)?;
        } else if tok.next(TokenKind::Call("expand")) {
            let inner = expand_item(&nested, tok)?;
            item.options
                .expand
                .get_or_insert_with(ExpandOption::default)
                .items
                .push(inner);
        } else {
            return Err(tok.error("expected filter(...) or expand(...)"));
        }
    }
    close(tok)?;
    Ok(item)
}

/* ---------- groupby ---------- */

fn group_by(p: &mut ExpressionParser<'_>, tok: &mut Tokenizer<'_>) -> UriResult<ApplyItem> {
    tok.skip_ws();
    expect(tok, TokenKind::Open, "'(' before grouping properties")?;
    let mut items = Vec::new();
    loop {
        tok.skip_ws();
        if tok.next(TokenKind::Call("rollup")) {
            items.push(rollup(p, tok)?);
        } else {
            items.push(GroupByItem {
                path: Some(grouping_path(p, tok)?),
                rollup_all: false,
                rollup: Vec::new(),
            });
        }
        tok.skip_ws();
        if !tok.next(TokenKind::Comma) {
            break;
        }
    }
    close(tok)?;

    tok.skip_ws();
    let apply = if tok.next(TokenKind::Comma) {
        tok.skip_ws();
        Some(parse(p, tok)?)
    } else {
        None
    };
    close(tok)?;
    Ok(ApplyItem::GroupBy(GroupBy { items, apply }))
}

fn rollup(p: &mut ExpressionParser<'_>, tok: &mut Tokenizer<'_>) -> UriResult<GroupByItem> {
    let mut item = GroupByItem {
        path: None,
        rollup_all: false,
        rollup: Vec::new(),
    };
    tok.skip_ws();
    if tok.next(TokenKind::Keyword("$all")) {
        item.rollup_all = true;
    } else {
        item.rollup.push(leaf(grouping_path(p, tok)?));
    }
    loop {
        tok.skip_ws();
        if !tok.next(TokenKind::Comma) {
            break;
        }
        tok.skip_ws();
        item.rollup.push(leaf(grouping_path(p, tok)?));
    }
    close(tok)?;
    if item.rollup.is_empty() {
        return Err(tok.error("rollup needs at least one property"));
    }
    Ok(item)
}

fn leaf(path: Member) -> GroupByItem {
    GroupByItem {
        path: Some(path),
        rollup_all: false,
        rollup: Vec::new(),
    }
}

fn grouping_path(p: &mut ExpressionParser<'_>, tok: &mut Tokenizer<'_>) -> UriResult<Member> {
    match p.parse(tok)? {
        Expression::Member(member) if !member.is_collection() => Ok(member),
        Expression::Member(_) => Err(UriError::type_mismatch(
            "cannot group by a collection-valued path",
        )),
        _ => Err(tok.error("expected a property path")),
    }
}

/* ---------- bottom/top, custom functions ---------- */

fn bottom_top(
    p: &mut ExpressionParser<'_>,
    tok: &mut Tokenizer<'_>,
    method: BottomTopMethod,
) -> UriResult<ApplyItem> {
    tok.skip_ws();
    let number = p.parse(tok)?;
    let integral = number
        .edm_type()
        .and_then(|t| t.primitive())
        .is_some_and(PrimitiveKind::is_integral);
    let valid = match method {
        BottomTopMethod::TopCount | BottomTopMethod::BottomCount => integral,
        _ => is_numeric(p, number.edm_type().as_ref()) && !number.is_null(),
    };
    if !valid {
        return Err(UriError::type_mismatch(
            "first argument must be a number of the right kind",
        ));
    }
    tok.skip_ws();
    expect(tok, TokenKind::Comma, "','")?;
    tok.skip_ws();
    let value = p.parse(tok)?;
    if !is_numeric(p, value.edm_type().as_ref()) || value.is_collection() {
        return Err(UriError::type_mismatch("second argument must be numeric"));
    }
    close(tok)?;
    Ok(ApplyItem::BottomTop(BottomTop {
        method,
        number,
        value,
    }))
}

fn custom_function(
    p: &mut ExpressionParser<'_>,
    tok: &mut Tokenizer<'_>,
    name: &str,
) -> UriResult<ApplyItem> {
    let fqn = FullQualifiedName::parse(name).ok_or_else(|| tok.error("invalid name"))?;
    let binding = p.context_type().cloned().ok_or_else(|| {
        UriError::semantic(SemanticKey::FunctionNotFound, "no collection to bind to")
    })?;
    expect(tok, TokenKind::Open, "'('")?;
    let parameters = p.function_parameters(tok)?;
    let edm = p.edm();
    let names: Vec<&str> = parameters.iter().map(|x| x.name.as_str()).collect();
    let function = edm
        .bound_function(&fqn, &binding, true, &names)
        .ok_or_else(|| helper::operation_not_found(edm, &fqn, &names))?;
    helper::check_parameters(edm, function, &parameters)?;
    Ok(ApplyItem::CustomFunction {
        function: function.fqn.clone(),
        parameters,
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use odata_edm::Edm;

    fn edm() -> Edm {
        Edm::from_json(include_str!("../../../../testdata/demo/edm.json")).unwrap()
    }

    fn order_scope() -> Scope {
        Scope::for_type(
            EdmType::Entity(FullQualifiedName::new("Demo", "Order")),
            false,
        )
    }

    fn apply(edm: &Edm, scope: Scope, text: &str) -> UriResult<(ApplyOption, Scope)> {
        let aliases = BTreeMap::new();
        let mut p = ExpressionParser::new(edm, &aliases, scope);
        let mut tok = Tokenizer::new(text);
        let option = parse(&mut p, &mut tok)?;
        helper::require_end(&mut tok)?;
        Ok((option, p.scope().clone()))
    }

    #[test]
    fn aggregate_types_and_aliases() {
        let edm = edm();
        let (option, scope) = apply(
            &edm,
            order_scope(),
            "aggregate(Amount with sum as Total, Quantity with max as Most, $count as N)",
        )
        .unwrap();
        let ApplyItem::Aggregate { expressions } = &option.items[0] else {
            panic!("expected aggregate");
        };
        assert_eq!(expressions.len(), 3);
        assert_eq!(
            scope.dynamic_property("Total").unwrap().ty,
            Some(EdmType::Primitive(PrimitiveKind::Decimal))
        );
        assert_eq!(
            scope.dynamic_property("Most").unwrap().ty,
            Some(EdmType::Primitive(PrimitiveKind::Int32))
        );
        assert!(expressions[2].count);
    }

    #[test]
    fn sum_needs_numbers_and_alias_must_be_new() {
        let edm = edm();
        let err = apply(&edm, order_scope(), "aggregate(Status with sum as S)").unwrap_err();
        assert_eq!(err.semantic_key(), Some(SemanticKey::TypeMismatch));
        let err = apply(&edm, order_scope(), "aggregate(Amount with sum as Quantity)").unwrap_err();
        assert_eq!(err.semantic_key(), Some(SemanticKey::IsProperty));
    }

    #[test]
    fn groupby_with_nested_aggregate_feeds_filter() {
        let edm = edm();
        let (option, _) = apply(
            &edm,
            order_scope(),
            "groupby((Status,Customer/Name),aggregate(Amount with sum as Total))/filter(Total gt 100)",
        )
        .unwrap();
        let ApplyItem::GroupBy(group) = &option.items[0] else {
            panic!("expected groupby");
        };
        assert_eq!(group.items.len(), 2);
        assert_eq!(
            group.items[1].path.as_ref().unwrap().path_string(),
            "Customer/Name"
        );
        assert!(matches!(option.items[1], ApplyItem::Filter { .. }));
    }

    #[test]
    fn rollup_and_count_paths() {
        let edm = edm();
        let person = Scope::for_type(
            EdmType::Entity(FullQualifiedName::new("Demo", "Person")),
            false,
        );
        let (option, _) = apply(
            &edm,
            person.clone(),
            "groupby((rollup($all,HomeAddress/City)),aggregate(Orders/$count as OrderCount))",
        )
        .unwrap();
        let ApplyItem::GroupBy(group) = &option.items[0] else {
            panic!("expected groupby");
        };
        assert!(group.items[0].rollup_all);
        let Some(ApplyItem::Aggregate { expressions }) =
            group.apply.as_ref().map(|a| &a.items[0])
        else {
            panic!("expected nested aggregate");
        };
        assert!(expressions[0].count);
        assert_eq!(expressions[0].path.len(), 1);

        let (option, _) =
            apply(&edm, person, "aggregate(Orders(Amount with sum as Spent))").unwrap();
        let ApplyItem::Aggregate { expressions } = &option.items[0] else {
            panic!("expected aggregate");
        };
        assert!(expressions[0].inline.is_some());
    }

    #[test]
    fn compute_concat_and_top() {
        let edm = edm();
        let (option, scope) = apply(
            &edm,
            order_scope(),
            "compute(Amount mul 2 as Double)/concat(topcount(2,Amount),aggregate(Amount with average as Avg))",
        )
        .unwrap();
        assert_eq!(option.items.len(), 2);
        assert!(scope.dynamic_property("Double").is_some());
        assert!(scope.dynamic_property("Avg").is_some());

        assert!(apply(&edm, order_scope(), "concat(identity)").is_err());
        assert!(apply(&edm, order_scope(), "topcount(1.5,Amount)").is_err());
    }

    #[test]
    fn expand_filter_and_search() {
        let edm = edm();
        let (option, _) = apply(
            &edm,
            order_scope(),
            "expand(Items,filter(Price gt 5))/search(blue)/identity",
        )
        .unwrap();
        let ApplyItem::Expand { item } = &option.items[0] else {
            panic!("expected expand");
        };
        assert!(item.options.filter.is_some());
        assert!(matches!(option.items[2], ApplyItem::Identity));
    }

    #[test]
    fn custom_aggregates_and_unknown_transformations() {
        let edm = edm();
        let (option, scope) = apply(&edm, order_scope(), "aggregate(Forecast)").unwrap();
        let ApplyItem::Aggregate { expressions } = &option.items[0] else {
            panic!("expected aggregate");
        };
        assert_eq!(expressions[0].custom_aggregate.as_deref(), Some("Forecast"));
        assert!(scope.dynamic_property("Forecast").is_some());
        assert!(apply(&edm, order_scope(), "pivot(Amount)").is_err());
    }
}
