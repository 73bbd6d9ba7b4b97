//! `$apply` as a pipeline of nested `SELECT ... FROM (previous) AS aN`
//! levels.
//!
//! A level starts unprojected: filters can still be added to it.
//! Transformations that produce new columns (`compute`, `aggregate`,
//! `groupby`) project it, and the next transformation wraps it into a
//! derived table whose columns are addressed by label.
//!
//! Related rows never join into a level. Aggregates over them are
//! correlated per entity and combined one level up.

use odata_edm::EdmType;
use odata_uri::apply::{
    AggregateExpression, ApplyItem, ApplyOption, BottomTop, BottomTopMethod, GroupBy,
    StandardMethod,
};
use odata_uri::{Expression, Literal, LiteralValue, Member, MemberStart, QueryOptions, UriResource};
use sea_orm::sea_query::{
    Alias, ConditionalStatement, Expr, Order, OrderedStatement, Query, SelectStatement, SimpleExpr,
    SubQueryStatement, UnionType,
};
use tracing::debug;

use crate::config::Page;
use crate::error::{QueryError, QueryResult};
use crate::filter::{DerivedColumn, FilterCompiler, Scope};
use crate::mapping::EntityMeta;
use crate::navigation::{NavigationInfo, col, correlate, discriminator, link_back};
use crate::query::{QueryContext, SelectQuery, resource_source};
use crate::row::OutputColumn;

/// The final statement of a pipeline and its count.
#[derive(Debug, Clone)]
pub struct ApplyQuery {
    pub query: SelectQuery,
    /// `SELECT COUNT(*)` over the result before paging.
    pub count: SelectStatement,
}

#[derive(Debug, Clone)]
enum Source<'a> {
    Entity { meta: &'a EntityMeta, alias: String },
    Derived { alias: String, columns: Vec<DerivedColumn> },
}

#[derive(Clone)]
struct Pipeline<'a> {
    ctx: &'a QueryContext<'a>,
    stmt: SelectStatement,
    source: Source<'a>,
    /// Columns the statement selects once projected.
    projected: Option<Vec<DerivedColumn>>,
    next: usize,
}

/// One aggregate of a per-entity level.
enum Combined {
    /// `template` over partial columns computed for each entity.
    Partials {
        template: &'static str,
        labels: Vec<String>,
    },
    /// Distinct related values cannot be merged from per-entity partials;
    /// `sub` counts them over the related rows of every entity in the
    /// group. `link` must match one of the `sources` of those entities.
    Distinct {
        sub: SelectStatement,
        link: Vec<SimpleExpr>,
        sources: Vec<String>,
    },
}

/// A sum of counts is a count, also over no rows.
const SUM_OF_COUNTS: &str = "CAST(COALESCE(SUM({0}), 0) AS BIGINT)";
const AVERAGE_OF_PARTIALS: &str = "CAST(SUM({0}) AS DOUBLE PRECISION) / NULLIF(SUM({1}), 0)";

fn column(label: &str, ty: Option<EdmType>, ctx: &QueryContext<'_>) -> DerivedColumn {
    DerivedColumn {
        label: label.to_owned(),
        kind: ty.as_ref().and_then(|t| ctx.edm.underlying_primitive(t)),
        ty,
    }
}

fn hidden(label: &str) -> DerivedColumn {
    DerivedColumn {
        label: label.to_owned(),
        kind: None,
        ty: None,
    }
}

fn scalar(select: SelectStatement) -> SimpleExpr {
    SimpleExpr::SubQuery(None, Box::new(SubQueryStatement::SelectStatement(select)))
}

fn it_member(path: Vec<UriResource>) -> Expression {
    Expression::Member(Member {
        start: MemberStart::It,
        type_filter: None,
        path,
    })
}

/// Aggregates over related rows. Joining those rows in would repeat every
/// entity once per related row.
fn per_entity(agg: &AggregateExpression) -> bool {
    agg.inline.is_some() || (agg.count && !agg.path.is_empty())
}

fn supported(agg: &AggregateExpression) -> QueryResult<()> {
    if !agg.from.is_empty() {
        return Err(QueryError::not_implemented("aggregate with 'from'"));
    }
    if let Some(name) = &agg.custom_aggregate {
        return Err(QueryError::not_implemented(format!(
            "custom aggregate '{name}'"
        )));
    }
    if let Some(method) = &agg.custom_method {
        return Err(QueryError::not_implemented(format!(
            "custom aggregation method '{method}'"
        )));
    }
    Ok(())
}

fn label(agg: &AggregateExpression) -> QueryResult<&str> {
    agg.alias
        .as_deref()
        .ok_or_else(|| QueryError::invalid("aggregate without an alias"))
}

fn value_and_method(agg: &AggregateExpression) -> QueryResult<(&Expression, StandardMethod)> {
    let expression = agg
        .expression
        .as_ref()
        .ok_or_else(|| QueryError::invalid("aggregate without a value"))?;
    let method = agg
        .standard_method
        .ok_or_else(|| QueryError::invalid("aggregate without a method"))?;
    Ok((expression, method))
}

fn method_template(method: StandardMethod) -> &'static str {
    match method {
        StandardMethod::Sum => "SUM({0})",
        StandardMethod::Min => "MIN({0})",
        StandardMethod::Max => "MAX({0})",
        StandardMethod::Average => "AVG({0})",
        StandardMethod::CountDistinct => "COUNT(DISTINCT {0})",
    }
}

/// `b.label = a.label`, with two nulls in the same group.
fn same_group(inner: &str, outer: &str, label: &str) -> SimpleExpr {
    let peer = || Expr::col((Alias::new(inner), Alias::new(label)));
    peer()
        .equals((Alias::new(outer), Alias::new(label)))
        .or(peer().is_null().and(col(outer, label).is_null()))
}

impl<'a> Pipeline<'a> {
    fn new(ctx: &'a QueryContext<'a>, stmt: SelectStatement, meta: &'a EntityMeta, alias: String) -> Self {
        Self {
            ctx,
            stmt,
            source: Source::Entity { meta, alias },
            projected: None,
            next: 0,
        }
    }

    fn fresh(&mut self, prefix: &str) -> String {
        let name = format!("{prefix}{}", self.next);
        self.next += 1;
        name
    }

    fn scope(&self) -> Scope<'a> {
        match &self.source {
            Source::Entity { meta, alias } => Scope::entity(alias, *meta),
            Source::Derived { alias, columns } => Scope::derived(alias, columns.clone()),
        }
    }

    fn compiler(&mut self) -> FilterCompiler<'a> {
        let prefix = self.fresh("x");
        FilterCompiler::new(self.ctx, self.scope(), &format!("{prefix}_"))
    }

    /// Columns of the current source, as they would be selected unchanged.
    fn source_columns(&self) -> Vec<(SimpleExpr, DerivedColumn)> {
        match &self.source {
            Source::Entity { meta, alias } => meta
                .attributes
                .iter()
                .filter(|a| self.ctx.is_visible(&a.groups))
                .map(|a| {
                    (
                        col(alias, &a.column).into(),
                        DerivedColumn {
                            label: a.path.clone(),
                            kind: Some(a.kind),
                            ty: Some(a.ty.clone()),
                        },
                    )
                })
                .collect(),
            Source::Derived { alias, columns } => columns
                .iter()
                .map(|c| (col(alias, &c.label).into(), c.clone()))
                .collect(),
        }
    }

    fn project(&mut self, columns: Vec<(SimpleExpr, DerivedColumn)>) {
        let mut out = Vec::with_capacity(columns.len());
        for (e, c) in columns {
            self.stmt.expr_as(e, Alias::new(&c.label));
            out.push(c);
        }
        self.projected = Some(out);
    }

    fn ensure_projection(&mut self) {
        if self.projected.is_none() {
            let columns = self.source_columns();
            self.project(columns);
        }
    }

    /// Turns the current level into the derived table of a new level and
    /// returns its alias.
    fn wrap(&mut self) -> String {
        self.ensure_projection();
        let columns = self.projected.take().unwrap_or_default();
        let alias = self.fresh("a");
        let inner = std::mem::replace(&mut self.stmt, Query::select());
        self.stmt.from_subquery(inner, Alias::new(&alias));
        self.source = Source::Derived {
            alias: alias.clone(),
            columns,
        };
        alias
    }

    /// Unprojected level to add conditions or columns to.
    fn open(&mut self) {
        if self.projected.is_some() {
            self.wrap();
        }
    }

    fn run(&mut self, apply: &ApplyOption) -> QueryResult<()> {
        for item in &apply.items {
            self.transform(item)?;
        }
        Ok(())
    }

    fn transform(&mut self, item: &ApplyItem) -> QueryResult<()> {
        match item {
            ApplyItem::Filter { expression } => self.filter(expression),
            ApplyItem::Search { expression } => {
                self.open();
                let cond = self.compiler().search(expression)?;
                self.stmt.and_where(cond);
                Ok(())
            }
            ApplyItem::Compute { items } => {
                self.open();
                let mut columns = self.source_columns();
                let mut compiler = self.compiler();
                for c in items {
                    let e = compiler.compile(&c.expression)?;
                    columns.push((e, column(&c.alias, c.expression.edm_type(), self.ctx)));
                }
                self.project(columns);
                Ok(())
            }
            ApplyItem::Aggregate { expressions } => self.aggregate_level(&[], expressions),
            ApplyItem::GroupBy(group) => self.group_by(group),
            ApplyItem::BottomTop(bt) => self.bottom_top(bt),
            ApplyItem::Concat { branches } => self.concat(branches),
            ApplyItem::Identity => Ok(()),
            ApplyItem::Expand { .. } => Err(QueryError::not_implemented("expand in $apply")),
            ApplyItem::CustomFunction { function, .. } => Err(QueryError::not_implemented(
                format!("custom function '{function}' in $apply"),
            )),
        }
    }

    fn filter(&mut self, expression: &Expression) -> QueryResult<()> {
        self.open();
        let cond = self.compiler().compile(expression)?;
        self.stmt.and_where(cond);
        Ok(())
    }

    fn group_column(&mut self, member: &Member) -> QueryResult<(SimpleExpr, DerivedColumn)> {
        let value = self.compiler().operand(&Expression::Member(member.clone()))?;
        let kind = value.kind();
        let mut c = column(&member.path_string(), member.edm_type(), self.ctx);
        if c.kind.is_none() {
            c.kind = kind;
        }
        Ok((value.into_expr()?, c))
    }

    /// `aggregate` or `groupby` with its nested aggregate.
    fn aggregate_level(
        &mut self,
        group: &[&Member],
        expressions: &[AggregateExpression],
    ) -> QueryResult<()> {
        self.open();
        if expressions.iter().any(per_entity) {
            return self.per_entity_level(group, expressions);
        }
        let mut columns = Vec::new();
        for m in group {
            columns.push(self.group_column(m)?);
        }
        let groups: Vec<SimpleExpr> = columns.iter().map(|(e, _)| e.clone()).collect();
        for agg in expressions {
            columns.push(self.aggregate(agg)?);
        }
        if !groups.is_empty() {
            self.stmt.add_group_by(groups);
        }
        self.project(columns);
        Ok(())
    }

    /// An aggregate over the rows of the current level.
    fn aggregate(&mut self, agg: &AggregateExpression) -> QueryResult<(SimpleExpr, DerivedColumn)> {
        supported(agg)?;
        let mut c = column(label(agg)?, agg.ty.clone(), self.ctx);
        if agg.count {
            return Ok((Expr::cust("COUNT(*)"), c));
        }
        let (expression, method) = value_and_method(agg)?;
        let value = self.compiler().operand(expression)?;
        if c.kind.is_none() {
            c.kind = value.kind();
        }
        let e = self
            .ctx
            .converter()
            .template(method_template(method), &[value.into_expr()?]);
        Ok((e, c))
    }

    /// A level whose aggregates reach related rows. An inner level computes
    /// one partial value per entity through correlated subqueries; the
    /// outer level groups and combines the partials.
    fn per_entity_level(
        &mut self,
        group: &[&Member],
        expressions: &[AggregateExpression],
    ) -> QueryResult<()> {
        let (meta, owner) = match &self.source {
            Source::Entity { meta, alias } => (*meta, alias.clone()),
            Source::Derived { .. } => {
                return Err(QueryError::not_implemented(
                    "aggregates over related entities after compute or aggregation",
                ));
            }
        };
        let mut inner = Vec::new();
        let mut groups = Vec::with_capacity(group.len());
        for m in group {
            let (e, c) = self.group_column(m)?;
            groups.push(c.clone());
            inner.push((e, c));
        }
        let mut planned = Vec::with_capacity(expressions.len());
        for agg in expressions {
            planned.push(self.plan(agg, meta, &owner, &mut inner)?);
        }
        self.project(inner);
        let level = self.stmt.clone();
        let alias = self.wrap();

        let mut columns: Vec<(SimpleExpr, DerivedColumn)> = groups
            .iter()
            .map(|c| (col(&alias, &c.label).into(), c.clone()))
            .collect();
        let group_by: Vec<SimpleExpr> = columns.iter().map(|(e, _)| e.clone()).collect();
        for (combined, c) in planned {
            let e = self.combine(combined, &alias, &groups, &level);
            columns.push((e, c));
        }
        if !group_by.is_empty() {
            self.stmt.add_group_by(group_by);
        }
        self.project(columns);
        debug!(aggregates = expressions.len(), "aggregating per entity");
        Ok(())
    }

    fn plan(
        &mut self,
        agg: &AggregateExpression,
        meta: &'a EntityMeta,
        owner: &str,
        inner: &mut Vec<(SimpleExpr, DerivedColumn)>,
    ) -> QueryResult<(Combined, DerivedColumn)> {
        supported(agg)?;
        if let Some(nested) = &agg.inline {
            return self.plan_inline(agg, nested, meta, owner, inner);
        }
        let mut c = column(label(agg)?, agg.ty.clone(), self.ctx);
        if agg.count {
            if agg.path.is_empty() {
                let combined = Combined::Partials {
                    template: "COUNT(*)",
                    labels: Vec::new(),
                };
                return Ok((combined, c));
            }
            let counted = self.count_of(agg.path.clone())?;
            return Ok((self.partial(counted, SUM_OF_COUNTS, inner), c));
        }
        let (expression, method) = value_and_method(agg)?;
        let value = self.compiler().operand(expression)?;
        if c.kind.is_none() {
            c.kind = value.kind();
        }
        let combined = self.partial(value.into_expr()?, method_template(method), inner);
        Ok((combined, c))
    }

    /// `Nav(inner)`: `inner` aggregated over the related rows.
    fn plan_inline(
        &mut self,
        agg: &AggregateExpression,
        nested: &AggregateExpression,
        meta: &'a EntityMeta,
        owner: &str,
        inner: &mut Vec<(SimpleExpr, DerivedColumn)>,
    ) -> QueryResult<(Combined, DerivedColumn)> {
        supported(nested)?;
        let Some(UriResource::Navigation { name, .. }) = agg.path.first() else {
            return Err(QueryError::invalid("inline aggregate without a navigation"));
        };
        if nested.inline.is_some() {
            return Err(QueryError::not_implemented("nested inline aggregates"));
        }
        let c = column(label(nested)?, nested.ty.clone(), self.ctx);
        if nested.count {
            let path = agg.path.iter().chain(&nested.path).cloned().collect();
            let counted = self.count_of(path)?;
            return Ok((self.partial(counted, SUM_OF_COUNTS, inner), c));
        }
        let (expression, method) = value_and_method(nested)?;
        let combined = self.over_navigation(meta, owner, name, expression, method, inner)?;
        Ok((combined, c))
    }

    /// Correlated count of `path/$count` for the current entity.
    fn count_of(&mut self, mut path: Vec<UriResource>) -> QueryResult<SimpleExpr> {
        path.push(UriResource::Count);
        self.compiler().operand(&it_member(path))?.into_expr()
    }

    fn partial(
        &mut self,
        value: SimpleExpr,
        template: &'static str,
        inner: &mut Vec<(SimpleExpr, DerivedColumn)>,
    ) -> Combined {
        let label = self.fresh("__p");
        inner.push((value, hidden(&label)));
        Combined::Partials {
            template,
            labels: vec![label],
        }
    }

    /// `expression with method` over the rows related through `name`.
    fn over_navigation(
        &mut self,
        meta: &'a EntityMeta,
        owner: &str,
        name: &str,
        expression: &Expression,
        method: StandardMethod,
        inner: &mut Vec<(SimpleExpr, DerivedColumn)>,
    ) -> QueryResult<Combined> {
        let association = meta.association(name)?;
        let target = self.ctx.metamodel.entity(&association.target)?;
        let alias = self.fresh("r");
        let mut sub = Query::select();
        sub.from_as(Alias::new(&target.table), Alias::new(&alias));
        if let Some(d) = discriminator(target, &alias) {
            sub.and_where(d);
        }
        let prefix = format!("{}_", self.fresh("x"));
        let value = FilterCompiler::new(self.ctx, Scope::entity(&alias, target), &prefix)
            .operand(expression)?
            .into_expr()?;
        let converter = self.ctx.converter();

        let (parts, template): (&[&str], &'static str) = match method {
            StandardMethod::Sum => (&["SUM({0})"], "SUM({0})"),
            StandardMethod::Min => (&["MIN({0})"], "MIN({0})"),
            StandardMethod::Max => (&["MAX({0})"], "MAX({0})"),
            StandardMethod::Average => (&["SUM({0})", "COUNT({0})"], AVERAGE_OF_PARTIALS),
            StandardMethod::CountDistinct => {
                let link = link_back(&mut sub, association, &alias);
                sub.expr(converter.template("COUNT(DISTINCT {0})", &[value]));
                let mut sources = Vec::new();
                for column in association.source_columns() {
                    let label = self.fresh("__s");
                    inner.push((col(owner, column).into(), hidden(&label)));
                    sources.push(label);
                }
                return Ok(Combined::Distinct { sub, link, sources });
            }
        };
        correlate(&mut sub, association, owner, &alias);
        let mut labels = Vec::with_capacity(parts.len());
        for part in parts {
            let mut partial = sub.clone();
            partial.expr(converter.template(part, std::slice::from_ref(&value)));
            let label = self.fresh("__p");
            inner.push((scalar(partial), hidden(&label)));
            labels.push(label);
        }
        Ok(Combined::Partials { template, labels })
    }

    /// The outer expression of a planned aggregate. `level` is the inner
    /// level, read as `alias`.
    fn combine(
        &mut self,
        combined: Combined,
        alias: &str,
        groups: &[DerivedColumn],
        level: &SelectStatement,
    ) -> SimpleExpr {
        match combined {
            Combined::Partials { template, labels } => {
                let args: Vec<SimpleExpr> = labels.iter().map(|l| col(alias, l).into()).collect();
                self.ctx.converter().template(template, &args)
            }
            Combined::Distinct {
                mut sub,
                link,
                sources,
            } => {
                let peers = self.fresh("b");
                let mut within = Query::select();
                for s in &sources {
                    within.column((Alias::new(&peers), Alias::new(s)));
                }
                within.from_subquery(level.clone(), Alias::new(&peers));
                for g in groups {
                    within.and_where(same_group(&peers, alias, &g.label));
                }
                let cond = match <[SimpleExpr; 1]>::try_from(link) {
                    Ok([one]) => Expr::expr(one).in_subquery(within),
                    Err(many) => Expr::tuple(many).in_subquery(within),
                };
                sub.and_where(cond);
                scalar(sub)
            }
        }
    }

    fn group_by(&mut self, group: &GroupBy) -> QueryResult<()> {
        let mut members = Vec::with_capacity(group.items.len());
        for item in &group.items {
            if item.rollup_all || !item.rollup.is_empty() {
                return Err(QueryError::not_implemented("rollup"));
            }
            if let Some(member) = &item.path {
                members.push(member);
            }
        }
        let nested = group.apply.as_ref().map_or(&[][..], |a| a.items.as_slice());
        let expressions = match nested {
            [] | [ApplyItem::Identity] => &[][..],
            [ApplyItem::Aggregate { expressions }] => expressions.as_slice(),
            _ => {
                return Err(QueryError::not_implemented(
                    "groupby with transformations other than aggregate",
                ));
            }
        };
        self.aggregate_level(&members, expressions)
    }

    fn bottom_top(&mut self, bt: &BottomTop) -> QueryResult<()> {
        if !matches!(
            bt.method,
            BottomTopMethod::TopCount | BottomTopMethod::BottomCount
        ) {
            return Err(QueryError::not_implemented(format!("{:?}", bt.method).to_lowercase()));
        }
        let count = match &bt.number {
            Expression::Literal(Literal {
                value: LiteralValue::Integer(n),
                ..
            }) => u64::try_from(*n).ok(),
            _ => None,
        }
        .ok_or_else(|| QueryError::invalid("the count must be a non-negative integer"))?;
        self.open();
        let value = self.compiler().compile(&bt.value)?;
        self.ensure_projection();
        let order = if bt.method.is_top() { Order::Desc } else { Order::Asc };
        self.stmt.order_by_expr(value, order).limit(count);
        self.wrap();
        Ok(())
    }

    fn concat(&mut self, branches: &[ApplyOption]) -> QueryResult<()> {
        let mut done = Vec::with_capacity(branches.len());
        for branch in branches {
            let mut p = self.clone();
            p.run(branch)?;
            p.wrap();
            done.push(p);
        }
        let mut labels: Vec<DerivedColumn> = Vec::new();
        for p in &done {
            if let Source::Derived { columns, .. } = &p.source {
                for c in columns {
                    if !labels.iter().any(|l| l.label == c.label) {
                        labels.push(c.clone());
                    }
                }
            }
        }
        let mut union: Option<SelectStatement> = None;
        for mut p in done {
            let Source::Derived { alias, columns } = &p.source else {
                continue;
            };
            for l in &labels {
                let e = if columns.iter().any(|c| c.label == l.label) {
                    col(alias, &l.label).into()
                } else {
                    Expr::cust("NULL")
                };
                p.stmt.expr_as(e, Alias::new(&l.label));
            }
            match &mut union {
                Some(u) => {
                    u.union(UnionType::All, p.stmt);
                }
                None => union = Some(p.stmt),
            }
        }
        let union = union.ok_or_else(|| QueryError::invalid("concat without branches"))?;
        let alias = self.fresh("a");
        self.stmt = Query::select();
        self.stmt.from_subquery(union, Alias::new(&alias));
        self.source = Source::Derived {
            alias,
            columns: labels,
        };
        self.projected = None;
        Ok(())
    }

    /// Output columns of the projected level.
    fn output(&self) -> Vec<OutputColumn> {
        self.projected
            .iter()
            .flatten()
            .map(|c| match c.kind {
                Some(kind) => OutputColumn::value(&c.label, kind, c.ty.as_ref()),
                None => OutputColumn::untyped(&c.label),
            })
            .collect()
    }
}

/// Compiles `apply` over the resource path, then the request's `$filter`,
/// `$search`, `$orderby`, `$select` and paging on the result.
///
/// # Errors
/// [`QueryError::NotImplemented`] for transformations without a SQL
/// translation; any error of the expression compiler.
pub fn build<'a>(
    ctx: &'a QueryContext<'a>,
    nav: &NavigationInfo,
    apply: &ApplyOption,
    options: &QueryOptions,
    page: Page,
) -> QueryResult<ApplyQuery> {
    let (base, meta, alias) = resource_source(ctx, nav)?;
    let mut p = Pipeline::new(ctx, base, meta, alias);
    p.run(apply)?;
    if let Some(filter) = &options.filter {
        p.filter(filter)?;
    }
    if let Some(search) = &options.search {
        p.open();
        let cond = p.compiler().search(search)?;
        p.stmt.and_where(cond);
    }
    p.wrap();

    let mut count = Query::select();
    {
        let mut counted = p.clone();
        counted.ensure_projection();
        count
            .expr_as(Expr::cust("COUNT(*)"), Alias::new("count"))
            .from_subquery(counted.stmt, Alias::new("cnt"));
    }

    let mut compiler = p.compiler();
    let mut order = Vec::with_capacity(options.orderby.len());
    for item in &options.orderby {
        let dir = if item.descending { Order::Desc } else { Order::Asc };
        order.push((compiler.compile(&item.expression)?, dir));
    }
    for (e, dir) in order {
        p.stmt.order_by_expr(e, dir);
    }

    let mut columns = p.source_columns();
    if let Some(select) = options.select.as_ref().filter(|s| !s.is_star()) {
        let mut kept = Vec::new();
        for item in &select.items {
            let path = item.path_names().join("/");
            let prefix = format!("{path}/");
            let before = kept.len();
            kept.extend(
                columns
                    .iter()
                    .filter(|(_, c)| c.label == path || c.label.starts_with(&prefix))
                    .cloned(),
            );
            if kept.len() == before {
                return Err(QueryError::invalid(format!(
                    "'{path}' is not available after $apply"
                )));
            }
        }
        columns = kept;
    }
    p.project(columns);
    if let Some(top) = page.top {
        p.stmt.limit(top);
    }
    if let Some(skip) = page.skip {
        p.stmt.offset(skip);
    }

    let query = SelectQuery {
        columns: p.output(),
        statement: p.stmt,
    };
    debug!(sql = %query.sql(ctx.backend), "compiled $apply");
    Ok(ApplyQuery { query, count })
}
