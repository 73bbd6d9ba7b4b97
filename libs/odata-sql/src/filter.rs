//! Translation of expression trees into sea-query expressions.
//!
//! Members resolve against a stack of [`Scope`]s: the addressed entity at
//! the bottom, one more per lambda. Paths through to-one navigations become
//! correlated scalar subqueries; collection paths end in `$count`, `any` or
//! `all` and become `COUNT(*)` or `EXISTS` subqueries.

use chrono::DateTime;
use odata_edm::{EdmType, FullQualifiedName, PrimitiveKind};
use odata_uri::{
    BinaryOperator, Expression, ExpressionVisitor, Literal, LiteralValue, Member, MemberStart,
    MethodKind, SearchExpression, UnaryOperator, UriResource,
};
use sea_orm::sea_query::{
    Alias, ConditionalStatement, Expr, Func, LikeExpr, Query, SelectStatement, SimpleExpr,
    SubQueryStatement,
};

use crate::converter::DatePart;
use crate::error::{MappingError, QueryError, QueryResult};
use crate::mapping::{Association, CollectionAttribute, EntityMeta};
use crate::navigation::{col, correlate, discriminator, join_on};
use crate::query::QueryContext;

/// Column of a derived table produced by `$apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedColumn {
    pub label: String,
    pub kind: Option<PrimitiveKind>,
    pub ty: Option<EdmType>,
}

#[derive(Debug, Clone)]
pub enum ScopeSource<'m> {
    Entity(&'m EntityMeta),
    /// Rows of a collection table; members are element paths.
    Collection(&'m CollectionAttribute),
    Derived(Vec<DerivedColumn>),
}

/// A table alias members can be resolved against.
#[derive(Debug, Clone)]
pub struct Scope<'m> {
    pub alias: String,
    pub source: ScopeSource<'m>,
    /// Lambda variable naming this scope.
    pub variable: Option<String>,
}

impl<'m> Scope<'m> {
    #[must_use]
    pub fn entity(alias: &str, meta: &'m EntityMeta) -> Self {
        Self {
            alias: alias.to_owned(),
            source: ScopeSource::Entity(meta),
            variable: None,
        }
    }

    #[must_use]
    pub fn derived(alias: &str, columns: Vec<DerivedColumn>) -> Self {
        Self {
            alias: alias.to_owned(),
            source: ScopeSource::Derived(columns),
            variable: None,
        }
    }
}

/// Intermediate result of compiling a subtree.
#[derive(Debug, Clone)]
pub enum Operand {
    Null,
    /// String literal, kept as text for `LIKE` patterns.
    Text(String),
    Expr(SimpleExpr, Option<PrimitiveKind>),
    Type(EdmType),
}

impl Operand {
    /// # Errors
    /// [`QueryError::Invalid`] for a type name used as a value.
    pub fn into_expr(self) -> QueryResult<SimpleExpr> {
        match self {
            Self::Null => Ok(Expr::cust("NULL")),
            Self::Text(s) => Ok(SimpleExpr::Value(s.into())),
            Self::Expr(e, _) => Ok(e),
            Self::Type(t) => Err(QueryError::invalid(format!(
                "type '{t}' cannot be used as a value"
            ))),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Option<PrimitiveKind> {
        match self {
            Self::Text(_) => Some(PrimitiveKind::String),
            Self::Expr(_, k) => *k,
            Self::Null | Self::Type(_) => None,
        }
    }
}

fn boolean(e: SimpleExpr) -> Operand {
    Operand::Expr(e, Some(PrimitiveKind::Boolean))
}

fn scalar(select: SelectStatement) -> SimpleExpr {
    SimpleExpr::SubQuery(
        None,
        Box::new(SubQueryStatement::SelectStatement(select)),
    )
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}/{name}")
    }
}

fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            c => out.push(c),
        }
    }
    out
}

fn like(value: SimpleExpr, pattern: String) -> SimpleExpr {
    Expr::expr(value).like(LikeExpr::new(pattern).escape('\\'))
}

fn args<const N: usize>(method: MethodKind, args: Vec<Operand>) -> QueryResult<[Operand; N]> {
    <[Operand; N]>::try_from(args).map_err(|a| {
        QueryError::invalid(format!(
            "{} takes {N} arguments, got {}",
            method.name(),
            a.len()
        ))
    })
}

/// Compiles `$filter`, `$orderby` and `$apply` expressions for one query.
pub struct FilterCompiler<'c> {
    ctx: &'c QueryContext<'c>,
    scopes: Vec<Scope<'c>>,
    prefix: String,
    next: usize,
}

impl<'c> FilterCompiler<'c> {
    /// `prefix` keeps the aliases of generated subqueries apart from those
    /// of other compilers working on the same statement.
    #[must_use]
    pub fn new(ctx: &'c QueryContext<'c>, scope: Scope<'c>, prefix: &str) -> Self {
        Self {
            ctx,
            scopes: vec![scope],
            prefix: prefix.to_owned(),
            next: 0,
        }
    }

    /// # Errors
    /// Any [`QueryError`] raised while translating the tree.
    pub fn compile(&mut self, expr: &Expression) -> QueryResult<SimpleExpr> {
        expr.accept(self)?.into_expr()
    }

    /// Like [`compile`](Self::compile), keeping the result kind.
    ///
    /// # Errors
    /// See [`compile`](Self::compile).
    pub fn operand(&mut self, expr: &Expression) -> QueryResult<Operand> {
        expr.accept(self)
    }

    /// Case-insensitive match of every term against the search columns.
    ///
    /// # Errors
    /// [`QueryError::NotImplemented`] when the entity has no search columns.
    pub fn search(&self, expr: &SearchExpression) -> QueryResult<SimpleExpr> {
        let Scope {
            alias,
            source: ScopeSource::Entity(meta),
            ..
        } = &self.scopes[0]
        else {
            return Err(QueryError::not_implemented("$search on aggregated data"));
        };
        let columns: Vec<&str> = meta
            .search
            .iter()
            .filter_map(|p| meta.attribute(p))
            .filter(|a| self.ctx.is_visible(&a.groups))
            .map(|a| a.column.as_str())
            .collect();
        if columns.is_empty() {
            return Err(QueryError::not_implemented(format!(
                "$search on '{}'",
                meta.fqn
            )));
        }
        Ok(search_expr(alias, &columns, expr))
    }

    fn fresh(&mut self) -> String {
        let alias = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        alias
    }

    fn scope_index(&self, start: &MemberStart) -> QueryResult<usize> {
        match start {
            MemberStart::It => Ok(0),
            MemberStart::LambdaVariable(v) => self
                .scopes
                .iter()
                .rposition(|s| s.variable.as_deref() == Some(v))
                .ok_or_else(|| QueryError::invalid(format!("unknown lambda variable '{v}'"))),
            MemberStart::Root => Err(QueryError::not_implemented("$root paths")),
        }
    }

    /// Same-table subtype of `meta`.
    fn cast(
        &self,
        meta: &'c EntityMeta,
        cast: Option<&FullQualifiedName>,
    ) -> QueryResult<&'c EntityMeta> {
        match cast {
            Some(fqn) if *fqn != meta.fqn => {
                let sub = self.ctx.metamodel.entity(fqn)?;
                if sub.table != meta.table {
                    return Err(QueryError::not_implemented(format!(
                        "cast to '{fqn}' stored in another table"
                    )));
                }
                Ok(sub)
            }
            _ => Ok(meta),
        }
    }

    fn entity_path(
        &mut self,
        alias: &str,
        meta: &'c EntityMeta,
        segs: &[UriResource],
        prefix: &str,
    ) -> QueryResult<Operand> {
        let Some((first, rest)) = segs.split_first() else {
            return Err(QueryError::invalid(
                "structured values cannot be used in expressions",
            ));
        };
        match first {
            UriResource::PrimitiveProperty {
                name,
                collection: false,
                ..
            } => {
                let path = join_path(prefix, name);
                let attr = meta
                    .attribute(&path)
                    .ok_or_else(|| MappingError::unknown_property(&meta.fqn, &path))?;
                self.ctx.check_visible(&attr.path, &attr.groups)?;
                Ok(Operand::Expr(col(alias, &attr.column).into(), Some(attr.kind)))
            }
            UriResource::ComplexProperty {
                name,
                collection: false,
                ..
            } => self.entity_path(alias, meta, rest, &join_path(prefix, name)),
            UriResource::PrimitiveProperty { name, .. } | UriResource::ComplexProperty { name, .. } => {
                let path = join_path(prefix, name);
                let coll = meta
                    .collection(&path)
                    .ok_or_else(|| MappingError::unknown_property(&meta.fqn, &path))?;
                self.ctx.check_visible(&coll.path, &coll.groups)?;
                self.collection_attribute(alias, coll, rest)
            }
            UriResource::Navigation {
                name,
                collection,
                type_filter,
                ..
            } => {
                let assoc = meta.association(name)?;
                let target = self
                    .ctx
                    .metamodel
                    .entity(type_filter.as_ref().unwrap_or(&assoc.target))?;
                if *collection {
                    self.to_many(alias, assoc, target, rest)
                } else {
                    self.to_one(alias, assoc, target, rest)
                }
            }
            other => Err(QueryError::not_implemented(format!(
                "'{}' in expressions",
                other.segment()
            ))),
        }
    }

    /// Correlated scalar subquery returning the rest of the path.
    fn to_one(
        &mut self,
        owner: &str,
        assoc: &Association,
        target: &'c EntityMeta,
        rest: &[UriResource],
    ) -> QueryResult<Operand> {
        let alias = self.fresh();
        let mut sub = Query::select();
        sub.from_as(Alias::new(&target.table), Alias::new(&alias));
        correlate(&mut sub, assoc, owner, &alias);
        if let Some(d) = discriminator(target, &alias) {
            sub.and_where(d);
        }
        let (expr, kind) = if rest.is_empty() {
            // The navigation itself, compared with null.
            let key = target
                .keys()
                .next()
                .ok_or_else(|| MappingError::invalid(target.fqn.to_string(), "no key"))?;
            (col(&alias, &key.column).into(), Some(key.kind))
        } else {
            let value = self.entity_path(&alias, target, rest, "")?;
            let kind = value.kind();
            (value.into_expr()?, kind)
        };
        sub.expr(expr).limit(1);
        Ok(Operand::Expr(scalar(sub), kind))
    }

    fn to_many(
        &mut self,
        owner: &str,
        assoc: &Association,
        target: &'c EntityMeta,
        rest: &[UriResource],
    ) -> QueryResult<Operand> {
        let alias = self.fresh();
        let mut sub = Query::select();
        sub.from_as(Alias::new(&target.table), Alias::new(&alias));
        correlate(&mut sub, assoc, owner, &alias);
        if let Some(d) = discriminator(target, &alias) {
            sub.and_where(d);
        }
        self.collection_tail(sub, alias, ScopeSource::Entity(target), rest)
    }

    fn collection_attribute(
        &mut self,
        owner: &str,
        coll: &'c CollectionAttribute,
        rest: &[UriResource],
    ) -> QueryResult<Operand> {
        let alias = self.fresh();
        let mut sub = Query::select();
        sub.from_as(Alias::new(&coll.table), Alias::new(&alias))
            .and_where(join_on(owner, &alias, &coll.join_columns));
        self.collection_tail(sub, alias, ScopeSource::Collection(coll), rest)
    }

    /// `$count`, `any` or `all` over the rows of `sub`.
    fn collection_tail(
        &mut self,
        mut sub: SelectStatement,
        alias: String,
        source: ScopeSource<'c>,
        rest: &[UriResource],
    ) -> QueryResult<Operand> {
        match rest.first() {
            Some(UriResource::Count) => {
                sub.expr(Expr::cust("COUNT(*)"));
                Ok(Operand::Expr(scalar(sub), Some(PrimitiveKind::Int64)))
            }
            Some(UriResource::Any {
                variable,
                expression,
            }) => {
                if let Some(body) = expression {
                    let scope = Scope {
                        alias,
                        source,
                        variable: variable.clone(),
                    };
                    sub.and_where(self.lambda(scope, body)?);
                }
                sub.expr(Expr::cust("1"));
                Ok(boolean(Expr::exists(sub)))
            }
            Some(UriResource::All {
                variable,
                expression,
            }) => {
                let scope = Scope {
                    alias,
                    source,
                    variable: Some(variable.clone()),
                };
                sub.and_where(self.lambda(scope, expression)?.not());
                sub.expr(Expr::cust("1"));
                Ok(boolean(Expr::exists(sub).not()))
            }
            _ => Err(QueryError::invalid(
                "a collection must be followed by $count, any or all",
            )),
        }
    }

    fn lambda(&mut self, scope: Scope<'c>, body: &Expression) -> QueryResult<SimpleExpr> {
        self.scopes.push(scope);
        let out = self.compile(body);
        self.scopes.pop();
        out
    }

    fn element(
        alias: &str,
        coll: &CollectionAttribute,
        segs: &[UriResource],
    ) -> QueryResult<Operand> {
        let path = segs
            .iter()
            .filter_map(UriResource::property_name)
            .collect::<Vec<_>>()
            .join("/");
        let (column, kind) = coll
            .element_column(&path)
            .ok_or_else(|| MappingError::unknown_property(&coll.path, &path))?;
        Ok(Operand::Expr(col(alias, column).into(), Some(kind)))
    }

    fn derived(alias: &str, columns: &[DerivedColumn], member: &Member) -> QueryResult<Operand> {
        let label = member.path_string();
        let c = columns.iter().find(|c| c.label == label).ok_or_else(|| {
            QueryError::invalid(format!("'{label}' is not available at this point of $apply"))
        })?;
        Ok(Operand::Expr(col(alias, &c.label).into(), c.kind))
    }

    fn literal_operand(&self, literal: &Literal) -> QueryResult<Operand> {
        match &literal.value {
            LiteralValue::String(s) => Ok(Operand::Text(s.clone())),
            value => Ok(self
                .ctx
                .converter()
                .literal(value)?
                .map_or(Operand::Null, |v| {
                    Operand::Expr(SimpleExpr::Value(v), literal.kind)
                })),
        }
    }

    fn comparison(op: BinaryOperator, left: Operand, right: Operand) -> QueryResult<SimpleExpr> {
        if op.is_equality() {
            match (&left, &right) {
                (Operand::Null, Operand::Null) => {
                    return Ok(Expr::cust(if op == BinaryOperator::Eq { "1=1" } else { "1=0" }));
                }
                (Operand::Null, _) | (_, Operand::Null) => {
                    let value = if matches!(left, Operand::Null) { right } else { left };
                    let e = Expr::expr(value.into_expr()?);
                    return Ok(if op == BinaryOperator::Eq {
                        e.is_null()
                    } else {
                        e.is_not_null()
                    });
                }
                _ => {}
            }
        }
        let l = Expr::expr(left.into_expr()?);
        let r = right.into_expr()?;
        Ok(match op {
            BinaryOperator::Eq => l.eq(r),
            BinaryOperator::Ne => l.ne(r),
            BinaryOperator::Gt => l.gt(r),
            BinaryOperator::Ge => l.gte(r),
            BinaryOperator::Lt => l.lt(r),
            _ => l.lte(r),
        })
    }

    fn arithmetic(
        &self,
        op: BinaryOperator,
        left: Operand,
        right: Operand,
    ) -> QueryResult<Operand> {
        let kind = match (left.kind(), right.kind()) {
            (Some(l), Some(r)) if l.is_temporal() || r.is_temporal() => {
                return Err(QueryError::not_implemented(
                    "arithmetic on dates, times and durations",
                ));
            }
            (Some(l), Some(r)) => l.promote(r),
            (l, r) => l.or(r),
        };
        let l = Expr::expr(left.into_expr()?);
        let r = right.into_expr()?;
        let e = match op {
            BinaryOperator::Add => l.add(r),
            BinaryOperator::Sub => l.sub(r),
            BinaryOperator::Mul => l.mul(r),
            BinaryOperator::Div => l.div(r),
            BinaryOperator::Mod => l.modulo(r),
            _ => {
                let exprs = [SimpleExpr::from(l), r];
                return Ok(Operand::Expr(
                    self.ctx.converter().template("({0} * 1.0 / {1})", &exprs),
                    Some(PrimitiveKind::Decimal),
                ));
            }
        };
        Ok(Operand::Expr(e, kind))
    }

    fn pattern(&self, method: MethodKind, args: Vec<Operand>) -> QueryResult<Operand> {
        let [value, pattern] = self::args(method, args)?;
        let value = value.into_expr()?;
        let conv = self.ctx.converter();
        let e = match (method, pattern) {
            (_, Operand::Null) => Expr::cust("1=0"),
            (MethodKind::Contains, Operand::Text(s)) => like(value, format!("%{}%", like_escape(&s))),
            (MethodKind::StartsWith, Operand::Text(s)) => like(value, format!("{}%", like_escape(&s))),
            (MethodKind::EndsWith, Operand::Text(s)) => like(value, format!("%{}", like_escape(&s))),
            (MethodKind::Contains, p) => Expr::expr(conv.index_of(value, p.into_expr()?)).gte(0),
            (MethodKind::StartsWith, p) => Expr::expr(conv.index_of(value, p.into_expr()?)).eq(0),
            (_, p) => {
                let p = p.into_expr()?;
                let start = Expr::expr(conv.length(value.clone())).sub(conv.length(p.clone()));
                Expr::expr(conv.substring(value, start, None)).eq(p)
            }
        };
        Ok(boolean(e))
    }

    fn string_method(&self, method: MethodKind, args: Vec<Operand>) -> QueryResult<Operand> {
        let conv = self.ctx.converter();
        let string = |e| Operand::Expr(e, Some(PrimitiveKind::String));
        let int = |e| Operand::Expr(e, Some(PrimitiveKind::Int32));
        Ok(match method {
            MethodKind::Length => {
                let [v] = self::args(method, args)?;
                int(conv.length(v.into_expr()?))
            }
            MethodKind::IndexOf => {
                let [v, n] = self::args(method, args)?;
                int(conv.index_of(v.into_expr()?, n.into_expr()?))
            }
            MethodKind::Substring => {
                let mut it = args.into_iter();
                let (Some(v), Some(start)) = (it.next(), it.next()) else {
                    return Err(QueryError::invalid("substring takes 2 or 3 arguments"));
                };
                let len = it.next().map(Operand::into_expr).transpose()?;
                string(conv.substring(v.into_expr()?, start.into_expr()?, len))
            }
            MethodKind::ToLower => {
                let [v] = self::args(method, args)?;
                string(Func::lower(v.into_expr()?).into())
            }
            MethodKind::ToUpper => {
                let [v] = self::args(method, args)?;
                string(Func::upper(v.into_expr()?).into())
            }
            MethodKind::Trim => {
                let [v] = self::args(method, args)?;
                string(Func::cust(Alias::new("TRIM")).arg(v.into_expr()?).into())
            }
            MethodKind::Concat => {
                let [a, b] = self::args(method, args)?;
                string(conv.concat(a.into_expr()?, b.into_expr()?))
            }
            _ => {
                let [v, p] = self::args(method, args)?;
                let e = conv
                    .matches_pattern(v.into_expr()?, p.into_expr()?)
                    .ok_or_else(|| QueryError::not_implemented("matchesPattern on this database"))?;
                boolean(e)
            }
        })
    }

    fn temporal_method(&self, method: MethodKind, args: Vec<Operand>) -> QueryResult<Operand> {
        let conv = self.ctx.converter();
        let part = match method {
            MethodKind::Year => Some(DatePart::Year),
            MethodKind::Month => Some(DatePart::Month),
            MethodKind::Day => Some(DatePart::Day),
            MethodKind::Hour => Some(DatePart::Hour),
            MethodKind::Minute => Some(DatePart::Minute),
            MethodKind::Second => Some(DatePart::Second),
            _ => None,
        };
        if let Some(part) = part {
            let [v] = self::args(method, args)?;
            return Ok(Operand::Expr(
                conv.date_part(part, v.into_expr()?),
                Some(PrimitiveKind::Int32),
            ));
        }
        let bound = match method {
            MethodKind::MinDateTime => Some("0001-01-01T00:00:00Z"),
            MethodKind::MaxDateTime => Some("9999-12-31T23:59:59.999Z"),
            _ => None,
        };
        if let Some(text) = bound {
            let dt = DateTime::parse_from_rfc3339(text)
                .map_err(|e| QueryError::invalid(e.to_string()))?;
            let v = conv.literal(&LiteralValue::DateTimeOffset(dt))?;
            return Ok(Operand::Expr(
                v.map_or_else(|| Expr::cust("NULL"), SimpleExpr::Value),
                Some(PrimitiveKind::DateTimeOffset),
            ));
        }
        if method == MethodKind::Now {
            return Ok(Operand::Expr(conv.now(), Some(PrimitiveKind::DateTimeOffset)));
        }
        let [v] = self::args(method, args)?;
        let v = v.into_expr()?;
        Ok(match method {
            MethodKind::FractionalSeconds => {
                Operand::Expr(conv.fractional_seconds(v), Some(PrimitiveKind::Decimal))
            }
            MethodKind::Date => Operand::Expr(conv.date(v), Some(PrimitiveKind::Date)),
            MethodKind::Time => Operand::Expr(conv.time(v), Some(PrimitiveKind::TimeOfDay)),
            MethodKind::TotalOffsetMinutes => Operand::Expr(
                conv.total_offset_minutes(v).ok_or_else(|| {
                    QueryError::not_implemented("totaloffsetminutes on this database")
                })?,
                Some(PrimitiveKind::Int32),
            ),
            // Durations are stored as seconds already.
            _ => Operand::Expr(v, Some(PrimitiveKind::Decimal)),
        })
    }

    fn math_method(&self, method: MethodKind, args: Vec<Operand>) -> QueryResult<Operand> {
        let conv = self.ctx.converter();
        let [v] = self::args(method, args)?;
        let kind = v.kind();
        let v = v.into_expr()?;
        let e = match method {
            MethodKind::Round => conv.round(v),
            MethodKind::Floor => conv.floor(v),
            _ => conv.ceiling(v),
        };
        Ok(Operand::Expr(e, kind))
    }

    fn type_method(&self, method: MethodKind, args: &[Operand]) -> QueryResult<Operand> {
        match (method, args) {
            (MethodKind::Cast, [value, Operand::Type(ty)]) => {
                let kind = self
                    .ctx
                    .edm
                    .underlying_primitive(ty)
                    .ok_or_else(|| QueryError::not_implemented(format!("cast to '{ty}'")))?;
                let e = self.ctx.converter().cast(value.clone().into_expr()?, kind)?;
                Ok(Operand::Expr(e, Some(kind)))
            }
            (MethodKind::IsOf, [Operand::Type(EdmType::Entity(fqn))]) => self.is_of(fqn),
            _ => Err(QueryError::not_implemented(format!(
                "{} with these arguments",
                method.name()
            ))),
        }
    }

    /// `isof(Type)` on the current instance, through the discriminator.
    fn is_of(&self, fqn: &FullQualifiedName) -> QueryResult<Operand> {
        let Scope {
            alias,
            source: ScopeSource::Entity(meta),
            ..
        } = &self.scopes[0]
        else {
            return Err(QueryError::not_implemented("isof on aggregated data"));
        };
        let sub = self.ctx.metamodel.entity(fqn)?;
        let e = match discriminator(sub, alias) {
            Some(d) if sub.table == meta.table => d,
            _ if self.ctx.edm.is_compatible(&meta.fqn, fqn) => Expr::cust("1=1"),
            _ => Expr::cust("1=0"),
        };
        Ok(boolean(e))
    }
}

fn search_expr(alias: &str, columns: &[&str], expr: &SearchExpression) -> SimpleExpr {
    match expr {
        SearchExpression::Term { text } | SearchExpression::Phrase { text } => {
            let pattern = format!("%{}%", like_escape(&text.to_lowercase()));
            columns
                .iter()
                .map(|c| like(Func::lower(col(alias, c)).into(), pattern.clone()))
                .reduce(SimpleExpr::or)
                .unwrap_or_else(|| Expr::cust("1=0"))
        }
        SearchExpression::Not { operand } => search_expr(alias, columns, operand).not(),
        SearchExpression::And { left, right } => {
            search_expr(alias, columns, left).and(search_expr(alias, columns, right))
        }
        SearchExpression::Or { left, right } => {
            search_expr(alias, columns, left).or(search_expr(alias, columns, right))
        }
    }
}

impl ExpressionVisitor for FilterCompiler<'_> {
    type Output = Operand;
    type Error = QueryError;

    fn visit_literal(&mut self, literal: &Literal) -> QueryResult<Operand> {
        self.literal_operand(literal)
    }

    fn visit_member(&mut self, member: &Member) -> QueryResult<Operand> {
        let idx = self.scope_index(&member.start)?;
        let segs = match member.path.first() {
            Some(UriResource::It { .. } | UriResource::LambdaVariable { .. }) => &member.path[1..],
            _ => &member.path[..],
        };
        let alias = self.scopes[idx].alias.clone();
        match self.scopes[idx].source.clone() {
            ScopeSource::Entity(meta) => {
                let meta = self.cast(meta, member.type_filter.as_ref())?;
                self.entity_path(&alias, meta, segs, "")
            }
            ScopeSource::Collection(coll) => Self::element(&alias, coll, segs),
            ScopeSource::Derived(columns) => Self::derived(&alias, &columns, member),
        }
    }

    fn visit_alias(&mut self, _name: &str, value: Option<Operand>) -> QueryResult<Operand> {
        Ok(value.unwrap_or(Operand::Null))
    }

    fn visit_enum(
        &mut self,
        ty: &FullQualifiedName,
        _members: &[String],
        value: i64,
    ) -> QueryResult<Operand> {
        let kind = self.ctx.edm.enum_type(ty).map(|e| e.underlying);
        Ok(Operand::Expr(SimpleExpr::Value(value.into()), kind))
    }

    fn visit_type_literal(&mut self, ty: &EdmType) -> QueryResult<Operand> {
        Ok(Operand::Type(ty.clone()))
    }

    fn visit_unary(&mut self, op: UnaryOperator, operand: Operand) -> QueryResult<Operand> {
        let kind = operand.kind();
        let e = operand.into_expr()?;
        Ok(match op {
            UnaryOperator::Not => boolean(e.not()),
            UnaryOperator::Minus => Operand::Expr(Expr::val(0).sub(e), kind),
        })
    }

    fn visit_binary(
        &mut self,
        op: BinaryOperator,
        left: Operand,
        right: Operand,
    ) -> QueryResult<Operand> {
        match op {
            BinaryOperator::And => Ok(boolean(left.into_expr()?.and(right.into_expr()?))),
            BinaryOperator::Or => Ok(boolean(left.into_expr()?.or(right.into_expr()?))),
            BinaryOperator::Has => {
                let exprs = [left.into_expr()?, right.into_expr()?];
                Ok(boolean(
                    self.ctx.converter().template("(({0} & {1}) = {1})", &exprs),
                ))
            }
            op if op.is_arithmetic() => self.arithmetic(op, left, right),
            op => Ok(boolean(Self::comparison(op, left, right)?)),
        }
    }

    fn visit_in(&mut self, left: Operand, list: Vec<Operand>) -> QueryResult<Operand> {
        if list.is_empty() {
            return Ok(boolean(Expr::cust("1=0")));
        }
        let has_null = list.iter().any(|o| matches!(o, Operand::Null));
        let values = list
            .into_iter()
            .filter(|o| !matches!(o, Operand::Null))
            .map(Operand::into_expr)
            .collect::<QueryResult<Vec<_>>>()?;
        let left = left.into_expr()?;
        let mut e = if values.is_empty() {
            Expr::cust("1=0")
        } else {
            Expr::expr(left.clone()).is_in(values)
        };
        if has_null {
            e = e.or(Expr::expr(left).is_null());
        }
        Ok(boolean(e))
    }

    fn visit_method(&mut self, method: MethodKind, args: Vec<Operand>) -> QueryResult<Operand> {
        match method {
            MethodKind::Contains | MethodKind::StartsWith | MethodKind::EndsWith => {
                self.pattern(method, args)
            }
            MethodKind::Length
            | MethodKind::IndexOf
            | MethodKind::Substring
            | MethodKind::ToLower
            | MethodKind::ToUpper
            | MethodKind::Trim
            | MethodKind::Concat
            | MethodKind::MatchesPattern => self.string_method(method, args),
            MethodKind::Round | MethodKind::Floor | MethodKind::Ceiling => {
                self.math_method(method, args)
            }
            MethodKind::Cast | MethodKind::IsOf => self.type_method(method, &args),
            _ => self.temporal_method(method, args),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(like_escape("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(like_escape("plain"), "plain");
    }

    #[test]
    fn operands_convert_to_expressions() {
        assert!(Operand::Null.into_expr().is_ok());
        assert_eq!(Operand::Text("x".to_owned()).kind(), Some(PrimitiveKind::String));
        assert!(matches!(
            Operand::Type(EdmType::Primitive(PrimitiveKind::Int32)).into_expr(),
            Err(QueryError::Invalid(_))
        ));
    }
}
