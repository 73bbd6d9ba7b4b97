//! The main read query: resource path joins, `$filter`, `$search`,
//! `$orderby`, paging and the selection list.

use odata_edm::{Edm, FullQualifiedName};
use odata_uri::{KeyPredicate, QueryOptions};
use sea_orm::sea_query::{
    Alias, ConditionalStatement, Expr, JoinType, Order, OrderedStatement, Query, SelectStatement,
    SimpleExpr,
};

use crate::config::{Page, QueryConfig, SqlBackend};
use crate::converter::{OperationConverter, for_backend};
use crate::error::{MappingError, QueryError, QueryResult};
use crate::filter::{FilterCompiler, Scope};
use crate::mapping::{Attribute, CollectionAttribute, EntityMeta, Metamodel};
use crate::navigation::{NavigationHop, NavigationInfo, col, discriminator, join_association};
use crate::row::OutputColumn;

/// Everything a query needs besides the request itself.
#[derive(Debug, Clone, Copy)]
pub struct QueryContext<'a> {
    pub edm: &'a Edm,
    pub metamodel: &'a Metamodel,
    pub config: &'a QueryConfig,
    pub backend: SqlBackend,
    /// Field groups granted to the caller.
    pub groups: &'a [String],
}

impl<'a> QueryContext<'a> {
    #[must_use]
    pub fn new(
        edm: &'a Edm,
        metamodel: &'a Metamodel,
        config: &'a QueryConfig,
        backend: SqlBackend,
    ) -> Self {
        Self {
            edm,
            metamodel,
            config,
            backend,
            groups: &[],
        }
    }

    #[must_use]
    pub fn with_groups(mut self, groups: &'a [String]) -> Self {
        self.groups = groups;
        self
    }

    #[must_use]
    pub fn converter(&self) -> &'static dyn OperationConverter {
        for_backend(self.backend)
    }

    /// Unrestricted attributes are visible to everyone.
    #[must_use]
    pub fn is_visible(&self, groups: &[String]) -> bool {
        groups.is_empty() || groups.iter().any(|g| self.groups.contains(g))
    }

    /// # Errors
    /// [`QueryError::Forbidden`] when the caller lacks every group of the
    /// attribute.
    pub fn check_visible(&self, path: &str, groups: &[String]) -> QueryResult<()> {
        if self.is_visible(groups) {
            Ok(())
        } else {
            Err(QueryError::Forbidden(path.to_owned()))
        }
    }

    /// Subtype of `meta` stored in the same table.
    ///
    /// # Errors
    /// [`QueryError::NotImplemented`] for types stored elsewhere.
    pub fn same_table_cast(
        &self,
        meta: &'a EntityMeta,
        fqn: &FullQualifiedName,
    ) -> QueryResult<&'a EntityMeta> {
        if *fqn == meta.fqn {
            return Ok(meta);
        }
        let sub = self.metamodel.entity(fqn)?;
        if sub.table == meta.table {
            Ok(sub)
        } else {
            Err(QueryError::not_implemented(format!(
                "cast to '{fqn}' stored in another table"
            )))
        }
    }
}

/// A statement with the layout of its result columns.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    pub statement: SelectStatement,
    pub columns: Vec<OutputColumn>,
}

impl SelectQuery {
    #[must_use]
    pub fn sql(&self, backend: SqlBackend) -> String {
        backend.render(&self.statement)
    }
}

/// Attributes and collections a request reads for each entity.
#[derive(Debug, Clone, Default)]
pub struct Selection<'a> {
    pub attributes: Vec<&'a Attribute>,
    pub collections: Vec<&'a CollectionAttribute>,
}

impl<'a> Selection<'a> {
    fn push(&mut self, attr: &'a Attribute) {
        if !self.attributes.iter().any(|a| a.path == attr.path) {
            self.attributes.push(attr);
        }
    }

    fn push_collection(&mut self, coll: &'a CollectionAttribute) {
        if !self.collections.iter().any(|c| c.path == coll.path) {
            self.collections.push(coll);
        }
    }

    /// Output columns for the attributes, labelled with their paths.
    #[must_use]
    pub fn columns(&self) -> Vec<OutputColumn> {
        self.attributes
            .iter()
            .map(|a| OutputColumn::value(&a.path, a.kind, Some(&a.ty)))
            .collect()
    }
}

/// Label of the hidden column carrying `column` for expansions.
#[must_use]
pub fn join_label(column: &str) -> String {
    format!("__j{column}")
}

/// Key predicates of `hop` as equalities on `alias`.
fn key_conditions(
    ctx: &QueryContext<'_>,
    meta: &EntityMeta,
    alias: &str,
    keys: &[KeyPredicate],
) -> QueryResult<Vec<SimpleExpr>> {
    keys.iter()
        .map(|k| {
            let attr = meta
                .attribute(&k.name)
                .ok_or_else(|| MappingError::unknown_property(&meta.fqn, &k.name))?;
            let column = col(alias, &attr.column);
            Ok(match ctx.converter().literal(&k.value.value)? {
                Some(v) => column.eq(v),
                None => column.is_null(),
            })
        })
        .collect()
}

fn restrict(
    ctx: &QueryContext<'_>,
    stmt: &mut SelectStatement,
    hop: &NavigationHop,
    meta: &EntityMeta,
) -> QueryResult<()> {
    for cond in key_conditions(ctx, meta, &hop.alias, &hop.keys)? {
        stmt.and_where(cond);
    }
    if let Some(d) = discriminator(meta, &hop.alias) {
        stmt.and_where(d);
    }
    Ok(())
}

/// FROM clause of the resource path: the root table as `t0`, one inner
/// join per navigation hop, key predicates and discriminators in WHERE.
/// Returns the statement with the last hop's entity and alias.
///
/// # Errors
/// [`QueryError`] for unmapped types and unknown key properties.
pub fn resource_source<'a>(
    ctx: &QueryContext<'a>,
    nav: &NavigationInfo,
) -> QueryResult<(SelectStatement, &'a EntityMeta, String)> {
    let (root, rest) = nav
        .hops
        .split_first()
        .ok_or_else(|| QueryError::invalid("the request addresses no entity"))?;
    let mut meta = ctx.metamodel.entity(root.effective_type())?;
    let mut base = Query::select();
    base.from_as(Alias::new(&meta.table), Alias::new(&root.alias));
    restrict(ctx, &mut base, root, meta)?;

    let mut owner = root;
    for hop in rest {
        let association = hop
            .association
            .as_ref()
            .ok_or_else(|| QueryError::invalid("navigation without an association"))?;
        meta = ctx.metamodel.entity(hop.effective_type())?;
        join_association(
            &mut base,
            JoinType::InnerJoin,
            association,
            &owner.alias,
            &meta.table,
            &hop.alias,
        );
        restrict(ctx, &mut base, hop, meta)?;
        owner = hop;
    }
    Ok((base, meta, owner.alias.clone()))
}

/// Read query for the entities addressed by a resource path.
pub struct JoinQuery<'a> {
    ctx: &'a QueryContext<'a>,
    meta: &'a EntityMeta,
    alias: String,
    options: &'a QueryOptions,
    /// FROM, joins and WHERE; no selection, order or paging.
    base: SelectStatement,
    order: Vec<(SimpleExpr, Order)>,
    page: Page,
}

impl<'a> JoinQuery<'a> {
    /// # Errors
    /// [`QueryError`] for unmapped types, unknown keys and expressions
    /// that cannot be translated.
    pub fn new(
        ctx: &'a QueryContext<'a>,
        nav: &NavigationInfo,
        options: &'a QueryOptions,
        page: Page,
    ) -> QueryResult<Self> {
        let (base, meta, alias) = resource_source(ctx, nav)?;
        Self::over(ctx, meta, &alias, base, options, page)
    }

    /// Query over an existing `FROM` clause whose rows are `meta` at `alias`.
    ///
    /// # Errors
    /// See [`new`](Self::new).
    pub fn over(
        ctx: &'a QueryContext<'a>,
        meta: &'a EntityMeta,
        alias: &str,
        mut base: SelectStatement,
        options: &'a QueryOptions,
        page: Page,
    ) -> QueryResult<Self> {
        if let Some(filter) = &options.filter {
            let cond = FilterCompiler::new(ctx, Scope::entity(alias, meta), "f").compile(filter)?;
            base.and_where(cond);
        }
        if let Some(search) = &options.search {
            let cond = FilterCompiler::new(ctx, Scope::entity(alias, meta), "s").search(search)?;
            base.and_where(cond);
        }
        // `Nav/$count` compiles to a correlated COUNT(*) per row, so
        // several counted navigations never multiply each other.
        let mut order = Vec::new();
        let mut compiler = FilterCompiler::new(ctx, Scope::entity(alias, meta), "o");
        for item in &options.orderby {
            let dir = if item.descending { Order::Desc } else { Order::Asc };
            order.push((compiler.compile(&item.expression)?, dir));
        }
        Ok(Self {
            ctx,
            meta,
            alias: alias.to_owned(),
            options,
            base,
            order,
            page,
        })
    }

    #[must_use]
    pub fn meta(&self) -> &'a EntityMeta {
        self.meta
    }

    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    #[must_use]
    pub fn page(&self) -> Page {
        self.page
    }

    /// Attributes read for each entity: `$select` or everything visible,
    /// plus keys, the etag and the media type.
    ///
    /// # Errors
    /// [`QueryError::Forbidden`] for an explicitly selected attribute
    /// outside the caller's groups; [`QueryError::Mapping`] for unknown
    /// paths.
    pub fn selection(&self) -> QueryResult<Selection<'a>> {
        let meta = self.meta;
        let mut out = Selection::default();
        match self.options.select.as_ref().filter(|s| !s.is_star()) {
            None => {
                for a in &meta.attributes {
                    if self.ctx.is_visible(&a.groups) {
                        out.push(a);
                    }
                }
                for c in &meta.collections {
                    if self.ctx.is_visible(&c.groups) {
                        out.push_collection(c);
                    }
                }
            }
            Some(select) => {
                for item in &select.items {
                    if item.operation.is_some() || item.all_operations.is_some() {
                        continue;
                    }
                    let meta = match &item.type_filter {
                        Some(fqn) => self.ctx.same_table_cast(meta, fqn)?,
                        None => meta,
                    };
                    self.select_path(meta, &item.path_names().join("/"), &mut out)?;
                }
            }
        }
        for a in meta.keys() {
            out.push(a);
        }
        if let Some(a) = meta.etag() {
            out.push(a);
        }
        let mime = meta.stream.as_ref().and_then(|s| s.mime_type.as_deref());
        if let Some(a) = mime.and_then(|p| meta.attribute(p)) {
            out.push(a);
        }
        Ok(out)
    }

    fn select_path(
        &self,
        meta: &'a EntityMeta,
        path: &str,
        out: &mut Selection<'a>,
    ) -> QueryResult<()> {
        if let Some(coll) = meta.collection(path) {
            self.ctx.check_visible(&coll.path, &coll.groups)?;
            out.push_collection(coll);
            return Ok(());
        }
        if let Some(attr) = meta.attribute(path) {
            self.ctx.check_visible(&attr.path, &attr.groups)?;
            out.push(attr);
            return Ok(());
        }
        let nested: Vec<&Attribute> = meta.attributes.iter().filter(|a| a.is_under(path)).collect();
        let prefix = format!("{path}/");
        let collections: Vec<&CollectionAttribute> = meta
            .collections
            .iter()
            .filter(|c| c.path.starts_with(&prefix))
            .collect();
        if nested.is_empty() && collections.is_empty() {
            // A selected navigation reads nothing from this table.
            if meta.association(path).is_ok() {
                return Ok(());
            }
            return Err(MappingError::unknown_property(&meta.fqn, path).into());
        }
        for a in nested {
            if self.ctx.is_visible(&a.groups) {
                out.push(a);
            }
        }
        for c in collections {
            if self.ctx.is_visible(&c.groups) {
                out.push_collection(c);
            }
        }
        Ok(())
    }

    /// Ordered and paged statement. Paging adds the keys as a tiebreaker.
    fn paged(&self, mut stmt: SelectStatement) -> SelectStatement {
        for (e, dir) in &self.order {
            stmt.order_by_expr(e.clone(), dir.clone());
        }
        if self.page.is_paged() {
            for k in self.meta.keys() {
                stmt.order_by_expr(col(&self.alias, &k.column).into(), Order::Asc);
            }
        }
        if let Some(top) = self.page.top {
            stmt.limit(top);
        }
        if let Some(skip) = self.page.skip {
            stmt.offset(skip);
        }
        stmt
    }

    /// Selects the attributes plus hidden copies of `join_columns`.
    ///
    /// # Errors
    /// See [`selection`](Self::selection).
    pub fn build(&self, join_columns: &[&str]) -> QueryResult<SelectQuery> {
        let selection = self.selection()?;
        Ok(self.build_attributes(&selection.attributes, join_columns))
    }

    /// Statement reading exactly `attributes`.
    #[must_use]
    pub fn build_attributes(&self, attributes: &[&Attribute], join_columns: &[&str]) -> SelectQuery {
        let mut stmt = self.base.clone();
        let mut columns = Vec::new();
        for a in attributes {
            stmt.expr_as(col(&self.alias, &a.column), Alias::new(&a.path));
            columns.push(OutputColumn::value(&a.path, a.kind, Some(&a.ty)));
        }
        for c in join_columns {
            stmt.expr_as(col(&self.alias, c), Alias::new(join_label(c)));
            columns.push(OutputColumn::hidden(join_label(c)));
        }
        SelectQuery {
            statement: self.paged(stmt),
            columns,
        }
    }

    /// `SELECT COUNT(*)` over the filtered rows, ignoring paging.
    #[must_use]
    pub fn build_count(&self) -> SelectStatement {
        let mut stmt = self.base.clone();
        stmt.expr_as(Expr::cust("COUNT(*)"), Alias::new("count"));
        stmt
    }

    /// The page of rows as a derived table source: `columns` of the
    /// current alias, labelled `c0`, `c1`, ... Used to restrict the
    /// expansion and collection queries to the parents being read.
    #[must_use]
    pub fn source(&self, columns: &[&str]) -> SelectStatement {
        let mut stmt = self.base.clone();
        for (i, c) in columns.iter().enumerate() {
            stmt.expr_as(col(&self.alias, c), Alias::new(format!("c{i}")));
        }
        if !self.page.is_paged() {
            // Order is irrelevant for an unpaged restriction.
            return stmt;
        }
        self.paged(stmt)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn visibility_follows_groups() {
        let edm = Edm::default();
        let mm = Metamodel::default();
        let cfg = QueryConfig::default();
        let ctx = QueryContext::new(&edm, &mm, &cfg, SqlBackend::Sqlite);
        let hr = vec!["hr".to_owned()];
        assert!(ctx.is_visible(&[]));
        assert!(!ctx.is_visible(&hr));
        assert!(matches!(
            ctx.check_visible("Salary", &hr),
            Err(QueryError::Forbidden(p)) if p == "Salary"
        ));

        let granted = ctx.with_groups(&hr);
        assert!(granted.is_visible(&hr));
    }

    #[test]
    fn join_labels_are_prefixed() {
        assert_eq!(join_label("id"), "__jid");
    }
}
