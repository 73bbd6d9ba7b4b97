//! The resource path as a chain of tables, and the join conditions that
//! connect them.

use odata_edm::FullQualifiedName;
use odata_uri::{KeyPredicate, UriInfo, UriInfoKind, UriResource};
use sea_orm::sea_query::{
    Alias, Condition, ConditionalStatement, Expr, JoinType, Query, SelectStatement, SimpleExpr,
};

use crate::error::{QueryError, QueryResult};
use crate::mapping::{Association, EntityMeta, JoinColumn, Metamodel};

/// Column reference `table.column`.
#[must_use]
pub fn col(table: &str, column: &str) -> Expr {
    Expr::col((Alias::new(table), Alias::new(column)))
}

/// Conjunction of `exprs`; true when empty.
#[must_use]
pub fn all_of(exprs: impl IntoIterator<Item = SimpleExpr>) -> SimpleExpr {
    exprs
        .into_iter()
        .reduce(SimpleExpr::and)
        .unwrap_or_else(|| Expr::cust("1=1"))
}

/// One entity set, singleton or navigation segment of the path.
#[derive(Debug, Clone)]
pub struct NavigationHop {
    /// Table alias, `t0` for the root.
    pub alias: String,
    pub entity_type: FullQualifiedName,
    pub type_filter: Option<FullQualifiedName>,
    pub keys: Vec<KeyPredicate>,
    /// How the hop is reached from the previous one; `None` for the root.
    pub association: Option<Association>,
    /// The hop addresses several rows.
    pub collection: bool,
}

impl NavigationHop {
    /// Cast type if present, else the declared type.
    #[must_use]
    pub fn effective_type(&self) -> &FullQualifiedName {
        self.type_filter.as_ref().unwrap_or(&self.entity_type)
    }
}

/// Property addressed after the last hop (`People(1)/HomeAddress/City`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyTarget {
    /// `/`-joined property path.
    pub path: String,
    pub complex: bool,
    pub collection: bool,
}

/// What the request returns from the last hop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TargetKind {
    #[default]
    Entities,
    Count,
    /// `$value`: raw property value or media stream.
    Value,
    Reference,
}

#[derive(Debug, Clone)]
pub struct NavigationInfo {
    pub hops: Vec<NavigationHop>,
    pub property: Option<PropertyTarget>,
    pub target: TargetKind,
}

impl NavigationInfo {
    /// Walks the resource parts of a resource request.
    ///
    /// # Errors
    /// [`QueryError::NotImplemented`] for service, metadata, batch and
    /// cross-join requests and for operation segments;
    /// [`QueryError::Mapping`] when a navigation has no join path.
    pub fn from_uri_info(metamodel: &Metamodel, info: &UriInfo) -> QueryResult<Self> {
        if info.kind != UriInfoKind::Resource {
            return Err(QueryError::not_implemented(format!(
                "{:?} requests",
                info.kind
            )));
        }
        let mut nav = Self {
            hops: Vec::new(),
            property: None,
            target: TargetKind::Entities,
        };
        for part in &info.resource_parts {
            nav.push(metamodel, part)?;
        }
        if nav.hops.is_empty() {
            return Err(QueryError::invalid("the request addresses no entity"));
        }
        Ok(nav)
    }

    fn push(&mut self, metamodel: &Metamodel, part: &UriResource) -> QueryResult<()> {
        match part {
            UriResource::EntitySet {
                entity_type,
                keys,
                type_filter,
                ..
            } if self.hops.is_empty() => {
                self.root(entity_type, type_filter.as_ref(), keys.clone(), keys.is_empty());
            }
            UriResource::Singleton {
                entity_type,
                type_filter,
                ..
            } if self.hops.is_empty() => {
                self.root(entity_type, type_filter.as_ref(), Vec::new(), false);
            }
            UriResource::Navigation {
                name,
                target,
                collection,
                keys,
                type_filter,
            } => {
                if self.property.is_some() {
                    return Err(QueryError::not_implemented(
                        "navigation through complex properties",
                    ));
                }
                let owner = self.last_type()?;
                let association = metamodel.entity(owner)?.association(name)?.clone();
                self.hops.push(NavigationHop {
                    alias: format!("t{}", self.hops.len()),
                    entity_type: target.clone(),
                    type_filter: type_filter.clone(),
                    keys: keys.clone(),
                    association: Some(association),
                    collection: *collection && keys.is_empty(),
                });
            }
            UriResource::PrimitiveProperty {
                name, collection, ..
            } => self.property(name, false, *collection),
            UriResource::ComplexProperty {
                name, collection, ..
            } => self.property(name, true, *collection),
            UriResource::Count => self.target = TargetKind::Count,
            UriResource::Value => self.target = TargetKind::Value,
            UriResource::Ref => self.target = TargetKind::Reference,
            other => {
                return Err(QueryError::not_implemented(format!(
                    "'{}' segments",
                    other.segment()
                )));
            }
        }
        Ok(())
    }

    fn root(
        &mut self,
        entity_type: &FullQualifiedName,
        type_filter: Option<&FullQualifiedName>,
        keys: Vec<KeyPredicate>,
        collection: bool,
    ) {
        self.hops.push(NavigationHop {
            alias: "t0".to_owned(),
            entity_type: entity_type.clone(),
            type_filter: type_filter.cloned(),
            keys,
            association: None,
            collection,
        });
    }

    fn property(&mut self, name: &str, complex: bool, collection: bool) {
        let path = match &self.property {
            Some(p) => format!("{}/{name}", p.path),
            None => name.to_owned(),
        };
        self.property = Some(PropertyTarget {
            path,
            complex,
            collection,
        });
    }

    fn last_type(&self) -> QueryResult<&FullQualifiedName> {
        self.hops
            .last()
            .map(NavigationHop::effective_type)
            .ok_or_else(|| QueryError::invalid("navigation without a source"))
    }

    #[must_use]
    pub fn last(&self) -> &NavigationHop {
        // `from_uri_info` guarantees at least one hop.
        &self.hops[self.hops.len() - 1]
    }

    /// The request returns more than one entity or value.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        match &self.property {
            Some(p) => p.collection,
            None => self.last().collection,
        }
    }
}

/// Alias of the link table used to reach `target_alias`.
fn link_alias(target_alias: &str) -> String {
    format!("{target_alias}_l")
}

/// `target.tcol = owner.scol` for every join column.
pub fn join_on(owner: &str, target: &str, columns: &[JoinColumn]) -> SimpleExpr {
    all_of(
        columns
            .iter()
            .map(|j| col(target, &j.target).equals((Alias::new(owner), Alias::new(&j.source)))),
    )
}

/// Joins the association's target table as `target_alias` onto a statement
/// that already has `owner_alias`. A join table adds a second join.
pub fn join_association(
    select: &mut SelectStatement,
    join: JoinType,
    association: &Association,
    owner_alias: &str,
    target_table: &str,
    target_alias: &str,
) {
    match &association.join_table {
        Some(jt) => {
            let link = link_alias(target_alias);
            select.join_as(
                join,
                Alias::new(&jt.table),
                Alias::new(&link),
                Condition::all().add(join_on(owner_alias, &link, &jt.source)),
            );
            select.join_as(
                join,
                Alias::new(target_table),
                Alias::new(target_alias),
                Condition::all().add(join_on(&link, target_alias, &jt.target)),
            );
        }
        None => {
            select.join_as(
                join,
                Alias::new(target_table),
                Alias::new(target_alias),
                Condition::all().add(join_on(owner_alias, target_alias, &association.join_columns)),
            );
        }
    }
}

/// Restricts a statement selecting from `target_alias` to the rows related
/// to the current row of the enclosing `owner_alias`.
pub fn correlate(
    select: &mut SelectStatement,
    association: &Association,
    owner_alias: &str,
    target_alias: &str,
) {
    match &association.join_table {
        Some(jt) => {
            let link = link_alias(target_alias);
            select.join_as(
                JoinType::InnerJoin,
                Alias::new(&jt.table),
                Alias::new(&link),
                Condition::all().add(join_on(&link, target_alias, &jt.target)),
            );
            select.and_where(join_on(owner_alias, &link, &jt.source));
        }
        None => {
            select.and_where(join_on(owner_alias, target_alias, &association.join_columns));
        }
    }
}

/// Target-side expressions that must equal the owner's source columns,
/// joining the link table if there is one. Returned in the order of
/// [`Association::source_columns`].
pub fn link_back(
    select: &mut SelectStatement,
    association: &Association,
    target_alias: &str,
) -> Vec<SimpleExpr> {
    match &association.join_table {
        Some(jt) => {
            let link = link_alias(target_alias);
            select.join_as(
                JoinType::InnerJoin,
                Alias::new(&jt.table),
                Alias::new(&link),
                Condition::all().add(join_on(&link, target_alias, &jt.target)),
            );
            jt.source.iter().map(|j| col(&link, &j.target).into()).collect()
        }
        None => association
            .join_columns
            .iter()
            .map(|j| col(target_alias, &j.target).into())
            .collect(),
    }
}

/// `exprs IN (SELECT s.c0, s.c1, ... FROM (source) AS s)`. The derived
/// table keeps `LIMIT` legal inside the `IN` on every backend.
#[must_use]
pub fn in_source(exprs: Vec<SimpleExpr>, source: SelectStatement) -> SimpleExpr {
    let mut wrapped = Query::select();
    for i in 0..exprs.len() {
        wrapped.column((Alias::new("s"), Alias::new(format!("c{i}"))));
    }
    wrapped.from_subquery(source, Alias::new("s"));
    match <[SimpleExpr; 1]>::try_from(exprs) {
        Ok([single]) => Expr::expr(single).in_subquery(wrapped),
        Err(many) => Expr::tuple(many).in_subquery(wrapped),
    }
}

/// Discriminator restriction of `meta` at `alias`, if the type has one.
#[must_use]
pub fn discriminator(meta: &EntityMeta, alias: &str) -> Option<SimpleExpr> {
    meta.discriminator
        .as_ref()
        .map(|(column, values)| col(alias, column).is_in(values.iter().map(String::as_str)))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::mapping::JoinTable;
    use sea_orm::sea_query::SqliteQueryBuilder;

    fn direct() -> Association {
        Association {
            name: "Orders".to_owned(),
            target: FullQualifiedName::new("Demo", "Order"),
            collection: true,
            join_columns: vec![JoinColumn {
                source: "id".to_owned(),
                target: "customer_id".to_owned(),
            }],
            join_table: None,
        }
    }

    fn through_link() -> Association {
        Association {
            name: "Friends".to_owned(),
            target: FullQualifiedName::new("Demo", "Person"),
            collection: true,
            join_columns: Vec::new(),
            join_table: Some(JoinTable {
                table: "friendships".to_owned(),
                source: vec![JoinColumn {
                    source: "id".to_owned(),
                    target: "person_id".to_owned(),
                }],
                target: vec![JoinColumn {
                    source: "friend_id".to_owned(),
                    target: "id".to_owned(),
                }],
            }),
        }
    }

    #[test]
    fn joins_follow_join_columns() {
        let mut q = Query::select();
        q.column((Alias::new("t1"), Alias::new("id")))
            .from_as(Alias::new("people"), Alias::new("t0"));
        join_association(&mut q, JoinType::InnerJoin, &direct(), "t0", "orders", "t1");
        assert_eq!(
            q.to_string(SqliteQueryBuilder),
            r#"SELECT "t1"."id" FROM "people" AS "t0" INNER JOIN "orders" AS "t1" ON "t1"."customer_id" = "t0"."id""#
        );
    }

    #[test]
    fn join_tables_add_a_link_join() {
        let mut q = Query::select();
        q.column((Alias::new("t1"), Alias::new("id")))
            .from_as(Alias::new("people"), Alias::new("t0"));
        join_association(&mut q, JoinType::InnerJoin, &through_link(), "t0", "people", "t1");
        assert_eq!(
            q.to_string(SqliteQueryBuilder),
            concat!(
                r#"SELECT "t1"."id" FROM "people" AS "t0" "#,
                r#"INNER JOIN "friendships" AS "t1_l" ON "t1_l"."person_id" = "t0"."id" "#,
                r#"INNER JOIN "people" AS "t1" ON "t1"."id" = "t1_l"."friend_id""#
            )
        );
    }

    #[test]
    fn correlation_moves_the_owner_side_to_where() {
        let mut q = Query::select();
        q.expr(Expr::cust("1"))
            .from_as(Alias::new("people"), Alias::new("f0"));
        correlate(&mut q, &through_link(), "t0", "f0");
        assert_eq!(
            q.to_string(SqliteQueryBuilder),
            concat!(
                r#"SELECT 1 FROM "people" AS "f0" "#,
                r#"INNER JOIN "friendships" AS "f0_l" ON "f0"."id" = "f0_l"."friend_id" "#,
                r#"WHERE "f0_l"."person_id" = "t0"."id""#
            )
        );
    }

    #[test]
    fn link_back_returns_marker_expressions() {
        let mut q = Query::select();
        q.from_as(Alias::new("orders"), Alias::new("e1"));
        let markers = link_back(&mut q, &direct(), "e1");
        assert_eq!(markers.len(), 1);
        assert_eq!(direct().source_columns(), vec!["id"]);
    }

    #[test]
    fn restrictions_select_from_a_derived_source() {
        let mut source = Query::select();
        source
            .expr_as(col("t0", "id"), Alias::new("c0"))
            .from_as(Alias::new("people"), Alias::new("t0"))
            .limit(2);
        let mut q = Query::select();
        q.column((Alias::new("e1"), Alias::new("id")))
            .from_as(Alias::new("orders"), Alias::new("e1"))
            .and_where(in_source(vec![col("e1", "customer_id").into()], source));
        let sql = q.to_string(SqliteQueryBuilder);
        assert!(
            sql.contains(r#"WHERE "e1"."customer_id" IN (SELECT "s"."c0" FROM (SELECT "t0"."id" AS "c0" FROM "people" AS "t0" LIMIT 2) AS "s")"#),
            "{sql}"
        );

        let mut q = Query::select();
        q.expr(Expr::cust("1"))
            .from_as(Alias::new("order_items"), Alias::new("v"))
            .and_where(in_source(
                vec![col("v", "order_id").into(), col("v", "line").into()],
                Query::select().expr_as(Expr::cust("1"), Alias::new("c0")).to_owned(),
            ));
        let sql = q.to_string(SqliteQueryBuilder);
        assert!(sql.contains(r#"("v"."order_id", "v"."line") IN (SELECT "s"."c0", "s"."c1""#), "{sql}");
    }
}
