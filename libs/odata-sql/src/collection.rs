//! Queries loading collection-valued properties from their own tables.

use sea_orm::sea_query::{Alias, ConditionalStatement, Order, OrderedStatement, Query, SimpleExpr};

use crate::error::QueryResult;
use crate::mapping::{CollectionAttribute, CollectionElement};
use crate::navigation::{col, in_source};
use crate::query::{JoinQuery, SelectQuery, join_label};
use crate::row::OutputColumn;

const ALIAS: &str = "v";

/// Label of the element value of a primitive collection.
pub const VALUE_LABEL: &str = "value";

/// Label of the `k`-th correlation column of a child row.
#[must_use]
pub fn marker_label(k: usize) -> String {
    format!("__p{k}")
}

/// Elements of one collection attribute for every owner the main query
/// reads, ordered by owner and position.
#[derive(Debug, Clone)]
pub struct CollectionQuery<'a> {
    pub attribute: &'a CollectionAttribute,
    pub query: SelectQuery,
    /// Hidden labels on element rows.
    pub markers: Vec<String>,
    /// Hidden labels on owner rows matching `markers`.
    pub owner_columns: Vec<String>,
}

impl<'a> CollectionQuery<'a> {
    #[must_use]
    pub fn new(owner: &JoinQuery<'_>, attribute: &'a CollectionAttribute) -> Self {
        let targets: Vec<SimpleExpr> = attribute
            .join_columns
            .iter()
            .map(|j| col(ALIAS, &j.target).into())
            .collect();
        let sources: Vec<&str> = attribute
            .join_columns
            .iter()
            .map(|j| j.source.as_str())
            .collect();

        let mut stmt = Query::select();
        stmt.from_as(Alias::new(&attribute.table), Alias::new(ALIAS));
        let mut columns = Vec::new();
        let mut markers = Vec::new();
        for (k, e) in targets.iter().enumerate() {
            stmt.expr_as(e.clone(), Alias::new(marker_label(k)));
            columns.push(OutputColumn::hidden(marker_label(k)));
            markers.push(marker_label(k));
        }
        match &attribute.element {
            CollectionElement::Primitive { column, kind, ty } => {
                stmt.expr_as(col(ALIAS, column), Alias::new(VALUE_LABEL));
                columns.push(OutputColumn::value(VALUE_LABEL, *kind, Some(ty)));
            }
            CollectionElement::Complex { attributes } => {
                for a in attributes {
                    stmt.expr_as(col(ALIAS, &a.column), Alias::new(&a.path));
                    columns.push(OutputColumn::value(&a.path, a.kind, Some(&a.ty)));
                }
            }
        }
        for e in &targets {
            stmt.order_by_expr(e.clone(), Order::Asc);
        }
        if let Some(order) = &attribute.order_column {
            stmt.order_by_expr(col(ALIAS, order).into(), Order::Asc);
        }
        stmt.and_where(in_source(targets, owner.source(&sources)));

        Self {
            attribute,
            query: SelectQuery {
                statement: stmt,
                columns,
            },
            markers,
            owner_columns: sources.iter().map(|s| join_label(s)).collect(),
        }
    }

    /// Owner columns the main query must carry.
    #[must_use]
    pub fn owner_join_columns(&self) -> Vec<&'a str> {
        self.attribute
            .join_columns
            .iter()
            .map(|j| j.source.as_str())
            .collect()
    }
}

/// Collection queries for every collection in the owner's selection.
///
/// # Errors
/// See [`JoinQuery::selection`].
pub fn plan<'a>(owner: &JoinQuery<'a>) -> QueryResult<Vec<CollectionQuery<'a>>> {
    let selection = owner.selection()?;
    Ok(selection
        .collections
        .into_iter()
        .map(|c| CollectionQuery::new(owner, c))
        .collect())
}
