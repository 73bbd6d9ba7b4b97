//! `$expand`: one child query per expanded navigation, restricted to the
//! parents of the enclosing query.
//!
//! Child rows carry marker columns (`__p0`, ...) with the values of the
//! parent's join columns; the processor groups them by marker and attaches
//! each group to the parent row with the same hidden `__j` values.

use odata_edm::{FullQualifiedName, PrimitiveKind};
use odata_uri::{ExpandItem, ExpandOption, Levels, QueryOptions, UriResource};
use sea_orm::sea_query::{Alias, ConditionalStatement, Query, SimpleExpr};

use crate::collection::{self, CollectionQuery, marker_label};
use crate::config::Page;
use crate::error::{QueryError, QueryResult};
use crate::mapping::{Association, EntityMeta};
use crate::navigation::{discriminator, in_source, link_back};
use crate::query::{JoinQuery, QueryContext, SelectQuery, join_label};
use crate::row::OutputColumn;

/// Label of the per-parent count of a `/$count` expansion.
pub const COUNT_LABEL: &str = "count";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandKind {
    Entities,
    /// `Nav/$count`
    Count,
    /// `Nav/$ref`
    Reference,
}

/// A planned expansion with its nested expansions and collections.
#[derive(Debug, Clone)]
pub struct ExpandQuery<'a> {
    /// Navigation property name, the key in the parent object.
    pub name: String,
    pub association: &'a Association,
    pub target: &'a EntityMeta,
    pub kind: ExpandKind,
    pub query: SelectQuery,
    pub markers: Vec<String>,
    /// Hidden labels on parent rows matching `markers`.
    pub parent_columns: Vec<String>,
    /// Per-parent paging and count.
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub count: bool,
    pub expands: Vec<ExpandQuery<'a>>,
    pub collections: Vec<CollectionQuery<'a>>,
}

impl<'a> ExpandQuery<'a> {
    /// Owner columns the parent query must carry.
    #[must_use]
    pub fn parent_join_columns(&self) -> Vec<&'a str> {
        self.association.source_columns()
    }
}

/// Distinct owner columns needed by `expands` and `collections`.
#[must_use]
pub fn join_columns<'a>(
    expands: &[ExpandQuery<'a>],
    collections: &[CollectionQuery<'a>],
) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::new();
    for c in expands
        .iter()
        .flat_map(ExpandQuery::parent_join_columns)
        .chain(collections.iter().flat_map(CollectionQuery::owner_join_columns))
    {
        if !out.contains(&c) {
            out.push(c);
        }
    }
    out
}

/// One requested expansion, after `*` and `$levels` are resolved.
struct Request<'a> {
    name: &'a str,
    type_filter: Option<&'a FullQualifiedName>,
    kind: ExpandKind,
    options: &'a QueryOptions,
    /// Further repetitions asked for by `$levels`.
    levels: u32,
}

/// Expansions of `option` below `parent`. `depth` is the nesting level of
/// the expansions being planned, starting at 1.
///
/// # Errors
/// [`QueryError::Invalid`] when nesting exceeds the configured depth,
/// [`QueryError::NotImplemented`] for navigations inside complex
/// properties, and any error of the child queries.
pub fn plan<'a>(
    ctx: &'a QueryContext<'a>,
    parent: &JoinQuery<'a>,
    option: &'a ExpandOption,
    depth: u32,
) -> QueryResult<Vec<ExpandQuery<'a>>> {
    if depth > ctx.config.max_expand_depth {
        return Err(QueryError::invalid(format!(
            "$expand is nested deeper than {} levels",
            ctx.config.max_expand_depth
        )));
    }
    let mut out = Vec::new();
    for item in &option.items {
        for request in requests(ctx, parent.meta(), item, depth)? {
            out.push(child(ctx, parent, &request, depth)?);
        }
    }
    Ok(out)
}

fn requests<'a>(
    ctx: &QueryContext<'_>,
    meta: &'a EntityMeta,
    item: &'a ExpandItem,
    depth: u32,
) -> QueryResult<Vec<Request<'a>>> {
    let kind = if item.is_count {
        ExpandKind::Count
    } else if item.is_ref {
        ExpandKind::Reference
    } else {
        ExpandKind::Entities
    };
    let levels = match item.options.levels {
        None => 0,
        Some(Levels::Value(n)) => n.saturating_sub(1),
        // `max` stops at the configured depth.
        Some(Levels::Max) => ctx.config.max_expand_depth.saturating_sub(depth),
    };
    if item.star {
        return Ok(meta
            .associations
            .iter()
            .map(|a| Request {
                name: &a.name,
                type_filter: None,
                kind,
                options: &item.options,
                levels,
            })
            .collect());
    }
    match item.path.as_slice() {
        [UriResource::Navigation {
            name, type_filter, ..
        }] => Ok(vec![Request {
            name,
            type_filter: type_filter.as_ref(),
            kind,
            options: &item.options,
            levels,
        }]),
        _ => Err(QueryError::not_implemented(
            "$expand of navigations inside complex properties",
        )),
    }
}

fn child<'a>(
    ctx: &'a QueryContext<'a>,
    parent: &JoinQuery<'a>,
    request: &Request<'a>,
    depth: u32,
) -> QueryResult<ExpandQuery<'a>> {
    let association = parent.meta().association(request.name)?;
    let target = ctx
        .metamodel
        .entity(request.type_filter.unwrap_or(&association.target))?;
    let alias = format!("e{depth}");

    let mut base = Query::select();
    base.from_as(Alias::new(&target.table), Alias::new(&alias));
    if let Some(d) = discriminator(target, &alias) {
        base.and_where(d);
    }
    let links = link_back(&mut base, association, &alias);
    let sources = association.source_columns();
    base.and_where(in_source(links.clone(), parent.source(&sources)));

    let query = JoinQuery::over(ctx, target, &alias, base, request.options, Page::default())?;
    let mut expands = match (&request.options.expand, request.kind) {
        (Some(nested), ExpandKind::Entities) => plan(ctx, &query, nested, depth + 1)?,
        _ => Vec::new(),
    };
    if request.levels > 0 && request.kind == ExpandKind::Entities {
        if depth >= ctx.config.max_expand_depth {
            return Err(QueryError::invalid(format!(
                "$levels exceeds the maximum expansion depth of {}",
                ctx.config.max_expand_depth
            )));
        }
        let next = Request {
            levels: request.levels - 1,
            ..*request
        };
        if target.association(request.name).is_ok() {
            expands.push(child(ctx, &query, &next, depth + 1)?);
        }
    }
    let collections = match request.kind {
        ExpandKind::Entities => collection::plan(&query)?,
        _ => Vec::new(),
    };

    let hidden = join_columns(&expands, &collections);
    let mut select = match request.kind {
        ExpandKind::Entities => query.build(&hidden)?,
        ExpandKind::Reference => {
            let keys: Vec<_> = target.keys().collect();
            query.build_attributes(&keys, &[])
        }
        ExpandKind::Count => SelectQuery {
            statement: query.build_count(),
            columns: vec![OutputColumn::value(COUNT_LABEL, PrimitiveKind::Int64, None)],
        },
    };
    let markers = add_markers(&mut select, &links);
    if request.kind == ExpandKind::Count {
        select.statement.add_group_by(links);
    }

    Ok(ExpandQuery {
        name: request.name.to_owned(),
        association,
        target,
        kind: request.kind,
        query: select,
        markers,
        parent_columns: sources.iter().map(|s| join_label(s)).collect(),
        top: request.options.top,
        skip: request.options.skip,
        count: request.options.count == Some(true),
        expands,
        collections,
    })
}

fn add_markers(select: &mut SelectQuery, links: &[SimpleExpr]) -> Vec<String> {
    links
        .iter()
        .enumerate()
        .map(|(k, e)| {
            let label = marker_label(k);
            select.statement.expr_as(e.clone(), Alias::new(&label));
            select.columns.push(OutputColumn::hidden(label.clone()));
            label
        })
        .collect()
}
