//! Runs resolved requests against a database and assembles the response
//! payload.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use odata_edm::{Edm, FullQualifiedName, PrimitiveKind};
use odata_uri::{QueryOptions, UriInfo};
use sea_orm::sea_query::{Alias, SelectStatement};
use sea_orm::{ConnectionTrait, Statement};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::apply;
use crate::collection::{self, CollectionQuery, VALUE_LABEL};
use crate::config::{Page, QueryConfig, SqlBackend};
use crate::error::{MappingError, QueryError, QueryResult};
use crate::expand::{self, COUNT_LABEL, ExpandKind, ExpandQuery, join_columns};
use crate::mapping::{Attribute, CollectionElement, EntityMeta, Metamodel};
use crate::navigation::{NavigationInfo, TargetKind, col};
use crate::query::{JoinQuery, QueryContext, SelectQuery};
use crate::row::{DecodedRow, decode_rows, insert_path};

const MEDIA_LABEL: &str = "__media";

/// One page of a collection response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityCollection {
    /// Matching rows before paging, for `$count=true`.
    pub count: Option<u64>,
    /// Offset of the next server page when this one was cut by the page
    /// size.
    pub next_skip: Option<u64>,
    pub value: Vec<Value>,
}

impl EntityCollection {
    /// JSON body. `request_url` is the base of `@odata.nextLink`; without it
    /// no link is emitted.
    #[must_use]
    pub fn to_json(&self, request_url: Option<&str>) -> Value {
        let mut out = Map::new();
        if let Some(count) = self.count {
            out.insert("@odata.count".to_owned(), Value::from(count));
        }
        out.insert("value".to_owned(), Value::Array(self.value.clone()));
        if let (Some(skip), Some(url)) = (self.next_skip, request_url) {
            out.insert("@odata.nextLink".to_owned(), Value::String(next_link(url, skip)));
        }
        Value::Object(out)
    }
}

/// Result of [`QueryProcessor::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult {
    Collection(EntityCollection),
    Entity(Map<String, Value>),
    /// A property, a collection property or the value of a complex one.
    Value(Value),
    /// `$value` of a primitive property.
    Raw(String),
    Count(u64),
    /// `$value` of a media entity.
    Media {
        content_type: Option<String>,
        data: Vec<u8>,
    },
}

impl ReadResult {
    #[must_use]
    pub fn to_json(&self, request_url: Option<&str>) -> Value {
        match self {
            Self::Collection(c) => c.to_json(request_url),
            Self::Entity(e) => Value::Object(e.clone()),
            Self::Value(v) => {
                let mut out = Map::new();
                out.insert("value".to_owned(), v.clone());
                Value::Object(out)
            }
            Self::Raw(text) => Value::String(text.clone()),
            Self::Count(n) => Value::from(*n),
            Self::Media { content_type, data } => {
                let mut out = Map::new();
                out.insert(
                    "@odata.mediaContentType".to_owned(),
                    content_type.clone().map_or(Value::Null, Value::String),
                );
                out.insert("value".to_owned(), Value::String(STANDARD.encode(data)));
                Value::Object(out)
            }
        }
    }
}

/// SQL of one statement a request runs, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStatement {
    /// `main`, `count`, `expand Orders/Items`, `collection Tags`, ...
    pub name: String,
    pub sql: String,
}

/// Translates read requests over one mapped database.
#[derive(Debug)]
pub struct QueryProcessor {
    edm: Edm,
    metamodel: Metamodel,
    config: QueryConfig,
    groups: Vec<String>,
}

impl QueryProcessor {
    #[must_use]
    pub fn new(edm: Edm, metamodel: Metamodel, config: QueryConfig) -> Self {
        Self {
            edm,
            metamodel,
            config,
            groups: Vec::new(),
        }
    }

    /// Field groups granted to the caller; attributes of other groups are
    /// hidden.
    #[must_use]
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    #[must_use]
    pub fn edm(&self) -> &Edm {
        &self.edm
    }

    #[must_use]
    pub fn metamodel(&self) -> &Metamodel {
        &self.metamodel
    }

    #[must_use]
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    fn context(&self, backend: SqlBackend) -> QueryContext<'_> {
        QueryContext::new(&self.edm, &self.metamodel, &self.config, backend)
            .with_groups(&self.groups)
    }

    /// The statements `info` would run, rendered for `backend`.
    ///
    /// # Errors
    /// Any translation error of [`execute`](Self::execute).
    pub fn statements(
        &self,
        backend: SqlBackend,
        info: &UriInfo,
    ) -> QueryResult<Vec<PlannedStatement>> {
        let nav = NavigationInfo::from_uri_info(&self.metamodel, info)?;
        let ctx = self.context(backend);
        let mut out = Vec::new();
        match prepare(&ctx, &nav, info)? {
            Planned::Read(plan) => {
                out.push(planned("main", plan.main.sql(backend)));
                if let Some(count) = &plan.count {
                    out.push(planned("count", backend.render(count)));
                }
                list_children(backend, "", &plan.expands, &plan.collections, &mut out);
            }
            Planned::Count(stmt) => out.push(planned("count", backend.render(&stmt))),
            Planned::Property(PropertyQuery::Attributes { query, .. }) => {
                out.push(planned("property", query.sql(backend)));
            }
            Planned::Property(PropertyQuery::Collection(c)) => {
                out.push(planned(
                    format!("collection {}", c.attribute.path),
                    c.query.sql(backend),
                ));
            }
            Planned::Media { statement, .. } => {
                out.push(planned("media", backend.render(&statement)));
            }
        }
        Ok(out)
    }

    /// Runs a resource request.
    ///
    /// # Errors
    /// [`QueryError::NotFound`] when a single entity or property is
    /// addressed and nothing matches; translation errors; database errors.
    #[instrument(skip_all, fields(parts = info.resource_parts.len()))]
    pub async fn execute<C: ConnectionTrait>(
        &self,
        conn: &C,
        info: &UriInfo,
    ) -> QueryResult<ReadResult> {
        let nav = NavigationInfo::from_uri_info(&self.metamodel, info)?;
        let ctx = self.context(SqlBackend::from_db(conn.get_database_backend()));
        match prepare(&ctx, &nav, info)? {
            Planned::Read(plan) => {
                let mut read = self.run_read(conn, &plan).await?;
                if nav.target == TargetKind::Reference {
                    read.value = read
                        .value
                        .iter()
                        .filter_map(Value::as_object)
                        .map(|e| self.reference(plan.meta, e))
                        .collect();
                }
                if nav.is_collection() {
                    return Ok(ReadResult::Collection(read));
                }
                match read.value.into_iter().next() {
                    Some(Value::Object(entity)) => Ok(ReadResult::Entity(entity)),
                    _ => Err(QueryError::NotFound),
                }
            }
            Planned::Count(stmt) => Ok(ReadResult::Count(fetch_count(conn, &stmt).await?)),
            Planned::Property(property) => self.run_property(conn, &property, nav.target).await,
            Planned::Media { statement, mime } => {
                let row = conn
                    .query_one(statement_for(conn, &statement))
                    .await?
                    .ok_or(QueryError::NotFound)?;
                let data = match row.try_get::<Option<Vec<u8>>>("", MEDIA_LABEL) {
                    Ok(bytes) => bytes.unwrap_or_default(),
                    Err(_) => row
                        .try_get::<Option<String>>("", MEDIA_LABEL)?
                        .map(String::into_bytes)
                        .unwrap_or_default(),
                };
                let content_type = match mime {
                    Some(a) => row.try_get::<Option<String>>("", &a.path)?,
                    None => None,
                };
                Ok(ReadResult::Media { content_type, data })
            }
        }
    }

    /// Reads an entity collection.
    ///
    /// # Errors
    /// [`QueryError::Invalid`] when `info` does not address a collection,
    /// plus the errors of [`execute`](Self::execute).
    pub async fn read<C: ConnectionTrait>(
        &self,
        conn: &C,
        info: &UriInfo,
    ) -> QueryResult<EntityCollection> {
        match self.execute(conn, info).await? {
            ReadResult::Collection(c) => Ok(c),
            _ => Err(QueryError::invalid("the request does not address a collection")),
        }
    }

    /// Reads a single entity.
    ///
    /// # Errors
    /// [`QueryError::NotFound`] when no entity matches.
    pub async fn read_entity<C: ConnectionTrait>(
        &self,
        conn: &C,
        info: &UriInfo,
    ) -> QueryResult<Map<String, Value>> {
        match self.execute(conn, info).await? {
            ReadResult::Entity(e) => Ok(e),
            _ => Err(QueryError::invalid("the request does not address an entity")),
        }
    }

    /// Reads the value of a property.
    ///
    /// # Errors
    /// [`QueryError::NotFound`] when the owning entity does not exist.
    pub async fn read_property<C: ConnectionTrait>(
        &self,
        conn: &C,
        info: &UriInfo,
    ) -> QueryResult<Value> {
        match self.execute(conn, info).await? {
            ReadResult::Value(v) => Ok(v),
            _ => Err(QueryError::invalid("the request does not address a property")),
        }
    }

    /// Runs a `/$count` request.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn count<C: ConnectionTrait>(&self, conn: &C, info: &UriInfo) -> QueryResult<u64> {
        match self.execute(conn, info).await? {
            ReadResult::Count(n) => Ok(n),
            _ => Err(QueryError::invalid("the request is not a $count request")),
        }
    }

    async fn run_read<C: ConnectionTrait>(
        &self,
        conn: &C,
        plan: &ReadPlan<'_>,
    ) -> QueryResult<EntityCollection> {
        let mut rows = self.fetch(conn, &plan.main).await?;
        let read = rows.len();
        let value = if plan.entities {
            self.attach(conn, &mut rows, &plan.expands, &plan.collections)
                .await?;
            rows.into_iter()
                .map(|r| entity_json(plan.meta, r))
                .collect()
        } else {
            rows.into_iter().map(|r| Value::Object(r.object)).collect()
        };
        let count = match &plan.count {
            Some(stmt) => Some(fetch_count(conn, stmt).await?),
            None => None,
        };
        let full = plan
            .page
            .top
            .is_some_and(|top| u64::try_from(read).is_ok_and(|n| n == top));
        let next_skip = if plan.page.server_limited && full {
            plan.page.next_skip()
        } else {
            None
        };
        debug!(rows = read, ?next_skip, "read completed");
        Ok(EntityCollection {
            count,
            next_skip,
            value,
        })
    }

    async fn run_property<C: ConnectionTrait>(
        &self,
        conn: &C,
        property: &PropertyQuery<'_>,
        target: TargetKind,
    ) -> QueryResult<ReadResult> {
        match property {
            PropertyQuery::Collection(c) => {
                let values: Vec<Value> = self
                    .fetch(conn, &c.query)
                    .await?
                    .into_iter()
                    .map(|r| element_value(&c.attribute.element, r))
                    .collect();
                match target {
                    TargetKind::Count => Ok(ReadResult::Count(
                        u64::try_from(values.len()).unwrap_or(u64::MAX),
                    )),
                    _ => Ok(ReadResult::Value(Value::Array(values))),
                }
            }
            PropertyQuery::Attributes { query, path } => {
                let row = self
                    .fetch(conn, query)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or(QueryError::NotFound)?;
                let value = value_at(&row.object, path).cloned().unwrap_or(Value::Null);
                match target {
                    TargetKind::Value => match value {
                        Value::Null => Err(QueryError::NotFound),
                        Value::String(s) => Ok(ReadResult::Raw(s)),
                        other => Ok(ReadResult::Raw(other.to_string())),
                    },
                    TargetKind::Count => Err(QueryError::invalid(
                        "$count applies to collection-valued properties only",
                    )),
                    _ => Ok(ReadResult::Value(value)),
                }
            }
        }
    }

    /// Loads collections and expansions and puts them on `parents`.
    async fn attach<C: ConnectionTrait>(
        &self,
        conn: &C,
        parents: &mut [DecodedRow],
        expands: &[ExpandQuery<'_>],
        collections: &[CollectionQuery<'_>],
    ) -> QueryResult<()> {
        if parents.is_empty() {
            return Ok(());
        }
        for c in collections {
            let mut groups: HashMap<String, Vec<Value>> = HashMap::new();
            for row in self.fetch(conn, &c.query).await? {
                let key = row.key(&c.markers);
                groups
                    .entry(key)
                    .or_default()
                    .push(element_value(&c.attribute.element, row));
            }
            let path: Vec<String> = c.attribute.path.split('/').map(str::to_owned).collect();
            for parent in parents.iter_mut() {
                let values = groups
                    .get(&parent.key(&c.owner_columns))
                    .cloned()
                    .unwrap_or_default();
                insert_path(&mut parent.object, &path, Value::Array(values));
            }
        }
        for e in expands {
            let mut rows = self.fetch(conn, &e.query).await?;
            if e.kind == ExpandKind::Entities {
                Box::pin(self.attach(conn, &mut rows, &e.expands, &e.collections)).await?;
            }
            let mut groups: HashMap<String, Vec<Value>> = HashMap::new();
            for row in rows {
                let key = row.key(&e.markers);
                let value = match e.kind {
                    ExpandKind::Entities => entity_json(e.target, row),
                    ExpandKind::Reference => self.reference(e.target, &row.object),
                    ExpandKind::Count => row.object.get(COUNT_LABEL).cloned().unwrap_or(Value::Null),
                };
                groups.entry(key).or_default().push(value);
            }
            for parent in parents.iter_mut() {
                let group = groups
                    .get(&parent.key(&e.parent_columns))
                    .map_or(&[][..], Vec::as_slice);
                attach_expansion(&mut parent.object, e, group);
            }
        }
        Ok(())
    }

    async fn fetch<C: ConnectionTrait>(
        &self,
        conn: &C,
        query: &SelectQuery,
    ) -> QueryResult<Vec<DecodedRow>> {
        let rows = conn.query_all(statement_for(conn, &query.statement)).await?;
        decode_rows(&self.edm, &rows, &query.columns)
    }

    /// `{"@odata.id": "People(1)"}` for an entity object holding its keys.
    fn reference(&self, meta: &EntityMeta, entity: &Map<String, Value>) -> Value {
        let mut out = Map::new();
        out.insert(
            "@odata.id".to_owned(),
            Value::String(format!(
                "{}({})",
                self.entity_set(&meta.fqn),
                key_segment(meta, entity)
            )),
        );
        Value::Object(out)
    }

    /// Entity set holding `fqn`, by exact type first.
    fn entity_set(&self, fqn: &FullQualifiedName) -> String {
        let sets = &self.edm.entity_container().entity_sets;
        sets.iter()
            .find(|s| s.entity_type == *fqn)
            .or_else(|| sets.iter().find(|s| self.edm.is_compatible(fqn, &s.entity_type)))
            .map_or_else(|| fqn.to_string(), |s| s.name.clone())
    }
}

/// Statements planned for one request.
enum Planned<'a> {
    Read(ReadPlan<'a>),
    Count(SelectStatement),
    Property(PropertyQuery<'a>),
    Media {
        statement: SelectStatement,
        mime: Option<&'a Attribute>,
    },
}

struct ReadPlan<'a> {
    meta: &'a EntityMeta,
    main: SelectQuery,
    count: Option<SelectStatement>,
    expands: Vec<ExpandQuery<'a>>,
    collections: Vec<CollectionQuery<'a>>,
    page: Page,
    /// Rows are entities of `meta` rather than `$apply` output.
    entities: bool,
}

enum PropertyQuery<'a> {
    Attributes { query: SelectQuery, path: String },
    Collection(CollectionQuery<'a>),
}

fn prepare<'a>(
    ctx: &'a QueryContext<'a>,
    nav: &NavigationInfo,
    info: &'a UriInfo,
) -> QueryResult<Planned<'a>> {
    let options = &info.options;
    match (&nav.property, nav.target) {
        (Some(property), _) => {
            if has_row_options(options) {
                return Err(QueryError::not_implemented(
                    "query options on property requests",
                ));
            }
            let query = JoinQuery::new(ctx, nav, options, single())?;
            Ok(Planned::Property(property_query(ctx, &query, &property.path)?))
        }
        (None, TargetKind::Count) => {
            let stmt = match &options.apply {
                Some(apply) => apply::build(ctx, nav, apply, options, Page::default())?.count,
                None => JoinQuery::new(ctx, nav, options, Page::default())?.build_count(),
            };
            Ok(Planned::Count(stmt))
        }
        (None, TargetKind::Value) => media_query(ctx, nav, options),
        (None, TargetKind::Entities | TargetKind::Reference) => {
            Ok(Planned::Read(read_plan(ctx, nav, info)?))
        }
    }
}

fn read_plan<'a>(
    ctx: &'a QueryContext<'a>,
    nav: &NavigationInfo,
    info: &'a UriInfo,
) -> QueryResult<ReadPlan<'a>> {
    let options = &info.options;
    let page = if nav.is_collection() {
        let token = info
            .skiptoken
            .as_deref()
            .map(str::parse::<u64>)
            .transpose()
            .map_err(|_| QueryError::invalid("$skiptoken must be a non-negative integer"))?;
        Page::combine(ctx.config, options.top, options.skip, token)
    } else {
        single()
    };

    if let Some(apply) = &options.apply {
        if options.expand.is_some() {
            return Err(QueryError::not_implemented("$expand combined with $apply"));
        }
        let meta = ctx.metamodel.entity(nav.last().effective_type())?;
        let built = apply::build(ctx, nav, apply, options, page)?;
        return Ok(ReadPlan {
            meta,
            main: built.query,
            count: (options.count == Some(true)).then_some(built.count),
            expands: Vec::new(),
            collections: Vec::new(),
            page,
            entities: false,
        });
    }

    let query = JoinQuery::new(ctx, nav, options, page)?;
    let expands = match &options.expand {
        Some(option) => expand::plan(ctx, &query, option, 1)?,
        None => Vec::new(),
    };
    let collections = collection::plan(&query)?;
    let main = query.build(&join_columns(&expands, &collections))?;
    Ok(ReadPlan {
        meta: query.meta(),
        main,
        count: (options.count == Some(true)).then(|| query.build_count()),
        expands,
        collections,
        page,
        entities: true,
    })
}

fn property_query<'a>(
    ctx: &QueryContext<'_>,
    query: &JoinQuery<'a>,
    path: &str,
) -> QueryResult<PropertyQuery<'a>> {
    let meta = query.meta();
    if let Some(coll) = meta.collection(path) {
        ctx.check_visible(&coll.path, &coll.groups)?;
        return Ok(PropertyQuery::Collection(CollectionQuery::new(query, coll)));
    }
    let attrs: Vec<&Attribute> = match meta.attribute(path) {
        Some(a) => {
            ctx.check_visible(&a.path, &a.groups)?;
            vec![a]
        }
        None => meta
            .attributes
            .iter()
            .filter(|a| a.is_under(path) && ctx.is_visible(&a.groups))
            .collect(),
    };
    if attrs.is_empty() {
        return Err(MappingError::unknown_property(&meta.fqn, path).into());
    }
    Ok(PropertyQuery::Attributes {
        query: query.build_attributes(&attrs, &[]),
        path: path.to_owned(),
    })
}

fn media_query<'a>(
    ctx: &'a QueryContext<'a>,
    nav: &NavigationInfo,
    options: &'a QueryOptions,
) -> QueryResult<Planned<'a>> {
    let query = JoinQuery::new(ctx, nav, options, single())?;
    let meta = query.meta();
    let Some(stream) = &meta.stream else {
        return Err(QueryError::invalid(format!(
            "'{}' is not a media entity type",
            meta.fqn
        )));
    };
    let mime = stream.mime_type.as_deref().and_then(|p| meta.attribute(p));
    let attrs: Vec<&Attribute> = mime.into_iter().collect();
    let mut select = query.build_attributes(&attrs, &[]);
    select
        .statement
        .expr_as(col(query.alias(), &stream.column), Alias::new(MEDIA_LABEL));
    Ok(Planned::Media {
        statement: select.statement,
        mime,
    })
}

fn has_row_options(options: &QueryOptions) -> bool {
    options.filter.is_some()
        || options.search.is_some()
        || options.apply.is_some()
        || !options.orderby.is_empty()
}

fn single() -> Page {
    Page {
        top: Some(1),
        ..Page::default()
    }
}

async fn fetch_count<C: ConnectionTrait>(conn: &C, stmt: &SelectStatement) -> QueryResult<u64> {
    let row = conn.query_one(statement_for(conn, stmt)).await?;
    let n = row
        .map(|r| r.try_get::<i64>("", COUNT_LABEL))
        .transpose()?
        .unwrap_or(0);
    u64::try_from(n).map_err(|_| QueryError::invalid(format!("negative count {n}")))
}

fn statement_for<C: ConnectionTrait>(conn: &C, stmt: &SelectStatement) -> Statement {
    let built = conn.get_database_backend().build(stmt);
    debug!(sql = %built, "executing");
    built
}

fn planned(name: impl Into<String>, sql: String) -> PlannedStatement {
    PlannedStatement {
        name: name.into(),
        sql,
    }
}

fn list_children(
    backend: SqlBackend,
    prefix: &str,
    expands: &[ExpandQuery<'_>],
    collections: &[CollectionQuery<'_>],
    out: &mut Vec<PlannedStatement>,
) {
    for c in collections {
        out.push(planned(
            format!("collection {prefix}{}", c.attribute.path),
            c.query.sql(backend),
        ));
    }
    for e in expands {
        let name = format!("{prefix}{}", e.name);
        out.push(planned(format!("expand {name}"), e.query.sql(backend)));
        list_children(backend, &format!("{name}/"), &e.expands, &e.collections, out);
    }
}

/// Value at a `/`-separated path of a JSON object.
fn value_at<'v>(object: &'v Map<String, Value>, path: &str) -> Option<&'v Value> {
    let mut segments = path.split('/');
    let first = object.get(segments.next()?)?;
    segments.try_fold(first, |v, s| v.get(s))
}

fn element_value(element: &CollectionElement, row: DecodedRow) -> Value {
    match element {
        CollectionElement::Primitive { .. } => {
            row.object.get(VALUE_LABEL).cloned().unwrap_or(Value::Null)
        }
        CollectionElement::Complex { .. } => Value::Object(row.object),
    }
}

/// Entity object with its etag and media type annotations.
fn entity_json(meta: &EntityMeta, row: DecodedRow) -> Value {
    let mut object = row.object;
    let tag = meta
        .etag()
        .and_then(|a| value_at(&object, &a.path))
        .and_then(weak_etag);
    if let Some(tag) = tag {
        object.insert("@odata.etag".to_owned(), Value::String(tag));
    }
    let content_type = meta
        .stream
        .as_ref()
        .and_then(|s| s.mime_type.as_deref())
        .and_then(|p| value_at(&object, p))
        .and_then(Value::as_str)
        .map(str::to_owned);
    if let Some(ct) = content_type {
        object.insert("@odata.mediaContentType".to_owned(), Value::String(ct));
    }
    Value::Object(object)
}

fn weak_etag(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(format!("W/\"{s}\"")),
        other => Some(format!("W/\"{other}\"")),
    }
}

/// Key predicate text: `1`, `'a''b'` or `OrderId=10,Line=1`.
fn key_segment(meta: &EntityMeta, entity: &Map<String, Value>) -> String {
    let parts: Vec<(&str, String)> = meta
        .keys()
        .map(|k| (k.path.as_str(), key_literal(k.kind, value_at(entity, &k.path))))
        .collect();
    match parts.as_slice() {
        [(_, single)] => single.clone(),
        _ => parts
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(","),
    }
}

fn key_literal(kind: PrimitiveKind, value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_owned(),
        Some(Value::String(s)) if kind == PrimitiveKind::String => {
            format!("'{}'", s.replace('\'', "''"))
        }
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Puts one expansion's rows for a parent on the parent object, applying
/// the per-parent `$skip`, `$top` and `$count`.
fn attach_expansion(object: &mut Map<String, Value>, e: &ExpandQuery<'_>, group: &[Value]) {
    if e.kind == ExpandKind::Count {
        let count = group.first().cloned().unwrap_or_else(|| Value::from(0));
        object.insert(format!("{}@odata.count", e.name), count);
        return;
    }
    if !e.association.collection {
        object.insert(e.name.clone(), group.first().cloned().unwrap_or(Value::Null));
        return;
    }
    if e.count {
        object.insert(format!("{}@odata.count", e.name), Value::from(group.len()));
    }
    let skip = e.skip.and_then(|s| usize::try_from(s).ok()).unwrap_or(0);
    let top = e.top.and_then(|t| usize::try_from(t).ok()).unwrap_or(usize::MAX);
    let page: Vec<Value> = group.iter().skip(skip).take(top).cloned().collect();
    object.insert(e.name.clone(), Value::Array(page));
}

/// `url` with its `$skiptoken` replaced by `skip`.
#[must_use]
pub fn next_link(url: &str, skip: u64) -> String {
    let (base, query) = url.split_once('?').unwrap_or((url, ""));
    let token = format!("$skiptoken={skip}");
    let params: Vec<&str> = query
        .split('&')
        .filter(|p| !p.is_empty() && !is_skiptoken(p))
        .chain(std::iter::once(token.as_str()))
        .collect();
    format!("{base}?{}", params.join("&"))
}

fn is_skiptoken(param: &str) -> bool {
    let name = param.split_once('=').map_or(param, |(n, _)| n);
    urlencoding::decode(name).is_ok_and(|n| n == "$skiptoken")
}
