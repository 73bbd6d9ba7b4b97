//! Table mapping of the model and its resolved form, the [`Metamodel`].
//!
//! [`ServiceMapping`] is the serde input: one [`EntityMapping`] per entity
//! type, keyed by qualified name. [`Metamodel::new`] checks it against the
//! model and flattens every entity type into attribute paths (`HomeAddress/City`)
//! with their columns, collection tables and join paths.

use std::collections::{BTreeMap, BTreeSet};

use heck::ToSnakeCase;
use odata_edm::{Edm, EdmType, FullQualifiedName, NavigationProperty, PrimitiveKind, Property};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MappingError;

/// Complex properties nested deeper than this are not flattened.
const MAX_COMPLEX_DEPTH: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceMapping {
    pub entities: BTreeMap<String, EntityMapping>,
}

impl ServiceMapping {
    /// # Errors
    /// Returns [`MappingError::Parse`] for malformed JSON.
    pub fn from_json(text: &str) -> Result<Self, MappingError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntityMapping {
    /// Inherited from the base type when absent.
    pub table: Option<String>,
    /// Column per attribute path; unlisted paths use the snake_case path
    /// joined with `_`.
    pub columns: BTreeMap<String, String>,
    /// Field groups per attribute or collection path.
    pub groups: BTreeMap<String, Vec<String>>,
    pub etag: Option<String>,
    pub discriminator: Option<Discriminator>,
    /// Attribute paths matched by `$search`.
    pub search: Vec<String>,
    pub collections: BTreeMap<String, CollectionMapping>,
    pub navigations: BTreeMap<String, NavigationMapping>,
    pub stream: Option<StreamMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Discriminator {
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectionMapping {
    pub table: String,
    /// Owner column (`source`) to collection table column (`target`).
    pub join_columns: Vec<JoinColumn>,
    /// Element column of a primitive collection.
    pub value_column: Option<String>,
    /// Column overrides for the members of a complex collection.
    pub columns: BTreeMap<String, String>,
    pub order_column: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NavigationMapping {
    /// Owner column (`source`) to target column (`target`).
    pub join_columns: Vec<JoinColumn>,
    pub join_table: Option<JoinTable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinColumn {
    pub source: String,
    pub target: String,
}

impl JoinColumn {
    fn reversed(&self) -> Self {
        Self {
            source: self.target.clone(),
            target: self.source.clone(),
        }
    }
}

/// Link table between owner and target. `source` pairs owner columns with
/// link columns, `target` pairs link columns with target columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinTable {
    pub table: String,
    pub source: Vec<JoinColumn>,
    pub target: Vec<JoinColumn>,
}

impl JoinTable {
    fn reversed(&self) -> Self {
        Self {
            table: self.table.clone(),
            source: self.target.iter().map(JoinColumn::reversed).collect(),
            target: self.source.iter().map(JoinColumn::reversed).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamMapping {
    pub column: String,
    /// Attribute path holding the media type.
    pub mime_type: Option<String>,
}

/* ---------- resolved form ---------- */

/// One primitive value reachable from an entity without navigating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// External path, `/`-separated.
    pub path: String,
    pub column: String,
    pub kind: PrimitiveKind,
    /// Declared type; enums and type definitions keep their name.
    pub ty: EdmType,
    pub key: bool,
    pub etag: bool,
    pub groups: Vec<String>,
}

impl Attribute {
    /// `prefix` is this path or one of its complex parents.
    #[must_use]
    pub fn is_under(&self, prefix: &str) -> bool {
        self.path == prefix
            || self
                .path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    #[must_use]
    pub fn segments(&self) -> Vec<String> {
        self.path.split('/').map(str::to_owned).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionElement {
    Primitive {
        column: String,
        kind: PrimitiveKind,
        ty: EdmType,
    },
    /// Paths are relative to the element.
    Complex { attributes: Vec<Attribute> },
}

/// Collection-valued property stored in its own table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionAttribute {
    pub path: String,
    pub table: String,
    pub join_columns: Vec<JoinColumn>,
    pub element: CollectionElement,
    pub order_column: Option<String>,
    pub groups: Vec<String>,
}

impl CollectionAttribute {
    /// Column of an element member; the empty path is the element of a
    /// primitive collection.
    #[must_use]
    pub fn element_column(&self, path: &str) -> Option<(&str, PrimitiveKind)> {
        match &self.element {
            CollectionElement::Primitive { column, kind, .. } if path.is_empty() => {
                Some((column, *kind))
            }
            CollectionElement::Complex { attributes } => attributes
                .iter()
                .find(|a| a.path == path)
                .map(|a| (a.column.as_str(), a.kind)),
            CollectionElement::Primitive { .. } => None,
        }
    }
}

/// How a navigation property reaches its target rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub name: String,
    pub target: FullQualifiedName,
    pub collection: bool,
    pub join_columns: Vec<JoinColumn>,
    pub join_table: Option<JoinTable>,
}

impl Association {
    /// Owner columns the association starts from.
    #[must_use]
    pub fn source_columns(&self) -> Vec<&str> {
        match &self.join_table {
            Some(jt) => jt.source.iter().map(|j| j.source.as_str()).collect(),
            None => self.join_columns.iter().map(|j| j.source.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMeta {
    pub column: String,
    pub mime_type: Option<String>,
}

/// Resolved mapping of one entity type, inherited parts included.
#[derive(Debug, Clone)]
pub struct EntityMeta {
    pub fqn: FullQualifiedName,
    pub table: String,
    pub attributes: Vec<Attribute>,
    pub collections: Vec<CollectionAttribute>,
    pub associations: Vec<Association>,
    /// Discriminator column and the values of this type and its subtypes.
    pub discriminator: Option<(String, Vec<String>)>,
    pub search: Vec<String>,
    pub stream: Option<StreamMeta>,
}

impl EntityMeta {
    #[must_use]
    pub fn attribute(&self, path: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.path == path)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| a.key)
    }

    #[must_use]
    pub fn etag(&self) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.etag)
    }

    #[must_use]
    pub fn collection(&self, path: &str) -> Option<&CollectionAttribute> {
        self.collections.iter().find(|c| c.path == path)
    }

    /// # Errors
    /// [`MappingError::MissingJoin`] when the navigation exists in the model
    /// but has no join path.
    pub fn association(&self, name: &str) -> Result<&Association, MappingError> {
        self.associations
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| MappingError::MissingJoin {
                entity: self.fqn.to_string(),
                navigation: name.to_owned(),
            })
    }

    /// Columns matched by `$search`.
    pub fn search_columns(&self) -> impl Iterator<Item = &str> {
        self.search
            .iter()
            .filter_map(|p| self.attribute(p))
            .map(|a| a.column.as_str())
    }
}

/// The whole resolved mapping, one entry per mapped entity type.
#[derive(Debug, Clone, Default)]
pub struct Metamodel {
    entities: BTreeMap<FullQualifiedName, EntityMeta>,
}

impl Metamodel {
    /// Resolves `mapping` against `edm`.
    ///
    /// # Errors
    /// [`MappingError`] for names the model does not declare and for
    /// inconsistent entries (keys in field groups, non-string search paths).
    pub fn new(edm: &Edm, mapping: &ServiceMapping) -> Result<Self, MappingError> {
        let mut own = BTreeMap::new();
        for (name, entry) in &mapping.entities {
            let fqn = FullQualifiedName::parse(name)
                .map(|f| edm.canonical(&f))
                .filter(|f| edm.entity_type(f).is_some())
                .ok_or_else(|| MappingError::UnknownType(name.clone()))?;
            own.insert(fqn, entry);
        }

        let mut merged = BTreeMap::new();
        for ty in edm.entity_types() {
            let chain: Vec<&EntityMapping> = edm
                .ancestry(&ty.fqn)
                .iter()
                .rev()
                .filter_map(|t| own.get(&t.fqn).copied())
                .collect();
            if chain.iter().any(|m| m.table.is_some()) {
                merged.insert(ty.fqn.clone(), merge(&chain));
            } else {
                debug!(entity = %ty.fqn, "entity type has no table mapping");
            }
        }

        let mut entities = BTreeMap::new();
        for (fqn, entry) in &merged {
            let meta = Resolver { edm, merged: &merged }.entity(fqn, entry, &own)?;
            entities.insert(fqn.clone(), meta);
        }
        debug!(entities = entities.len(), "resolved table mapping");
        Ok(Self { entities })
    }

    /// # Errors
    /// [`MappingError::Unmapped`] when the type has no table.
    pub fn entity(&self, fqn: &FullQualifiedName) -> Result<&EntityMeta, MappingError> {
        self.entities
            .get(fqn)
            .ok_or_else(|| MappingError::Unmapped(fqn.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityMeta> {
        self.entities.values()
    }
}

/// Mapping entries along the inheritance chain, base first; later entries
/// win.
fn merge(chain: &[&EntityMapping]) -> EntityMapping {
    let mut out = EntityMapping::default();
    for m in chain {
        if m.table.is_some() {
            out.table.clone_from(&m.table);
        }
        out.columns.extend(m.columns.clone());
        out.groups.extend(m.groups.clone());
        out.collections.extend(m.collections.clone());
        out.navigations.extend(m.navigations.clone());
        if m.etag.is_some() {
            out.etag.clone_from(&m.etag);
        }
        if !m.search.is_empty() {
            out.search.clone_from(&m.search);
        }
        if m.stream.is_some() {
            out.stream.clone_from(&m.stream);
        }
    }
    out
}

fn default_column(path: &str) -> String {
    path.split('/')
        .map(ToSnakeCase::to_snake_case)
        .collect::<Vec<_>>()
        .join("_")
}

struct Resolver<'a> {
    edm: &'a Edm,
    merged: &'a BTreeMap<FullQualifiedName, EntityMapping>,
}

impl Resolver<'_> {
    fn entity(
        &self,
        fqn: &FullQualifiedName,
        entry: &EntityMapping,
        own: &BTreeMap<FullQualifiedName, &EntityMapping>,
    ) -> Result<EntityMeta, MappingError> {
        let table = entry
            .table
            .clone()
            .ok_or_else(|| MappingError::Unmapped(fqn.to_string()))?;
        let keys: BTreeSet<&str> = self
            .edm
            .key(fqn)
            .into_iter()
            .map(|p| p.name.as_str())
            .collect();

        let mut attributes = Vec::new();
        let mut collections = Vec::new();
        for p in self.edm.properties(fqn) {
            if p.collection {
                if let Some(c) = self.collection(fqn, p, entry)? {
                    collections.push(c);
                }
            } else {
                self.flatten(fqn, p, "", entry, &mut attributes, 0)?;
            }
        }
        for a in &mut attributes {
            a.key = keys.contains(a.path.as_str());
            a.etag = entry.etag.as_deref() == Some(a.path.as_str());
            if a.key && !a.groups.is_empty() {
                return Err(MappingError::invalid(
                    fqn.to_string(),
                    format!("key property '{}' cannot belong to field groups", a.path),
                ));
            }
        }
        self.check_names(fqn, entry, &attributes, &collections)?;

        let associations = self
            .edm
            .navigation_properties(fqn)
            .into_iter()
            .filter_map(|n| self.association(n, entry))
            .collect();

        Ok(EntityMeta {
            fqn: fqn.clone(),
            table,
            attributes,
            collections,
            associations,
            discriminator: self.discriminator(fqn, own)?,
            search: entry.search.clone(),
            stream: entry.stream.as_ref().map(|s| StreamMeta {
                column: s.column.clone(),
                mime_type: s.mime_type.clone(),
            }),
        })
    }

    fn primitive(
        &self,
        owner: &FullQualifiedName,
        path: &str,
        ty: &EdmType,
    ) -> Result<PrimitiveKind, MappingError> {
        self.edm.underlying_primitive(ty).ok_or_else(|| {
            MappingError::invalid(owner.to_string(), format!("'{path}' has no primitive type"))
        })
    }

    fn flatten(
        &self,
        owner: &FullQualifiedName,
        p: &Property,
        prefix: &str,
        entry: &EntityMapping,
        out: &mut Vec<Attribute>,
        depth: usize,
    ) -> Result<(), MappingError> {
        let path = if prefix.is_empty() {
            p.name.clone()
        } else {
            format!("{prefix}/{}", p.name)
        };
        if let EdmType::Complex(complex) = &p.ty {
            if depth >= MAX_COMPLEX_DEPTH {
                return Err(MappingError::invalid(
                    owner.to_string(),
                    format!("complex property '{path}' nests too deep"),
                ));
            }
            for inner in self.edm.properties(complex) {
                if !inner.collection {
                    self.flatten(owner, inner, &path, entry, out, depth + 1)?;
                }
            }
            return Ok(());
        }
        out.push(Attribute {
            column: entry
                .columns
                .get(&path)
                .cloned()
                .unwrap_or_else(|| default_column(&path)),
            kind: self.primitive(owner, &path, &p.ty)?,
            ty: p.ty.clone(),
            key: false,
            etag: false,
            groups: entry.groups.get(&path).cloned().unwrap_or_default(),
            path,
        });
        Ok(())
    }

    fn collection(
        &self,
        owner: &FullQualifiedName,
        p: &Property,
        entry: &EntityMapping,
    ) -> Result<Option<CollectionAttribute>, MappingError> {
        let Some(m) = entry.collections.get(&p.name) else {
            debug!(entity = %owner, property = %p.name, "collection property is not mapped");
            return Ok(None);
        };
        if m.join_columns.is_empty() {
            return Err(MappingError::invalid(
                owner.to_string(),
                format!("collection '{}' has no join columns", p.name),
            ));
        }
        let element = match &p.ty {
            EdmType::Complex(complex) => {
                let inner = EntityMapping {
                    columns: m.columns.clone(),
                    ..EntityMapping::default()
                };
                let mut attributes = Vec::new();
                for member in self.edm.properties(complex) {
                    if !member.collection {
                        self.flatten(owner, member, "", &inner, &mut attributes, 1)?;
                    }
                }
                CollectionElement::Complex { attributes }
            }
            ty => CollectionElement::Primitive {
                column: m
                    .value_column
                    .clone()
                    .unwrap_or_else(|| default_column(&p.name)),
                kind: self.primitive(owner, &p.name, ty)?,
                ty: ty.clone(),
            },
        };
        Ok(Some(CollectionAttribute {
            path: p.name.clone(),
            table: m.table.clone(),
            join_columns: m.join_columns.clone(),
            element,
            order_column: m.order_column.clone(),
            groups: entry.groups.get(&p.name).cloned().unwrap_or_default(),
        }))
    }

    /// Every name the mapping uses must exist on the type.
    fn check_names(
        &self,
        fqn: &FullQualifiedName,
        entry: &EntityMapping,
        attributes: &[Attribute],
        collections: &[CollectionAttribute],
    ) -> Result<(), MappingError> {
        let is_attribute = |p: &str| attributes.iter().any(|a| a.path == p);
        let is_collection = |p: &str| {
            self.edm
                .property(fqn, p)
                .is_some_and(|prop| prop.collection)
        };
        for path in entry.columns.keys().chain(entry.etag.iter()) {
            if !is_attribute(path) {
                return Err(MappingError::unknown_property(fqn, path.clone()));
            }
        }
        for path in entry.groups.keys() {
            if !is_attribute(path) && !collections.iter().any(|c| &c.path == path) {
                return Err(MappingError::unknown_property(fqn, path.clone()));
            }
        }
        for name in entry.collections.keys() {
            if !is_collection(name) {
                return Err(MappingError::unknown_property(fqn, name.clone()));
            }
        }
        for path in &entry.search {
            match attributes.iter().find(|a| &a.path == path) {
                Some(a) if a.kind == PrimitiveKind::String => {}
                Some(_) => {
                    return Err(MappingError::invalid(
                        fqn.to_string(),
                        format!("search path '{path}' is not a string"),
                    ));
                }
                None => return Err(MappingError::unknown_property(fqn, path.clone())),
            }
        }
        if let Some(mime) = entry.stream.as_ref().and_then(|s| s.mime_type.as_ref())
            && !is_attribute(mime)
        {
            return Err(MappingError::unknown_property(fqn, mime.clone()));
        }
        for name in entry.navigations.keys() {
            if self.edm.navigation_property(fqn, name).is_none() {
                return Err(MappingError::UnknownNavigation {
                    entity: fqn.to_string(),
                    navigation: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Own join path, or the partner's reversed.
    fn association(&self, nav: &NavigationProperty, entry: &EntityMapping) -> Option<Association> {
        let build = |join_columns, join_table| Association {
            name: nav.name.clone(),
            target: nav.target.clone(),
            collection: nav.collection,
            join_columns,
            join_table,
        };
        if let Some(m) = entry.navigations.get(&nav.name) {
            return Some(build(m.join_columns.clone(), m.join_table.clone()));
        }
        let target = self.merged.get(&nav.target)?;
        let partner = nav.partner.as_ref().and_then(|p| target.navigations.get(p))?;
        Some(build(
            partner.join_columns.iter().map(JoinColumn::reversed).collect(),
            partner.join_table.as_ref().map(JoinTable::reversed),
        ))
    }

    fn discriminator(
        &self,
        fqn: &FullQualifiedName,
        own: &BTreeMap<FullQualifiedName, &EntityMapping>,
    ) -> Result<Option<(String, Vec<String>)>, MappingError> {
        let mut column: Option<&str> = None;
        let mut values = Vec::new();
        for sub in self.edm.derived_types(fqn) {
            let Some(d) = own.get(sub).and_then(|m| m.discriminator.as_ref()) else {
                continue;
            };
            if column.is_some_and(|c| c != d.column) {
                return Err(MappingError::invalid(
                    fqn.to_string(),
                    "derived types use different discriminator columns",
                ));
            }
            column = Some(&d.column);
            values.push(d.value.clone());
        }
        Ok(column.map(|c| (c.to_owned(), values)))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn edm() -> Edm {
        Edm::from_json(include_str!("../../../testdata/demo/edm.json")).unwrap()
    }

    fn demo() -> Metamodel {
        let mapping =
            ServiceMapping::from_json(include_str!("../../../testdata/demo/mapping.json")).unwrap();
        Metamodel::new(&edm(), &mapping).unwrap()
    }

    fn fqn(name: &str) -> FullQualifiedName {
        FullQualifiedName::parse(name).unwrap()
    }

    #[test]
    fn attributes_flatten_complex_properties() {
        let mm = demo();
        let person = mm.entity(&fqn("Demo.Person")).unwrap();
        assert_eq!(person.table, "people");
        let city = person.attribute("HomeAddress/City").unwrap();
        assert_eq!(city.column, "home_city");
        let street = person.attribute("HomeAddress/Street").unwrap();
        assert_eq!(street.column, "home_address_street");
        assert!(person.attribute("Id").unwrap().key);
        assert!(person.attribute("Version").unwrap().etag);
        assert_eq!(person.attribute("Salary").unwrap().groups, vec!["hr"]);
        assert_eq!(
            person.attribute("FavoriteColor").unwrap().kind,
            PrimitiveKind::Int32
        );
        assert!(city.is_under("HomeAddress"));
        assert!(!city.is_under("Home"));
    }

    #[test]
    fn derived_type_inherits_table_and_columns() {
        let mm = demo();
        let employee = mm.entity(&fqn("Demo.Employee")).unwrap();
        assert_eq!(employee.table, "people");
        assert!(employee.attribute("Department").is_some());
        assert!(employee.attribute("Name").is_some());
        assert_eq!(
            employee.discriminator,
            Some(("kind".to_owned(), vec!["E".to_owned()]))
        );
        let person = mm.entity(&fqn("Demo.Person")).unwrap();
        let (_, values) = person.discriminator.clone().unwrap();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn collections_and_associations() {
        let mm = demo();
        let person = mm.entity(&fqn("Demo.Person")).unwrap();
        let tags = person.collection("Tags").unwrap();
        assert_eq!(tags.element_column(""), Some(("tag", PrimitiveKind::String)));
        let addresses = person.collection("Addresses").unwrap();
        assert_eq!(addresses.element_column("City").map(|c| c.0), Some("city"));

        let friends = person.association("Friends").unwrap();
        assert!(friends.join_table.is_some());
        assert_eq!(friends.source_columns(), vec!["id"]);

        // declared only on the partner side
        let order = mm.entity(&fqn("Demo.Order")).unwrap();
        let customer = order.association("Customer").unwrap();
        assert_eq!(
            customer.join_columns,
            vec![JoinColumn {
                source: "customer_id".to_owned(),
                target: "id".to_owned()
            }]
        );
    }

    #[test]
    fn unknown_names_are_rejected() {
        let bad = r#"{ "entities": { "Demo.Nobody": { "table": "x" } } }"#;
        let err = Metamodel::new(&edm(), &ServiceMapping::from_json(bad).unwrap()).unwrap_err();
        assert!(matches!(err, MappingError::UnknownType(_)));

        let bad = r#"{ "entities": { "Demo.Person": { "table": "p", "columns": { "Nope": "x" } } } }"#;
        let err = Metamodel::new(&edm(), &ServiceMapping::from_json(bad).unwrap()).unwrap_err();
        assert!(matches!(err, MappingError::UnknownProperty { .. }));

        let bad = r#"{ "entities": { "Demo.Person": { "table": "p", "search": ["Age"] } } }"#;
        let err = Metamodel::new(&edm(), &ServiceMapping::from_json(bad).unwrap()).unwrap_err();
        assert!(matches!(err, MappingError::Invalid { .. }));

        let bad = r#"{ "entities": { "Demo.Person": { "table": "p", "groups": { "Id": ["x"] } } } }"#;
        assert!(Metamodel::new(&edm(), &ServiceMapping::from_json(bad).unwrap()).is_err());
    }

    #[test]
    fn unmapped_types_are_reported_on_use() {
        let mapping = r#"{ "entities": { "Demo.Order": { "table": "orders" } } }"#;
        let mm = Metamodel::new(&edm(), &ServiceMapping::from_json(mapping).unwrap()).unwrap();
        assert!(matches!(
            mm.entity(&fqn("Demo.Person")),
            Err(MappingError::Unmapped(_))
        ));
        let order = mm.entity(&fqn("Demo.Order")).unwrap();
        assert!(matches!(
            order.association("Items"),
            Err(MappingError::MissingJoin { .. })
        ));
    }
}
