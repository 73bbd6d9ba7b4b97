//! The model registry: construction, validation and lookups.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::csdl::{
    CsdlEntityContainer, CsdlOperation, CsdlSchema, CsdlStructuredType, split_collection,
};
use crate::error::EdmError;
use crate::fqn::FullQualifiedName;
use crate::model::{
    ActionImport, EdmType, EntityContainer, EntitySet, EnumMember, EnumType, FunctionImport,
    NavigationBinding, NavigationProperty, Operation, OperationKind, Parameter, Property,
    ReturnType, Singleton, StructuredKind, StructuredType, TypeDefinition, TypeKind,
};
use crate::primitive::PrimitiveKind;

/// Immutable Entity Data Model.
#[derive(Debug, Clone, Default)]
pub struct Edm {
    namespaces: Vec<String>,
    aliases: HashMap<String, String>,
    entity_types: BTreeMap<FullQualifiedName, StructuredType>,
    complex_types: BTreeMap<FullQualifiedName, StructuredType>,
    enum_types: BTreeMap<FullQualifiedName, EnumType>,
    type_definitions: BTreeMap<FullQualifiedName, TypeDefinition>,
    actions: BTreeMap<FullQualifiedName, Vec<Operation>>,
    functions: BTreeMap<FullQualifiedName, Vec<Operation>>,
    container: EntityContainer,
}

/// Declared names and their kinds, used while types are still being built.
struct Declarations {
    aliases: HashMap<String, String>,
    kinds: HashMap<FullQualifiedName, TypeKind>,
}

impl Declarations {
    fn canonical(&self, fqn: &FullQualifiedName) -> FullQualifiedName {
        match self.aliases.get(fqn.namespace()) {
            Some(ns) => FullQualifiedName::new(ns.clone(), fqn.name()),
            None => fqn.clone(),
        }
    }

    fn qualified(&self, element: &str, text: &str) -> Result<FullQualifiedName, EdmError> {
        FullQualifiedName::parse(text)
            .map(|f| self.canonical(&f))
            .ok_or_else(|| EdmError::unresolved(element, text))
    }

    fn resolve(&self, element: &str, text: &str) -> Result<EdmType, EdmError> {
        if let Some(p) = text
            .strip_prefix("Edm.")
            .and_then(PrimitiveKind::from_name)
        {
            return Ok(EdmType::Primitive(p));
        }
        let fqn = self.qualified(element, text)?;
        match self.kinds.get(&fqn) {
            Some(TypeKind::Enum) => Ok(EdmType::Enum(fqn)),
            Some(TypeKind::Definition) => Ok(EdmType::Definition(fqn)),
            Some(TypeKind::Complex) => Ok(EdmType::Complex(fqn)),
            Some(TypeKind::Entity) => Ok(EdmType::Entity(fqn)),
            Some(TypeKind::Primitive) | None => Err(EdmError::unresolved(element, text)),
        }
    }
}

impl Edm {
    /// Parses either a single schema object or an array of schemas.
    ///
    /// # Errors
    /// Returns `EdmError` if the document is malformed or fails validation.
    pub fn from_json(text: &str) -> Result<Self, EdmError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let schemas: Vec<CsdlSchema> = if value.is_array() {
            serde_json::from_value(value)?
        } else {
            vec![serde_json::from_value(value)?]
        };
        Self::from_schemas(schemas)
    }

    /// Builds and validates the model.
    ///
    /// # Errors
    /// Returns `EdmError` on duplicate names, unresolved type references,
    /// invalid keys, cyclic inheritance or dangling container references.
    pub fn from_schemas(schemas: Vec<CsdlSchema>) -> Result<Self, EdmError> {
        let decl = collect_declarations(&schemas)?;
        let mut edm = Self {
            namespaces: schemas.iter().map(|s| s.namespace.clone()).collect(),
            aliases: decl.aliases.clone(),
            ..Self::default()
        };

        let mut container: Option<(String, CsdlEntityContainer)> = None;
        for schema in schemas {
            edm.add_schema_types(&decl, &schema)?;
            if let Some(c) = schema.entity_container {
                if container.is_some() {
                    return Err(EdmError::Duplicate(format!("entity container {}", c.name)));
                }
                container = Some((schema.namespace, c));
            }
        }

        edm.check_inheritance()?;
        edm.check_keys()?;
        if let Some((_, c)) = container {
            edm.container = edm.build_container(&decl, c)?;
        }
        debug!(
            entity_types = edm.entity_types.len(),
            complex_types = edm.complex_types.len(),
            entity_sets = edm.container.entity_sets.len(),
            "entity data model built"
        );
        Ok(edm)
    }

    fn add_schema_types(&mut self, decl: &Declarations, schema: &CsdlSchema) -> Result<(), EdmError> {
        let ns = schema.namespace.as_str();
        for e in &schema.enum_types {
            let fqn = FullQualifiedName::new(ns, &e.name);
            let element = fqn.to_string();
            let underlying = PrimitiveKind::from_name(&e.underlying_type)
                .filter(|k| k.is_integral())
                .ok_or_else(|| EdmError::invalid(&element, "enum underlying type must be integral"))?;
            let mut members = Vec::with_capacity(e.members.len());
            for (pos, m) in e.members.iter().enumerate() {
                let pos = i64::try_from(pos).unwrap_or(i64::MAX);
                let value = m.value.unwrap_or(if e.is_flags {
                    1_i64.checked_shl(u32::try_from(pos).unwrap_or(u32::MAX)).unwrap_or(0)
                } else {
                    pos
                });
                if members.iter().any(|x: &EnumMember| x.name == m.name) {
                    return Err(EdmError::Duplicate(format!("{element}/{}", m.name)));
                }
                members.push(EnumMember {
                    name: m.name.clone(),
                    value,
                });
            }
            self.enum_types.insert(
                fqn.clone(),
                EnumType {
                    fqn,
                    underlying,
                    is_flags: e.is_flags,
                    members,
                },
            );
        }

        for t in &schema.type_definitions {
            let fqn = FullQualifiedName::new(ns, &t.name);
            let underlying = PrimitiveKind::from_name(&t.underlying_type).ok_or_else(|| {
                EdmError::unresolved(fqn.to_string(), t.underlying_type.clone())
            })?;
            self.type_definitions
                .insert(fqn.clone(), TypeDefinition { fqn, underlying });
        }

        for c in &schema.complex_types {
            let t = build_structured(decl, ns, c, StructuredKind::Complex)?;
            self.complex_types.insert(t.fqn.clone(), t);
        }
        for e in &schema.entity_types {
            let t = build_structured(decl, ns, e, StructuredKind::Entity)?;
            self.entity_types.insert(t.fqn.clone(), t);
        }

        for a in &schema.actions {
            let op = build_operation(decl, ns, a, OperationKind::Action)?;
            self.actions.entry(op.fqn.clone()).or_default().push(op);
        }
        for f in &schema.functions {
            let op = build_operation(decl, ns, f, OperationKind::Function)?;
            if op.return_type.is_none() {
                return Err(EdmError::invalid(op.fqn.to_string(), "function without return type"));
            }
            self.functions.entry(op.fqn.clone()).or_default().push(op);
        }
        Ok(())
    }

    fn check_inheritance(&self) -> Result<(), EdmError> {
        for map in [&self.entity_types, &self.complex_types] {
            for t in map.values() {
                let mut seen = HashSet::new();
                let mut cur = Some(t);
                while let Some(c) = cur {
                    if !seen.insert(&c.fqn) {
                        return Err(EdmError::CyclicInheritance(t.fqn.to_string()));
                    }
                    cur = match &c.base {
                        Some(b) => Some(map.get(b).ok_or_else(|| {
                            EdmError::unresolved(c.fqn.to_string(), b.to_string())
                        })?),
                        None => None,
                    };
                }
            }
        }
        Ok(())
    }

    fn check_keys(&self) -> Result<(), EdmError> {
        for t in self.entity_types.values() {
            let element = t.fqn.to_string();
            if t.base.is_some() {
                if !t.key.is_empty() {
                    return Err(EdmError::invalid(element, "derived entity type redeclares its key"));
                }
                continue;
            }
            if t.key.is_empty() {
                if t.is_abstract {
                    continue;
                }
                return Err(EdmError::MissingKey(element));
            }
            for k in &t.key {
                let prop = t.declared_property(k).ok_or_else(|| EdmError::InvalidKey {
                    entity: element.clone(),
                    property: k.clone(),
                    reason: "no such property",
                })?;
                let reason = if prop.collection {
                    Some("collection-valued")
                } else if prop.nullable {
                    Some("nullable")
                } else if prop.ty.is_structured() {
                    Some("structured")
                } else {
                    None
                };
                if let Some(reason) = reason {
                    return Err(EdmError::InvalidKey {
                        entity: element,
                        property: k.clone(),
                        reason,
                    });
                }
            }
        }
        Ok(())
    }

    fn build_container(
        &self,
        decl: &Declarations,
        c: CsdlEntityContainer,
    ) -> Result<EntityContainer, EdmError> {
        let mut names = HashSet::new();
        let mut check_name = |n: &str| {
            if names.insert(n.to_owned()) {
                Ok(())
            } else {
                Err(EdmError::Duplicate(format!("{}/{n}", c.name)))
            }
        };

        let mut entity_sets = Vec::with_capacity(c.entity_sets.len());
        for s in &c.entity_sets {
            check_name(&s.name)?;
            let entity_type = decl.qualified(&s.name, &s.entity_type)?;
            if !self.entity_types.contains_key(&entity_type) {
                return Err(EdmError::unresolved(&s.name, &s.entity_type));
            }
            entity_sets.push(EntitySet {
                name: s.name.clone(),
                entity_type,
                include_in_service_document: s.include_in_service_document,
                navigation_bindings: s
                    .navigation_bindings
                    .iter()
                    .map(|b| NavigationBinding {
                        path: b.path.clone(),
                        target: b.target.clone(),
                    })
                    .collect(),
            });
        }

        let mut singletons = Vec::with_capacity(c.singletons.len());
        for s in &c.singletons {
            check_name(&s.name)?;
            let entity_type = decl.qualified(&s.name, &s.type_name)?;
            if !self.entity_types.contains_key(&entity_type) {
                return Err(EdmError::unresolved(&s.name, &s.type_name));
            }
            singletons.push(Singleton {
                name: s.name.clone(),
                entity_type,
                navigation_bindings: s
                    .navigation_bindings
                    .iter()
                    .map(|b| NavigationBinding {
                        path: b.path.clone(),
                        target: b.target.clone(),
                    })
                    .collect(),
            });
        }

        let mut action_imports = Vec::with_capacity(c.action_imports.len());
        for a in &c.action_imports {
            check_name(&a.name)?;
            let action = decl.qualified(&a.name, &a.action)?;
            if self.unbound_action(&action).is_none() {
                return Err(EdmError::invalid(&a.name, format!("no unbound action '{action}'")));
            }
            action_imports.push(ActionImport {
                name: a.name.clone(),
                action,
                entity_set: a.entity_set.clone(),
            });
        }

        let mut function_imports = Vec::with_capacity(c.function_imports.len());
        for f in &c.function_imports {
            check_name(&f.name)?;
            let function = decl.qualified(&f.name, &f.function)?;
            if self.unbound_functions(&function).is_empty() {
                return Err(EdmError::invalid(&f.name, format!("no unbound function '{function}'")));
            }
            function_imports.push(FunctionImport {
                name: f.name.clone(),
                function,
                entity_set: f.entity_set.clone(),
                include_in_service_document: f.include_in_service_document,
            });
        }

        let container = EntityContainer {
            name: c.name,
            entity_sets,
            singletons,
            action_imports,
            function_imports,
        };
        validate_bindings(self, &container)?;
        Ok(container)
    }

    /* ---------- lookups ---------- */

    #[must_use]
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    #[must_use]
    pub fn is_namespace(&self, text: &str) -> bool {
        self.namespaces.iter().any(|n| n == text) || self.aliases.contains_key(text)
    }

    /// Replaces a schema alias with its namespace.
    #[must_use]
    pub fn canonical(&self, fqn: &FullQualifiedName) -> FullQualifiedName {
        match self.aliases.get(fqn.namespace()) {
            Some(ns) => FullQualifiedName::new(ns.clone(), fqn.name()),
            None => fqn.clone(),
        }
    }

    #[must_use]
    pub fn entity_container(&self) -> &EntityContainer {
        &self.container
    }

    #[must_use]
    pub fn entity_set(&self, name: &str) -> Option<&EntitySet> {
        self.container.entity_sets.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub fn singleton(&self, name: &str) -> Option<&Singleton> {
        self.container.singletons.iter().find(|s| s.name == name)
    }

    /// Binding target of navigation `path` from the entity set or singleton
    /// named `source`.
    #[must_use]
    pub fn navigation_binding(&self, source: &str, path: &str) -> Option<&str> {
        match self.entity_set(source) {
            Some(set) => set.binding_target(path),
            None => self.singleton(source)?.binding_target(path),
        }
    }

    #[must_use]
    pub fn action_import(&self, name: &str) -> Option<&ActionImport> {
        self.container.action_imports.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub fn function_import(&self, name: &str) -> Option<&FunctionImport> {
        self.container.function_imports.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub fn entity_type(&self, fqn: &FullQualifiedName) -> Option<&StructuredType> {
        self.entity_types.get(&self.canonical(fqn))
    }

    #[must_use]
    pub fn complex_type(&self, fqn: &FullQualifiedName) -> Option<&StructuredType> {
        self.complex_types.get(&self.canonical(fqn))
    }

    #[must_use]
    pub fn structured_type(&self, fqn: &FullQualifiedName) -> Option<&StructuredType> {
        self.entity_type(fqn).or_else(|| self.complex_type(fqn))
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &StructuredType> {
        self.entity_types.values()
    }

    #[must_use]
    pub fn enum_type(&self, fqn: &FullQualifiedName) -> Option<&EnumType> {
        self.enum_types.get(&self.canonical(fqn))
    }

    #[must_use]
    pub fn type_definition(&self, fqn: &FullQualifiedName) -> Option<&TypeDefinition> {
        self.type_definitions.get(&self.canonical(fqn))
    }

    /// Resolves a qualified name (alias allowed) to a type of the model.
    #[must_use]
    pub fn resolve_fqn(&self, fqn: &FullQualifiedName) -> Option<EdmType> {
        if fqn.namespace() == PrimitiveKind::NAMESPACE {
            return PrimitiveKind::from_name(fqn.name()).map(EdmType::Primitive);
        }
        let fqn = self.canonical(fqn);
        if self.entity_types.contains_key(&fqn) {
            Some(EdmType::Entity(fqn))
        } else if self.complex_types.contains_key(&fqn) {
            Some(EdmType::Complex(fqn))
        } else if self.enum_types.contains_key(&fqn) {
            Some(EdmType::Enum(fqn))
        } else if self.type_definitions.contains_key(&fqn) {
            Some(EdmType::Definition(fqn))
        } else {
            None
        }
    }

    #[must_use]
    pub fn resolve_type(&self, name: &str) -> Option<EdmType> {
        FullQualifiedName::parse(name).and_then(|f| self.resolve_fqn(&f))
    }

    /// Primitive kind behind a primitive, type definition or enum type.
    #[must_use]
    pub fn underlying_primitive(&self, ty: &EdmType) -> Option<PrimitiveKind> {
        match ty {
            EdmType::Primitive(p) => Some(*p),
            EdmType::Definition(f) => self.type_definition(f).map(|d| d.underlying),
            EdmType::Enum(f) => self.enum_type(f).map(|e| e.underlying),
            EdmType::Complex(_) | EdmType::Entity(_) => None,
        }
    }

    /// The type itself followed by its base types.
    #[must_use]
    pub fn ancestry(&self, fqn: &FullQualifiedName) -> Vec<&StructuredType> {
        let mut out = Vec::new();
        let mut cur = self.structured_type(fqn);
        while let Some(t) = cur {
            if out.iter().any(|x: &&StructuredType| x.fqn == t.fqn) {
                break;
            }
            out.push(t);
            cur = t.base.as_ref().and_then(|b| self.structured_type(b));
        }
        out
    }

    #[must_use]
    pub fn property(&self, fqn: &FullQualifiedName, name: &str) -> Option<&Property> {
        self.ancestry(fqn)
            .into_iter()
            .find_map(|t| t.declared_property(name))
    }

    #[must_use]
    pub fn navigation_property(
        &self,
        fqn: &FullQualifiedName,
        name: &str,
    ) -> Option<&NavigationProperty> {
        self.ancestry(fqn)
            .into_iter()
            .find_map(|t| t.declared_navigation(name))
    }

    /// All structural properties, inherited ones first.
    #[must_use]
    pub fn properties(&self, fqn: &FullQualifiedName) -> Vec<&Property> {
        self.ancestry(fqn)
            .into_iter()
            .rev()
            .flat_map(|t| t.properties.iter())
            .collect()
    }

    #[must_use]
    pub fn navigation_properties(&self, fqn: &FullQualifiedName) -> Vec<&NavigationProperty> {
        self.ancestry(fqn)
            .into_iter()
            .rev()
            .flat_map(|t| t.navigation_properties.iter())
            .collect()
    }

    /// Key properties, taken from the root of the inheritance chain.
    #[must_use]
    pub fn key(&self, fqn: &FullQualifiedName) -> Vec<&Property> {
        self.ancestry(fqn)
            .into_iter()
            .find(|t| !t.key.is_empty())
            .map(|t| {
                t.key
                    .iter()
                    .filter_map(|k| t.declared_property(k))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `sub` is `base` or derives from it.
    #[must_use]
    pub fn is_compatible(&self, sub: &FullQualifiedName, base: &FullQualifiedName) -> bool {
        let base = self.canonical(base);
        self.ancestry(sub).iter().any(|t| t.fqn == base)
    }

    /// The type and every type deriving from it.
    #[must_use]
    pub fn derived_types(&self, fqn: &FullQualifiedName) -> Vec<&FullQualifiedName> {
        self.entity_types
            .keys()
            .chain(self.complex_types.keys())
            .filter(|t| self.is_compatible(t, fqn))
            .collect()
    }

    #[must_use]
    pub fn has_stream(&self, fqn: &FullQualifiedName) -> bool {
        self.ancestry(fqn).iter().any(|t| t.has_stream)
    }

    /* ---------- operations ---------- */

    #[must_use]
    pub fn unbound_action(&self, name: &FullQualifiedName) -> Option<&Operation> {
        self.actions
            .get(&self.canonical(name))?
            .iter()
            .find(|o| !o.bound)
    }

    #[must_use]
    pub fn unbound_functions(&self, name: &FullQualifiedName) -> Vec<&Operation> {
        self.functions
            .get(&self.canonical(name))
            .map(|v| v.iter().filter(|o| !o.bound).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn unbound_function(
        &self,
        name: &FullQualifiedName,
        parameter_names: &[&str],
    ) -> Option<&Operation> {
        self.unbound_functions(name)
            .into_iter()
            .find(|o| o.matches_parameter_names(parameter_names))
    }

    /// Picks the overload whose binding type is closest to `binding`.
    #[must_use]
    pub fn bound_action(
        &self,
        name: &FullQualifiedName,
        binding: &FullQualifiedName,
        collection: bool,
    ) -> Option<&Operation> {
        let overloads = self.actions.get(&self.canonical(name))?;
        self.closest_binding(overloads, binding, collection, |_| true)
    }

    #[must_use]
    pub fn bound_function(
        &self,
        name: &FullQualifiedName,
        binding: &FullQualifiedName,
        collection: bool,
        parameter_names: &[&str],
    ) -> Option<&Operation> {
        let overloads = self.functions.get(&self.canonical(name))?;
        self.closest_binding(overloads, binding, collection, |o| {
            o.matches_parameter_names(parameter_names)
        })
    }

    /// Bound function overloads with the given name, any binding.
    #[must_use]
    pub fn bound_functions(&self, name: &FullQualifiedName) -> Vec<&Operation> {
        self.functions
            .get(&self.canonical(name))
            .map(|v| v.iter().filter(|o| o.bound).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_operation(&self, name: &FullQualifiedName) -> bool {
        let name = self.canonical(name);
        self.actions.contains_key(&name) || self.functions.contains_key(&name)
    }

    fn closest_binding<'a>(
        &self,
        overloads: &'a [Operation],
        binding: &FullQualifiedName,
        collection: bool,
        accept: impl Fn(&Operation) -> bool,
    ) -> Option<&'a Operation> {
        for t in self.ancestry(binding) {
            let found = overloads.iter().find(|o| {
                o.binding_parameter().is_some_and(|p| {
                    p.collection == collection && p.ty.structured() == Some(&t.fqn)
                }) && accept(o)
            });
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

fn collect_declarations(schemas: &[CsdlSchema]) -> Result<Declarations, EdmError> {
    let mut aliases = HashMap::new();
    let mut kinds = HashMap::new();
    for s in schemas {
        if let Some(alias) = &s.alias
            && aliases.insert(alias.clone(), s.namespace.clone()).is_some()
        {
            return Err(EdmError::Duplicate(format!("schema alias {alias}")));
        }
        let declared = s
            .enum_types
            .iter()
            .map(|e| (&e.name, TypeKind::Enum))
            .chain(s.type_definitions.iter().map(|t| (&t.name, TypeKind::Definition)))
            .chain(s.complex_types.iter().map(|t| (&t.name, TypeKind::Complex)))
            .chain(s.entity_types.iter().map(|t| (&t.name, TypeKind::Entity)));
        for (name, kind) in declared {
            let fqn = FullQualifiedName::new(&s.namespace, name);
            if kinds.insert(fqn.clone(), kind).is_some() {
                return Err(EdmError::Duplicate(fqn.to_string()));
            }
        }
    }
    Ok(Declarations { aliases, kinds })
}

fn build_structured(
    decl: &Declarations,
    ns: &str,
    def: &CsdlStructuredType,
    kind: StructuredKind,
) -> Result<StructuredType, EdmError> {
    let fqn = FullQualifiedName::new(ns, &def.name);
    let element = fqn.to_string();

    let base = match &def.base_type {
        Some(b) => {
            let resolved = decl.resolve(&element, b)?;
            let ok = match kind {
                StructuredKind::Entity => matches!(resolved, EdmType::Entity(_)),
                StructuredKind::Complex => matches!(resolved, EdmType::Complex(_)),
            };
            if !ok {
                return Err(EdmError::invalid(&element, format!("base type '{b}' has another kind")));
            }
            resolved.fqn().cloned()
        }
        None => None,
    };

    let mut names = HashSet::new();
    let mut properties = Vec::with_capacity(def.properties.len());
    for p in &def.properties {
        if !names.insert(p.name.as_str()) {
            return Err(EdmError::Duplicate(format!("{element}/{}", p.name)));
        }
        let (inner, collection) = split_collection(&p.type_name);
        let ty = decl.resolve(&format!("{element}/{}", p.name), inner)?;
        if matches!(ty, EdmType::Entity(_)) {
            return Err(EdmError::invalid(
                format!("{element}/{}", p.name),
                "structural property cannot have an entity type",
            ));
        }
        properties.push(Property {
            name: p.name.clone(),
            ty,
            collection,
            nullable: p.nullable,
            max_length: p.max_length,
            precision: p.precision,
            scale: p.scale,
            default_value: p.default_value.clone(),
        });
    }

    let mut navigation_properties = Vec::with_capacity(def.navigation_properties.len());
    for n in &def.navigation_properties {
        if !names.insert(n.name.as_str()) {
            return Err(EdmError::Duplicate(format!("{element}/{}", n.name)));
        }
        let (inner, collection) = split_collection(&n.type_name);
        let nav_element = format!("{element}/{}", n.name);
        let target = match decl.resolve(&nav_element, inner)? {
            EdmType::Entity(t) => t,
            _ => {
                return Err(EdmError::invalid(nav_element, "navigation target must be an entity type"));
            }
        };
        navigation_properties.push(NavigationProperty {
            name: n.name.clone(),
            target,
            collection,
            nullable: n.nullable && !collection,
            partner: n.partner.clone(),
            contains_target: n.contains_target,
        });
    }

    Ok(StructuredType {
        fqn,
        kind,
        base,
        is_abstract: def.is_abstract,
        open_type: def.open_type,
        has_stream: def.has_stream,
        key: def.key.clone(),
        properties,
        navigation_properties,
    })
}

fn build_operation(
    decl: &Declarations,
    ns: &str,
    def: &CsdlOperation,
    kind: OperationKind,
) -> Result<Operation, EdmError> {
    let fqn = FullQualifiedName::new(ns, &def.name);
    let element = fqn.to_string();
    if def.is_bound && def.parameters.is_empty() {
        return Err(EdmError::invalid(&element, "bound operation without binding parameter"));
    }
    let parameters = def
        .parameters
        .iter()
        .map(|p| {
            let (inner, collection) = split_collection(&p.type_name);
            Ok(Parameter {
                name: p.name.clone(),
                ty: decl.resolve(&format!("{element}({})", p.name), inner)?,
                collection,
                nullable: p.nullable,
            })
        })
        .collect::<Result<Vec<_>, EdmError>>()?;
    let return_type = def
        .return_type
        .as_ref()
        .map(|r| {
            let (inner, collection) = split_collection(&r.type_name);
            Ok::<_, EdmError>(ReturnType {
                ty: decl.resolve(&element, inner)?,
                collection,
                nullable: r.nullable,
            })
        })
        .transpose()?;
    Ok(Operation {
        fqn,
        kind,
        bound: def.is_bound,
        composable: kind == OperationKind::Function && def.is_composable,
        parameters,
        return_type,
        entity_set_path: def.entity_set_path.clone(),
    })
}

fn validate_bindings(edm: &Edm, container: &EntityContainer) -> Result<(), EdmError> {
    let target_exists = |name: &str| {
        container.entity_sets.iter().any(|s| s.name == name)
            || container.singletons.iter().any(|s| s.name == name)
    };
    let sources = container
        .entity_sets
        .iter()
        .map(|s| (&s.name, &s.entity_type, &s.navigation_bindings))
        .chain(
            container
                .singletons
                .iter()
                .map(|s| (&s.name, &s.entity_type, &s.navigation_bindings)),
        );
    for (name, ty, bindings) in sources {
        for b in bindings {
            let element = format!("{name}/{}", b.path);
            if !target_exists(&b.target) {
                return Err(EdmError::invalid(element, format!("unknown binding target '{}'", b.target)));
            }
            // Only simple paths are checked; paths through complex properties
            // or type casts are taken as declared.
            if !b.path.contains('/') && edm.navigation_property(ty, &b.path).is_none() {
                return Err(EdmError::invalid(element, "no such navigation property"));
            }
        }
    }
    Ok(())
}
