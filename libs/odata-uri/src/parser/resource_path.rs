//! Resolution of resource path segments against the model.

use std::collections::BTreeMap;

use odata_edm::{Edm, EdmType, FullQualifiedName, TypeKind};
use tracing::trace;

use crate::error::{SemanticKey, SyntaxKey, UriError, UriResult};
use crate::parser::context::Scope;
use crate::parser::expression::ExpressionParser;
use crate::parser::helper::{self, expect, require_end};
use crate::resource::{TypeInfo, UriResource};
use crate::tokenizer::{TokenKind, Tokenizer};
use crate::uri_info::UriInfoKind;

#[derive(Debug)]
pub struct ResourcePath {
    pub kind: UriInfoKind,
    pub parts: Vec<UriResource>,
    pub crossjoin: Vec<String>,
    pub entity_cast: Option<FullQualifiedName>,
}

impl ResourcePath {
    fn of(kind: UriInfoKind) -> Self {
        Self {
            kind,
            parts: Vec::new(),
            crossjoin: Vec::new(),
            entity_cast: None,
        }
    }
}

fn must_be_last(segment: &str) -> UriError {
    UriError::syntax(
        SyntaxKey::MustBeLastSegment,
        format!("'{segment}' must be the last path segment"),
    )
}

fn not_found(segment: &str) -> UriError {
    UriError::semantic(
        SemanticKey::ResourceNotFound,
        format!("resource '{segment}' not found"),
    )
}

pub struct ResourcePathResolver<'a> {
    edm: &'a Edm,
    aliases: &'a BTreeMap<String, String>,
}

impl<'a> ResourcePathResolver<'a> {
    #[must_use]
    pub fn new(edm: &'a Edm, aliases: &'a BTreeMap<String, String>) -> Self {
        Self { edm, aliases }
    }

    /// # Errors
    /// Syntax errors in a segment, unknown resources and misplaced segments.
    pub fn resolve(&self, segments: &[String]) -> UriResult<ResourcePath> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(ResourcePath::of(UriInfoKind::Service));
        };

        let only = |kind| {
            if rest.is_empty() {
                Ok(ResourcePath::of(kind))
            } else {
                Err(must_be_last(first))
            }
        };
        match first.as_str() {
            "$metadata" => return only(UriInfoKind::Metadata),
            "$batch" => return only(UriInfoKind::Batch),
            "$all" => return only(UriInfoKind::All),
            "$entity" => return self.entity_id(rest),
            _ => {}
        }
        if first.starts_with("$crossjoin") {
            return self.crossjoin(first, rest);
        }

        let mut parts = vec![self.leading(first, rest.is_empty())?];
        for (i, segment) in rest.iter().enumerate() {
            self.following(&mut parts, segment, i + 1 == rest.len())?;
        }
        trace!(segments = parts.len(), "resource path resolved");
        Ok(ResourcePath {
            parts,
            ..ResourcePath::of(UriInfoKind::Resource)
        })
    }

    fn entity_id(&self, rest: &[String]) -> UriResult<ResourcePath> {
        let mut path = ResourcePath::of(UriInfoKind::EntityId);
        match rest {
            [] => Ok(path),
            [cast] => {
                let fqn = FullQualifiedName::parse(cast)
                    .filter(|f| self.edm.entity_type(f).is_some())
                    .ok_or_else(|| {
                        UriError::syntax(
                            SyntaxKey::EntityCastPathMissing,
                            format!("'{cast}' after $entity is not an entity type"),
                        )
                    })?;
                path.entity_cast = Some(self.edm.canonical(&fqn));
                Ok(path)
            }
            [cast, ..] => Err(must_be_last(cast)),
        }
    }

    fn crossjoin(&self, segment: &str, rest: &[String]) -> UriResult<ResourcePath> {
        if !rest.is_empty() {
            return Err(must_be_last(segment));
        }
        let mut tok = Tokenizer::new(segment);
        expect(&mut tok, TokenKind::Call("$crossjoin"), "'$crossjoin('")?;
        let mut path = ResourcePath::of(UriInfoKind::CrossJoin);
        loop {
            tok.skip_ws();
            expect(&mut tok, TokenKind::Identifier, "entity set name")?;
            let name = tok.text();
            if self.edm.entity_set(name).is_none() {
                return Err(not_found(name));
            }
            if path.crossjoin.iter().any(|s| s == name) {
                return Err(tok.error(format!("'{name}' listed twice")));
            }
            path.crossjoin.push(name.to_owned());
            tok.skip_ws();
            if tok.next(TokenKind::Comma) {
                continue;
            }
            expect(&mut tok, TokenKind::Close, "')'")?;
            break;
        }
        require_end(&mut tok)?;
        Ok(path)
    }

    /// Entity set, singleton, action import or function import, in that order.
    fn leading(&self, segment: &str, last: bool) -> UriResult<UriResource> {
        let mut tok = Tokenizer::new(segment);
        if !tok.next(TokenKind::Identifier) {
            return Err(not_found(segment));
        }
        let name = tok.text();

        if let Some(set) = self.edm.entity_set(name) {
            let mut keys = Vec::new();
            if tok.next(TokenKind::Open) {
                keys = helper::parse_keys(self.edm, self.aliases, &mut tok, &set.entity_type)?;
            }
            require_end(&mut tok)?;
            return Ok(UriResource::EntitySet {
                name: set.name.clone(),
                entity_type: set.entity_type.clone(),
                keys,
                type_filter: None,
            });
        }

        if let Some(singleton) = self.edm.singleton(name) {
            if tok.next(TokenKind::Open) {
                return Err(UriError::semantic(
                    SemanticKey::KeyNotAllowed,
                    format!("singleton '{name}' takes no key"),
                ));
            }
            require_end(&mut tok)?;
            return Ok(UriResource::Singleton {
                name: singleton.name.clone(),
                entity_type: singleton.entity_type.clone(),
                type_filter: None,
            });
        }

        if let Some(import) = self.edm.action_import(name) {
            require_end(&mut tok)?;
            if !last {
                return Err(must_be_last(name));
            }
            let action = self
                .edm
                .unbound_action(&import.action)
                .ok_or_else(|| not_found(name))?;
            return Ok(UriResource::Action {
                action: action.fqn.clone(),
                import: Some(import.name.clone()),
                return_type: action.return_type.clone(),
            });
        }

        if let Some(import) = self.edm.function_import(name) {
            expect(&mut tok, TokenKind::Open, "'(' after function import")?;
            let mut parser = ExpressionParser::new(self.edm, self.aliases, Scope::default());
            let parameters = parser.function_parameters(&mut tok)?;
            let names: Vec<&str> = parameters.iter().map(|p| p.name.as_str()).collect();
            let function = self
                .edm
                .unbound_function(&import.function, &names)
                .ok_or_else(|| helper::operation_not_found(self.edm, &import.function, &names))?;
            helper::check_parameters(self.edm, function, &parameters)?;
            let mut resource = UriResource::Function {
                function: function.fqn.clone(),
                import: Some(import.name.clone()),
                parameters,
                return_type: function.return_type.clone(),
                keys: Vec::new(),
                type_filter: None,
            };
            self.function_keys(&mut tok, &mut resource)?;
            require_end(&mut tok)?;
            return Ok(resource);
        }

        Err(not_found(name))
    }

    /// Optional key predicate after a function returning an entity collection.
    fn function_keys(&self, tok: &mut Tokenizer<'_>, resource: &mut UriResource) -> UriResult<()> {
        if !tok.next(TokenKind::Open) {
            return Ok(());
        }
        let entity = match resource.type_info() {
            Some(TypeInfo {
                ty: EdmType::Entity(fqn),
                collection: true,
            }) => fqn,
            _ => {
                return Err(UriError::semantic(
                    SemanticKey::KeyNotAllowed,
                    format!("'{}' does not return an entity collection", resource.segment()),
                ));
            }
        };
        let keys = helper::parse_keys(self.edm, self.aliases, tok, &entity)?;
        helper::set_keys(resource, keys)
    }

    fn following(
        &self,
        parts: &mut Vec<UriResource>,
        segment: &str,
        last: bool,
    ) -> UriResult<()> {
        let Some(previous) = parts.last() else {
            return Err(not_found(segment));
        };
        if matches!(
            previous,
            UriResource::Count | UriResource::Value | UriResource::Ref | UriResource::Action { .. }
        ) {
            return Err(must_be_last(&previous.segment()));
        }
        let info = previous.type_info();

        match segment {
            "$ref" => {
                let entity = matches!(&info, Some(TypeInfo { ty: EdmType::Entity(_), .. }));
                if !entity {
                    return Err(UriError::semantic(
                        SemanticKey::OnlyForTypedParts,
                        "$ref is only allowed after entities",
                    ));
                }
                parts.push(UriResource::Ref);
                return Ok(());
            }
            "$value" => {
                if !self.value_allowed(previous) {
                    return Err(UriError::semantic(
                        SemanticKey::OnlyForTypedParts,
                        format!("$value is not allowed after '{}'", previous.segment()),
                    ));
                }
                parts.push(UriResource::Value);
                return Ok(());
            }
            "$count" => {
                if !previous.is_collection() {
                    return Err(UriError::semantic(
                        SemanticKey::OnlyForCollections,
                        format!("$count is not allowed after '{}'", previous.segment()),
                    ));
                }
                parts.push(UriResource::Count);
                return Ok(());
            }
            _ => {}
        }

        let info = info.ok_or_else(|| not_found(segment))?;
        let mut tok = Tokenizer::new(segment);
        if tok.next(TokenKind::QualifiedName) {
            let name = tok.text();
            return self.qualified(parts, &mut tok, name, &info, last);
        }
        if !tok.next(TokenKind::Identifier) {
            return Err(not_found(segment));
        }
        let name = tok.text();
        let owner = match (&info.ty, info.collection) {
            (EdmType::Entity(f) | EdmType::Complex(f), false) => f.clone(),
            (_, true) => {
                return Err(UriError::semantic(
                    SemanticKey::PropertyNotFound,
                    format!("'{name}' cannot follow a collection"),
                ));
            }
            _ => return Err(not_found(name)),
        };

        let resource = if let Some(nav) = self.edm.navigation_property(&owner, name) {
            let mut resource = UriResource::Navigation {
                name: nav.name.clone(),
                target: nav.target.clone(),
                collection: nav.collection,
                keys: Vec::new(),
                type_filter: None,
            };
            if tok.next(TokenKind::Open) {
                let keys = helper::parse_keys(self.edm, self.aliases, &mut tok, &nav.target)?;
                helper::set_keys(&mut resource, keys)?;
            }
            resource
        } else if let Some(p) = self.edm.property(&owner, name) {
            if tok.next(TokenKind::Open) {
                return Err(UriError::semantic(
                    SemanticKey::KeyNotAllowed,
                    format!("property '{name}' takes no key"),
                ));
            }
            helper::property_segment(p)
        } else {
            return Err(UriError::semantic(
                SemanticKey::ResourceNotFound,
                format!("'{name}' is not a property of '{owner}'"),
            ));
        };
        require_end(&mut tok)?;
        parts.push(resource);
        Ok(())
    }

    fn value_allowed(&self, previous: &UriResource) -> bool {
        let media = |ty: &EdmType| ty.structured().is_some_and(|f| self.edm.has_stream(f));
        match previous {
            UriResource::PrimitiveProperty {
                collection: false, ..
            } => true,
            UriResource::Function {
                return_type: Some(r),
                keys,
                ..
            } => {
                (!r.collection || !keys.is_empty())
                    && (matches!(
                        r.ty.kind(),
                        TypeKind::Primitive | TypeKind::Enum | TypeKind::Definition
                    ) || media(&r.ty))
            }
            other => other
                .type_info()
                .is_some_and(|t| !t.collection && media(&t.ty)),
        }
    }

    /// Bound action, type cast or bound function, tried in that order.
    fn qualified(
        &self,
        parts: &mut Vec<UriResource>,
        tok: &mut Tokenizer<'_>,
        name: &str,
        info: &TypeInfo,
        last: bool,
    ) -> UriResult<()> {
        let fqn = FullQualifiedName::parse(name).ok_or_else(|| not_found(name))?;
        let Some(binding) = info.ty.structured().cloned() else {
            return Err(not_found(name));
        };

        if let Some(action) = self.edm.bound_action(&fqn, &binding, info.collection) {
            require_end(tok)?;
            if !last {
                return Err(must_be_last(name));
            }
            let resource = UriResource::Action {
                action: action.fqn.clone(),
                import: None,
                return_type: action.return_type.clone(),
            };
            parts.push(resource);
            return Ok(());
        }

        if let Some(target) = self.edm.structured_type(&fqn) {
            if !self.edm.is_compatible(&target.fqn, &binding) {
                return Err(UriError::semantic(
                    SemanticKey::IncompatibleTypeFilter,
                    format!("'{}' does not derive from '{binding}'", target.fqn),
                ));
            }
            let cast = target.fqn.clone();
            let Some(previous) = parts.last_mut() else {
                return Err(not_found(name));
            };
            helper::set_type_filter(previous, cast.clone())?;
            if tok.next(TokenKind::Open) {
                let keys = helper::parse_keys(self.edm, self.aliases, tok, &cast)?;
                helper::set_keys(previous, keys)?;
            }
            return require_end(tok);
        }

        if tok.next(TokenKind::Open) {
            let mut parser = ExpressionParser::new(self.edm, self.aliases, Scope::default());
            let parameters = parser.function_parameters(tok)?;
            let names: Vec<&str> = parameters.iter().map(|p| p.name.as_str()).collect();
            let function = self
                .edm
                .bound_function(&fqn, &binding, info.collection, &names)
                .ok_or_else(|| helper::operation_not_found(self.edm, &fqn, &names))?;
            helper::check_parameters(self.edm, function, &parameters)?;
            let mut resource = UriResource::Function {
                function: function.fqn.clone(),
                import: None,
                parameters,
                return_type: function.return_type.clone(),
                keys: Vec::new(),
                type_filter: None,
            };
            self.function_keys(tok, &mut resource)?;
            require_end(tok)?;
            parts.push(resource);
            return Ok(());
        }

        if self.edm.has_operation(&fqn) {
            return Err(UriError::semantic(
                SemanticKey::FunctionNotFound,
                format!("'{name}' is not bound to '{binding}' or needs parentheses"),
            ));
        }
        Err(not_found(name))
    }
}
