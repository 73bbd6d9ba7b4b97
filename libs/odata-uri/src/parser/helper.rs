//! Pieces shared by the path and option parsers.

use std::collections::BTreeMap;

use odata_edm::{Edm, EdmType, FullQualifiedName, Operation, Property};

use crate::error::{SemanticKey, SyntaxKey, UriError, UriResult};
use crate::literal::Literal;
use crate::parser::typecheck;
use crate::resource::{FunctionParameter, KeyPredicate, UriResource};
use crate::tokenizer::{TokenKind, Tokenizer};

/// Literal kinds in the order they must be tried: GUIDs and temporal values
/// start with digits and would otherwise be read as integers.
pub const LITERAL_KINDS: [TokenKind; 12] = [
    TokenKind::Null,
    TokenKind::Boolean,
    TokenKind::String,
    TokenKind::Guid,
    TokenKind::DateTimeOffset,
    TokenKind::Date,
    TokenKind::TimeOfDay,
    TokenKind::Double,
    TokenKind::Decimal,
    TokenKind::Integer,
    TokenKind::Duration,
    TokenKind::Binary,
];

/// Nesting allowed for parentheses, calls, lambdas, unary operators and
/// nested option lists before a request is rejected.
pub const MAX_DEPTH: u32 = 100;

pub fn too_deep() -> UriError {
    UriError::syntax(
        SyntaxKey::Syntax,
        format!("expression nested deeper than {MAX_DEPTH} levels"),
    )
}

pub fn expect(tok: &mut Tokenizer<'_>, kind: TokenKind, what: &str) -> UriResult<()> {
    if tok.next(kind) {
        Ok(())
    } else {
        Err(tok.error(format!("expected {what}")))
    }
}

pub fn require_end(tok: &mut Tokenizer<'_>) -> UriResult<()> {
    tok.skip_ws();
    expect(tok, TokenKind::End, "end of input")
}

/// Whether `kind` comes next, without consuming it.
pub fn lookahead(tok: &mut Tokenizer<'_>, kind: TokenKind) -> bool {
    let pos = tok.position();
    let hit = tok.next(kind);
    tok.reset(pos);
    hit
}

pub fn next_literal(tok: &mut Tokenizer<'_>) -> UriResult<Option<Literal>> {
    for kind in LITERAL_KINDS {
        if tok.next(kind) {
            return Literal::from_token(kind, tok.text()).map(Some);
        }
    }
    Ok(None)
}

/// Segment for a structural property.
#[must_use]
pub fn property_segment(p: &Property) -> UriResource {
    match &p.ty {
        EdmType::Complex(fqn) => UriResource::ComplexProperty {
            name: p.name.clone(),
            ty: fqn.clone(),
            collection: p.collection,
            type_filter: None,
        },
        ty => UriResource::PrimitiveProperty {
            name: p.name.clone(),
            ty: ty.clone(),
            collection: p.collection,
        },
    }
}

/// Records a type cast on the segment it follows.
pub fn set_type_filter(segment: &mut UriResource, cast: FullQualifiedName) -> UriResult<()> {
    let slot = match segment {
        UriResource::EntitySet { type_filter, .. }
        | UriResource::Singleton { type_filter, .. }
        | UriResource::Navigation { type_filter, .. }
        | UriResource::ComplexProperty { type_filter, .. }
        | UriResource::Function { type_filter, .. } => type_filter,
        other => {
            return Err(UriError::semantic(
                SemanticKey::IncompatibleTypeFilter,
                format!("type cast '{cast}' not allowed after '{}'", other.segment()),
            ));
        }
    };
    if slot.is_some() {
        return Err(UriError::semantic(
            SemanticKey::TypeFilterNotChainable,
            format!("second type cast '{cast}' on one segment"),
        ));
    }
    *slot = Some(cast);
    Ok(())
}

pub fn set_keys(segment: &mut UriResource, new_keys: Vec<KeyPredicate>) -> UriResult<()> {
    match segment {
        UriResource::EntitySet { keys, .. }
        | UriResource::Navigation {
            collection: true,
            keys,
            ..
        }
        | UriResource::Function { keys, .. }
            if keys.is_empty() =>
        {
            *keys = new_keys;
            Ok(())
        }
        other => Err(UriError::semantic(
            SemanticKey::KeyNotAllowed,
            format!("key predicate not allowed on '{}'", other.segment()),
        )),
    }
}

/// Parses a key predicate; the opening parenthesis is already consumed.
///
/// Accepts a single value for single-property keys or `name=value` pairs.
/// Values are literals or parameter aliases.
pub fn parse_keys(
    edm: &Edm,
    aliases: &BTreeMap<String, String>,
    tok: &mut Tokenizer<'_>,
    entity: &FullQualifiedName,
) -> UriResult<Vec<KeyPredicate>> {
    let key_props = edm.key(entity);
    if key_props.is_empty() {
        return Err(UriError::semantic(
            SemanticKey::KeyNotAllowed,
            format!("'{entity}' has no key"),
        ));
    }

    tok.skip_ws();
    let named = {
        let pos = tok.position();
        let hit = tok.next(TokenKind::Identifier) && {
            tok.skip_ws();
            tok.next(TokenKind::EqualsSign)
        };
        tok.reset(pos);
        hit
    };

    let mut raw: Vec<(String, Literal, Option<String>)> = Vec::new();
    loop {
        tok.skip_ws();
        let name = if named {
            expect(tok, TokenKind::Identifier, "key property name")?;
            let name = tok.text().to_owned();
            tok.skip_ws();
            expect(tok, TokenKind::EqualsSign, "'='")?;
            tok.skip_ws();
            name
        } else {
            key_props[0].name.clone()
        };
        let (value, alias) = key_value(aliases, tok)?;
        if raw.iter().any(|(n, _, _)| *n == name) {
            return Err(UriError::semantic(
                SemanticKey::InvalidKeyValue,
                format!("key property '{name}' given twice"),
            ));
        }
        raw.push((name, value, alias));
        tok.skip_ws();
        if tok.next(TokenKind::Comma) {
            if !named {
                return Err(tok.error("composite keys need name=value pairs"));
            }
            continue;
        }
        expect(tok, TokenKind::Close, "')'")?;
        break;
    }

    if raw.len() != key_props.len() {
        return Err(UriError::semantic(
            SemanticKey::WrongNumberOfKeyProperties,
            format!(
                "'{entity}' has {} key properties, {} given",
                key_props.len(),
                raw.len()
            ),
        ));
    }

    let mut out = Vec::with_capacity(raw.len());
    for prop in key_props {
        let Some(pos) = raw.iter().position(|(n, _, _)| *n == prop.name) else {
            return Err(UriError::semantic(
                SemanticKey::InvalidKeyValue,
                format!("missing value for key property '{}'", prop.name),
            ));
        };
        let (name, value, alias) = raw.swap_remove(pos);
        let expected = edm.underlying_primitive(&prop.ty);
        let fits = match (expected, value.kind) {
            (Some(e), Some(k)) => e.is_compatible_from(k),
            _ => false,
        };
        if !fits {
            return Err(UriError::semantic(
                SemanticKey::InvalidKeyValue,
                format!("'{}' is not a valid value for key '{name}' of type {}", value.text, prop.ty),
            ));
        }
        out.push(KeyPredicate { name, value, alias });
    }
    Ok(out)
}

fn key_value(
    aliases: &BTreeMap<String, String>,
    tok: &mut Tokenizer<'_>,
) -> UriResult<(Literal, Option<String>)> {
    if tok.next(TokenKind::Alias) {
        let alias = tok.text().to_owned();
        let text = aliases.get(&alias).ok_or_else(|| {
            UriError::semantic(
                SemanticKey::InvalidKeyValue,
                format!("alias '{alias}' used as key is not defined"),
            )
        })?;
        let mut inner = Tokenizer::new(text);
        let value = next_literal(&mut inner)?
            .ok_or_else(|| inner.error("expected a literal alias value"))?;
        require_end(&mut inner)?;
        return Ok((value, Some(alias)));
    }
    next_literal(tok)?
        .map(|v| (v, None))
        .ok_or_else(|| tok.error("expected key value"))
}

/// Checks call arguments against the parameters of the chosen overload.
pub fn check_parameters(
    edm: &Edm,
    operation: &Operation,
    parameters: &[FunctionParameter],
) -> UriResult<()> {
    for arg in parameters {
        let Some(declared) = operation.parameter(&arg.name) else {
            return Err(UriError::semantic(
                SemanticKey::ParameterMissing,
                format!("'{}' has no parameter '{}'", operation.fqn, arg.name),
            ));
        };
        if arg.value.is_null() {
            if !declared.nullable {
                return Err(UriError::type_mismatch(format!(
                    "parameter '{}' of '{}' is not nullable",
                    arg.name, operation.fqn
                )));
            }
            continue;
        }
        if !typecheck::assignable(edm, &declared.ty, &arg.value) {
            return Err(UriError::type_mismatch(format!(
                "parameter '{}' of '{}' expects {}",
                arg.name, operation.fqn, declared.ty
            )));
        }
    }
    Ok(())
}

/// Error for an operation name that exists with other parameters, or not at all.
#[must_use]
pub fn operation_not_found(edm: &Edm, name: &FullQualifiedName, names: &[&str]) -> UriError {
    if edm.has_operation(name) {
        UriError::semantic(
            SemanticKey::ParameterMissing,
            format!("no overload of '{name}' takes parameters ({})", names.join(",")),
        )
    } else {
        UriError::semantic(
            SemanticKey::FunctionNotFound,
            format!("function '{name}' not found"),
        )
    }
}
