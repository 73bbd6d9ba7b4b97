use odata_edm::{Edm, EdmType, FullQualifiedName};

use crate::error::{SemanticKey, UriError, UriResult};
use crate::parser::expression::ExpressionParser;
use crate::parser::helper::{self, expect};
use crate::query_options::{SelectItem, SelectOption};
use crate::resource::UriResource;
use crate::tokenizer::{TokenKind, Tokenizer};

/// `$select=*,ns.*,Name,HomeAddress/City,ns.Derived/Field,ns.Action`
///
/// # Errors
/// Syntax errors, unknown properties and incompatible casts.
pub fn parse(p: &ExpressionParser<'_>, tok: &mut Tokenizer<'_>) -> UriResult<SelectOption> {
    let owner = p.context_type().cloned().ok_or_else(|| {
        UriError::semantic(
            SemanticKey::PropertyNotFound,
            "$select needs a structured resource",
        )
    })?;
    let mut items = Vec::new();
    loop {
        tok.skip_ws();
        items.push(item(p, tok, &owner)?);
        tok.skip_ws();
        if !tok.next(TokenKind::Comma) {
            return Ok(SelectOption { items });
        }
    }
}

fn item(
    p: &ExpressionParser<'_>,
    tok: &mut Tokenizer<'_>,
    owner: &FullQualifiedName,
) -> UriResult<SelectItem> {
    let edm = p.edm();
    let mut item = SelectItem::default();
    if tok.next(TokenKind::Star) {
        item.star = true;
        return Ok(item);
    }

    let pos = tok.position();
    if tok.next(TokenKind::QualifiedName) || tok.next(TokenKind::Identifier) {
        let namespace = tok.text();
        if tok.next(TokenKind::Keyword(".*")) {
            if !edm.is_namespace(namespace) {
                return Err(UriError::semantic(
                    SemanticKey::ResourceNotFound,
                    format!("unknown namespace '{namespace}'"),
                ));
            }
            item.all_operations = Some(namespace.to_owned());
            return Ok(item);
        }
    }
    tok.reset(pos);

    let mut current = owner.clone();
    loop {
        if tok.next(TokenKind::QualifiedName) {
            let name = tok.text();
            let fqn = FullQualifiedName::parse(name).ok_or_else(|| tok.error("invalid name"))?;
            if item.path.is_empty()
                && let Some(operation) = bound_operation(edm, tok, &fqn, &current)?
            {
                item.operation = Some(operation);
                return Ok(item);
            }
            current = cast(edm, &mut item, &fqn, &current)?;
            expect(tok, TokenKind::Slash, "'/' after a type cast in $select")?;
            continue;
        }

        expect(tok, TokenKind::Identifier, "property name")?;
        let name = tok.text();
        let at_start = item.path.is_empty() && item.type_filter.is_none();
        if at_start && let Some(d) = p.scope().dynamic_property(name) {
            item.path.push(UriResource::DynamicProperty {
                name: d.name.clone(),
                ty: d.ty.clone(),
            });
            return Ok(item);
        }
        if let Some(property) = edm.property(&current, name) {
            item.path.push(helper::property_segment(property));
            if let EdmType::Complex(complex) = &property.ty {
                current = complex.clone();
                if tok.next(TokenKind::Slash) {
                    continue;
                }
            }
            return Ok(item);
        }
        if let Some(navigation) = edm.navigation_property(&current, name) {
            item.path.push(UriResource::Navigation {
                name: navigation.name.clone(),
                target: navigation.target.clone(),
                collection: navigation.collection,
                keys: Vec::new(),
                type_filter: None,
            });
            return Ok(item);
        }
        if edm.structured_type(&current).is_some_and(|t| t.open_type) {
            item.path.push(UriResource::DynamicProperty {
                name: name.to_owned(),
                ty: None,
            });
            return Ok(item);
        }
        return Err(UriError::semantic(
            SemanticKey::PropertyNotFound,
            format!("property '{name}' not found on '{current}'"),
        ));
    }
}

/// Bound action or function name, optionally with parameter names in
/// parentheses.
fn bound_operation(
    edm: &Edm,
    tok: &mut Tokenizer<'_>,
    fqn: &FullQualifiedName,
    binding: &FullQualifiedName,
) -> UriResult<Option<FullQualifiedName>> {
    if tok.next(TokenKind::Open) {
        let mut names = Vec::new();
        tok.skip_ws();
        if !tok.next(TokenKind::Close) {
            loop {
                tok.skip_ws();
                expect(tok, TokenKind::Identifier, "parameter name")?;
                names.push(tok.text());
                tok.skip_ws();
                if tok.next(TokenKind::Comma) {
                    continue;
                }
                expect(tok, TokenKind::Close, "')'")?;
                break;
            }
        }
        return edm
            .bound_function(fqn, binding, false, &names)
            .map(|f| Some(f.fqn.clone()))
            .ok_or_else(|| helper::operation_not_found(edm, fqn, &names));
    }
    if let Some(action) = edm.bound_action(fqn, binding, false) {
        return Ok(Some(action.fqn.clone()));
    }
    let function = edm.bound_functions(fqn).into_iter().find(|f| {
        f.binding_parameter().is_some_and(|b| {
            !b.collection
                && b.ty
                    .structured()
                    .is_some_and(|base| edm.is_compatible(binding, base))
        })
    });
    Ok(function.map(|f| f.fqn.clone()))
}

fn cast(
    edm: &Edm,
    item: &mut SelectItem,
    fqn: &FullQualifiedName,
    current: &FullQualifiedName,
) -> UriResult<FullQualifiedName> {
    let target = edm.structured_type(fqn).ok_or_else(|| {
        UriError::semantic(SemanticKey::TypeNotFound, format!("type '{fqn}' not found"))
    })?;
    if !edm.is_compatible(&target.fqn, current) {
        return Err(UriError::semantic(
            SemanticKey::IncompatibleTypeFilter,
            format!("'{}' does not derive from '{current}'", target.fqn),
        ));
    }
    match item.path.last_mut() {
        None if item.type_filter.is_some() => {
            return Err(UriError::semantic(
                SemanticKey::TypeFilterNotChainable,
                format!("second type cast '{fqn}'"),
            ));
        }
        None => item.type_filter = Some(target.fqn.clone()),
        Some(last) => helper::set_type_filter(last, target.fqn.clone())?,
    }
    Ok(target.fqn.clone())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::parser::context::Scope;

    fn edm() -> Edm {
        Edm::from_json(include_str!("../../../../testdata/demo/edm.json")).unwrap()
    }

    fn select(edm: &Edm, text: &str) -> UriResult<SelectOption> {
        let aliases = BTreeMap::new();
        let scope = Scope::for_type(
            EdmType::Entity(FullQualifiedName::new("Demo", "Person")),
            false,
        );
        let p = ExpressionParser::new(edm, &aliases, scope);
        let mut tok = Tokenizer::new(text);
        let option = parse(&p, &mut tok)?;
        helper::require_end(&mut tok)?;
        Ok(option)
    }

    #[test]
    fn star_and_plain_properties() {
        let edm = edm();
        let option = select(&edm, "*,Name, HomeAddress/City").unwrap();
        assert!(option.is_star());
        assert_eq!(option.items[1].path_names(), ["Name"]);
        assert_eq!(option.items[2].path_names(), ["HomeAddress", "City"]);
    }

    #[test]
    fn derived_properties_need_a_cast() {
        let edm = edm();
        assert_eq!(
            select(&edm, "Department").unwrap_err().semantic_key(),
            Some(SemanticKey::PropertyNotFound)
        );
        let option = select(&edm, "Demo.Employee/Department").unwrap();
        let item = &option.items[0];
        assert_eq!(
            item.type_filter,
            Some(FullQualifiedName::new("Demo", "Employee"))
        );
        assert_eq!(item.path_names(), ["Department"]);
    }

    #[test]
    fn operations_and_namespaces() {
        let edm = edm();
        let option = select(&edm, "Demo.*,Demo.Nearest").unwrap();
        assert_eq!(option.items[0].all_operations.as_deref(), Some("Demo"));
        assert_eq!(
            option.items[1].operation,
            Some(FullQualifiedName::new("Demo", "Nearest"))
        );
        let option = select(&edm, "Demo.Employee/Demo.Promote").unwrap();
        assert_eq!(
            option.items[0].operation,
            Some(FullQualifiedName::new("Demo", "Promote"))
        );
        assert!(select(&edm, "Nope.*").is_err());
    }

    #[test]
    fn primitive_paths_end() {
        let edm = edm();
        assert!(select(&edm, "Name/Length").is_err());
        assert!(select(&edm, "Demo.Order/Amount").is_err());
    }
}
