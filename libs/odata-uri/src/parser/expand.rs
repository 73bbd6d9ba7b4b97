use odata_edm::{EdmType, FullQualifiedName};

use crate::error::{SemanticKey, SyntaxKey, UriError, UriResult, ValidationKey};
use crate::parser::context::Scope;
use crate::parser::expression::ExpressionParser;
use crate::parser::helper::{self, expect};
use crate::parser::parse_option;
use crate::query_options::{ExpandItem, ExpandOption, Levels, QueryOptions};
use crate::resource::UriResource;
use crate::tokenizer::{TokenKind, Tokenizer};
use crate::validator::SystemQueryOption;

/// Navigation reached by an expand path.
#[derive(Debug)]
pub struct ExpandPath {
    pub path: Vec<UriResource>,
    pub target: FullQualifiedName,
    pub collection: bool,
}

/// # Errors
/// Syntax errors, unknown navigation properties and errors in nested
/// options.
pub fn parse(p: &ExpressionParser<'_>, tok: &mut Tokenizer<'_>) -> UriResult<ExpandOption> {
    let owner = p.context_type().cloned().ok_or_else(|| {
        UriError::semantic(
            SemanticKey::PropertyNotFound,
            "$expand needs a structured resource",
        )
    })?;
    let mut items = Vec::new();
    loop {
        tok.skip_ws();
        items.push(item(p, tok, &owner)?);
        tok.skip_ws();
        if !tok.next(TokenKind::Comma) {
            return Ok(ExpandOption { items });
        }
    }
}

fn item(
    p: &ExpressionParser<'_>,
    tok: &mut Tokenizer<'_>,
    owner: &FullQualifiedName,
) -> UriResult<ExpandItem> {
    if tok.next(TokenKind::Star) {
        let mut item = ExpandItem {
            star: true,
            ..ExpandItem::default()
        };
        if tok.next(TokenKind::Slash) {
            expect(tok, TokenKind::Keyword("$ref"), "$ref after '*/'")?;
            item.is_ref = true;
        } else if tok.next(TokenKind::Open) {
            tok.skip_ws();
            expect(tok, TokenKind::Keyword("$levels"), "$levels")?;
            tok.skip_ws();
            expect(tok, TokenKind::EqualsSign, "'='")?;
            tok.skip_ws();
            item.options.levels = Some(levels(tok)?);
            tok.skip_ws();
            expect(tok, TokenKind::Close, "')'")?;
        }
        return Ok(item);
    }

    let ExpandPath {
        path,
        mut target,
        collection,
    } = parse_item_path(p, tok, owner)?;
    let mut item = ExpandItem {
        path,
        ..ExpandItem::default()
    };

    if tok.next(TokenKind::Slash) {
        if tok.next(TokenKind::QualifiedName) {
            let name = tok.text();
            target = derived_entity(p, name, &target)?;
            item.type_filter = Some(target.clone());
            if tok.next(TokenKind::Slash) {
                ref_or_count(tok, &mut item, collection)?;
            }
        } else {
            ref_or_count(tok, &mut item, collection)?;
        }
    }

    if tok.next(TokenKind::Open) {
        let allowed: &[SystemQueryOption] = if item.is_ref {
            &[
                SystemQueryOption::Filter,
                SystemQueryOption::Search,
                SystemQueryOption::OrderBy,
                SystemQueryOption::Top,
                SystemQueryOption::Skip,
                SystemQueryOption::Count,
            ]
        } else if item.is_count {
            &[SystemQueryOption::Filter, SystemQueryOption::Search]
        } else {
            &SystemQueryOption::NESTED
        };
        let scope = Scope::for_type(EdmType::Entity(target), false);
        let mut nested = p.nested(scope);
        nested.check_depth()?;
        item.options = nested_options(&mut nested, tok, allowed)?;
    }
    Ok(item)
}

fn ref_or_count(tok: &mut Tokenizer<'_>, item: &mut ExpandItem, collection: bool) -> UriResult<()> {
    if tok.next(TokenKind::Keyword("$ref")) {
        item.is_ref = true;
        return Ok(());
    }
    expect(tok, TokenKind::Keyword("$count"), "type cast, $ref or $count")?;
    if !collection {
        return Err(UriError::semantic(
            SemanticKey::OnlyForCollections,
            "$count in $expand needs a collection-valued navigation",
        ));
    }
    item.is_count = true;
    Ok(())
}

fn derived_entity(
    p: &ExpressionParser<'_>,
    name: &str,
    base: &FullQualifiedName,
) -> UriResult<FullQualifiedName> {
    let fqn = FullQualifiedName::parse(name).ok_or_else(|| {
        UriError::semantic(SemanticKey::TypeNotFound, format!("invalid type '{name}'"))
    })?;
    let target = p.edm().entity_type(&fqn).ok_or_else(|| {
        UriError::semantic(SemanticKey::TypeNotFound, format!("type '{name}' not found"))
    })?;
    if !p.edm().is_compatible(&target.fqn, base) {
        return Err(UriError::semantic(
            SemanticKey::IncompatibleTypeFilter,
            format!("'{}' does not derive from '{base}'", target.fqn),
        ));
    }
    Ok(target.fqn.clone())
}

/// Path through type casts and complex properties ending in a navigation
/// property. A cast at the start is recorded as an `It` segment of the
/// derived type.
///
/// # Errors
/// `PropertyNotFound` when the path does not end in a navigation property.
pub fn parse_item_path(
    p: &ExpressionParser<'_>,
    tok: &mut Tokenizer<'_>,
    owner: &FullQualifiedName,
) -> UriResult<ExpandPath> {
    let edm = p.edm();
    let mut path: Vec<UriResource> = Vec::new();
    let mut current = owner.clone();
    loop {
        if tok.next(TokenKind::QualifiedName) {
            let name = tok.text();
            let fqn = FullQualifiedName::parse(name).ok_or_else(|| tok.error("invalid name"))?;
            let target = edm.structured_type(&fqn).ok_or_else(|| {
                UriError::semantic(SemanticKey::TypeNotFound, format!("type '{name}' not found"))
            })?;
            if !edm.is_compatible(&target.fqn, &current) {
                return Err(UriError::semantic(
                    SemanticKey::IncompatibleTypeFilter,
                    format!("'{}' does not derive from '{current}'", target.fqn),
                ));
            }
            match path.last_mut() {
                None => path.push(UriResource::It {
                    ty: target.edm_type(),
                    collection: false,
                }),
                Some(last) => helper::set_type_filter(last, target.fqn.clone())?,
            }
            current = target.fqn.clone();
            expect(tok, TokenKind::Slash, "'/' after a type cast in $expand")?;
            continue;
        }

        expect(tok, TokenKind::Identifier, "navigation property")?;
        let name = tok.text();
        if let Some(navigation) = edm.navigation_property(&current, name) {
            path.push(UriResource::Navigation {
                name: navigation.name.clone(),
                target: navigation.target.clone(),
                collection: navigation.collection,
                keys: Vec::new(),
                type_filter: None,
            });
            return Ok(ExpandPath {
                path,
                target: navigation.target.clone(),
                collection: navigation.collection,
            });
        }
        match edm.property(&current, name) {
            Some(property) if matches!(property.ty, EdmType::Complex(_)) => {
                if let EdmType::Complex(complex) = &property.ty {
                    current = complex.clone();
                }
                path.push(helper::property_segment(property));
                expect(tok, TokenKind::Slash, "'/' after a complex property in $expand")?;
            }
            Some(_) => {
                return Err(UriError::semantic(
                    SemanticKey::PropertyNotFound,
                    format!("'{name}' is not a navigation property"),
                ));
            }
            None => {
                return Err(UriError::semantic(
                    SemanticKey::PropertyNotFound,
                    format!("navigation property '{name}' not found on '{current}'"),
                ));
            }
        }
    }
}

fn levels(tok: &mut Tokenizer<'_>) -> UriResult<Levels> {
    if tok.next(TokenKind::Keyword("max")) {
        return Ok(Levels::Max);
    }
    if tok.next(TokenKind::Integer)
        && let Ok(n) = tok.text().parse::<u32>()
    {
        return Ok(Levels::Value(n));
    }
    Err(UriError::syntax(
        SyntaxKey::WrongValueForSystemQueryOption,
        "$levels must be 'max' or a non-negative integer",
    ))
}

/// `name=value;...` after an opening parenthesis, through the closing one.
fn nested_options(
    p: &mut ExpressionParser<'_>,
    tok: &mut Tokenizer<'_>,
    allowed: &[SystemQueryOption],
) -> UriResult<QueryOptions> {
    let mut options = QueryOptions::default();
    let mut seen = Vec::new();
    loop {
        tok.skip_ws();
        let option = SystemQueryOption::NESTED
            .into_iter()
            .find(|o| tok.next(TokenKind::Keyword(o.name())))
            .ok_or_else(|| tok.error("expected a nested system query option"))?;
        if seen.contains(&option) {
            return Err(UriError::syntax(
                SyntaxKey::DoubleSystemQueryOption,
                format!("{} given twice in $expand", option.name()),
            ));
        }
        if !allowed.contains(&option) {
            return Err(UriError::validation(
                ValidationKey::SystemQueryOptionNotAllowed,
                format!("{} is not allowed here", option.name()),
            ));
        }
        seen.push(option);
        tok.skip_ws();
        expect(tok, TokenKind::EqualsSign, "'='")?;
        tok.skip_ws();
        if option == SystemQueryOption::Levels {
            options.levels = Some(levels(tok)?);
        } else {
            parse_option(p, tok, option, &mut options)?;
        }
        tok.skip_ws();
        if tok.next(TokenKind::Semicolon) {
            continue;
        }
        expect(tok, TokenKind::Close, "';' or ')'")?;
        return Ok(options);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use odata_edm::Edm;

    fn edm() -> Edm {
        Edm::from_json(include_str!("../../../../testdata/demo/edm.json")).unwrap()
    }

    fn expand(edm: &Edm, text: &str) -> UriResult<ExpandOption> {
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
    fn navigation_with_nested_options() {
        let edm = edm();
        let option = expand(
            &edm,
            "Orders($filter=Amount gt 10;$orderby=OrderDate desc;$top=5;$expand=Items($select=Product))",
        )
        .unwrap();
        let item = &option.items[0];
        assert_eq!(item.navigation().map(UriResource::segment).as_deref(), Some("Orders"));
        assert!(item.options.filter.is_some());
        assert_eq!(item.options.top, Some(5));
        assert!(item.options.orderby[0].descending);
        let inner = &item.options.expand.as_ref().unwrap().items[0];
        assert_eq!(inner.options.select.as_ref().unwrap().items.len(), 1);
    }

    #[test]
    fn nested_filter_resolves_against_the_target() {
        let edm = edm();
        let err = expand(&edm, "Orders($filter=Name eq 'x')").unwrap_err();
        assert_eq!(err.semantic_key(), Some(SemanticKey::PropertyNotFound));
    }

    #[test]
    fn star_ref_count_and_levels() {
        let edm = edm();
        let option = expand(&edm, "*/$ref").unwrap();
        assert!(option.items[0].star && option.items[0].is_ref);

        let option = expand(&edm, "*($levels=max)").unwrap();
        assert_eq!(option.items[0].options.levels, Some(Levels::Max));

        let option = expand(&edm, "Orders/$count($filter=Amount gt 1)").unwrap();
        assert!(option.items[0].is_count);

        let option = expand(&edm, "Friends($levels=2)").unwrap();
        assert_eq!(option.items[0].options.levels, Some(Levels::Value(2)));

        assert!(expand(&edm, "Manager/$count").is_err());
        assert!(expand(&edm, "Orders/$ref($select=Amount)").is_err());
    }

    #[test]
    fn casts_and_complex_steps() {
        let edm = edm();
        let option = expand(&edm, "Demo.Employee/Manager/Demo.Employee").unwrap();
        let item = &option.items[0];
        assert!(matches!(item.path[0], UriResource::It { .. }));
        assert_eq!(
            item.type_filter,
            Some(FullQualifiedName::new("Demo", "Employee"))
        );
        assert!(expand(&edm, "Name").is_err());
        assert!(expand(&edm, "Orders($filter=Amount gt 1;$filter=Amount lt 5)").is_err());
    }
}
