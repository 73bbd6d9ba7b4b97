#![allow(clippy::unwrap_used, clippy::expect_used)]

use odata_edm::{Edm, EdmType, FullQualifiedName, PrimitiveKind};
use odata_uri::apply::ApplyItem;
use odata_uri::literal::LiteralValue;
use odata_uri::{
    Expression, Parser, SemanticKey, SyntaxKey, UriError, UriInfo, UriInfoKind, UriResource,
    ValidationKey,
};

const DEMO: &str = include_str!("../../../testdata/demo/edm.json");

fn demo() -> Edm {
    Edm::from_json(DEMO).expect("demo schema builds")
}

fn parse(path: &str, query: &str) -> Result<UriInfo, UriError> {
    let edm = demo();
    Parser::new(&edm).parse_uri(path, query)
}

fn fqn(s: &str) -> FullQualifiedName {
    FullQualifiedName::parse(s).unwrap()
}

fn semantic(err: &UriError) -> Option<SemanticKey> {
    err.semantic_key()
}

#[test]
fn service_metadata_and_batch() {
    assert_eq!(parse("", "").unwrap().kind, UriInfoKind::Service);
    assert_eq!(parse("/$metadata", "").unwrap().kind, UriInfoKind::Metadata);
    assert_eq!(parse("$batch", "").unwrap().kind, UriInfoKind::Batch);
    let err = parse("$metadata/People", "").unwrap_err();
    assert_eq!(err.syntax_key(), Some(SyntaxKey::MustBeLastSegment));
}

#[test]
fn entity_set_with_key_and_navigation() {
    let info = parse("People(5)/Orders(10)/Items", "").unwrap();
    assert_eq!(info.kind, UriInfoKind::Resource);
    assert_eq!(info.resource_parts.len(), 3);
    let UriResource::EntitySet { keys, .. } = &info.resource_parts[0] else {
        panic!("expected entity set");
    };
    assert_eq!(keys[0].name, "Id");
    assert_eq!(keys[0].value.value, LiteralValue::Integer(5));
    assert!(info.resource_parts[2].is_collection());
    let target = info.target_type().unwrap();
    assert_eq!(target.ty, EdmType::Entity(fqn("Demo.OrderItem")));
}

#[test]
fn composite_keys_and_aliases() {
    let info = parse("OrderItems(OrderId=1,Line=@l)", "@l=2").unwrap();
    let keys = info.resource_parts[0].keys();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[1].alias.as_deref(), Some("@l"));

    let err = parse("OrderItems(1)", "").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::WrongNumberOfKeyProperties));
    let err = parse("People('x')", "").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::InvalidKeyValue));
}

#[test]
fn unknown_segments_are_not_found() {
    let err = parse("Nobody", "").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::ResourceNotFound));
    let err = parse("People(1)/Nope", "").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::ResourceNotFound));
    let err = parse("Me(1)", "").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::KeyNotAllowed));
}

#[test]
fn casts_on_sets_and_navigation() {
    let info = parse("People/Demo.Employee(3)/Department", "").unwrap();
    assert_eq!(
        info.resource_parts[0].type_filter(),
        Some(&fqn("Demo.Employee"))
    );
    assert!(matches!(
        info.resource_parts[1],
        UriResource::PrimitiveProperty { .. }
    ));

    let err = parse("People/Demo.Order", "").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::IncompatibleTypeFilter));
    let err = parse("People/Demo.Employee/Demo.Employee", "").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::TypeFilterNotChainable));
}

#[test]
fn count_value_and_ref() {
    let info = parse("People/$count", "").unwrap();
    assert_eq!(info.last_part(), Some(&UriResource::Count));

    let info = parse("People(1)/Name/$value", "").unwrap();
    assert_eq!(info.last_part(), Some(&UriResource::Value));
    let info = parse("Documents(6c3e1a3b-9a0e-4b8a-8c43-5b8f1d2a7e10)/$value", "").unwrap();
    assert_eq!(info.last_part(), Some(&UriResource::Value));
    let err = parse("People(1)/$value", "").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::OnlyForTypedParts));

    let info = parse("People(1)/Orders/$ref", "").unwrap();
    assert_eq!(info.last_part(), Some(&UriResource::Ref));
    let err = parse("People(1)/Name/$ref", "").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::OnlyForTypedParts));

    let err = parse("People(1)/$count", "").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::OnlyForCollections));
    let err = parse("People/$count/$value", "").unwrap_err();
    assert_eq!(err.syntax_key(), Some(SyntaxKey::MustBeLastSegment));
}

#[test]
fn operations() {
    let info = parse("TopCustomers(count=5)", "").unwrap();
    let UriResource::Function { parameters, .. } = &info.resource_parts[0] else {
        panic!("expected function");
    };
    assert_eq!(parameters[0].text, "5");
    assert!(info.resource_parts[0].is_collection());

    let info = parse("TopCustomers(count=5)(1)/Name", "").unwrap();
    assert_eq!(info.resource_parts.len(), 2);

    let err = parse("TopCustomers", "").unwrap_err();
    assert_eq!(err.syntax_key(), Some(SyntaxKey::Syntax));
    let err = parse("TopCustomers(max=5)", "").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::ParameterMissing));

    let info = parse("ResetAll", "").unwrap();
    assert!(matches!(info.resource_parts[0], UriResource::Action { .. }));
    let err = parse("ResetAll/Name", "").unwrap_err();
    assert_eq!(err.syntax_key(), Some(SyntaxKey::MustBeLastSegment));

    let info = parse("People/Demo.Employee(2)/Demo.Promote", "").unwrap();
    assert!(matches!(
        info.last_part(),
        Some(UriResource::Action { import: None, .. })
    ));

    let info = parse("People(1)/Demo.Nearest(city='Oslo')/Name", "").unwrap();
    assert_eq!(info.resource_parts.len(), 3);
    let info = parse("People(1)/Orders/Demo.TotalAmount()", "").unwrap();
    assert_eq!(
        info.target_type().unwrap().ty,
        EdmType::Primitive(PrimitiveKind::Decimal)
    );
}

#[test]
fn crossjoin_all_and_entity() {
    let info = parse(
        "$crossjoin(People,Orders)",
        "$filter=People/any(p:p/Age gt 1 and Orders/any(o:o/CustomerId eq p/Id))",
    )
    .unwrap();
    assert_eq!(info.kind, UriInfoKind::CrossJoin);
    assert_eq!(info.crossjoin_entity_sets, ["People", "Orders"]);
    let err = parse("$crossjoin(People,Nobody)", "").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::ResourceNotFound));

    assert_eq!(parse("$all", "").unwrap().kind, UriInfoKind::All);
    let info = parse("$entity/Demo.Person", "$id=People(1)&$select=Name").unwrap();
    assert_eq!(info.kind, UriInfoKind::EntityId);
    assert_eq!(info.id.as_deref(), Some("People(1)"));
    let err = parse("$entity", "").unwrap_err();
    assert_eq!(err.syntax_key(), Some(SyntaxKey::Syntax));
    let err = parse("$entity/Demo.Address", "$id=x").unwrap_err();
    assert_eq!(err.syntax_key(), Some(SyntaxKey::EntityCastPathMissing));
}

#[test]
fn option_names_are_classified() {
    let info = parse("People", "$top=2&$skip=1&$count=true&debug=1&@a=1").unwrap();
    assert_eq!(info.options.top, Some(2));
    assert_eq!(info.options.skip, Some(1));
    assert_eq!(info.options.count, Some(true));
    assert_eq!(info.custom_options.get("debug").map(String::as_str), Some("1"));
    assert_eq!(info.aliases.get("@a").map(String::as_str), Some("1"));

    let err = parse("People", "$bogus=1").unwrap_err();
    assert_eq!(err.syntax_key(), Some(SyntaxKey::UnknownSystemQueryOption));
    let err = parse("People", "$top=1&$top=2").unwrap_err();
    assert_eq!(err.syntax_key(), Some(SyntaxKey::DoubleSystemQueryOption));
    let err = parse("People", "@a=1&@a=2").unwrap_err();
    assert_eq!(err.syntax_key(), Some(SyntaxKey::DuplicateAlias));
    for bad in ["$top=-1", "$skip=x", "$count=yes", "$format="] {
        let err = parse("People", bad).unwrap_err();
        assert_eq!(
            err.syntax_key(),
            Some(SyntaxKey::WrongValueForSystemQueryOption),
            "{bad}"
        );
    }
}

#[test]
fn options_are_validated_per_resource_kind() {
    let err = parse("People(1)", "$top=1").unwrap_err();
    assert!(matches!(
        err,
        UriError::Validation {
            key: ValidationKey::SystemQueryOptionNotAllowed,
            ..
        }
    ));
    assert!(parse("People(1)", "$select=Name&$expand=Orders").is_ok());
    assert!(parse("People/$count", "$filter=Age gt 3").is_ok());
    assert!(parse("People/$count", "$orderby=Age").is_err());
}

#[test]
fn filter_and_orderby_resolve_against_the_target() {
    let info = parse(
        "People",
        "$filter=contains(Name,'an') and HomeAddress/City eq @city&@city='Oslo'&$orderby=Age desc,Name",
    )
    .unwrap();
    assert!(matches!(
        info.options.filter,
        Some(Expression::Binary { .. })
    ));
    assert_eq!(info.options.orderby.len(), 2);
    assert!(info.options.orderby[0].descending);
    assert!(!info.options.orderby[1].descending);

    let err = parse("People", "$filter=Age").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::TypeMismatch));
    let err = parse("People", "$orderby=HomeAddress").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::TypeMismatch));
    let err = parse("People", "$filter=Nope eq 1").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::PropertyNotFound));

    let info = parse("People/Demo.Employee", "$filter=Department eq 'R%26D'").unwrap();
    assert!(info.options.filter.is_some());
}

#[test]
fn apply_aliases_feed_later_options() {
    let info = parse(
        "Orders",
        "$apply=groupby((Status),aggregate(Amount with sum as Total))&$filter=Total gt 10&$orderby=Total desc",
    )
    .unwrap();
    let apply = info.options.apply.unwrap();
    assert!(matches!(apply.items[0], ApplyItem::GroupBy(_)));

    let err = parse("Orders", "$filter=Total gt 10").unwrap_err();
    assert_eq!(semantic(&err), Some(SemanticKey::PropertyNotFound));
}

#[test]
fn search_select_expand_together() {
    let info = parse(
        "People",
        "$search=blue OR \"dark red\"&$select=Name,HomeAddress/City&$expand=Orders($top=2;$select=Amount)",
    )
    .unwrap();
    assert!(info.options.search.is_some());
    assert_eq!(info.options.select.as_ref().unwrap().items.len(), 2);
    let expand = info.options.expand.unwrap();
    assert_eq!(expand.items[0].options.top, Some(2));
}

#[test]
fn expand_depth_limit() {
    let edm = demo();
    let parser = Parser::new(&edm).with_max_expand_depth(2);
    assert!(
        parser
            .parse_uri("People", "$expand=Friends($expand=Friends)")
            .is_ok()
    );
    let err = parser
        .parse_uri("People", "$expand=Friends($expand=Friends($expand=Orders))")
        .unwrap_err();
    assert!(matches!(
        err,
        UriError::Validation {
            key: ValidationKey::ExpandDepthExceeded,
            ..
        }
    ));
}

#[test]
fn percent_encoding_in_path_and_query() {
    let info = parse("People(1)/Home%41ddress", "").unwrap();
    assert_eq!(
        info.resource_parts[1].property_name(),
        Some("HomeAddress")
    );
    let err = parse("People", "$filter=Name eq %ZZ").unwrap_err();
    assert_eq!(err.syntax_key(), Some(SyntaxKey::InvalidEncoding));
}

#[test]
fn deeply_nested_expressions_are_rejected() {
    let nested = |depth: usize| format!("$filter={}true{}", "(".repeat(depth), ")".repeat(depth));
    assert!(parse("People", &nested(50)).is_ok());
    let err = parse("People", &nested(200)).unwrap_err();
    assert_eq!(err.syntax_key(), Some(SyntaxKey::Syntax));
    assert!(err.to_string().contains("nested deeper"), "{err}");

    let negations = format!("$filter={}true", "not ".repeat(5000));
    let err = parse("People", &negations).unwrap_err();
    assert_eq!(err.syntax_key(), Some(SyntaxKey::Syntax));

    let calls = format!("$filter={}'a'{} eq 'a'", "tolower(".repeat(300), ")".repeat(300));
    let err = parse("People", &calls).unwrap_err();
    assert_eq!(err.syntax_key(), Some(SyntaxKey::Syntax));
}

#[test]
fn deeply_nested_expand_options_are_rejected() {
    let expand = |depth: usize| {
        format!(
            "$expand={}Friends{}",
            "Friends($expand=".repeat(depth),
            ")".repeat(depth)
        )
    };
    assert!(parse("People", &expand(10)).is_ok());
    let err = parse("People", &expand(300)).unwrap_err();
    assert_eq!(err.syntax_key(), Some(SyntaxKey::Syntax));
}
