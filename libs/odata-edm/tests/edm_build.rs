#![allow(clippy::unwrap_used, clippy::expect_used)]

use odata_edm::csdl::{CsdlProperty, CsdlSchema, CsdlStructuredType};
use odata_edm::{Edm, EdmError, EdmType, FullQualifiedName, PrimitiveKind};

const DEMO: &str = include_str!("../../../testdata/demo/edm.json");

fn demo() -> Edm {
    Edm::from_json(DEMO).expect("demo schema builds")
}

fn fqn(s: &str) -> FullQualifiedName {
    FullQualifiedName::parse(s).unwrap()
}

fn prop(name: &str, ty: &str, nullable: bool) -> CsdlProperty {
    CsdlProperty {
        name: name.to_owned(),
        type_name: ty.to_owned(),
        nullable,
        max_length: None,
        precision: None,
        scale: None,
        default_value: None,
    }
}

#[test]
fn container_members_resolve() {
    let edm = demo();
    assert_eq!(edm.entity_container().name, "Container");
    assert_eq!(edm.entity_set("People").unwrap().entity_type, fqn("Demo.Person"));
    assert_eq!(edm.singleton("Me").unwrap().entity_type, fqn("Demo.Person"));
    assert!(edm.action_import("ResetAll").is_some());
    assert_eq!(
        edm.function_import("TopCustomers").unwrap().entity_set.as_deref(),
        Some("People")
    );
    assert_eq!(
        edm.entity_set("People").unwrap().binding_target("Orders"),
        Some("Orders")
    );
    assert_eq!(edm.navigation_binding("People", "Orders"), Some("Orders"));
    assert_eq!(edm.navigation_binding("Me", "Orders"), Some("Orders"));
    assert_eq!(edm.navigation_binding("People", "Nowhere"), None);
    assert_eq!(edm.navigation_binding("Nobody", "Orders"), None);
}

#[test]
fn alias_is_resolved() {
    let edm = demo();
    let color = edm.property(&fqn("Demo.Person"), "FavoriteColor").unwrap();
    assert_eq!(color.ty, EdmType::Enum(fqn("Demo.Color")));
    assert!(edm.entity_type(&fqn("D.Person")).is_some());
    assert_eq!(
        edm.resolve_type("D.Address"),
        Some(EdmType::Complex(fqn("Demo.Address")))
    );
    assert_eq!(
        edm.resolve_type("Edm.Guid"),
        Some(EdmType::Primitive(PrimitiveKind::Guid))
    );
}

#[test]
fn inheritance_exposes_base_members_and_key() {
    let edm = demo();
    let employee = fqn("Demo.Employee");
    let names: Vec<_> = edm
        .properties(&employee)
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(names.first(), Some(&"Id"));
    assert!(names.contains(&"Department"));
    assert_eq!(edm.key(&employee).len(), 1);
    assert!(edm.navigation_property(&employee, "Orders").is_some());
    assert!(edm.is_compatible(&employee, &fqn("Demo.Person")));
    assert!(!edm.is_compatible(&fqn("Demo.Person"), &employee));
    let derived = edm.derived_types(&fqn("Demo.Person"));
    assert_eq!(derived.len(), 2);
}

#[test]
fn flags_enum_members_default_to_powers_of_two() {
    let edm = demo();
    let access = edm.enum_type(&fqn("Demo.Access")).unwrap();
    let values: Vec<i64> = access.members.iter().map(|m| m.value).collect();
    assert_eq!(values, vec![1, 2, 4]);
}

#[test]
fn bound_operation_overload_resolution() {
    let edm = demo();
    let person = fqn("Demo.Person");
    let employee = fqn("Demo.Employee");

    assert!(edm.bound_action(&fqn("Demo.Promote"), &employee, false).is_some());
    assert!(edm.bound_action(&fqn("Demo.Promote"), &person, false).is_none());

    // binding on a base type is found from a derived type
    let nearest = edm
        .bound_function(&fqn("Demo.Nearest"), &employee, false, &["city"])
        .unwrap();
    assert_eq!(nearest.fqn, fqn("Demo.Nearest"));
    assert!(edm
        .bound_function(&fqn("Demo.Nearest"), &person, true, &["city"])
        .is_none());
    assert!(edm
        .bound_function(&fqn("Demo.Nearest"), &person, false, &[])
        .is_none());

    assert!(edm
        .unbound_function(&fqn("Demo.TopCustomers"), &["count"])
        .is_some());
    assert!(edm.unbound_action(&fqn("Demo.ResetAll")).is_some());
}

#[test]
fn missing_key_is_rejected() {
    let schema = CsdlSchema {
        namespace: "T".to_owned(),
        entity_types: vec![CsdlStructuredType {
            name: "NoKey".to_owned(),
            properties: vec![prop("Id", "Edm.Int32", false)],
            ..CsdlStructuredType::default()
        }],
        ..CsdlSchema::default()
    };
    let err = Edm::from_schemas(vec![schema]).unwrap_err();
    assert!(matches!(err, EdmError::MissingKey(ref t) if t == "T.NoKey"));
}

#[test]
fn nullable_key_is_rejected() {
    let schema = CsdlSchema {
        namespace: "T".to_owned(),
        entity_types: vec![CsdlStructuredType {
            name: "E".to_owned(),
            key: vec!["Id".to_owned()],
            properties: vec![prop("Id", "Edm.Int32", true)],
            ..CsdlStructuredType::default()
        }],
        ..CsdlSchema::default()
    };
    let err = Edm::from_schemas(vec![schema]).unwrap_err();
    assert!(matches!(err, EdmError::InvalidKey { reason: "nullable", .. }));
}

#[test]
fn unresolved_property_type_is_rejected() {
    let schema = CsdlSchema {
        namespace: "T".to_owned(),
        complex_types: vec![CsdlStructuredType {
            name: "C".to_owned(),
            properties: vec![prop("X", "T.Missing", true)],
            ..CsdlStructuredType::default()
        }],
        ..CsdlSchema::default()
    };
    let err = Edm::from_schemas(vec![schema]).unwrap_err();
    assert!(matches!(err, EdmError::UnresolvedType { ref name, .. } if name == "T.Missing"));
}

#[test]
fn cyclic_inheritance_is_rejected() {
    let schema = CsdlSchema {
        namespace: "T".to_owned(),
        complex_types: vec![
            CsdlStructuredType {
                name: "A".to_owned(),
                base_type: Some("T.B".to_owned()),
                ..CsdlStructuredType::default()
            },
            CsdlStructuredType {
                name: "B".to_owned(),
                base_type: Some("T.A".to_owned()),
                ..CsdlStructuredType::default()
            },
        ],
        ..CsdlSchema::default()
    };
    let err = Edm::from_schemas(vec![schema]).unwrap_err();
    assert!(matches!(err, EdmError::CyclicInheritance(_)));
}

#[test]
fn duplicate_type_names_are_rejected() {
    let c = CsdlStructuredType {
        name: "A".to_owned(),
        ..CsdlStructuredType::default()
    };
    let schema = CsdlSchema {
        namespace: "T".to_owned(),
        complex_types: vec![c.clone(), c],
        ..CsdlSchema::default()
    };
    assert!(matches!(
        Edm::from_schemas(vec![schema]).unwrap_err(),
        EdmError::Duplicate(_)
    ));
}

#[test]
fn malformed_document_is_a_parse_error() {
    assert!(matches!(
        Edm::from_json("{ not json").unwrap_err(),
        EdmError::Parse(_)
    ));
}
