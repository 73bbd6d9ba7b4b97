//! OData v4 Entity Data Model.
//!
//! `csdl` holds the serde input form; `Edm::from_schemas` resolves it into the
//! immutable model in `model`, validated and ready for lookups.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod csdl;
pub mod edm;
pub mod error;
pub mod fqn;
pub mod model;
pub mod primitive;
mod problem_mapping;

pub use edm::Edm;
pub use error::EdmError;
pub use fqn::FullQualifiedName;
pub use model::{
    ActionImport, EdmType, EntityContainer, EntitySet, EnumMember, EnumType, FunctionImport,
    NavigationBinding, NavigationProperty, Operation, OperationKind, Parameter, Property,
    ReturnType, Singleton, StructuredKind, StructuredType, TypeDefinition, TypeKind,
};
pub use primitive::PrimitiveKind;
