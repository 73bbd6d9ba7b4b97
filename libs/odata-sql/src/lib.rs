//! Relational execution of OData read requests.
//!
//! A [`Metamodel`] binds the entity types of an [`odata_edm::Edm`] to
//! tables and columns. [`QueryProcessor`] turns a parsed
//! [`odata_uri::UriInfo`] into sea-query statements over that mapping,
//! runs them through a sea-orm connection and assembles the JSON payload:
//! the main query reads the addressed entities, and every expansion and
//! collection-valued property is loaded by one further query restricted to
//! the rows of its parent.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod apply;
pub mod collection;
pub mod config;
pub mod converter;
pub mod error;
pub mod expand;
pub mod filter;
pub mod mapping;
pub mod navigation;
mod problem_mapping;
pub mod processor;
pub mod query;
pub mod row;

pub use config::{Page, QueryConfig, SqlBackend};
pub use error::{MappingError, QueryError, QueryResult};
pub use mapping::{EntityMeta, Metamodel, ServiceMapping};
pub use navigation::NavigationInfo;
pub use processor::{EntityCollection, PlannedStatement, QueryProcessor, ReadResult};
pub use query::{JoinQuery, QueryContext, SelectQuery};
