use thiserror::Error;

/// Defects of the table mapping, found while resolving it against the model
/// or while building a query that needs a part the mapping lacks.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("invalid mapping document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown entity type '{0}'")]
    UnknownType(String),

    #[error("{entity}: unknown property '{property}'")]
    UnknownProperty { entity: String, property: String },

    #[error("{entity}: unknown navigation property '{navigation}'")]
    UnknownNavigation { entity: String, navigation: String },

    #[error("entity type '{0}' is not mapped to a table")]
    Unmapped(String),

    #[error("{entity}: navigation '{navigation}' has no join columns")]
    MissingJoin { entity: String, navigation: String },

    #[error("{element}: {reason}")]
    Invalid { element: String, reason: String },
}

impl MappingError {
    pub(crate) fn invalid(element: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            element: element.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_property(entity: impl ToString, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            entity: entity.to_string(),
            property: property.into(),
        }
    }
}

/// Failures while translating or running a request.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("access to '{0}' is not permitted")]
    Forbidden(String),

    #[error("no entity matches the request")]
    NotFound,

    #[error("{0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

pub type QueryResult<T> = Result<T, QueryError>;

impl QueryError {
    pub(crate) fn not_implemented(what: impl Into<String>) -> Self {
        Self::NotImplemented(what.into())
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}
