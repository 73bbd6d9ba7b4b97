use thiserror::Error;

/// Model construction failures. All of them are defects of the service
/// description, not of a request.
#[derive(Debug, Error)]
pub enum EdmError {
    #[error("invalid schema document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate element '{0}'")]
    Duplicate(String),

    #[error("{element}: unresolved type '{name}'")]
    UnresolvedType { element: String, name: String },

    #[error("{0}: cyclic type inheritance")]
    CyclicInheritance(String),

    #[error("{0}: entity type declares no key")]
    MissingKey(String),

    #[error("{entity}: invalid key property '{property}': {reason}")]
    InvalidKey {
        entity: String,
        property: String,
        reason: &'static str,
    },

    #[error("{element}: {reason}")]
    Invalid { element: String, reason: String },
}

impl EdmError {
    pub(crate) fn invalid(element: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            element: element.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unresolved(element: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnresolvedType {
            element: element.into(),
            name: name.into(),
        }
    }
}
