use serde::Serialize;
use thiserror::Error;

/// Malformed request text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyntaxKey {
    Syntax,
    InvalidEncoding,
    EmptySegment,
    MustBeLastSegment,
    UnknownSystemQueryOption,
    DoubleSystemQueryOption,
    DuplicateAlias,
    WrongValueForSystemQueryOption,
    EntityCastPathMissing,
}

/// Well-formed text that does not fit the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SemanticKey {
    ResourceNotFound,
    PropertyNotFound,
    TypeNotFound,
    FunctionNotFound,
    IncompatibleTypeFilter,
    TypeFilterNotChainable,
    WrongNumberOfKeyProperties,
    KeyNotAllowed,
    InvalidKeyValue,
    OnlyForCollections,
    OnlyForTypedParts,
    TypeMismatch,
    IsProperty,
    ParameterMissing,
    NotImplemented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationKey {
    SystemQueryOptionNotAllowed,
    ExpandDepthExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriError {
    #[error("syntax error: {message}")]
    Syntax { key: SyntaxKey, message: String },

    #[error("{message}")]
    Semantic { key: SemanticKey, message: String },

    #[error("{message}")]
    Validation { key: ValidationKey, message: String },
}

pub type UriResult<T> = Result<T, UriError>;

impl UriError {
    pub fn syntax(key: SyntaxKey, message: impl Into<String>) -> Self {
        Self::Syntax {
            key,
            message: message.into(),
        }
    }

    pub fn semantic(key: SemanticKey, message: impl Into<String>) -> Self {
        Self::Semantic {
            key,
            message: message.into(),
        }
    }

    pub fn validation(key: ValidationKey, message: impl Into<String>) -> Self {
        Self::Validation {
            key,
            message: message.into(),
        }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::semantic(SemanticKey::TypeMismatch, message)
    }

    pub fn not_implemented(what: impl Into<String>) -> Self {
        Self::semantic(SemanticKey::NotImplemented, what)
    }

    #[must_use]
    pub fn semantic_key(&self) -> Option<SemanticKey> {
        match self {
            Self::Semantic { key, .. } => Some(*key),
            _ => None,
        }
    }

    #[must_use]
    pub fn syntax_key(&self) -> Option<SyntaxKey> {
        match self {
            Self::Syntax { key, .. } => Some(*key),
            _ => None,
        }
    }
}
