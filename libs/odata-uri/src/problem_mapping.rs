use odata_errors::{Problem, catalog};

use crate::error::{SemanticKey, UriError};

impl From<UriError> for Problem {
    fn from(err: UriError) -> Self {
        let detail = err.to_string();
        match err {
            UriError::Syntax { .. } => catalog::URI_SYNTAX.as_problem(detail),
            UriError::Semantic {
                key: SemanticKey::ResourceNotFound,
                ..
            } => catalog::RESOURCE_NOT_FOUND.as_problem(detail),
            UriError::Semantic {
                key: SemanticKey::NotImplemented,
                ..
            } => catalog::NOT_IMPLEMENTED.as_problem(detail),
            UriError::Semantic { .. } => catalog::URI_SEMANTIC.as_problem(detail),
            UriError::Validation { .. } => catalog::URI_VALIDATION.as_problem(detail),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::{SyntaxKey, ValidationKey};

    #[test]
    fn status_per_error_class() {
        let cases = [
            (UriError::syntax(SyntaxKey::Syntax, "x"), 400, "URI_SYNTAX"),
            (
                UriError::semantic(SemanticKey::ResourceNotFound, "x"),
                404,
                "RESOURCE_NOT_FOUND",
            ),
            (UriError::not_implemented("rollup"), 501, "NOT_IMPLEMENTED"),
            (UriError::type_mismatch("x"), 400, "URI_SEMANTIC"),
            (
                UriError::validation(ValidationKey::SystemQueryOptionNotAllowed, "x"),
                400,
                "URI_VALIDATION",
            ),
        ];
        for (err, status, code) in cases {
            let p: Problem = err.into();
            assert_eq!(p.status.as_u16(), status);
            assert_eq!(p.code, code);
        }
    }
}
