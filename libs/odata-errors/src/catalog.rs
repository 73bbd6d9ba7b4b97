//! Error definitions raised by the OData crates. Each maps a failure class
//! to a status and a stable code.

use http::StatusCode;

use crate::problem::Problem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrDef {
    pub status: StatusCode,
    pub title: &'static str,
    pub code: &'static str,
    pub type_url: &'static str,
}

impl ErrDef {
    #[inline]
    pub fn as_problem(&self, detail: impl Into<String>) -> Problem {
        Problem::new(self.status, self.title, detail)
            .with_code(self.code)
            .with_type(self.type_url)
    }
}

macro_rules! err_def {
    ($name:ident, $status:ident, $title:literal, $code:literal) => {
        pub const $name: ErrDef = ErrDef {
            status: StatusCode::$status,
            title: $title,
            code: $code,
            type_url: concat!("https://errors.odata.local/", $code),
        };
    };
}

// Model and mapping problems are the service's fault.
err_def!(EDM_INVALID, INTERNAL_SERVER_ERROR, "Invalid Entity Data Model", "EDM_INVALID");
err_def!(MAPPING_INVALID, INTERNAL_SERVER_ERROR, "Invalid Mapping", "MAPPING_INVALID");
err_def!(DATABASE, INTERNAL_SERVER_ERROR, "Internal Server Error", "DATABASE");

err_def!(URI_SYNTAX, BAD_REQUEST, "Bad Request", "URI_SYNTAX");
err_def!(URI_SEMANTIC, BAD_REQUEST, "Bad Request", "URI_SEMANTIC");
err_def!(URI_VALIDATION, BAD_REQUEST, "Bad Request", "URI_VALIDATION");
err_def!(QUERY_INVALID, BAD_REQUEST, "Bad Request", "QUERY_INVALID");
err_def!(FORBIDDEN, FORBIDDEN, "Forbidden", "FORBIDDEN");
err_def!(RESOURCE_NOT_FOUND, NOT_FOUND, "Not Found", "RESOURCE_NOT_FOUND");
err_def!(ENTITY_NOT_FOUND, NOT_FOUND, "Not Found", "ENTITY_NOT_FOUND");
err_def!(NOT_IMPLEMENTED, NOT_IMPLEMENTED, "Not Implemented", "NOT_IMPLEMENTED");

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn definitions_become_problems() {
        let problem = RESOURCE_NOT_FOUND.as_problem("entity set 'Peoples' not found");
        assert_eq!(problem.status, StatusCode::NOT_FOUND);
        assert_eq!(problem.title, "Not Found");
        assert_eq!(problem.detail, "entity set 'Peoples' not found");
        assert_eq!(problem.code, "RESOURCE_NOT_FOUND");
        assert_eq!(
            problem.type_url,
            "https://errors.odata.local/RESOURCE_NOT_FOUND"
        );
    }

    #[test]
    fn server_side_definitions() {
        for def in [EDM_INVALID, MAPPING_INVALID, DATABASE] {
            assert!(def.status.is_server_error(), "{}", def.code);
        }
        assert!(NOT_IMPLEMENTED.status.is_server_error());
        assert!(QUERY_INVALID.status.is_client_error());
    }
}
