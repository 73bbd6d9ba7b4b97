use odata_errors::{Problem, catalog};

use crate::error::{MappingError, QueryError};

impl From<MappingError> for Problem {
    fn from(err: MappingError) -> Self {
        catalog::MAPPING_INVALID.as_problem(err.to_string())
    }
}

impl From<QueryError> for Problem {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Mapping(e) => e.into(),
            QueryError::NotImplemented(_) => catalog::NOT_IMPLEMENTED.as_problem(err.to_string()),
            QueryError::Forbidden(_) => catalog::FORBIDDEN.as_problem(err.to_string()),
            QueryError::NotFound => catalog::ENTITY_NOT_FOUND.as_problem(err.to_string()),
            QueryError::Invalid(_) => catalog::QUERY_INVALID.as_problem(err.to_string()),
            QueryError::Database(e) => {
                tracing::error!(error = %e, "query execution failed");
                catalog::DATABASE.as_problem("the database rejected the query")
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn status_per_error_class() {
        let cases = [
            (
                QueryError::Mapping(MappingError::Unmapped("Demo.Person".to_owned())),
                500,
                "MAPPING_INVALID",
            ),
            (QueryError::not_implemented("rollup"), 501, "NOT_IMPLEMENTED"),
            (QueryError::Forbidden("Salary".to_owned()), 403, "FORBIDDEN"),
            (QueryError::NotFound, 404, "ENTITY_NOT_FOUND"),
            (QueryError::invalid("bad skiptoken"), 400, "QUERY_INVALID"),
        ];
        for (err, status, code) in cases {
            let p: Problem = err.into();
            assert_eq!(p.status.as_u16(), status);
            assert_eq!(p.code, code);
        }
    }

    #[test]
    fn database_detail_is_not_leaked() {
        let err = QueryError::Database(sea_orm::DbErr::Custom("secret table".to_owned()));
        let p: Problem = err.into();
        assert_eq!(p.status.as_u16(), 500);
        assert!(!p.detail.contains("secret"));
    }
}
