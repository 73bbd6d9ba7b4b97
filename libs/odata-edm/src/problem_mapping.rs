use odata_errors::{Problem, catalog};

use crate::error::EdmError;

impl From<EdmError> for Problem {
    fn from(err: EdmError) -> Self {
        catalog::EDM_INVALID.as_problem(err.to_string())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn edm_errors_are_server_errors() {
        let p: Problem = EdmError::MissingKey("Demo.Person".to_owned()).into();
        assert_eq!(p.status.as_u16(), 500);
        assert_eq!(p.code, "EDM_INVALID");
        assert!(p.detail.contains("Demo.Person"));
    }
}
