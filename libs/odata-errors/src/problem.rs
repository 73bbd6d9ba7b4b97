//! RFC 9457 problem documents and the OData JSON error body derived from
//! them.

use http::StatusCode;
use serde::{Deserialize, Serialize};

mod status_code {
    use http::StatusCode;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)] // serde passes fields by reference
    pub fn serialize<S: Serializer>(status: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u16(status.as_u16())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<StatusCode, D::Error> {
        StatusCode::from_u16(u16::deserialize(d)?).map_err(serde::de::Error::custom)
    }
}

/// A failed OData request, ready to be written as `application/problem+json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Problem {
    #[serde(rename = "type")]
    pub type_url: String,
    pub title: String,
    #[serde(with = "status_code")]
    pub status: StatusCode,
    pub detail: String,
    /// The request URL that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Catalog code; doubles as the OData `error.code`.
    pub code: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<TargetedError>,
}

/// A problem with one part of the request: a query option, a path segment
/// or a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetedError {
    pub target: String,
    pub message: String,
}

impl Problem {
    pub fn new(status: StatusCode, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            type_url: "about:blank".to_owned(),
            title: title.into(),
            status,
            detail: detail.into(),
            instance: None,
            code: String::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_type(mut self, type_url: impl Into<String>) -> Self {
        self.type_url = type_url.into();
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_instance(mut self, url: impl Into<String>) -> Self {
        self.instance = Some(url.into());
        self
    }

    pub fn with_error(mut self, target: impl Into<String>, message: impl Into<String>) -> Self {
        self.errors.push(TargetedError {
            target: target.into(),
            message: message.into(),
        });
        self
    }

    /// `{"error": {"code", "message", "target", "details"}}` as OData JSON
    /// clients expect it. The first targeted error becomes `target`.
    #[must_use]
    pub fn to_odata_error(&self) -> ODataErrorBody {
        let (target, details) = match self.errors.split_first() {
            Some((first, rest)) => (Some(first.target.clone()), rest),
            None => (None, &[][..]),
        };
        ODataErrorBody {
            error: ODataError {
                code: self.code.clone(),
                message: self.detail.clone(),
                target,
                details: details
                    .iter()
                    .map(|e| ODataErrorDetail {
                        code: self.code.clone(),
                        message: e.message.clone(),
                        target: e.target.clone(),
                    })
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ODataErrorBody {
    pub error: ODataError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ODataError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ODataErrorDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ODataErrorDetail {
    pub code: String,
    pub message: String,
    pub target: String,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use serde_json::json;

    use super::*;

    fn filter_problem() -> Problem {
        Problem::new(StatusCode::BAD_REQUEST, "Bad Request", "syntax error: unexpected ')'")
            .with_code("URI_SYNTAX")
            .with_instance("/People?$filter=Age gt )")
            .with_error("$filter", "unexpected ')'")
    }

    #[test]
    fn problem_document_shape() {
        let body = serde_json::to_value(filter_problem()).unwrap();
        assert_eq!(body["status"], json!(400));
        assert_eq!(body["type"], json!("about:blank"));
        assert_eq!(body["instance"], json!("/People?$filter=Age gt )"));
        assert_eq!(body["errors"][0]["target"], json!("$filter"));

        let bare = serde_json::to_value(Problem::new(StatusCode::NOT_FOUND, "Not Found", "x")).unwrap();
        assert!(bare.get("instance").is_none());
        assert!(bare.get("errors").is_none());
    }

    #[test]
    fn problem_reads_back() {
        let text = serde_json::to_string(&filter_problem()).unwrap();
        let back: Problem = serde_json::from_str(&text).unwrap();
        assert_eq!(back, filter_problem());
        assert!(serde_json::from_str::<Problem>(&text.replace("400", "1000")).is_err());
    }

    #[test]
    fn odata_error_body() {
        let p = filter_problem().with_error("$orderby", "unknown property 'Agee'");
        let body = serde_json::to_value(p.to_odata_error()).unwrap();
        assert_eq!(
            body,
            json!({"error": {
                "code": "URI_SYNTAX",
                "message": "syntax error: unexpected ')'",
                "target": "$filter",
                "details": [{
                    "code": "URI_SYNTAX",
                    "message": "unknown property 'Agee'",
                    "target": "$orderby"
                }]
            }})
        );

        let plain = Problem::new(StatusCode::NOT_FOUND, "Not Found", "no entity").with_code("X");
        let body = serde_json::to_value(plain.to_odata_error()).unwrap();
        assert_eq!(body, json!({"error": {"code": "X", "message": "no entity"}}));
    }
}
