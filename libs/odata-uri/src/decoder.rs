//! Splitting and percent-decoding of the raw request.

use serde::Serialize;

use crate::error::{SyntaxKey, UriError, UriResult};

/// Query option as it appears in the query string, decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawOption {
    pub name: String,
    pub value: String,
}

/// Decodes `%XX` escapes. `+` is kept as is; form encoding is not accepted.
///
/// # Errors
/// Returns `InvalidEncoding` for truncated or non-hex escapes and for
/// escapes that do not form valid UTF-8.
pub fn decode(text: &str) -> UriResult<String> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(UriError::syntax(
                    SyntaxKey::InvalidEncoding,
                    format!("invalid percent-encoding in '{text}'"),
                ));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    urlencoding::decode(text)
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| UriError::syntax(SyntaxKey::InvalidEncoding, e.to_string()))
}

/// Splits the resource path on `/` and decodes every segment.
/// A leading and a trailing slash are ignored.
///
/// # Errors
/// Returns `EmptySegment` for `//` and decoding errors from [`decode`].
pub fn split_and_decode_path(path: &str) -> UriResult<Vec<String>> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                Err(UriError::syntax(
                    SyntaxKey::EmptySegment,
                    format!("empty path segment in '{path}'"),
                ))
            } else {
                decode(segment)
            }
        })
        .collect()
}

/// Splits the query string on `&` and `=` (first occurrence) and decodes
/// both halves. Names and values are trimmed before decoding, so encoded
/// whitespace survives; empty pairs are dropped.
///
/// # Errors
/// Decoding errors from [`decode`].
pub fn split_and_decode_options(query: &str) -> UriResult<Vec<RawOption>> {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut out = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = decode(name.trim())?;
        if name.is_empty() {
            continue;
        }
        out.push(RawOption {
            name,
            value: decode(value.trim())?,
        });
    }
    Ok(out)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn path_segments_are_decoded() {
        let segs = split_and_decode_path("/People('O%27Neil')/Orders/").unwrap();
        assert_eq!(segs, vec!["People('O'Neil')", "Orders"]);
        assert!(split_and_decode_path("/").unwrap().is_empty());
    }

    #[test]
    fn empty_inner_segment_is_rejected() {
        let err = split_and_decode_path("People//Orders").unwrap_err();
        assert_eq!(err.syntax_key(), Some(SyntaxKey::EmptySegment));
    }

    #[test]
    fn options_split_on_first_equals() {
        let opts = split_and_decode_options("?$filter=Name%20eq%20'a=b'&&$top= 5 &flag").unwrap();
        assert_eq!(opts.len(), 3);
        assert_eq!(opts[0].name, "$filter");
        assert_eq!(opts[0].value, "Name eq 'a=b'");
        assert_eq!(opts[1].value, "5");
        assert_eq!(opts[2].name, "flag");
        assert_eq!(opts[2].value, "");
    }

    #[test]
    fn encoded_whitespace_is_kept() {
        let opts = split_and_decode_options("$search=%20foo%09&@p= %27a%20%27 ").unwrap();
        assert_eq!(opts[0].value, " foo\t");
        assert_eq!(opts[1].name, "@p");
        assert_eq!(opts[1].value, "'a '");
    }

    #[test]
    fn plus_is_not_a_space() {
        assert_eq!(decode("a+b").unwrap(), "a+b");
    }

    #[test]
    fn bad_escapes_are_rejected() {
        assert!(decode("%zz").is_err());
        assert!(decode("abc%2").is_err());
        assert!(decode("%C3%28").is_err());
    }
}
