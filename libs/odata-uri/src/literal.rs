//! Primitive literals: lexical text plus the decoded value.

use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta};
use odata_edm::PrimitiveKind;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{SyntaxKey, UriError, UriResult};
use crate::tokenizer::TokenKind;

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(BigDecimal),
    Double(f64),
    String(String),
    Guid(Uuid),
    Date(NaiveDate),
    DateTimeOffset(DateTime<FixedOffset>),
    TimeOfDay(NaiveTime),
    Duration(TimeDelta),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Literal {
    pub text: String,
    /// `None` for `null`, which is compatible with every type.
    #[serde(rename = "type")]
    pub kind: Option<PrimitiveKind>,
    #[serde(skip)]
    pub value: LiteralValue,
}

fn invalid(what: &str, text: &str) -> UriError {
    UriError::syntax(SyntaxKey::Syntax, format!("invalid {what} literal '{text}'"))
}

/// Smallest integer type holding `v`.
#[must_use]
pub fn integer_kind(v: i64) -> PrimitiveKind {
    if (-128..=127).contains(&v) {
        PrimitiveKind::SByte
    } else if (0..=255).contains(&v) {
        PrimitiveKind::Byte
    } else if i16::try_from(v).is_ok() {
        PrimitiveKind::Int16
    } else if i32::try_from(v).is_ok() {
        PrimitiveKind::Int32
    } else {
        PrimitiveKind::Int64
    }
}

impl Literal {
    #[must_use]
    pub fn null() -> Self {
        Self {
            text: "null".to_owned(),
            kind: None,
            value: LiteralValue::Null,
        }
    }

    #[must_use]
    pub fn string(value: &str) -> Self {
        Self {
            text: format!("'{}'", value.replace('\'', "''")),
            kind: Some(PrimitiveKind::String),
            value: LiteralValue::String(value.to_owned()),
        }
    }

    #[must_use]
    pub fn integer(value: i64) -> Self {
        Self {
            text: value.to_string(),
            kind: Some(integer_kind(value)),
            value: LiteralValue::Integer(value),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self.value, LiteralValue::Null)
    }

    /// Decodes the text of a token matched as `kind`.
    ///
    /// # Errors
    /// Returns a syntax error when the lexical form is right but the value is
    /// out of range (e.g. month 13) or `kind` is not a literal kind.
    pub fn from_token(kind: TokenKind, text: &str) -> UriResult<Self> {
        let (kind_out, value) = match kind {
            TokenKind::Null => (None, LiteralValue::Null),
            TokenKind::Boolean => (
                Some(PrimitiveKind::Boolean),
                LiteralValue::Boolean(text.eq_ignore_ascii_case("true")),
            ),
            TokenKind::String => {
                let inner = text
                    .strip_prefix('\'')
                    .and_then(|t| t.strip_suffix('\''))
                    .ok_or_else(|| invalid("string", text))?;
                (
                    Some(PrimitiveKind::String),
                    LiteralValue::String(inner.replace("''", "'")),
                )
            }
            TokenKind::Integer => match text.parse::<i64>() {
                Ok(v) => (Some(integer_kind(v)), LiteralValue::Integer(v)),
                Err(_) => (
                    Some(PrimitiveKind::Decimal),
                    LiteralValue::Decimal(
                        BigDecimal::from_str(text).map_err(|_| invalid("integer", text))?,
                    ),
                ),
            },
            TokenKind::Decimal => (
                Some(PrimitiveKind::Decimal),
                LiteralValue::Decimal(
                    BigDecimal::from_str(text).map_err(|_| invalid("decimal", text))?,
                ),
            ),
            TokenKind::Double => {
                let v = match text {
                    "INF" => f64::INFINITY,
                    "-INF" => f64::NEG_INFINITY,
                    "NaN" => f64::NAN,
                    _ => text.parse::<f64>().map_err(|_| invalid("double", text))?,
                };
                (Some(PrimitiveKind::Double), LiteralValue::Double(v))
            }
            TokenKind::Guid => (
                Some(PrimitiveKind::Guid),
                LiteralValue::Guid(Uuid::parse_str(text).map_err(|_| invalid("guid", text))?),
            ),
            TokenKind::Date => (
                Some(PrimitiveKind::Date),
                LiteralValue::Date(
                    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| invalid("date", text))?,
                ),
            ),
            TokenKind::DateTimeOffset => (
                Some(PrimitiveKind::DateTimeOffset),
                LiteralValue::DateTimeOffset(parse_date_time_offset(text)?),
            ),
            TokenKind::TimeOfDay => (
                Some(PrimitiveKind::TimeOfDay),
                LiteralValue::TimeOfDay(parse_time(text).ok_or_else(|| invalid("time", text))?),
            ),
            TokenKind::Duration => {
                let body = quoted_body(text).ok_or_else(|| invalid("duration", text))?;
                (
                    Some(PrimitiveKind::Duration),
                    LiteralValue::Duration(
                        parse_duration(body).ok_or_else(|| invalid("duration", text))?,
                    ),
                )
            }
            TokenKind::Binary => {
                let body = quoted_body(text).ok_or_else(|| invalid("binary", text))?;
                let bytes = URL_SAFE_NO_PAD
                    .decode(body.trim_end_matches('='))
                    .map_err(|_| invalid("binary", text))?;
                (Some(PrimitiveKind::Binary), LiteralValue::Binary(bytes))
            }
            _ => return Err(invalid("primitive", text)),
        };
        Ok(Self {
            text: text.to_owned(),
            kind: kind_out,
            value,
        })
    }
}

fn quoted_body(text: &str) -> Option<&str> {
    let start = text.find('\'')?;
    text[start + 1..].strip_suffix('\'')
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()
}

/// Seconds are optional in OData; RFC 3339 requires them.
fn parse_date_time_offset(text: &str) -> UriResult<DateTime<FixedOffset>> {
    let upper = text.to_ascii_uppercase();
    let (date, rest) = upper
        .split_once('T')
        .ok_or_else(|| invalid("datetimeoffset", text))?;
    let offset_at = rest
        .find(['Z', '+', '-'])
        .ok_or_else(|| invalid("datetimeoffset", text))?;
    let (time, offset) = rest.split_at(offset_at);
    let time = if time.matches(':').count() == 1 {
        format!("{time}:00")
    } else {
        time.to_owned()
    };
    DateTime::parse_from_rfc3339(&format!("{date}T{time}{offset}"))
        .map_err(|_| invalid("datetimeoffset", text))
}

fn parse_duration(body: &str) -> Option<TimeDelta> {
    let (negative, body) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    let body = body.strip_prefix(['P', 'p'])?.to_ascii_uppercase();
    let (date, time) = body.split_once('T').unwrap_or((body.as_str(), ""));

    let mut total = TimeDelta::zero();
    if let Some(days) = date.strip_suffix('D') {
        total = total.checked_add(&TimeDelta::try_days(days.parse().ok()?)?)?;
    }
    let mut rest = time;
    if let Some((h, r)) = rest.split_once('H') {
        total = total.checked_add(&TimeDelta::try_hours(h.parse().ok()?)?)?;
        rest = r;
    }
    if let Some((m, r)) = rest.split_once('M') {
        total = total.checked_add(&TimeDelta::try_minutes(m.parse().ok()?)?)?;
        rest = r;
    }
    if let Some((s, _)) = rest.split_once('S') {
        let (int, frac) = s.split_once('.').unwrap_or((s, ""));
        total = total.checked_add(&TimeDelta::try_seconds(int.parse().ok()?)?)?;
        if !frac.is_empty() {
            let nanos: String = frac.chars().chain(std::iter::repeat('0')).take(9).collect();
            total = total.checked_add(&TimeDelta::nanoseconds(nanos.parse().ok()?))?;
        }
    }
    Some(if negative { -total } else { total })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn integer_literals_take_smallest_type() {
        let lit = |t| Literal::from_token(TokenKind::Integer, t).unwrap().kind;
        assert_eq!(lit("5"), Some(PrimitiveKind::SByte));
        assert_eq!(lit("200"), Some(PrimitiveKind::Byte));
        assert_eq!(lit("-200"), Some(PrimitiveKind::Int16));
        assert_eq!(lit("70000"), Some(PrimitiveKind::Int32));
        assert_eq!(lit("5000000000"), Some(PrimitiveKind::Int64));
        assert_eq!(lit("99999999999999999999"), Some(PrimitiveKind::Decimal));
    }

    #[test]
    fn string_unescapes_quotes() {
        let l = Literal::from_token(TokenKind::String, "'O''Neil'").unwrap();
        assert_eq!(l.value, LiteralValue::String("O'Neil".to_owned()));
        assert_eq!(Literal::string("O'Neil").text, "'O''Neil'");
    }

    #[test]
    fn date_time_offset_without_seconds() {
        let l = Literal::from_token(TokenKind::DateTimeOffset, "2024-03-01T10:30+01:00").unwrap();
        let LiteralValue::DateTimeOffset(dt) = l.value else {
            panic!("wrong variant");
        };
        assert_eq!(dt.to_rfc3339(), "2024-03-01T10:30:00+01:00");
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(Literal::from_token(TokenKind::Date, "2024-13-01").is_err());
        assert!(Literal::from_token(TokenKind::TimeOfDay, "25:00").is_err());
    }

    #[test]
    fn durations() {
        let l = Literal::from_token(TokenKind::Duration, "duration'P1DT2H0.5S'").unwrap();
        let expected = TimeDelta::try_days(1).unwrap()
            + TimeDelta::try_hours(2).unwrap()
            + TimeDelta::milliseconds(500);
        assert_eq!(l.value, LiteralValue::Duration(expected));
        let neg = Literal::from_token(TokenKind::Duration, "duration'-PT1M'").unwrap();
        assert_eq!(
            neg.value,
            LiteralValue::Duration(-TimeDelta::try_minutes(1).unwrap())
        );
    }

    #[test]
    fn binary_is_base64url() {
        let l = Literal::from_token(TokenKind::Binary, "binary'AQID'").unwrap();
        assert_eq!(l.value, LiteralValue::Binary(vec![1, 2, 3]));
    }
}
