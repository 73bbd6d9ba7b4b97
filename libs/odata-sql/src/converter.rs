//! Dialect-specific SQL for canonical functions and literal values.
//!
//! Default methods emit ANSI SQL; each backend overrides what it spells
//! differently. Hand-written fragments go through [`custom`], which renders
//! `{n}` slots with the placeholder style of the backend.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use odata_edm::PrimitiveKind;
use odata_uri::LiteralValue;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sea_orm::sea_query::{Alias, Expr, Func, SimpleExpr};
use sea_orm::Value;

use crate::config::SqlBackend;
use crate::error::{QueryError, QueryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl DatePart {
    fn ansi(self) -> &'static str {
        match self {
            Self::Year => "YEAR",
            Self::Month => "MONTH",
            Self::Day => "DAY",
            Self::Hour => "HOUR",
            Self::Minute => "MINUTE",
            Self::Second => "SECOND",
        }
    }

    fn strftime(self) -> &'static str {
        match self {
            Self::Year => "%Y",
            Self::Month => "%m",
            Self::Day => "%d",
            Self::Hour => "%H",
            Self::Minute => "%M",
            Self::Second => "%S",
        }
    }
}

/// Builds a custom expression from a template with `{0}`, `{1}`...
/// slots. Postgres takes numbered `$n` placeholders; the other backends
/// take positional `?`, so arguments are repeated in slot order.
#[must_use]
pub fn custom(numbered: bool, template: &str, args: &[SimpleExpr]) -> SimpleExpr {
    let mut sql = String::with_capacity(template.len());
    let mut bound = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        sql.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            sql.push_str(&rest[open..]);
            rest = "";
            break;
        };
        match after[..close].parse::<usize>() {
            Ok(i) if i < args.len() => {
                if numbered {
                    sql.push('$');
                    sql.push_str(&(i + 1).to_string());
                } else {
                    sql.push('?');
                    bound.push(args[i].clone());
                }
            }
            _ => sql.push_str(&rest[open..=open + close + 1]),
        }
        rest = &after[close + 1..];
    }
    sql.push_str(rest);
    if numbered {
        bound = args.to_vec();
    }
    Expr::cust_with_exprs(sql, bound)
}

/// Translation of the operations whose SQL differs between databases.
pub trait OperationConverter: Send + Sync {
    /// Whether custom fragments use `$n` placeholders.
    fn numbered(&self) -> bool {
        false
    }

    fn template(&self, template: &str, args: &[SimpleExpr]) -> SimpleExpr {
        custom(self.numbered(), template, args)
    }

    fn date_part(&self, part: DatePart, value: SimpleExpr) -> SimpleExpr {
        self.template(&format!("EXTRACT({} FROM {{0}})", part.ansi()), &[value])
    }

    fn fractional_seconds(&self, value: SimpleExpr) -> SimpleExpr {
        self.template(
            "(EXTRACT(SECOND FROM {0}) - FLOOR(EXTRACT(SECOND FROM {0})))",
            &[value],
        )
    }

    fn date(&self, value: SimpleExpr) -> SimpleExpr {
        self.template("CAST({0} AS DATE)", &[value])
    }

    fn time(&self, value: SimpleExpr) -> SimpleExpr {
        self.template("CAST({0} AS TIME)", &[value])
    }

    /// Offset of a timestamp from UTC; `None` when the column type cannot
    /// carry one.
    fn total_offset_minutes(&self, value: SimpleExpr) -> Option<SimpleExpr> {
        Some(self.template(
            "(EXTRACT(TIMEZONE_HOUR FROM {0}) * 60 + EXTRACT(TIMEZONE_MINUTE FROM {0}))",
            &[value],
        ))
    }

    fn now(&self) -> SimpleExpr {
        Expr::cust("CURRENT_TIMESTAMP")
    }

    fn round(&self, value: SimpleExpr) -> SimpleExpr {
        Func::cust(Alias::new("ROUND")).arg(value).into()
    }

    fn floor(&self, value: SimpleExpr) -> SimpleExpr {
        Func::cust(Alias::new("FLOOR")).arg(value).into()
    }

    fn ceiling(&self, value: SimpleExpr) -> SimpleExpr {
        Func::cust(Alias::new("CEILING")).arg(value).into()
    }

    fn length(&self, value: SimpleExpr) -> SimpleExpr {
        Func::cust(Alias::new("CHAR_LENGTH")).arg(value).into()
    }

    /// Zero-based position of `needle`, -1 when absent.
    fn index_of(&self, value: SimpleExpr, needle: SimpleExpr) -> SimpleExpr {
        self.template("(POSITION({1} IN {0}) - 1)", &[value, needle])
    }

    /// Substring from the zero-based `start`.
    fn substring(&self, value: SimpleExpr, start: SimpleExpr, len: Option<SimpleExpr>) -> SimpleExpr {
        match len {
            Some(len) => self.template(
                "SUBSTRING({0} FROM ({1} + 1) FOR {2})",
                &[value, start, len],
            ),
            None => self.template("SUBSTRING({0} FROM ({1} + 1))", &[value, start]),
        }
    }

    fn concat(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
        self.template("({0} || {1})", &[left, right])
    }

    /// Regular expression match; `None` when the database has none.
    fn matches_pattern(&self, _value: SimpleExpr, _pattern: SimpleExpr) -> Option<SimpleExpr> {
        None
    }

    fn cast(&self, value: SimpleExpr, kind: PrimitiveKind) -> QueryResult<SimpleExpr> {
        let ty = match kind {
            PrimitiveKind::String => "VARCHAR(4000)",
            PrimitiveKind::Boolean => "BOOLEAN",
            PrimitiveKind::Byte | PrimitiveKind::SByte | PrimitiveKind::Int16 => "SMALLINT",
            PrimitiveKind::Int32 => "INTEGER",
            PrimitiveKind::Int64 => "BIGINT",
            PrimitiveKind::Decimal => "DECIMAL(38, 10)",
            PrimitiveKind::Double | PrimitiveKind::Single => "DOUBLE PRECISION",
            PrimitiveKind::Date => "DATE",
            PrimitiveKind::TimeOfDay => "TIME",
            PrimitiveKind::DateTimeOffset => "TIMESTAMP WITH TIME ZONE",
            other => return Err(cast_error(other)),
        };
        Ok(self.template(&format!("CAST({{0}} AS {ty})"), &[value]))
    }

    /// Bound value of a literal; `None` for `null`.
    ///
    /// # Errors
    /// [`QueryError::Invalid`] for decimals outside the supported range.
    fn literal(&self, value: &LiteralValue) -> QueryResult<Option<Value>> {
        Ok(Some(match value {
            LiteralValue::Null => return Ok(None),
            LiteralValue::Boolean(b) => Value::from(*b),
            LiteralValue::Integer(i) => Value::from(*i),
            LiteralValue::Decimal(d) => Value::from(bigdecimal_to_decimal(d)?),
            LiteralValue::Double(f) => Value::from(*f),
            LiteralValue::String(s) => Value::from(s.clone()),
            LiteralValue::Guid(u) => Value::from(*u),
            LiteralValue::Date(d) => Value::from(*d),
            LiteralValue::DateTimeOffset(dt) => Value::from(*dt),
            LiteralValue::TimeOfDay(t) => Value::from(*t),
            // Durations are stored as seconds.
            LiteralValue::Duration(d) => {
                let nanos = Decimal::new(i64::from(d.subsec_nanos()), 9);
                Value::from(Decimal::from(d.num_seconds()) + nanos)
            }
            LiteralValue::Binary(b) => Value::from(b.clone()),
        }))
    }
}

fn cast_error(kind: PrimitiveKind) -> QueryError {
    QueryError::not_implemented(format!("cast to {}", kind.name()))
}

/// Exact conversion through the decimal text.
fn bigdecimal_to_decimal(bd: &BigDecimal) -> QueryResult<Decimal> {
    let s = bd.normalized().to_string();
    Decimal::from_str_exact(&s)
        .or_else(|_| Decimal::from_str(&s))
        .map_err(|_| QueryError::invalid(format!("decimal '{s}' is out of range")))
}

pub struct AnsiConverter;

impl OperationConverter for AnsiConverter {}

pub struct PostgresConverter;

impl OperationConverter for PostgresConverter {
    fn numbered(&self) -> bool {
        true
    }

    fn total_offset_minutes(&self, value: SimpleExpr) -> Option<SimpleExpr> {
        Some(self.template("(EXTRACT(TIMEZONE FROM {0}) / 60)", &[value]))
    }

    fn matches_pattern(&self, value: SimpleExpr, pattern: SimpleExpr) -> Option<SimpleExpr> {
        Some(self.template("({0} ~ {1})", &[value, pattern]))
    }
}

pub struct MysqlConverter;

impl OperationConverter for MysqlConverter {
    fn index_of(&self, value: SimpleExpr, needle: SimpleExpr) -> SimpleExpr {
        self.template("(LOCATE({1}, {0}) - 1)", &[value, needle])
    }

    fn concat(&self, left: SimpleExpr, right: SimpleExpr) -> SimpleExpr {
        self.template("CONCAT({0}, {1})", &[left, right])
    }

    fn matches_pattern(&self, value: SimpleExpr, pattern: SimpleExpr) -> Option<SimpleExpr> {
        Some(self.template("({0} REGEXP {1})", &[value, pattern]))
    }

    fn total_offset_minutes(&self, _value: SimpleExpr) -> Option<SimpleExpr> {
        None
    }

    fn cast(&self, value: SimpleExpr, kind: PrimitiveKind) -> QueryResult<SimpleExpr> {
        let ty = match kind {
            PrimitiveKind::String | PrimitiveKind::Guid => "CHAR",
            PrimitiveKind::Boolean
            | PrimitiveKind::Byte
            | PrimitiveKind::SByte
            | PrimitiveKind::Int16
            | PrimitiveKind::Int32
            | PrimitiveKind::Int64 => "SIGNED",
            PrimitiveKind::Decimal => "DECIMAL(38, 10)",
            PrimitiveKind::Double | PrimitiveKind::Single => "DOUBLE",
            PrimitiveKind::Date => "DATE",
            PrimitiveKind::TimeOfDay => "TIME",
            PrimitiveKind::DateTimeOffset => "DATETIME",
            other => return Err(cast_error(other)),
        };
        Ok(self.template(&format!("CAST({{0}} AS {ty})"), &[value]))
    }
}

/// Temporal values are ISO text and decimals are reals; there is no
/// `EXTRACT`.
pub struct SqliteConverter;

impl OperationConverter for SqliteConverter {
    fn date_part(&self, part: DatePart, value: SimpleExpr) -> SimpleExpr {
        self.template(
            &format!("CAST(STRFTIME('{}', {{0}}) AS INTEGER)", part.strftime()),
            &[value],
        )
    }

    fn fractional_seconds(&self, value: SimpleExpr) -> SimpleExpr {
        self.template(
            "(STRFTIME('%f', {0}) - CAST(STRFTIME('%S', {0}) AS INTEGER))",
            &[value],
        )
    }

    fn date(&self, value: SimpleExpr) -> SimpleExpr {
        self.template("DATE({0})", &[value])
    }

    fn time(&self, value: SimpleExpr) -> SimpleExpr {
        self.template("TIME({0})", &[value])
    }

    fn total_offset_minutes(&self, _value: SimpleExpr) -> Option<SimpleExpr> {
        None
    }

    fn now(&self) -> SimpleExpr {
        Expr::cust("STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')")
    }

    fn floor(&self, value: SimpleExpr) -> SimpleExpr {
        self.template(
            "(CAST({0} AS INTEGER) - (CAST({0} AS INTEGER) > {0}))",
            &[value],
        )
    }

    fn ceiling(&self, value: SimpleExpr) -> SimpleExpr {
        self.template(
            "(CAST({0} AS INTEGER) + (CAST({0} AS INTEGER) < {0}))",
            &[value],
        )
    }

    fn length(&self, value: SimpleExpr) -> SimpleExpr {
        self.template("LENGTH({0})", &[value])
    }

    fn index_of(&self, value: SimpleExpr, needle: SimpleExpr) -> SimpleExpr {
        self.template("(INSTR({0}, {1}) - 1)", &[value, needle])
    }

    fn substring(&self, value: SimpleExpr, start: SimpleExpr, len: Option<SimpleExpr>) -> SimpleExpr {
        match len {
            Some(len) => self.template("SUBSTR({0}, {1} + 1, {2})", &[value, start, len]),
            None => self.template("SUBSTR({0}, {1} + 1)", &[value, start]),
        }
    }

    fn cast(&self, value: SimpleExpr, kind: PrimitiveKind) -> QueryResult<SimpleExpr> {
        let ty = match kind {
            PrimitiveKind::String
            | PrimitiveKind::Date
            | PrimitiveKind::TimeOfDay
            | PrimitiveKind::DateTimeOffset
            | PrimitiveKind::Guid => "TEXT",
            PrimitiveKind::Boolean
            | PrimitiveKind::Byte
            | PrimitiveKind::SByte
            | PrimitiveKind::Int16
            | PrimitiveKind::Int32
            | PrimitiveKind::Int64 => "INTEGER",
            PrimitiveKind::Decimal | PrimitiveKind::Double | PrimitiveKind::Single => "REAL",
            other => return Err(cast_error(other)),
        };
        Ok(self.template(&format!("CAST({{0}} AS {ty})"), &[value]))
    }

    fn literal(&self, value: &LiteralValue) -> QueryResult<Option<Value>> {
        match value {
            LiteralValue::Guid(u) => Ok(Some(Value::from(u.to_string()))),
            other => AnsiConverter.literal(other).map(|v| v.map(sqlite_value)),
        }
    }
}

/// Decimals and chrono values as stored by `SQLite`.
fn sqlite_value(v: Value) -> Value {
    match v {
        Value::Decimal(Some(d)) => d.to_f64().map_or(Value::Decimal(Some(d)), Value::from),
        Value::ChronoDate(Some(d)) => Value::from(d.format("%Y-%m-%d").to_string()),
        Value::ChronoTime(Some(t)) => Value::from(t.format("%H:%M:%S%.f").to_string()),
        Value::ChronoDateTimeWithTimeZone(Some(dt)) => {
            Value::from(dt.format("%Y-%m-%dT%H:%M:%S%.f%:z").to_string())
        }
        other => other,
    }
}

/// Converter for `backend`.
#[must_use]
pub fn for_backend(backend: SqlBackend) -> &'static dyn OperationConverter {
    match backend {
        SqlBackend::Sqlite => &SqliteConverter,
        SqlBackend::Postgres => &PostgresConverter,
        SqlBackend::Mysql => &MysqlConverter,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sea_orm::sea_query::{PostgresQueryBuilder, Query, SqliteQueryBuilder};

    fn render_sqlite(e: SimpleExpr) -> String {
        Query::select().expr_as(e, Alias::new("x")).to_string(SqliteQueryBuilder)
    }

    fn render_pg(e: SimpleExpr) -> String {
        Query::select().expr_as(e, Alias::new("x")).to_string(PostgresQueryBuilder)
    }

    fn name() -> SimpleExpr {
        Expr::col(Alias::new("name")).into()
    }

    #[test]
    fn templates_repeat_positional_arguments() {
        let e = SqliteConverter.floor(Expr::col(Alias::new("score")).into());
        assert_eq!(
            render_sqlite(e),
            r#"SELECT (CAST("score" AS INTEGER) - (CAST("score" AS INTEGER) > "score")) AS "x""#
        );
    }

    #[test]
    fn templates_number_postgres_placeholders() {
        let e = PostgresConverter.index_of(name(), Expr::val("b").into());
        assert_eq!(render_pg(e), r#"SELECT (POSITION('b' IN "name") - 1) AS "x""#);
    }

    #[test]
    fn sqlite_spellings() {
        let e = SqliteConverter.date_part(DatePart::Year, Expr::col(Alias::new("d")).into());
        assert_eq!(
            render_sqlite(e),
            r#"SELECT CAST(STRFTIME('%Y', "d") AS INTEGER) AS "x""#
        );
        let e = SqliteConverter.substring(name(), Expr::val(1).into(), Some(Expr::val(2).into()));
        assert_eq!(render_sqlite(e), r#"SELECT SUBSTR("name", 1 + 1, 2) AS "x""#);
    }

    #[test]
    fn unknown_slots_are_kept_verbatim() {
        let e = custom(false, "f({0}, {x}, {7})", &[name()]);
        assert_eq!(render_sqlite(e), r#"SELECT f("name", {x}, {7}) AS "x""#);
    }

    #[test]
    fn sqlite_literals_are_text_and_reals() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            SqliteConverter.literal(&LiteralValue::Date(d)).unwrap(),
            Some(Value::from("2024-03-01".to_owned()))
        );
        let dec = BigDecimal::from_str("2.5").unwrap();
        assert_eq!(
            SqliteConverter.literal(&LiteralValue::Decimal(dec)).unwrap(),
            Some(Value::from(2.5_f64))
        );
        assert_eq!(SqliteConverter.literal(&LiteralValue::Null).unwrap(), None);
    }

    #[test]
    fn casts_to_binary_are_rejected() {
        assert!(matches!(
            AnsiConverter.cast(name(), PrimitiveKind::Binary),
            Err(QueryError::NotImplemented(_))
        ));
    }
}
