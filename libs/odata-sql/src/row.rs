//! Result columns and the decoding of result rows into JSON.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use odata_edm::{Edm, EdmType, FullQualifiedName, PrimitiveKind};
use rust_decimal::Decimal;
use sea_orm::{DbErr, QueryResult as DbRow};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use crate::error::QueryResult;

/// How a selected column is read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnDecode {
    Primitive(PrimitiveKind),
    /// Integer stored value rendered as member names.
    Enum(FullQualifiedName),
    /// Whatever the driver reports; used for correlation columns.
    Any,
}

/// One column of a generated `SELECT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputColumn {
    /// SQL alias of the column.
    pub label: String,
    /// Location of the value in the output object. Empty for columns that
    /// only correlate rows across queries.
    pub path: Vec<String>,
    pub decode: ColumnDecode,
}

impl OutputColumn {
    /// Visible column at `path` (`HomeAddress/City`), labelled with the path.
    #[must_use]
    pub fn value(path: &str, kind: PrimitiveKind, ty: Option<&EdmType>) -> Self {
        let decode = match ty {
            Some(EdmType::Enum(fqn)) => ColumnDecode::Enum(fqn.clone()),
            _ => ColumnDecode::Primitive(kind),
        };
        Self {
            label: path.to_owned(),
            path: path.split('/').map(str::to_owned).collect(),
            decode,
        }
    }

    /// Visible column whose type is not known up front.
    #[must_use]
    pub fn untyped(path: &str) -> Self {
        Self {
            label: path.to_owned(),
            path: path.split('/').map(str::to_owned).collect(),
            decode: ColumnDecode::Any,
        }
    }

    #[must_use]
    pub fn hidden(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            path: Vec::new(),
            decode: ColumnDecode::Any,
        }
    }

    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.path.is_empty()
    }
}

/// A decoded row: the output object plus the correlation values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRow {
    pub object: Map<String, Value>,
    pub hidden: BTreeMap<String, Value>,
}

impl DecodedRow {
    /// Correlation key built from hidden columns, in order.
    #[must_use]
    pub fn key(&self, labels: &[String]) -> String {
        let values: Vec<&Value> = labels
            .iter()
            .map(|l| self.hidden.get(l).unwrap_or(&Value::Null))
            .collect();
        serde_json::to_string(&values).unwrap_or_default()
    }
}

/// Reads every row with the given column layout.
///
/// # Errors
/// [`QueryError::Database`](crate::QueryError::Database) when a column is
/// missing or holds a value of an unexpected type.
pub fn decode_rows(
    edm: &Edm,
    rows: &[DbRow],
    columns: &[OutputColumn],
) -> QueryResult<Vec<DecodedRow>> {
    rows.iter().map(|r| decode_row(edm, r, columns)).collect()
}

/// # Errors
/// See [`decode_rows`].
pub fn decode_row(edm: &Edm, row: &DbRow, columns: &[OutputColumn]) -> QueryResult<DecodedRow> {
    let mut out = DecodedRow::default();
    for c in columns {
        let value = decode_value(edm, row, c)?;
        if c.is_hidden() {
            out.hidden.insert(c.label.clone(), value);
        } else {
            insert_path(&mut out.object, &c.path, value);
        }
    }
    Ok(out)
}

/// Puts `value` at `path`, creating intermediate objects. A null leaf inside
/// an otherwise empty complex value leaves the complex value null.
pub fn insert_path(object: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = object;
    for p in parents {
        let slot = current
            .entry(p.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}

fn decode_value(edm: &Edm, row: &DbRow, c: &OutputColumn) -> QueryResult<Value> {
    let label = c.label.as_str();
    let value = match &c.decode {
        ColumnDecode::Primitive(kind) => primitive(row, label, *kind)?,
        ColumnDecode::Enum(fqn) => {
            let raw = integer(row, label)?;
            raw.map_or(Value::Null, |v| enum_names(edm, fqn, v))
        }
        ColumnDecode::Any => number(row, label)
            .or_else(|_| stored_text::<Uuid>(row, label, |u| u.to_string()))?,
    };
    Ok(value)
}

fn primitive(row: &DbRow, label: &str, kind: PrimitiveKind) -> Result<Value, DbErr> {
    match kind {
        PrimitiveKind::Boolean => boolean(row, label),
        PrimitiveKind::Byte
        | PrimitiveKind::SByte
        | PrimitiveKind::Int16
        | PrimitiveKind::Int32
        | PrimitiveKind::Int64
        | PrimitiveKind::Decimal
        | PrimitiveKind::Double
        | PrimitiveKind::Single => number(row, label),
        PrimitiveKind::Duration => Ok(match number(row, label)? {
            Value::Number(n) => Value::String(duration(&n)),
            other => other,
        }),
        PrimitiveKind::Date => stored_text::<NaiveDate>(row, label, |d| d.to_string()),
        PrimitiveKind::TimeOfDay => stored_text::<NaiveTime>(row, label, |t| t.to_string()),
        PrimitiveKind::DateTimeOffset => date_time_offset(row, label),
        PrimitiveKind::Guid => stored_text::<Uuid>(row, label, |u| u.to_string()),
        PrimitiveKind::Binary | PrimitiveKind::Stream => binary(row, label),
        PrimitiveKind::String => text(row, label),
    }
}

/// Integer first, then float, then decimal, then numeric text.
fn number(row: &DbRow, label: &str) -> Result<Value, DbErr> {
    if let Ok(v) = row.try_get::<Option<i64>>("", label) {
        return Ok(v.map_or(Value::Null, Value::from));
    }
    if let Ok(v) = row.try_get::<Option<f64>>("", label) {
        return Ok(v.and_then(Number::from_f64).map_or(Value::Null, Value::Number));
    }
    if let Ok(v) = row.try_get::<Option<Decimal>>("", label) {
        return Ok(v.map_or(Value::Null, |d| numeric_text(d.normalize().to_string())));
    }
    let v = row.try_get::<Option<String>>("", label)?;
    Ok(v.map_or(Value::Null, numeric_text))
}

fn numeric_text(text: String) -> Value {
    text.parse::<Number>()
        .map_or_else(|_| Value::String(text), Value::Number)
}

fn integer(row: &DbRow, label: &str) -> Result<Option<i64>, DbErr> {
    match number(row, label)? {
        Value::Number(n) => Ok(n.as_i64()),
        _ => Ok(None),
    }
}

fn boolean(row: &DbRow, label: &str) -> Result<Value, DbErr> {
    if let Ok(v) = row.try_get::<Option<bool>>("", label) {
        return Ok(v.map_or(Value::Null, Value::Bool));
    }
    Ok(integer(row, label)?.map_or(Value::Null, |i| Value::Bool(i != 0)))
}

fn text(row: &DbRow, label: &str) -> Result<Value, DbErr> {
    let v = row.try_get::<Option<String>>("", label)?;
    Ok(v.map_or(Value::Null, Value::String))
}

/// Text as stored (`SQLite`), else the native type rendered to text.
fn stored_text<T>(row: &DbRow, label: &str, render: impl Fn(T) -> String) -> Result<Value, DbErr>
where
    T: sea_orm::TryGetable,
{
    if let Ok(v) = row.try_get::<Option<String>>("", label) {
        return Ok(v.map_or(Value::Null, Value::String));
    }
    let v = row.try_get::<Option<T>>("", label)?;
    Ok(v.map_or(Value::Null, |x| Value::String(render(x))))
}

fn date_time_offset(row: &DbRow, label: &str) -> Result<Value, DbErr> {
    if let Ok(v) = row.try_get::<Option<DateTime<FixedOffset>>>("", label) {
        return Ok(v.map_or(Value::Null, |d| Value::String(d.to_rfc3339())));
    }
    if let Ok(v) = row.try_get::<Option<NaiveDateTime>>("", label) {
        return Ok(v.map_or(Value::Null, |d| {
            Value::String(format!("{}Z", d.format("%Y-%m-%dT%H:%M:%S%.f")))
        }));
    }
    text(row, label)
}

fn binary(row: &DbRow, label: &str) -> Result<Value, DbErr> {
    if let Ok(v) = row.try_get::<Option<Vec<u8>>>("", label) {
        return Ok(v.map_or(Value::Null, |b| Value::String(STANDARD.encode(b))));
    }
    text(row, label)
}

/// Seconds rendered as an ISO 8601 duration.
fn duration(seconds: &Number) -> String {
    let text = seconds.to_string();
    match text.strip_prefix('-') {
        Some(abs) => format!("-PT{abs}S"),
        None => format!("PT{text}S"),
    }
}

/// Member name, or the comma-separated members of a flags value. Values
/// with no matching member stay numeric.
fn enum_names(edm: &Edm, fqn: &FullQualifiedName, value: i64) -> Value {
    let Some(ty) = edm.enum_type(fqn) else {
        return Value::from(value);
    };
    if ty.is_flags {
        let names: Vec<&str> = ty
            .members
            .iter()
            .filter(|m| m.value != 0 && value & m.value == m.value)
            .map(|m| m.name.as_str())
            .collect();
        let covered = ty
            .members
            .iter()
            .filter(|m| value & m.value == m.value)
            .fold(0, |acc, m| acc | m.value);
        if covered == value && (!names.is_empty() || value == 0) {
            return Value::String(names.join(","));
        }
        return Value::from(value);
    }
    ty.members
        .iter()
        .find(|m| m.value == value)
        .map_or_else(|| Value::from(value), |m| Value::String(m.name.clone()))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn paths_nest_into_objects() {
        let mut obj = Map::new();
        insert_path(&mut obj, &["Id".to_owned()], json!(1));
        insert_path(
            &mut obj,
            &["HomeAddress".to_owned(), "City".to_owned()],
            json!("Berlin"),
        );
        insert_path(
            &mut obj,
            &["HomeAddress".to_owned(), "Street".to_owned()],
            Value::Null,
        );
        assert_eq!(
            Value::Object(obj),
            json!({ "Id": 1, "HomeAddress": { "City": "Berlin", "Street": null } })
        );
    }

    #[test]
    fn column_labels_follow_paths() {
        let c = OutputColumn::value("HomeAddress/City", PrimitiveKind::String, None);
        assert_eq!(c.label, "HomeAddress/City");
        assert_eq!(c.path, vec!["HomeAddress", "City"]);
        assert!(!c.is_hidden());
        assert!(OutputColumn::hidden("__j0").is_hidden());

        let color = EdmType::Enum(FullQualifiedName::new("Demo", "Color"));
        let c = OutputColumn::value("FavoriteColor", PrimitiveKind::Int32, Some(&color));
        assert!(matches!(c.decode, ColumnDecode::Enum(_)));
    }

    #[test]
    fn correlation_keys_are_positional() {
        let mut row = DecodedRow::default();
        row.hidden.insert("__p0".to_owned(), json!(1));
        row.hidden.insert("__p1".to_owned(), json!("a"));
        assert_eq!(row.key(&["__p0".to_owned(), "__p1".to_owned()]), r#"[1,"a"]"#);
        assert_eq!(row.key(&["__p9".to_owned()]), "[null]");
    }

    #[test]
    fn durations_render_as_seconds() {
        assert_eq!(duration(&Number::from(90)), "PT90S");
        assert_eq!(duration(&Number::from(-5)), "-PT5S");
    }

    #[test]
    fn numeric_text_parses_when_possible() {
        assert_eq!(numeric_text("12.50".to_owned()), json!(12.5));
        assert_eq!(numeric_text("abc".to_owned()), json!("abc"));
    }
}
