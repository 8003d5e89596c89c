//! Row to attribute-map conversion.
//!
//! The directory treats every column as text, the way a JDBC `getString`
//! would render it. Conversion is two-phase:
//! 1. `TypeCategory` classifies the column's declared type
//! 2. a per-driver decoder extracts the value and renders it
//!
//! Rendering rules: integers, floats and decimals in plain decimal notation,
//! booleans as the single-character markers `t`/`f`, temporal values in ISO
//! form, binary as UTF-8 when valid and base64 otherwise, NULL as `None`.

use crate::db::dialect::DriverKind;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};
use std::collections::BTreeMap;

/// Column label to rendered value. Absent values are `None`.
pub type AttributeMap = BTreeMap<String, Option<String>>;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Binary,
    Json,
    Uuid,
    Text,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, driver: DriverKind) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "interval" {
        return TypeCategory::Text;
    }

    // Decimal/Numeric before floats, since "numeric" overlaps
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity holds floats
        if driver == DriverKind::Sqlite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "timestamptz" || lower.contains("with time zone") {
        return TypeCategory::TimestampTz;
    }
    // MySQL TIMESTAMP columns are stored in UTC
    if lower == "timestamp" && driver == DriverKind::MySql {
        return TypeCategory::TimestampTz;
    }
    if lower.contains("timestamp") || lower == "datetime" {
        return TypeCategory::Timestamp;
    }
    if lower == "date" {
        return TypeCategory::Date;
    }
    if lower == "time" {
        return TypeCategory::Time;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    TypeCategory::Text
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL/NUMERIC value rendered as a string, preserving scale.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => Ok(RawDecimal(numeric_from_binary(value.as_bytes()?)?)),
        }
    }
}

/// Render PostgreSQL's binary NUMERIC (base-10000 digit groups) as text.
fn numeric_from_binary(bytes: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    const NEGATIVE: u16 = 0x4000;
    const NAN: u16 = 0xC000;

    let word = |i: usize| -> Result<u16, sqlx::error::BoxDynError> {
        let hi = *bytes.get(i).ok_or("truncated NUMERIC value")?;
        let lo = *bytes.get(i + 1).ok_or("truncated NUMERIC value")?;
        Ok(u16::from_be_bytes([hi, lo]))
    };

    let ndigits = word(0)? as usize;
    let weight = word(2)? as i16 as i64;
    let sign = word(4)?;
    let dscale = word(6)? as usize;
    if sign == NAN {
        return Ok("NaN".to_string());
    }
    let digits = (0..ndigits)
        .map(|i| word(8 + i * 2))
        .collect::<Result<Vec<u16>, _>>()?;
    let group = |i: i64| -> u16 {
        if i < 0 {
            0
        } else {
            digits.get(i as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    if sign == NEGATIVE && digits.iter().any(|d| *d != 0) {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                out.push_str(&group(i).to_string());
            } else {
                out.push_str(&format!("{:04}", group(i)));
            }
        }
    }
    if dscale > 0 {
        let mut fraction = String::new();
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

// =============================================================================
// Rendering
// =============================================================================

pub(crate) fn render_bool(v: bool) -> String {
    if v { "t" } else { "f" }.to_string()
}

fn render_timestamp(v: NaiveDateTime) -> String {
    v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

fn render_timestamptz(v: DateTime<Utc>) -> String {
    v.to_rfc3339()
}

fn render_binary(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => base64::engine::general_purpose::STANDARD.encode(e.into_bytes()),
    }
}

/// Decode a nullable column, logging (and absorbing) type mismatches.
fn decode_or_log<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(column = idx, error = %e, "Failed to decode column");
            None
        }
    }
}

// =============================================================================
// Row to Attributes Trait
// =============================================================================

/// Render database rows as attribute maps keyed by column label.
pub trait RowToAttributes {
    /// Render a single column by position.
    fn column_text(&self, idx: usize) -> Option<String>;

    /// Render every column. A later column with a repeated label wins.
    fn to_attributes(&self) -> AttributeMap;
}

macro_rules! impl_row_to_attributes {
    ($row:ty, $module:ident, $driver:expr) => {
        impl RowToAttributes for $row {
            fn column_text(&self, idx: usize) -> Option<String> {
                let column = self.columns().get(idx)?;
                let category = categorize_type(column.type_info().name(), $driver);
                $module::decode_column(self, idx, category)
            }

            fn to_attributes(&self) -> AttributeMap {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| (col.name().to_string(), self.column_text(idx)))
                    .collect()
            }
        }
    };
}

impl_row_to_attributes!(PgRow, postgres, DriverKind::Postgres);
impl_row_to_attributes!(MySqlRow, mysql, DriverKind::MySql);
impl_row_to_attributes!(SqliteRow, sqlite, DriverKind::Sqlite);

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Option<String> {
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Decimal => decode_or_log::<_, RawDecimal>(row, idx).map(|v| v.0),
            TypeCategory::Boolean => decode_or_log::<_, bool>(row, idx).map(render_bool),
            TypeCategory::Timestamp => {
                decode_or_log::<_, NaiveDateTime>(row, idx).map(render_timestamp)
            }
            TypeCategory::TimestampTz => {
                decode_or_log::<_, DateTime<Utc>>(row, idx).map(render_timestamptz)
            }
            TypeCategory::Date => decode_or_log::<_, NaiveDate>(row, idx).map(|v| v.to_string()),
            TypeCategory::Time => decode_or_log::<_, NaiveTime>(row, idx).map(|v| v.to_string()),
            TypeCategory::Binary => decode_or_log::<_, Vec<u8>>(row, idx).map(render_binary),
            TypeCategory::Json => {
                decode_or_log::<_, serde_json::Value>(row, idx).map(|v| v.to_string())
            }
            TypeCategory::Uuid => decode_or_log::<_, uuid::Uuid>(row, idx).map(|v| v.to_string()),
            TypeCategory::Text => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Option<String> {
        // PostgreSQL integer types only decode into their exact width
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(|v| v.to_string());
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|v| v.to_string());
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|v| v.to_string());
        }
        decode_text(row, idx)
    }

    fn decode_float(row: &PgRow, idx: usize) -> Option<String> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(|v| v.to_string());
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v.map(|v| v.to_string());
        }
        decode_text(row, idx)
    }

    fn decode_text(row: &PgRow, idx: usize) -> Option<String> {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v;
        }
        // Enums, domains and other text-like types sqlx has no mapping for
        let raw = row.try_get_raw(idx).ok()?;
        if raw.is_null() {
            return None;
        }
        let text = match raw.format() {
            PgValueFormat::Text => raw.as_str().ok(),
            PgValueFormat::Binary => raw
                .as_bytes()
                .ok()
                .and_then(|b| std::str::from_utf8(b).ok())
                .filter(|s| !s.chars().any(char::is_control)),
        };
        if text.is_none() {
            tracing::warn!(
                column = idx,
                type_name = %raw.type_info().name(),
                "Column type cannot be rendered as text"
            );
        }
        text.map(str::to_string)
    }
}

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Option<String> {
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Float => decode_or_log::<_, f64>(row, idx).map(|v| v.to_string()),
            TypeCategory::Decimal => decode_or_log::<_, RawDecimal>(row, idx).map(|v| v.0),
            TypeCategory::Boolean => decode_or_log::<_, bool>(row, idx).map(render_bool),
            TypeCategory::Timestamp => {
                decode_or_log::<_, NaiveDateTime>(row, idx).map(render_timestamp)
            }
            TypeCategory::TimestampTz => {
                decode_or_log::<_, DateTime<Utc>>(row, idx).map(render_timestamptz)
            }
            TypeCategory::Date => decode_or_log::<_, NaiveDate>(row, idx).map(|v| v.to_string()),
            TypeCategory::Time => decode_or_log::<_, NaiveTime>(row, idx).map(|v| v.to_string()),
            TypeCategory::Binary => decode_or_log::<_, Vec<u8>>(row, idx).map(render_binary),
            _ => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Option<String> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(|v| v.to_string());
        }
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return v.map(|v| v.to_string());
        }
        decode_text(row, idx)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Option<String> {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v;
        }
        // Expressions over text columns may be reported as VARBINARY
        decode_or_log::<_, Vec<u8>>(row, idx).map(render_binary)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> Option<String> {
        match category {
            TypeCategory::Integer => decode_text(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => decode_text(row, idx),
            TypeCategory::Boolean => match row.try_get::<Option<bool>, _>(idx) {
                Ok(v) => v.map(render_bool),
                Err(_) => decode_text(row, idx),
            },
            TypeCategory::Timestamp | TypeCategory::TimestampTz => {
                match row.try_get::<Option<NaiveDateTime>, _>(idx) {
                    Ok(v) => v.map(render_timestamp),
                    Err(_) => decode_text(row, idx),
                }
            }
            TypeCategory::Binary => decode_or_log::<_, Vec<u8>>(row, idx).map(render_binary),
            _ => decode_text(row, idx),
        }
    }

    /// SQLite values carry their own storage class, so try each in turn.
    fn decode_text(row: &SqliteRow, idx: usize) -> Option<String> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(|v| v.to_string());
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(|v| v.to_string());
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v;
        }
        decode_or_log::<_, Vec<u8>>(row, idx).map(render_binary)
    }
}
