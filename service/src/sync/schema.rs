//! Conversion of enriched JSON records into typed rows.
//!
//! Missing optional columns become null and fields outside the schema are dropped. Values
//! are coerced to the column type where that is lossless enough to be unsurprising:
//! numeric strings into `INT`, scalars into `STRING`, objects and arrays into `STRING` as
//! JSON text. A value that cannot be coerced becomes null, except in a primary key column,
//! where it rejects the record.

use serde_json::Value;
use thiserror::Error;

use super::EnrichedRecord;
use crate::congress::lookup_field;
use crate::endpoints::{Column, ColumnType, EndpointSpec, DETAIL_COLUMN};
use crate::sink::{Cell, Row};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record rejected for table {table}: primary key column '{column}' {reason}")]
pub struct SchemaViolation {
    pub table: String,
    pub column: String,
    pub reason: String,
}

/// Build the row for one record.
///
/// # Errors
/// Returns [`SchemaViolation`] when a primary key column is missing, null, or not
/// coercible to its type.
pub fn to_row(spec: &EndpointSpec, enriched: &EnrichedRecord) -> Result<Row, SchemaViolation> {
    let schema = &spec.schema;
    let mut row = Row::new();

    for column in &schema.columns {
        let raw = lookup_field(&enriched.record, column.source_path());
        let cell = raw.map_or(Cell::Null, |value| coerce(column, value));

        if schema.primary_key.contains(&column.name) && cell.is_null() {
            let reason = match raw {
                None | Some(Value::Null) => "is missing or null",
                Some(_) => "cannot be coerced",
            };
            return Err(SchemaViolation {
                table: schema.table.to_string(),
                column: column.name.to_string(),
                reason: reason.to_string(),
            });
        }

        row.insert(column.name.to_string(), cell);
    }

    if spec.detail.is_some() {
        let detail = enriched
            .detail
            .as_ref()
            .map_or(Cell::Null, |d| Cell::Json(d.clone()));
        row.insert(DETAIL_COLUMN.to_string(), detail);
    }

    Ok(row)
}

fn coerce(column: &Column, value: &Value) -> Cell {
    match (column.column_type, value) {
        (_, Value::Null) => Cell::Null,

        (ColumnType::Int, Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).and_then(float_to_i64))
            .map_or(Cell::Null, Cell::Int),
        (ColumnType::Int, Value::String(s)) => {
            s.trim().parse::<i64>().map_or(Cell::Null, Cell::Int)
        }
        (ColumnType::Int, _) => Cell::Null,

        (ColumnType::String, Value::String(s)) => Cell::Text(s.clone()),
        (ColumnType::String, Value::Number(n)) => Cell::Text(n.to_string()),
        (ColumnType::String, Value::Bool(b)) => Cell::Text(b.to_string()),
        (ColumnType::String, other) => Cell::Text(other.to_string()),

        (ColumnType::Json, other) => Cell::Json(other.clone()),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn float_to_i64(f: f64) -> Option<i64> {
    // i64::MAX is not exactly representable; the bound is 2^63.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (f >= -LIMIT && f < LIMIT).then_some(f as i64)
}
