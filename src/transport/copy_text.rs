//! PostgreSQL `COPY` text format encoding.
//!
//! Columns are tab separated and rows newline terminated. Backslash, tab,
//! newline and carriage return inside values are escaped; `\N` marks a null
//! and `\D` (with the `DEFAULT` copy option) asks the server for the column
//! default instead.

use chrono::SecondsFormat;

use crate::cursor::TabularCursor;
use crate::error::PreconditionError;
use crate::value::Value;

pub const NULL_MARKER: &str = "\\N";
pub const DEFAULT_MARKER: &str = "\\D";

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Append the cursor's current row to `out`. Null and missing values are
/// written as `null_marker`.
pub fn encode_row(
    cursor: &dyn TabularCursor,
    out: &mut String,
    null_marker: &str,
) -> Result<(), PreconditionError> {
    for ordinal in 0..cursor.field_count() {
        if ordinal > 0 {
            out.push('\t');
        }
        encode_value(cursor.value(ordinal)?, out, null_marker);
    }
    out.push('\n');
    Ok(())
}

pub fn encode_value(value: &Value, out: &mut String, null_marker: &str) {
    match value {
        Value::Missing | Value::Null => out.push_str(null_marker),
        Value::Bool(flag) => out.push(if *flag { 't' } else { 'f' }),
        Value::Int16(n) => out.push_str(&n.to_string()),
        Value::Int32(n) => out.push_str(&n.to_string()),
        Value::Int64(n) => out.push_str(&n.to_string()),
        Value::Float32(n) => encode_float(f64::from(*n), &n.to_string(), out),
        Value::Float64(n) => encode_float(*n, &n.to_string(), out),
        Value::Decimal(n) => out.push_str(&n.to_string()),
        Value::Text(text) => escape_into(text, out),
        Value::Bytes(bytes) => {
            // bytea hex input, with the backslash itself escaped for COPY
            out.reserve(3 + bytes.len() * 2);
            out.push_str("\\\\x");
            for byte in bytes {
                out.push(HEX[usize::from(byte >> 4)] as char);
                out.push(HEX[usize::from(byte & 0x0f)] as char);
            }
        }
        Value::Uuid(id) => out.push_str(&id.hyphenated().to_string()),
        Value::Date(date) => out.push_str(&date.format("%Y-%m-%d").to_string()),
        Value::Timestamp(ts) => out.push_str(&ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::TimestampTz(ts) => out.push_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::Json(json) => escape_into(&json.to_string(), out),
    }
}

fn encode_float(value: f64, shortest: &str, out: &mut String) {
    if value.is_nan() {
        out.push_str("NaN");
    } else if value.is_infinite() {
        out.push_str(if value > 0.0 { "Infinity" } else { "-Infinity" });
    } else {
        out.push_str(shortest);
    }
}

fn escape_into(text: &str, out: &mut String) {
    out.reserve(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
}
