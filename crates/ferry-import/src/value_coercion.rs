//! Coercion of raw source values to destination column types
//!
//! Coercion is lenient: a value that does not fit its column's type is
//! passed through as text rather than failing the row.

use ferry_core::Value;

use crate::type_mapping::DestType;

pub fn coerce_value(value: Value, dest: &DestType) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    match dest {
        DestType::Integer => to_integer(value),
        DestType::Real => to_real(value),
        DestType::Boolean => to_boolean(value),
        DestType::Decimal { .. } => to_decimal(value),
        DestType::Blob => to_blob(value),
        DestType::Text | DestType::Uuid | DestType::Timestamp => to_text(value),
    }
}

fn to_integer(value: Value) -> Value {
    match value {
        Value::Int64(_) => value,
        Value::Bool(b) => Value::Int64(i64::from(b)),
        Value::Float64(f) if f.fract() == 0.0 && f.abs() < 9.0e18 => Value::Int64(f as i64),
        Value::String(s) | Value::Decimal(s) => match s.trim().parse::<i64>() {
            Ok(n) => Value::Int64(n),
            Err(_) => match s.trim().parse::<f64>() {
                Ok(f) if f.fract() == 0.0 && f.abs() < 9.0e18 => Value::Int64(f as i64),
                _ => Value::String(s),
            },
        },
        Value::Bytes(bytes) => to_integer(Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        other => other,
    }
}

fn to_real(value: Value) -> Value {
    match value {
        Value::Float64(_) => value,
        Value::Int64(n) => Value::Float64(n as f64),
        Value::Bool(b) => Value::Float64(if b { 1.0 } else { 0.0 }),
        Value::String(s) | Value::Decimal(s) => match s.trim().parse::<f64>() {
            Ok(f) => Value::Float64(f),
            Err(_) => Value::String(s),
        },
        Value::Bytes(bytes) => to_real(Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        other => other,
    }
}

/// Parse a boolean literal; numbers are true when non-zero
pub fn parse_bool(text: &str) -> Option<bool> {
    let trimmed = text.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "n" | "no" | "off" => Some(false),
        _ => trimmed.parse::<f64>().ok().map(|n| n != 0.0),
    }
}

fn to_boolean(value: Value) -> Value {
    match value {
        Value::Bool(_) => value,
        Value::Int64(n) => Value::Bool(n != 0),
        Value::Float64(f) => Value::Bool(f != 0.0),
        Value::String(s) | Value::Decimal(s) => match parse_bool(&s) {
            Some(b) => Value::Bool(b),
            None => Value::String(s),
        },
        // bit(1) columns arrive as a single raw byte
        Value::Bytes(bytes) if bytes.len() == 1 && bytes[0] <= 1 => Value::Bool(bytes[0] == 1),
        Value::Bytes(bytes) => to_boolean(Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        other => other,
    }
}

fn to_decimal(value: Value) -> Value {
    match value {
        Value::Decimal(_) => value,
        Value::String(s) => Value::Decimal(s.trim().to_string()),
        Value::Int64(n) => Value::Decimal(n.to_string()),
        Value::Float64(f) => Value::Decimal(f.to_string()),
        Value::Bool(b) => Value::Decimal(if b { "1" } else { "0" }.to_string()),
        Value::Bytes(bytes) => Value::Decimal(String::from_utf8_lossy(&bytes).trim().to_string()),
        other => other,
    }
}

fn to_blob(value: Value) -> Value {
    match value {
        Value::Bytes(_) => value,
        Value::String(s) => match decode_hex_literal(&s) {
            Some(bytes) => Value::Bytes(bytes),
            None => Value::Bytes(s.into_bytes()),
        },
        other => Value::Bytes(other.to_string().into_bytes()),
    }
}

fn to_text(value: Value) -> Value {
    match value {
        Value::String(_) => value,
        Value::Decimal(s) => Value::String(s),
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => Value::String(s),
            Err(e) => Value::String(String::from_utf8_lossy(e.as_bytes()).into_owned()),
        },
        other => Value::String(other.to_string()),
    }
}

/// Decode `\x0a1b` (PostgreSQL bytea) or `0x0A1B` (MySQL) hex text
pub fn decode_hex_literal(text: &str) -> Option<Vec<u8>> {
    let digits = text
        .strip_prefix("\\x")
        .or_else(|| text.strip_prefix("0x"))
        .or_else(|| text.strip_prefix("0X"))?;
    decode_hex(digits)
}

pub fn decode_hex(digits: &str) -> Option<Vec<u8>> {
    if digits.len() % 2 != 0 {
        return None;
    }
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::String(s.to_string())
    }

    #[test]
    fn integers_parse_or_fall_back_to_text() {
        assert_eq!(coerce_value(text(" 42 "), &DestType::Integer), Value::Int64(42));
        assert_eq!(coerce_value(text("7.0"), &DestType::Integer), Value::Int64(7));
        assert_eq!(coerce_value(text("n/a"), &DestType::Integer), text("n/a"));
        assert_eq!(coerce_value(Value::Null, &DestType::Integer), Value::Null);
    }

    #[test]
    fn booleans_accept_common_literals() {
        for literal in ["1", "t", "TRUE", "y", "Yes", "on"] {
            assert_eq!(coerce_value(text(literal), &DestType::Boolean), Value::Bool(true));
        }
        for literal in ["0", "f", "false", "N", "no", "OFF"] {
            assert_eq!(coerce_value(text(literal), &DestType::Boolean), Value::Bool(false));
        }
        assert_eq!(coerce_value(Value::Int64(5), &DestType::Boolean), Value::Bool(true));
        assert_eq!(coerce_value(Value::Bytes(vec![1]), &DestType::Boolean), Value::Bool(true));
        assert_eq!(coerce_value(text("maybe"), &DestType::Boolean), text("maybe"));
    }

    #[test]
    fn decimals_travel_as_text() {
        let dest = DestType::default_decimal();
        assert_eq!(coerce_value(text("12.50"), &dest), Value::Decimal("12.50".into()));
        assert_eq!(coerce_value(Value::Int64(3), &dest), Value::Decimal("3".into()));
    }

    #[test]
    fn blobs_decode_hex_forms() {
        assert_eq!(
            coerce_value(text("\\xdeadbeef"), &DestType::Blob),
            Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert_eq!(
            coerce_value(text("0x0A0b"), &DestType::Blob),
            Value::Bytes(vec![0x0a, 0x0b])
        );
        assert_eq!(
            coerce_value(text("plain"), &DestType::Blob),
            Value::Bytes(b"plain".to_vec())
        );
        assert_eq!(decode_hex("abc"), None);
        assert_eq!(decode_hex("zz"), None);
    }

    #[test]
    fn text_columns_stringify_everything() {
        assert_eq!(coerce_value(Value::Int64(9), &DestType::Text), text("9"));
        assert_eq!(
            coerce_value(Value::Bytes(b"caf\xc3\xa9".to_vec()), &DestType::Text),
            text("café")
        );
        assert_eq!(
            coerce_value(text("2024-01-02 03:04:05"), &DestType::Timestamp),
            text("2024-01-02 03:04:05")
        );
    }
}
