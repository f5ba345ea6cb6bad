//! Tagged-variant cell type and its total conversion to JSON.
//!
//! Expresses the dynamic, type-sniffing value conversion a dataframe-backed API would
//! otherwise do at runtime as an explicit, exhaustive mapping instead: every `Cell`
//! variant has exactly one JSON shape, and the conversion can never fail.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum Cell {
    Null,
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    Bool(bool),
    Text(String),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl Cell {
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Integer(i) => Value::from(*i),
            Cell::Float(f) => {
                if f.is_finite() {
                    serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null)
                } else {
                    Value::Null
                }
            }
            Cell::Decimal(d) => serde_json::Number::from_f64(decimal_to_f64(*d))
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Timestamp(ts) => Value::String(ts.to_rfc3339()),
            Cell::Bytes(bytes) => match String::from_utf8(bytes.clone()) {
                Ok(s) => Value::String(s),
                Err(_) => Value::String(format!("{bytes:02x?}")),
            },
        }
    }
}

fn decimal_to_f64(d: Decimal) -> f64 {
    use std::str::FromStr;
    f64::from_str(&d.to_string()).unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_non_finite_map_to_json_null() {
        assert_eq!(Cell::Null.to_json(), Value::Null);
        assert_eq!(Cell::Float(f64::NAN).to_json(), Value::Null);
        assert_eq!(Cell::Float(f64::INFINITY).to_json(), Value::Null);
        assert_eq!(Cell::Float(f64::NEG_INFINITY).to_json(), Value::Null);
    }

    #[test]
    fn finite_float_round_trips() {
        assert_eq!(Cell::Float(1.5).to_json(), serde_json::json!(1.5));
    }

    #[test]
    fn integer_and_bool_map_directly() {
        assert_eq!(Cell::Integer(42).to_json(), serde_json::json!(42));
        assert_eq!(Cell::Bool(true).to_json(), serde_json::json!(true));
    }

    #[test]
    fn invalid_utf8_bytes_stringify_instead_of_failing() {
        let cell = Cell::Bytes(vec![0xff, 0xfe]);
        assert!(matches!(cell.to_json(), Value::String(_)));
    }

    #[test]
    fn valid_utf8_bytes_decode() {
        let cell = Cell::Bytes(b"hello".to_vec());
        assert_eq!(cell.to_json(), serde_json::json!("hello"));
    }

    #[test]
    fn timestamp_is_iso8601() {
        let ts = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let Value::String(s) = Cell::Timestamp(ts).to_json() else {
            panic!("expected string");
        };
        assert!(s.starts_with("2026-01-01"));
    }
}
