//! JSON <-> SQLite value conversion at the dispatch boundary.

use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value as JsonValue};

/// Converts positional JSON parameters into SQLite values.
pub fn bind_params(params: &[JsonValue]) -> Result<Vec<SqlValue>, String> {
    params.iter().map(to_sql).collect()
}

pub fn to_sql(value: &JsonValue) -> Result<SqlValue, String> {
    match value {
        JsonValue::Null => Ok(SqlValue::Null),
        JsonValue::Bool(flag) => Ok(SqlValue::Integer(*flag as i64)),
        JsonValue::Number(num) => {
            if let Some(int) = num.as_i64() {
                Ok(SqlValue::Integer(int))
            } else if let Some(real) = num.as_f64() {
                Ok(SqlValue::Real(real))
            } else {
                Err(format!("Unsupported numeric parameter: {num}"))
            }
        }
        JsonValue::String(text) => Ok(SqlValue::Text(text.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => {
            Err("Unsupported parameter type: expected null, bool, number, or string".to_string())
        }
    }
}

pub fn from_sql(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(int) => JsonValue::from(int),
        // NaN/Inf have no JSON representation; they come back as null.
        ValueRef::Real(real) => Number::from_f64(real)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(text) => JsonValue::from(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => {
            JsonValue::from(bytes.iter().map(|byte| JsonValue::from(*byte)).collect::<Vec<_>>())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_convert_to_sql() {
        assert_eq!(to_sql(&JsonValue::Null).expect("null"), SqlValue::Null);
        assert_eq!(to_sql(&json!(true)).expect("bool"), SqlValue::Integer(1));
        assert_eq!(to_sql(&json!(42)).expect("int"), SqlValue::Integer(42));
        assert_eq!(to_sql(&json!(1.5)).expect("real"), SqlValue::Real(1.5));
        assert_eq!(
            to_sql(&json!("hi")).expect("text"),
            SqlValue::Text("hi".to_string())
        );
    }

    #[test]
    fn compound_params_rejected() {
        assert!(to_sql(&json!([1, 2])).is_err());
        assert!(to_sql(&json!({"k": 1})).is_err());
        assert!(bind_params(&[json!(1), json!({})]).is_err());
    }

    #[test]
    fn sql_values_convert_back() {
        assert_eq!(from_sql(ValueRef::Null), JsonValue::Null);
        assert_eq!(from_sql(ValueRef::Integer(7)), json!(7));
        assert_eq!(from_sql(ValueRef::Real(0.25)), json!(0.25));
        assert_eq!(from_sql(ValueRef::Text(b"abc")), json!("abc"));
        assert_eq!(from_sql(ValueRef::Blob(&[1, 2, 3])), json!([1, 2, 3]));
    }
}
