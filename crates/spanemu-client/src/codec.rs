//! JSON encoding of statement parameters and decoding of result rows, as
//! used by the REST API. INT64 travels as a decimal string; non-finite
//! FLOAT64 values travel as `"NaN"`, `"Infinity"`, `"-Infinity"`.

use crate::types::ResultSet;
use crate::ClientError;
use serde_json::{json, Map, Value as Json};
use spanemu_config::{Statement, TypeCode, Value};

pub fn encode_value(value: &Value) -> Json {
    match value {
        Value::Bool(b) => Json::Bool(*b),
        Value::Int64(i) => Json::String(i.to_string()),
        Value::Float64(f) => encode_float(*f),
        Value::String(s) => Json::String(s.clone()),
        Value::Null(_) => Json::Null,
    }
}

fn encode_float(f: f64) -> Json {
    if f.is_nan() {
        Json::String("NaN".to_owned())
    } else if f.is_infinite() {
        Json::String(if f > 0.0 { "Infinity" } else { "-Infinity" }.to_owned())
    } else {
        serde_json::Number::from_f64(f).map_or(Json::Null, Json::Number)
    }
}

/// `{sql, params, paramTypes}` for a statement. Parameter fields are
/// omitted when the statement has none.
pub fn encode_statement(statement: &Statement) -> Json {
    let mut body = Map::new();
    body.insert("sql".to_owned(), Json::String(statement.sql.clone()));
    if !statement.params.is_empty() {
        let mut params = Map::new();
        let mut types = Map::new();
        for (name, value) in &statement.params {
            params.insert(name.clone(), encode_value(value));
            types.insert(
                name.clone(),
                json!({ "code": value.type_code().api_name() }),
            );
        }
        body.insert("params".to_owned(), Json::Object(params));
        body.insert("paramTypes".to_owned(), Json::Object(types));
    }
    Json::Object(body)
}

fn type_code_from_api(name: &str) -> Option<TypeCode> {
    match name {
        "BOOL" => Some(TypeCode::Bool),
        "INT64" => Some(TypeCode::Int64),
        "FLOAT64" => Some(TypeCode::Float64),
        "STRING" => Some(TypeCode::String),
        _ => None,
    }
}

/// Decode one cell given its column type name. Types without a dedicated
/// [`Value`] variant (TIMESTAMP, DATE, BYTES, NUMERIC, JSON) decode as strings.
pub fn decode_value(json: &Json, type_name: &str) -> Result<Value, ClientError> {
    let code = type_code_from_api(type_name);
    match (json, code) {
        (Json::Null, code) => Ok(Value::Null(code.unwrap_or(TypeCode::String))),
        (Json::Bool(b), Some(TypeCode::Bool) | None) => Ok(Value::Bool(*b)),
        (Json::String(s), Some(TypeCode::Int64)) => s
            .parse()
            .map(Value::Int64)
            .map_err(|e| ClientError::Decode(format!("INT64 value '{s}': {e}"))),
        (Json::Number(n), Some(TypeCode::Int64)) => n
            .as_i64()
            .map(Value::Int64)
            .ok_or_else(|| ClientError::Decode(format!("INT64 value {n}"))),
        (Json::Number(n), Some(TypeCode::Float64)) => n
            .as_f64()
            .map(Value::Float64)
            .ok_or_else(|| ClientError::Decode(format!("FLOAT64 value {n}"))),
        (Json::String(s), Some(TypeCode::Float64)) => match s.as_str() {
            "NaN" => Ok(Value::Float64(f64::NAN)),
            "Infinity" => Ok(Value::Float64(f64::INFINITY)),
            "-Infinity" => Ok(Value::Float64(f64::NEG_INFINITY)),
            other => other
                .parse()
                .map(Value::Float64)
                .map_err(|e| ClientError::Decode(format!("FLOAT64 value '{other}': {e}"))),
        },
        (Json::String(s), Some(TypeCode::String) | None) => Ok(Value::String(s.clone())),
        (other, _) => Err(ClientError::Decode(format!(
            "unexpected {type_name} value {other}"
        ))),
    }
}

/// Decode an `executeSql` response: `metadata.rowType.fields` names and
/// types the columns of `rows`.
pub fn decode_result_set(json: &Json) -> Result<ResultSet, ClientError> {
    let fields = json
        .pointer("/metadata/rowType/fields")
        .and_then(Json::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let mut columns = Vec::with_capacity(fields.len());
    let mut types = Vec::with_capacity(fields.len());
    for field in fields {
        columns.push(
            field
                .get("name")
                .and_then(Json::as_str)
                .unwrap_or_default()
                .to_owned(),
        );
        types.push(
            field
                .pointer("/type/code")
                .and_then(Json::as_str)
                .unwrap_or("STRING")
                .to_owned(),
        );
    }

    let mut rows = Vec::new();
    if let Some(raw_rows) = json.get("rows").and_then(Json::as_array) {
        for raw in raw_rows {
            let cells = raw
                .as_array()
                .ok_or_else(|| ClientError::Decode(format!("row is not an array: {raw}")))?;
            if cells.len() != types.len() {
                return Err(ClientError::Decode(format!(
                    "row has {} cells, expected {}",
                    cells.len(),
                    types.len()
                )));
            }
            let row = cells
                .iter()
                .zip(&types)
                .map(|(cell, ty)| decode_value(cell, ty))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(row);
        }
    }
    Ok(ResultSet { columns, rows })
}

/// `stats.rowCountExact` of a result set; INT64 encoded as a string.
pub fn row_count(json: &Json) -> i64 {
    match json.pointer("/stats/rowCountExact") {
        Some(Json::String(s)) => s.parse().unwrap_or_default(),
        Some(Json::Number(n)) => n.as_i64().unwrap_or_default(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_with_params_carries_types() {
        let stmt = Statement::new("INSERT INTO t (pk, n) VALUES (@pk, @n)")
            .with_param("pk", "a")
            .with_param("n", 42)
            .with_param("x", Value::Null(TypeCode::Float64));
        let body = encode_statement(&stmt);
        assert_eq!(body["params"]["n"], json!("42"));
        assert_eq!(body["params"]["x"], Json::Null);
        assert_eq!(body["paramTypes"]["n"]["code"], json!("INT64"));
        assert_eq!(body["paramTypes"]["x"]["code"], json!("FLOAT64"));
    }

    #[test]
    fn statement_without_params_omits_fields() {
        let body = encode_statement(&Statement::new("SELECT 1"));
        assert!(body.get("params").is_none());
        assert!(body.get("paramTypes").is_none());
    }

    #[test]
    fn non_finite_floats_are_strings() {
        assert_eq!(encode_value(&Value::Float64(f64::NAN)), json!("NaN"));
        assert_eq!(
            encode_value(&Value::Float64(f64::NEG_INFINITY)),
            json!("-Infinity")
        );
        assert_eq!(encode_value(&Value::Float64(1.5)), json!(1.5));
    }

    #[test]
    fn decodes_typed_rows() {
        let body = json!({
            "metadata": {"rowType": {"fields": [
                {"name": "pk", "type": {"code": "STRING"}},
                {"name": "col", "type": {"code": "INT64"}},
                {"name": "f", "type": {"code": "FLOAT64"}},
                {"name": "ts", "type": {"code": "TIMESTAMP"}}
            ]}},
            "rows": [
                ["bar", "2", 0.5, "2024-01-01T00:00:00Z"],
                ["foo", null, "Infinity", null]
            ]
        });
        let rs = decode_result_set(&body).unwrap();
        assert_eq!(rs.columns, vec!["pk", "col", "f", "ts"]);
        assert_eq!(rs.rows[0][1], Value::Int64(2));
        assert_eq!(rs.rows[0][3], Value::String("2024-01-01T00:00:00Z".to_owned()));
        assert_eq!(rs.rows[1][1], Value::Null(TypeCode::Int64));
        assert_eq!(rs.rows[1][2], Value::Float64(f64::INFINITY));
    }

    #[test]
    fn ragged_row_is_rejected() {
        let body = json!({
            "metadata": {"rowType": {"fields": [{"name": "a", "type": {"code": "INT64"}}]}},
            "rows": [["1", "2"]]
        });
        assert!(matches!(decode_result_set(&body), Err(ClientError::Decode(_))));
    }

    #[test]
    fn bad_int_is_decode_error() {
        assert!(decode_value(&json!("x1"), "INT64").is_err());
        assert!(decode_value(&json!(true), "INT64").is_err());
    }

    #[test]
    fn row_count_reads_string_or_number() {
        assert_eq!(row_count(&json!({"stats": {"rowCountExact": "3"}})), 3);
        assert_eq!(row_count(&json!({"stats": {"rowCountExact": 4}})), 4);
        assert_eq!(row_count(&json!({})), 0);
    }
}
