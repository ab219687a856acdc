///
/// Result rendering for the shell.
///
/// Text output is tab-separated with a header line. JSON output is one
/// document per statement:
/// - rows: `{"columns": [...], "rows": [[...], ...]}`
/// - columns: `[{"name": ..., "values": [...]}, ...]`
/// - statements without results: `{"changes": n}`
///

use litebind::Value;
use serde_json::{Value as Json, json};

/// Render one value for tab-separated text output.
pub fn value_text(value: &Value<'_>) -> String {
    match value {
        Value::Null | Value::Preserve => "NULL".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Long(l) => l.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(..) => value.as_str().map(|s| s.into_owned()).unwrap_or_default(),
        Value::Blob(bytes) => format!("x'{}'", hex(bytes)),
        Value::ZeroFill(len) => format!("zeroblob({})", len),
    }
}

pub fn value_json(value: &Value<'_>) -> Json {
    match value {
        Value::Null | Value::Preserve => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(i) => json!(i),
        Value::Long(l) => json!(l),
        Value::Real(r) => serde_json::Number::from_f64(*r).map_or(Json::Null, Json::Number),
        Value::Text(..) => Json::String(value_text(value)),
        Value::Blob(bytes) => Json::String(hex(bytes)),
        Value::ZeroFill(len) => json!({ "zeroblob": len }),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn rows_text(names: &[String], rows: &[Vec<Value<'static>>]) -> String {
    let mut out = names.join("\t");
    for row in rows {
        out.push('\n');
        out.push_str(&row.iter().map(value_text).collect::<Vec<_>>().join("\t"));
    }
    out
}

pub fn columns_text(names: &[String], columns: &[Vec<Value<'static>>]) -> String {
    names
        .iter()
        .zip(columns)
        .map(|(name, values)| {
            let values: Vec<String> = values.iter().map(value_text).collect();
            format!("{}\t{}", name, values.join("\t"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn rows_json(names: &[String], rows: &[Vec<Value<'static>>]) -> Json {
    json!({
        "columns": names,
        "rows": rows
            .iter()
            .map(|row| row.iter().map(value_json).collect::<Vec<_>>())
            .collect::<Vec<_>>(),
    })
}

pub fn columns_json(names: &[String], columns: &[Vec<Value<'static>>]) -> Json {
    Json::Array(
        names
            .iter()
            .zip(columns)
            .map(|(name, values)| {
                json!({
                    "name": name,
                    "values": values.iter().map(value_json).collect::<Vec<_>>(),
                })
            })
            .collect(),
    )
}
