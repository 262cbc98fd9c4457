use serde_json::{json, Map, Value};

pub(crate) fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Numeric view of a cell: numbers, numeric strings and booleans.
pub(crate) fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

pub(crate) fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Statistical KPIs over a result set.
///
/// A column is numeric when every non-null cell converts to a number; columns
/// with only nulls are counted in neither group.
pub fn generate_metrics(columns: &[String], rows: &[Map<String, Value>]) -> Value {
    if rows.is_empty() {
        return json!({
            "kpis": { "total_rows": 0, "total_columns": columns.len() },
            "numeric_stats": {},
            "text_stats": {},
        });
    }

    let total_rows = rows.len();
    let mut numeric_stats = Map::new();
    let mut text_stats = Map::new();
    let mut headline = Value::Null;

    for col in columns {
        let non_null: Vec<&Value> = rows
            .iter()
            .filter_map(|r| r.get(col))
            .filter(|v| !v.is_null())
            .collect();
        if non_null.is_empty() {
            continue;
        }
        let null_count = total_rows - non_null.len();

        let nums: Option<Vec<f64>> = non_null.iter().map(|v| as_number(v)).collect();
        match nums {
            Some(nums) => {
                let sum: f64 = nums.iter().sum();
                let min = nums.iter().copied().fold(f64::INFINITY, f64::min);
                let max = nums.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let avg = sum / nums.len() as f64;
                if headline.is_null() {
                    headline = json!({
                        "column": col,
                        "total_records": total_rows,
                        "avg": round4(avg),
                        "max": round4(max),
                        "min": round4(min),
                        "sum": round4(sum),
                    });
                }
                numeric_stats.insert(
                    col.clone(),
                    json!({
                        "count": nums.len(),
                        "sum": round4(sum),
                        "avg": round4(avg),
                        "min": round4(min),
                        "max": round4(max),
                        "null_count": null_count,
                    }),
                );
            }
            None => {
                // first-seen order, then stable sort by count
                let mut counts: Vec<(String, usize)> = Vec::new();
                for v in &non_null {
                    let s = display(v);
                    match counts.iter_mut().find(|(k, _)| *k == s) {
                        Some((_, n)) => *n += 1,
                        None => counts.push((s, 1)),
                    }
                }
                let unique_count = counts.len();
                counts.sort_by(|a, b| b.1.cmp(&a.1));
                let top: Vec<Value> = counts
                    .into_iter()
                    .take(5)
                    .map(|(value, count)| json!({ "value": value, "count": count }))
                    .collect();
                text_stats.insert(
                    col.clone(),
                    json!({
                        "unique_count": unique_count,
                        "null_count": null_count,
                        "top_values": top,
                    }),
                );
            }
        }
    }

    json!({
        "kpis": {
            "total_rows": total_rows,
            "total_columns": columns.len(),
            "numeric_columns": numeric_stats.len(),
            "text_columns": text_stats.len(),
            "headline": headline,
        },
        "numeric_stats": numeric_stats,
        "text_stats": text_stats,
    })
}
