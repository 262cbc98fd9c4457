use serde_json::{json, Map, Value};

use crate::metrics::{as_number, display};

pub const PALETTE: [&str; 12] = [
    "#6c47ff", "#22c55e", "#3b82f6", "#f97316", "#a855f7", "#14b8a6", "#f43f5e", "#eab308",
    "#0ea5e9", "#8b5cf6", "#ec4899", "#84cc16",
];

const TIME_WORDS: &[&str] = &["trend", "over time", "monthly", "daily", "yearly", "history", "timeline"];
const SHARE_WORDS: &[&str] = &["share", "percentage", "proportion", "distribution", "breakdown", "pie"];
const NUMERIC_SAMPLE: usize = 30;
const MAX_DATASETS: usize = 3;

/// Columns whose first non-null sampled values are all numeric.
fn numeric_columns(columns: &[String], rows: &[Map<String, Value>]) -> Vec<String> {
    columns
        .iter()
        .filter(|col| {
            let sample: Vec<&Value> = rows
                .iter()
                .take(NUMERIC_SAMPLE)
                .filter_map(|r| r.get(col.as_str()))
                .filter(|v| !v.is_null())
                .collect();
            !sample.is_empty() && sample.iter().all(|v| as_number(v).is_some())
        })
        .cloned()
        .collect()
}

fn chart_type(question: &str, numeric: &[String], has_text: bool, rows: usize) -> &'static str {
    let q = question.to_lowercase();
    if TIME_WORDS.iter().any(|w| q.contains(w)) {
        "line"
    } else if SHARE_WORDS.iter().any(|w| q.contains(w)) {
        "pie"
    } else if numeric.is_empty() {
        "bar"
    } else if rows <= 10 && has_text {
        "pie"
    } else {
        "bar"
    }
}

/// Chart.js-style configuration for a result set.
pub fn generate_chart_config(columns: &[String], rows: &[Map<String, Value>], question: &str) -> Value {
    if rows.is_empty() || columns.is_empty() {
        return json!({ "chart_type": "bar", "labels": [], "datasets": [] });
    }

    let numeric = numeric_columns(columns, rows);
    let text: Vec<&String> = columns.iter().filter(|c| !numeric.contains(c)).collect();
    let kind = chart_type(question, &numeric, !text.is_empty(), rows.len());

    let label_col = text.first().copied().unwrap_or(&columns[0]).clone();
    let labels: Vec<String> = rows
        .iter()
        .map(|r| r.get(&label_col).map(display).unwrap_or_default())
        .collect();

    let value_cols: Vec<String> = numeric.into_iter().take(MAX_DATASETS).collect();
    let mut datasets = Vec::new();
    for (i, col) in value_cols.iter().enumerate() {
        // a non-numeric cell past the sample drops the whole series
        let values: Option<Vec<f64>> = rows
            .iter()
            .map(|r| match r.get(col) {
                None | Some(Value::Null) => Some(0.0),
                Some(v) => as_number(v),
            })
            .collect();
        let Some(values) = values else { continue };

        let color = PALETTE[i % PALETTE.len()];
        let background = if kind == "pie" {
            json!((0..values.len()).map(|j| PALETTE[j % PALETTE.len()]).collect::<Vec<_>>())
        } else {
            json!(color)
        };
        datasets.push(json!({
            "label": col,
            "data": values,
            "backgroundColor": background,
            "borderColor": color,
            "borderWidth": if kind == "line" { 2 } else { 0 },
            "borderRadius": if kind == "bar" { 6 } else { 0 },
            "tension": 0.4,
            "fill": false,
        }));
    }

    json!({
        "chart_type": kind,
        "labels": labels,
        "datasets": datasets,
        "label_col": label_col,
        "value_cols": value_cols,
    })
}
