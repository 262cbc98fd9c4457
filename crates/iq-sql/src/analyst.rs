use iq_llm::ChatModel;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::service::Schema;

pub const NO_DATA_INSIGHT: &str = "No data was returned by this query.";
pub const INSIGHTS_RATE_LIMITED: &str =
    "API rate limit reached. Please wait a few moments before requesting more insights.";
pub const SUGGESTIONS_RATE_LIMITED: &str = "API rate limit reached. Suggestion generation skipped.";

const MAX_ITEMS: usize = 5;
const INSIGHT_SAMPLE_ROWS: usize = 15;
const SUGGESTION_SAMPLE_ROWS: usize = 5;

const INSIGHTS_SYSTEM: &str = "You are a data analyst. Analyze this query result and give 4 concise insights.\n\n\
Rules:\n\
- Each insight = 1-2 sentences max\n\
- Be specific with numbers\n\
- Focus on patterns, outliers, trends\n\
- Return ONLY a JSON array of strings like: [\"insight1\", \"insight2\", \"insight3\", \"insight4\"]\n\
- No markdown, no extra text, just the JSON array";

const SUGGESTIONS_SYSTEM: &str = "You are a database analytics assistant. A user queried their database.\n\n\
Generate 5 smart follow-up questions they might ask next.\n\
Rules:\n\
- Natural English questions\n\
- Relevant to the data they just saw\n\
- Mix of simple and complex queries\n\
- Return ONLY a JSON array: [\"q1?\", \"q2?\", \"q3?\", \"q4?\", \"q5?\"]\n\
- No markdown, just the JSON array";

/// Pulls a list of strings out of a model reply: the bracketed JSON array if
/// there is one, otherwise one item per non-empty line with list markers removed.
pub fn parse_string_list(text: &str) -> Vec<String> {
    let text = text.trim();
    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if start < end {
            if let Ok(items) = serde_json::from_str::<Vec<Value>>(&text[start..=end]) {
                return items
                    .into_iter()
                    .map(|v| match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .take(MAX_ITEMS)
                    .collect();
            }
        }
    }
    text.lines()
        .map(|l| l.trim().trim_start_matches(|c: char| "-•0123456789. ".contains(c)))
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .take(MAX_ITEMS)
        .collect()
}

fn sample_json(rows: &[Map<String, Value>], n: usize) -> String {
    serde_json::to_string(&rows[..rows.len().min(n)]).unwrap_or_else(|_| "[]".to_string())
}

/// LLM commentary on a result set: insights and follow-up questions.
pub struct Analyst {
    chat: Arc<dyn ChatModel>,
}

impl Analyst {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self { chat }
    }

    #[instrument(skip_all, fields(rows = rows.len()))]
    pub async fn insights(
        &self,
        question: &str,
        sql: &str,
        rows: &[Map<String, Value>],
        metrics: &Value,
    ) -> Vec<String> {
        if rows.is_empty() {
            return vec![NO_DATA_INSIGHT.to_string()];
        }

        let context = format!(
            "QUESTION: {question}\nSQL: {sql}\nTOTAL ROWS: {}\nSAMPLE DATA: {}\nSTATS: {}",
            metrics["kpis"]["total_rows"],
            sample_json(rows, INSIGHT_SAMPLE_ROWS),
            metrics["numeric_stats"],
        );
        match self.chat.chat(INSIGHTS_SYSTEM, &context, "JSON ARRAY:").await {
            Ok(text) => parse_string_list(&text),
            Err(e) if e.is_rate_limited() => vec![INSIGHTS_RATE_LIMITED.to_string()],
            Err(e) => {
                warn!(error = %e, "insight generation failed");
                vec![format!("Could not generate insights: {e}")]
            }
        }
    }

    #[instrument(skip_all, fields(rows = rows.len()))]
    pub async fn suggestions(&self, question: &str, schema: &Schema, rows: &[Map<String, Value>]) -> Vec<String> {
        let context = format!(
            "THEIR QUESTION: {question}\nAVAILABLE TABLES: {}\nSAMPLE RESULT: {}",
            schema.table_names().join(", "),
            sample_json(rows, SUGGESTION_SAMPLE_ROWS),
        );
        match self.chat.chat(SUGGESTIONS_SYSTEM, &context, "JSON ARRAY:").await {
            Ok(text) => parse_string_list(&text),
            Err(e) if e.is_rate_limited() => vec![SUGGESTIONS_RATE_LIMITED.to_string()],
            Err(e) => {
                warn!(error = %e, "suggestion generation failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use iq_error::{IqError, Result};

    struct Scripted(std::result::Result<&'static str, fn() -> IqError>);

    #[async_trait]
    impl ChatModel for Scripted {
        async fn chat(&self, _system: &str, _context: &str, _user: &str) -> Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.to_string()),
                Err(make) => Err(make()),
            }
        }
    }

    fn one_row() -> Vec<Map<String, Value>> {
        let mut m = Map::new();
        m.insert("total_sales".into(), Value::from(1250.0));
        vec![m]
    }

    #[test]
    fn json_array_is_extracted_from_chatter() {
        let items = parse_string_list("Sure! [\"Sales peaked in March.\", \"North leads.\"] Hope it helps");
        assert_eq!(items, vec!["Sales peaked in March.", "North leads."]);
    }

    #[test]
    fn lines_are_used_when_no_array_parses() {
        let items = parse_string_list("1. First point\n- Second point\n\n• Third");
        assert_eq!(items, vec!["First point", "Second point", "Third"]);
    }

    #[test]
    fn lists_are_capped_at_five() {
        let items = parse_string_list("[\"a\",\"b\",\"c\",\"d\",\"e\",\"f\"]");
        assert_eq!(items.len(), 5);
    }

    #[tokio::test]
    async fn empty_result_skips_the_model() {
        let analyst = Analyst::new(Arc::new(Scripted(Err(|| IqError::Internal {
            message: "must not be called".into(),
            details: None,
        }))));
        let insights = analyst.insights("q", "SELECT 1", &[], &Value::Null).await;
        assert_eq!(insights, vec![NO_DATA_INSIGHT]);
    }

    #[tokio::test]
    async fn failures_map_to_fixed_messages() {
        let limited = Analyst::new(Arc::new(Scripted(Err(|| IqError::RateLimited {
            provider: "mock".into(),
            message: "429".into(),
        }))));
        let metrics = serde_json::json!({"kpis": {"total_rows": 1}, "numeric_stats": {}});
        assert_eq!(
            limited.insights("q", "SELECT 1", &one_row(), &metrics).await,
            vec![INSIGHTS_RATE_LIMITED]
        );
        assert_eq!(
            limited.suggestions("q", &Schema::default(), &one_row()).await,
            vec![SUGGESTIONS_RATE_LIMITED]
        );

        let broken = Analyst::new(Arc::new(Scripted(Err(|| IqError::Configuration {
            key: "GEMINI_API_KEY".into(),
            reason: "API credential is not set".into(),
        }))));
        assert!(broken.suggestions("q", &Schema::default(), &one_row()).await.is_empty());
        let insights = broken.insights("q", "SELECT 1", &one_row(), &metrics).await;
        assert!(insights[0].starts_with("Could not generate insights"));
    }
}
