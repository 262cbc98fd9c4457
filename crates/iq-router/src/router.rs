use iq_core::{DbConfig, Mode, QueryRequest, UnifiedResponse};
use iq_error::{IqError, Result};
use iq_rag::RagEngine;
use iq_sql::{SqlOutcome, SqlPipeline};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::chat::ChatResponder;
use crate::intent::{classify, Intent};

pub const HYBRID_INCOMPLETE: &str = "Hybrid query could not be fully completed.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Upper bound on one whole request; `None` disables it.
    pub request_timeout_secs: Option<u64>,
    /// Rows returned in `data`; `total_rows` always reports the full count.
    pub max_rows: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: None,
            max_rows: 500,
        }
    }
}

/// What one routed request produced, before flattening to the wire shape.
#[derive(Debug, Clone)]
pub enum RoutedResponse {
    Chat {
        answer: String,
    },
    Rag {
        answer: String,
        sources: Vec<String>,
    },
    Sql {
        answer: String,
        outcome: SqlOutcome,
    },
    Hybrid {
        answer: String,
        outcome: Option<SqlOutcome>,
    },
}

impl RoutedResponse {
    pub fn mode(&self) -> Mode {
        match self {
            RoutedResponse::Chat { .. } => Mode::Chat,
            RoutedResponse::Rag { .. } => Mode::Rag,
            RoutedResponse::Sql { .. } => Mode::Sql,
            RoutedResponse::Hybrid { .. } => Mode::Hybrid,
        }
    }

    /// Flattens into the all-fields wire response, keeping at most `max_rows` rows.
    pub fn into_unified(self, max_rows: usize) -> UnifiedResponse {
        let mut resp = UnifiedResponse::empty(self.mode());
        match self {
            RoutedResponse::Chat { answer } => resp.answer = answer,
            RoutedResponse::Rag { answer, sources } => {
                resp.answer = answer;
                if !sources.is_empty() {
                    resp.insights = Some(sources.iter().map(|s| format!("Source: {s}")).collect());
                }
            }
            RoutedResponse::Sql { answer, outcome } => {
                resp.answer = answer;
                fill_sql(&mut resp, outcome, max_rows);
            }
            RoutedResponse::Hybrid { answer, outcome } => {
                resp.answer = answer;
                if let Some(outcome) = outcome {
                    fill_sql(&mut resp, outcome, max_rows);
                }
            }
        }
        resp
    }
}

fn fill_sql(resp: &mut UnifiedResponse, outcome: SqlOutcome, max_rows: usize) {
    let total = outcome.rows.len();
    let mut rows = outcome.rows;
    rows.truncate(max_rows);
    resp.sql_query = Some(outcome.sql);
    resp.columns = Some(outcome.columns);
    resp.data = Some(rows);
    resp.total_rows = Some(total);
    resp.metrics = Some(outcome.metrics);
    resp.chart_config = Some(outcome.chart);
    resp.insights = Some(outcome.insights);
    resp.suggestions = Some(outcome.suggestions);
}

/// Classifies each question and dispatches it to chat, SQL, documents or both.
pub struct QueryRouter {
    responder: ChatResponder,
    rag: Arc<dyn RagEngine>,
    sql: Arc<SqlPipeline>,
    config: RouterConfig,
}

impl QueryRouter {
    pub fn new(
        responder: ChatResponder,
        rag: Arc<dyn RagEngine>,
        sql: Arc<SqlPipeline>,
        config: RouterConfig,
    ) -> Self {
        Self {
            responder,
            rag,
            sql,
            config,
        }
    }

    /// Routes one request and flattens the result. SQL-only failures are the
    /// only errors returned; document and hybrid failures are answered in-band.
    pub async fn route(&self, req: &QueryRequest) -> Result<UnifiedResponse> {
        let routed = match self.config.request_timeout_secs {
            Some(secs) => {
                let limit = Duration::from_secs(secs);
                tokio::time::timeout(limit, self.dispatch(req))
                    .await
                    .map_err(|_| IqError::Timeout {
                        operation: "route".to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    })??
            }
            None => self.dispatch(req).await?,
        };
        Ok(routed.into_unified(self.config.max_rows))
    }

    #[instrument(skip(self, req), fields(question_len = req.question.len()))]
    pub async fn dispatch(&self, req: &QueryRequest) -> Result<RoutedResponse> {
        let intent = classify(&req.question);
        let preview: String = req.question.chars().take(80).collect();
        info!(%intent, question = %preview, "routing question");

        let routed = match intent {
            Intent::Greeting => RoutedResponse::Chat {
                answer: self.responder.greet(&req.question).await,
            },
            Intent::GeneralChat => RoutedResponse::Chat {
                answer: self.responder.respond(&req.question).await,
            },
            Intent::DocumentQuery => self.document(&req.question).await,
            Intent::DatabaseQuery | Intent::AnalyticsQuery => {
                self.sql_only(&req.question, &req.db_config, req.sql_override.as_deref())
                    .await?
            }
            Intent::HybridQuery => {
                self.hybrid(&req.question, &req.db_config, req.sql_override.as_deref())
                    .await
            }
        };
        Ok(routed)
    }

    async fn document(&self, question: &str) -> RoutedResponse {
        match self.rag.answer_question(question).await {
            Ok(rag) => RoutedResponse::Rag {
                answer: rag.answer,
                sources: rag.sources,
            },
            Err(e) => {
                error!(error = %e, "document query failed");
                RoutedResponse::Rag {
                    answer: format!("Document query failed: {e}"),
                    sources: Vec::new(),
                }
            }
        }
    }

    async fn sql_only(&self, question: &str, db: &DbConfig, sql_override: Option<&str>) -> Result<RoutedResponse> {
        let outcome = self.sql.run(question, db, sql_override).await.map_err(|e| {
            e.log("router", "sql_pipeline");
            e
        })?;
        let answer = outcome.insights.first().cloned().unwrap_or_else(|| {
            format!("Query executed successfully. {} rows returned.", outcome.total_rows())
        });
        Ok(RoutedResponse::Sql { answer, outcome })
    }

    async fn hybrid(&self, question: &str, db: &DbConfig, sql_override: Option<&str>) -> RoutedResponse {
        let (outcome, summary) = match self.sql.run(question, db, sql_override).await {
            Ok(outcome) => {
                let summary = outcome.summary();
                (Some(outcome), summary)
            }
            Err(e) => {
                warn!(error = %e, "hybrid SQL step failed");
                (None, format!("SQL failed: {e}"))
            }
        };

        let answer = match self.rag.answer_hybrid(question, &summary).await {
            Ok(merged) => merged,
            Err(e) => {
                error!(error = %e, "hybrid document step failed");
                outcome
                    .as_ref()
                    .and_then(|o| o.insights.first().cloned())
                    .unwrap_or_else(|| HYBRID_INCOMPLETE.to_string())
            }
        };
        RoutedResponse::Hybrid { answer, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use iq_core::{DbType, DeleteReport, IndexReport, RagAnswer, StoreStats, StoreStatus};
    use iq_llm::ChatModel;
    use iq_sql::{ColumnInfo, QueryRows, RelationalDataService, Schema, TableInfo};
    use serde_json::{Map, Value};

    /// Answers every prompt kind with something recognisable.
    struct ScriptedChat;

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn chat(&self, system: &str, _context: &str, _user: &str) -> Result<String> {
            if system.contains("SQL query generator") {
                Ok("SELECT region, amount FROM sales".into())
            } else if system.contains("follow-up questions") {
                Ok("[\"Which region grew fastest?\"]".into())
            } else if system.contains("data analyst") {
                Ok("[\"North leads with 120.\", \"South trails.\"]".into())
            } else {
                Ok("Hi! I can query databases and read documents.".into())
            }
        }
    }

    struct Data {
        fail: bool,
        rows: usize,
    }

    #[async_trait]
    impl RelationalDataService for Data {
        async fn describe(&self, _cfg: &DbConfig) -> Result<Schema> {
            Ok(Schema {
                tables: vec![TableInfo {
                    name: "sales".into(),
                    columns: vec![ColumnInfo {
                        name: "amount".into(),
                        data_type: "real".into(),
                        nullable: false,
                    }],
                    row_count: self.rows as i64,
                }],
            })
        }

        async fn execute(&self, _cfg: &DbConfig, _sql: &str) -> Result<QueryRows> {
            if self.fail {
                return Err(IqError::Database {
                    message: "connection refused".into(),
                });
            }
            let rows = (0..self.rows)
                .map(|i| {
                    let mut m = Map::new();
                    m.insert("region".into(), Value::from(format!("r{i}")));
                    m.insert("amount".into(), Value::from(i as f64));
                    m
                })
                .collect();
            Ok(QueryRows {
                columns: vec!["region".into(), "amount".into()],
                rows,
            })
        }
    }

    #[derive(Default)]
    struct Docs {
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl RagEngine for Docs {
        async fn index_document(&self, filename: &str, _bytes: &[u8]) -> Result<IndexReport> {
            Ok(IndexReport {
                filename: filename.into(),
                chunks_added: 1,
                total_in_store: 1,
            })
        }

        async fn answer_question(&self, _question: &str) -> Result<RagAnswer> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if self.fail {
                return Err(IqError::store("search", "index unavailable"));
            }
            Ok(RagAnswer {
                answer: "Revenue grew 20% in Q1.".into(),
                sources: vec!["q1.pdf".into()],
                chunks_used: 1,
            })
        }

        async fn answer_hybrid(&self, _question: &str, sql_summary: &str) -> Result<String> {
            if self.fail {
                return Err(IqError::store("search", "index unavailable"));
            }
            Ok(format!("merged: {sql_summary}"))
        }

        async fn delete_document(&self, filename: &str) -> Result<DeleteReport> {
            Ok(DeleteReport {
                filename: filename.into(),
                chunks_removed: 0,
                total_in_store: 0,
            })
        }

        async fn stats(&self) -> Result<StoreStats> {
            Ok(StoreStats {
                status: StoreStatus::Ready,
                total_chunks: 0,
                documents: vec![],
            })
        }
    }

    fn router(data: Data, docs: Docs, config: RouterConfig) -> QueryRouter {
        let chat: Arc<dyn ChatModel> = Arc::new(ScriptedChat);
        QueryRouter::new(
            ChatResponder::new(chat.clone()),
            Arc::new(docs),
            Arc::new(SqlPipeline::new(Arc::new(data), chat)),
            config,
        )
    }

    fn request(question: &str) -> QueryRequest {
        QueryRequest {
            db_config: DbConfig {
                db_type: DbType::Sqlite,
                host: String::new(),
                port: 0,
                username: String::new(),
                password: String::new(),
                database: "shop".into(),
            },
            question: question.into(),
            sql_override: None,
        }
    }

    const HYBRID_Q: &str = "Compare the revenue in the report with our sales table";

    #[tokio::test]
    async fn hybrid_survives_a_failing_database() {
        let r = router(Data { fail: true, rows: 0 }, Docs::default(), RouterConfig::default());
        let resp = r.route(&request(HYBRID_Q)).await.unwrap();

        assert_eq!(resp.mode, Mode::Hybrid);
        assert!(resp.answer.starts_with("merged: SQL failed:"));
        assert!(resp.answer.contains("connection refused"));
        assert!(resp.sql_query.is_none());
        assert!(resp.data.is_none());
    }

    #[tokio::test]
    async fn hybrid_merges_sql_summary_into_document_answer() {
        let r = router(Data { fail: false, rows: 3 }, Docs::default(), RouterConfig::default());
        let resp = r.route(&request(HYBRID_Q)).await.unwrap();

        assert_eq!(resp.mode, Mode::Hybrid);
        assert!(resp.answer.starts_with("merged: SQL Query: SELECT region, amount FROM sales"));
        assert_eq!(resp.total_rows, Some(3));
        assert_eq!(resp.insights.as_ref().unwrap()[0], "North leads with 120.");
    }

    #[tokio::test]
    async fn hybrid_falls_back_when_both_sides_fail() {
        let docs = Docs {
            fail: true,
            ..Docs::default()
        };
        let r = router(Data { fail: true, rows: 0 }, docs, RouterConfig::default());
        let resp = r.route(&request(HYBRID_Q)).await.unwrap();
        assert_eq!(resp.answer, HYBRID_INCOMPLETE);

        let docs = Docs {
            fail: true,
            ..Docs::default()
        };
        let r = router(Data { fail: false, rows: 2 }, docs, RouterConfig::default());
        let resp = r.route(&request(HYBRID_Q)).await.unwrap();
        assert_eq!(resp.answer, "North leads with 120.");
    }

    #[tokio::test]
    async fn sql_failures_propagate() {
        let r = router(Data { fail: true, rows: 0 }, Docs::default(), RouterConfig::default());
        let err = r.route(&request("show me total sales")).await.unwrap_err();
        assert!(matches!(err, IqError::Database { .. }));
    }

    #[tokio::test]
    async fn sql_answer_is_first_insight_and_data_is_capped() {
        let r = router(Data { fail: false, rows: 600 }, Docs::default(), RouterConfig::default());
        let resp = r.route(&request("show me total sales")).await.unwrap();

        assert_eq!(resp.mode, Mode::Sql);
        assert_eq!(resp.answer, "North leads with 120.");
        assert_eq!(resp.sql_query.as_deref(), Some("SELECT region, amount FROM sales"));
        assert_eq!(resp.data.as_ref().unwrap().len(), 500);
        assert_eq!(resp.total_rows, Some(600));
        assert_eq!(resp.suggestions.as_ref().unwrap()[0], "Which region grew fastest?");
        assert!(resp.chart_config.is_some());
    }

    #[tokio::test]
    async fn empty_result_answers_with_row_count() {
        let r = router(Data { fail: false, rows: 0 }, Docs::default(), RouterConfig::default());
        let resp = r.route(&request("show me total sales")).await.unwrap();
        // the analyst reports "no data" rather than leaving insights empty
        assert_eq!(resp.answer, iq_sql::analyst::NO_DATA_INSIGHT);
        assert_eq!(resp.total_rows, Some(0));
    }

    #[tokio::test]
    async fn document_answers_list_sources_as_insights() {
        let r = router(Data { fail: false, rows: 0 }, Docs::default(), RouterConfig::default());
        let resp = r
            .route(&request("What does the contract say about renewal?"))
            .await
            .unwrap();
        assert_eq!(resp.mode, Mode::Rag);
        assert_eq!(resp.answer, "Revenue grew 20% in Q1.");
        assert_eq!(resp.insights, Some(vec!["Source: q1.pdf".to_string()]));
        assert!(resp.sql_query.is_none());
    }

    #[tokio::test]
    async fn document_failures_degrade_in_band() {
        let docs = Docs {
            fail: true,
            ..Docs::default()
        };
        let r = router(Data { fail: false, rows: 0 }, docs, RouterConfig::default());
        let resp = r
            .route(&request("What does the contract say about renewal?"))
            .await
            .unwrap();
        assert_eq!(resp.mode, Mode::Rag);
        assert!(resp.answer.starts_with("Document query failed:"));
        assert!(resp.insights.is_none());
    }

    #[tokio::test]
    async fn greetings_only_fill_the_answer() {
        let r = router(Data { fail: true, rows: 0 }, Docs::default(), RouterConfig::default());
        let resp = r.route(&request("hello")).await.unwrap();
        assert_eq!(resp.mode, Mode::Chat);
        assert!(!resp.answer.is_empty());
        assert_eq!(
            resp,
            UnifiedResponse {
                answer: resp.answer.clone(),
                ..UnifiedResponse::empty(Mode::Chat)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_requests_time_out() {
        let docs = Docs {
            delay: Some(Duration::from_secs(30)),
            ..Docs::default()
        };
        let config = RouterConfig {
            request_timeout_secs: Some(1),
            ..RouterConfig::default()
        };
        let r = router(Data { fail: false, rows: 0 }, docs, config);
        let err = r
            .route(&request("What does the contract say about renewal?"))
            .await
            .unwrap_err();
        assert!(matches!(err, IqError::Timeout { .. }));
    }
}
