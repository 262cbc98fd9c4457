use iq_core::DbConfig;
use iq_error::Result;
use iq_llm::ChatModel;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::analyst::Analyst;
use crate::chart::generate_chart_config;
use crate::generator::SqlGenerator;
use crate::ingest::{parse_upload, IngestReport};
use crate::metrics::generate_metrics;
use crate::service::{RelationalDataService, Schema};

/// Everything the SQL path produced for one question.
#[derive(Debug, Clone)]
pub struct SqlOutcome {
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub metrics: Value,
    pub chart: Value,
    pub insights: Vec<String>,
    pub suggestions: Vec<String>,
}

impl SqlOutcome {
    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    /// Plain-text digest handed to the hybrid merge; never contains raw rows.
    pub fn summary(&self) -> String {
        let kpis = &self.metrics["kpis"];
        let rows = kpis["total_rows"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(self.rows.len());
        let top = if self.insights.is_empty() {
            "none".to_string()
        } else {
            self.insights.iter().take(2).cloned().collect::<Vec<_>>().join("; ")
        };
        format!(
            "SQL Query: {}\nRows returned: {}\nKey metrics: {}\nTop insights: {}",
            self.sql, rows, kpis, top
        )
    }
}

/// schema → SQL → rows → metrics, chart, insights and suggestions.
pub struct SqlPipeline {
    data: Arc<dyn RelationalDataService>,
    generator: SqlGenerator,
    analyst: Analyst,
}

impl SqlPipeline {
    pub fn new(data: Arc<dyn RelationalDataService>, chat: Arc<dyn ChatModel>) -> Self {
        Self {
            data,
            generator: SqlGenerator::new(chat.clone()),
            analyst: Analyst::new(chat),
        }
    }

    pub async fn describe(&self, db: &DbConfig) -> Result<Schema> {
        self.data.describe(db).await
    }

    /// Loads an uploaded CSV file into `upload_<stem>`, replacing any previous table.
    #[instrument(skip(self, db, bytes), fields(db_type = db.db_type.as_str(), bytes = bytes.len()))]
    pub async fn ingest_upload(&self, db: &DbConfig, filename: &str, bytes: &[u8]) -> Result<IngestReport> {
        let table = parse_upload(filename, bytes)?;
        let rows = self.data.load_table(db, &table).await?;
        info!(table = %table.name, rows, "structured upload ingested");
        Ok(IngestReport {
            table: table.name,
            rows,
        })
    }

    #[instrument(skip(self, db, sql_override), fields(db_type = db.db_type.as_str(), has_override = sql_override.is_some()))]
    pub async fn run(&self, question: &str, db: &DbConfig, sql_override: Option<&str>) -> Result<SqlOutcome> {
        let schema = self.data.describe(db).await?;
        let sql = match sql_override.map(str::trim).filter(|s| !s.is_empty()) {
            Some(sql) => sql.to_string(),
            None => self.generator.generate(question, &schema, db.db_type).await?,
        };

        let result = self.data.execute(db, &sql).await?;
        let metrics = generate_metrics(&result.columns, &result.rows);
        let chart = generate_chart_config(&result.columns, &result.rows, question);
        let (insights, suggestions) = tokio::join!(
            self.analyst.insights(question, &sql, &result.rows, &metrics),
            self.analyst.suggestions(question, &schema, &result.rows),
        );

        info!(rows = result.rows.len(), insights = insights.len(), "SQL pipeline finished");
        Ok(SqlOutcome {
            sql,
            columns: result.columns,
            rows: result.rows,
            metrics,
            chart,
            insights,
            suggestions,
        })
    }
}
