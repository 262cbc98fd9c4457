use iq_core::DbType;
use iq_error::{IqError, Result};
use iq_llm::ChatModel;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::guard::strip_sql_fences;
use crate::service::Schema;

const MAX_ATTEMPTS: u32 = 3;

/// One line per table: `Table "t" (N rows): ["col" type, ...]`.
pub fn schema_to_text(schema: &Schema, db_type: DbType) -> String {
    let q = if db_type == DbType::Mysql { '`' } else { '"' };
    schema
        .tables
        .iter()
        .map(|t| {
            let cols = t
                .columns
                .iter()
                .map(|c| format!("{q}{}{q} {}", c.name, c.data_type))
                .collect::<Vec<_>>()
                .join(", ");
            format!("  Table {q}{}{q} ({} rows): [{cols}]", t.name, t.row_count)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn system_prompt(dialect: &str) -> String {
    format!(
        "You are an expert {dialect} SQL query generator.\n\n\
         STRICT RULES:\n\
         1. Return ONLY the raw SQL query. Do NOT wrap it in ```sql ... ``` or any other markdown fence.\n\
         2. Use valid {dialect} syntax only.\n\
         3. For MySQL, enclose table and column names in backticks (e.g., `my_table_name`).\n\
         4. For PostgreSQL and SQLite, enclose table and column names in double quotes. Use the actual table names.\n\
         5. You MUST ONLY use the tables and columns provided in the DATABASE SCHEMA. Do not invent table names.\n\
         6. Always use meaningful column aliases (e.g. COUNT(*) AS total_count).\n\
         7. Handle NULLs with COALESCE where appropriate.\n\
         8. Use proper JOINs when multiple tables are needed.\n\
         9. Only write read-only queries (SELECT or WITH).\n\
         10. Cast DATE, TIMESTAMP and DECIMAL results to text or floating point so they can be returned as JSON."
    )
}

/// Natural-language to SQL translation through the Generation Service.
pub struct SqlGenerator {
    chat: Arc<dyn ChatModel>,
    retry_base: Duration,
}

impl SqlGenerator {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self {
            chat,
            retry_base: Duration::from_secs(2),
        }
    }

    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    /// Rate-limited calls are retried with exponential backoff; other errors propagate.
    #[instrument(skip(self, schema), fields(tables = schema.tables.len()))]
    pub async fn generate(&self, question: &str, schema: &Schema, db_type: DbType) -> Result<String> {
        if schema.is_empty() {
            return Err(IqError::InvalidRequest {
                reason: "Database schema is empty. Please ensure tables exist in the database before querying."
                    .to_string(),
            });
        }

        let system = system_prompt(db_type.dialect());
        let context = format!("DATABASE SCHEMA:\n{}", schema_to_text(schema, db_type));
        let user = format!("USER QUESTION: {question}\n\nSQL QUERY (raw only):");

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.chat.chat(&system, &context, &user).await {
                Ok(raw) => return Ok(strip_sql_fences(&raw)),
                Err(e) if e.is_rate_limited() && attempt < MAX_ATTEMPTS => {
                    let delay = self.retry_base * 2u32.pow(attempt - 1);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "SQL generation rate limited, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
