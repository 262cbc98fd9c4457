//! The SQL path: schema introspection, natural-language to SQL, read-only
//! execution and the analytics derived from a result set, plus CSV uploads
//! into new tables.

pub mod analyst;
pub mod chart;
pub mod generator;
pub mod guard;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod service;

pub use analyst::{parse_string_list, Analyst};
pub use chart::generate_chart_config;
pub use generator::{schema_to_text, SqlGenerator};
pub use guard::{ensure_read_only, strip_sql_fences};
pub use ingest::{parse_upload, IngestReport, UploadedTable};
pub use metrics::generate_metrics;
pub use pipeline::{SqlOutcome, SqlPipeline};
pub use service::{
    connection_url, writable_url, ColumnInfo, QueryRows, RelationalDataService, Schema, SqlxDataService, TableInfo,
};
