use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use iq_core::{DbConfig, DeleteReport, IndexReport, QueryRequest, StoreStats, UnifiedResponse};
use iq_error::IqError;
use iq_rag::RagEngine;
use iq_router::QueryRouter;
use iq_sql::SqlPipeline;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<QueryRouter>,
    pub rag: Arc<dyn RagEngine>,
    pub sql: Arc<SqlPipeline>,
}

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/query", post(query))
        .route("/api/documents", post(upload_document))
        .route("/api/documents/:filename", delete(delete_document))
        .route("/api/rag/stats", get(rag_stats))
        .route("/api/upload", post(upload_table))
        .route("/api/connect", post(connect))
        .route("/api/schema", post(schema))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<UnifiedResponse>, IqError> {
    if req.question.trim().is_empty() {
        return Err(IqError::InvalidRequest {
            reason: "question must not be empty".to_string(),
        });
    }
    let resp = state
        .router
        .route(&req)
        .await
        .inspect_err(|e| e.log("api", "query"))?;
    Ok(Json(resp))
}

async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IndexReport>, IqError> {
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field_filename(&field)?;
        let bytes = field.bytes().await.map_err(bad_multipart)?;
        info!(%filename, bytes = bytes.len(), "document upload");
        let report = state
            .rag
            .index_document(&filename, &bytes)
            .await
            .inspect_err(|e| e.log("api", "upload_document"))?;
        return Ok(Json(report));
    }
    Err(IqError::InvalidRequest {
        reason: "multipart field 'file' is required".to_string(),
    })
}

/// Multipart `file` (CSV) plus `db_config` (JSON) into a new SQL table.
async fn upload_table(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, IqError> {
    let mut db: Option<DbConfig> = None;
    let mut file: Option<(String, axum::body::Bytes)> = None;
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        match field.name() {
            Some("db_config") => {
                let text = field.text().await.map_err(bad_multipart)?;
                let parsed = serde_json::from_str(&text).map_err(|e| IqError::InvalidRequest {
                    reason: format!("db_config is not valid JSON: {e}"),
                })?;
                db = Some(parsed);
            }
            Some("file") => {
                let filename = field_filename(&field)?;
                file = Some((filename, field.bytes().await.map_err(bad_multipart)?));
            }
            _ => continue,
        }
    }
    let (Some(db), Some((filename, bytes))) = (db, file) else {
        return Err(IqError::InvalidRequest {
            reason: "multipart fields 'file' and 'db_config' are required".to_string(),
        });
    };

    info!(%filename, bytes = bytes.len(), database = %db.database, "table upload");
    let report = state
        .sql
        .ingest_upload(&db, &filename, &bytes)
        .await
        .inspect_err(|e| e.log("api", "upload_table"))?;
    Ok(Json(json!({
        "status": "success",
        "type": "structured",
        "table": report.table,
        "rows": report.rows,
    })))
}

fn field_filename(field: &axum::extract::multipart::Field<'_>) -> Result<String, IqError> {
    field
        .file_name()
        .and_then(|n| std::path::Path::new(n).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| IqError::InvalidRequest {
            reason: "uploaded file has no name".to_string(),
        })
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> IqError {
    IqError::InvalidRequest {
        reason: format!("malformed multipart body: {e}"),
    }
}

async fn delete_document(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<DeleteReport>, IqError> {
    let report = state.rag.delete_document(&filename).await?;
    Ok(Json(report))
}

async fn rag_stats(State(state): State<AppState>) -> Result<Json<StoreStats>, IqError> {
    Ok(Json(state.rag.stats().await?))
}

async fn connect(
    State(state): State<AppState>,
    Json(db): Json<DbConfig>,
) -> Result<Json<serde_json::Value>, IqError> {
    let schema = state
        .sql
        .describe(&db)
        .await
        .inspect_err(|e| e.log("api", "connect"))?;
    info!(database = %db.database, tables = schema.tables.len(), "database connected");
    Ok(Json(json!({
        "status": "connected",
        "database": db.database,
        "db_type": db.db_type,
        "schema": schema.to_json(),
        "table_count": schema.tables.len(),
    })))
}

async fn schema(
    State(state): State<AppState>,
    Json(db): Json<DbConfig>,
) -> Result<Json<serde_json::Value>, IqError> {
    let schema = state
        .sql
        .describe(&db)
        .await
        .inspect_err(|e| e.log("api", "schema"))?;
    Ok(Json(json!({ "schema": schema.to_json() })))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
