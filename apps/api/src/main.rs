mod config;
mod routes;

use dotenv::dotenv;
use iq_llm::{ChatModel, LazyChatModel};
use iq_rag::{Embedder, LocalExtractor, RagEngine, RetrievalEngine, VectorStore};
use iq_router::{ChatResponder, QueryRouter};
use iq_sql::{SqlPipeline, SqlxDataService};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{load_config, AppConfig};
use crate::routes::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();
    let cfg: AppConfig = load_config()?;

    let state = build_state(&cfg).await;
    let app = build_router(state, cfg.server.max_upload_mb * 1024 * 1024);

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    info!(%addr, "iq-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Composition root. The chat client resolves its credential on first use and
/// the retrieval engine defers a failed store load, so this never fails.
async fn build_state(cfg: &AppConfig) -> AppState {
    let chat: Arc<dyn ChatModel> = Arc::new(LazyChatModel::new(cfg.chat.clone()));

    let engine = RetrievalEngine::new(
        Arc::new(VectorStore::new(cfg.store.dir.clone())),
        Arc::new(Embedder::new(cfg.embedding.clone())),
        chat.clone(),
        LocalExtractor::shared(cfg.extractor.clone()),
        cfg.retrieval.clone(),
    );
    engine.startup().await;
    let rag: Arc<dyn RagEngine> = Arc::new(engine);

    let data = Arc::new(SqlxDataService::new(Duration::from_secs(
        cfg.database.connect_timeout_secs,
    )));
    let sql = Arc::new(SqlPipeline::new(data, chat.clone()));

    let router = QueryRouter::new(
        ChatResponder::new(chat),
        rag.clone(),
        sql.clone(),
        cfg.router.clone(),
    );

    AppState {
        router: Arc::new(router),
        rag,
        sql,
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}
