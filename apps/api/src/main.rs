mod config;
mod documents;
mod embeddings;
mod errors;
mod extract;
mod jobs;
mod llm_client;
mod pipeline;
mod queue;
mod retrieval;
mod routes;
mod state;
mod store;
mod worker;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::documents::FsDocumentStore;
use crate::embeddings::OpenAiEmbedder;
use crate::extract::PdfTextExtractor;
use crate::llm_client::OpenAiClient;
use crate::pipeline::Orchestrator;
use crate::queue::{JobQueue, RedisJobQueue};
use crate::retrieval::QdrantRetriever;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{JobStore, RedisJobStore};
use crate::worker::WorkerContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CV Evaluator API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Redis-backed store and queue
    let redis = redis::Client::open(config.redis_url.clone())?;
    let store: Arc<dyn JobStore> = Arc::new(RedisJobStore::connect(&redis).await?);
    let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::connect(&redis).await?);
    info!("Redis store and queue initialized");

    // Initialize upload store
    let documents = Arc::new(FsDocumentStore::new(&config.upload_dir));
    documents.ensure_dir().await?;
    info!("Upload directory ready at {}", config.upload_dir);

    // Initialize collaborators
    let llm = Arc::new(OpenAiClient::new(
        config.openai_api_base.clone(),
        config.openai_api_key.clone(),
    ));
    info!("LLM client initialized (model: {})", llm_client::MODEL);
    let embedder = Arc::new(OpenAiEmbedder::new(
        config.openai_api_base.clone(),
        config.openai_api_key.clone(),
    ));
    let retriever = Arc::new(QdrantRetriever::new(
        config.qdrant_url.clone(),
        config.qdrant_api_key.clone(),
    ));

    // Build the orchestrator shared by all worker tasks
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        documents.clone(),
        Arc::new(PdfTextExtractor),
        embedder,
        retriever,
        llm,
        config.qdrant_collection.clone(),
    ));

    // Spawn queue consumers and the stall reaper
    let worker_ctx = Arc::new(WorkerContext {
        store: store.clone(),
        queue: queue.clone(),
        orchestrator,
        lease_duration: config.lease_duration,
        stall_scan_interval: config.stall_scan_interval,
        max_stalls: config.max_stalls,
    });
    for worker_id in 0..config.worker_count {
        tokio::spawn(worker::run_worker(worker_id, worker_ctx.clone()));
    }
    tokio::spawn(worker::run_stall_reaper(worker_ctx.clone()));
    info!("{} workers started", config.worker_count);

    // Build app state and router
    let state = AppState {
        config: config.clone(),
        store,
        queue,
        documents,
    };
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
