use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use page_gist::{
    api::create_router,
    config::Config,
    jobs::{store::spawn_sweeper, InMemoryJobStore, JobStore, Orchestrator, Pipeline, WorkerPool},
    llm::SummarizationClient,
    scraper::PageScraper,
    validator::UrlValidator,
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,page_gist=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::default());
    let validator = UrlValidator::default();

    let extractor = Arc::new(PageScraper::new(config.scrape)?);
    let summarizer = Arc::new(SummarizationClient::new(config.llm.clone())?);
    info!(
        health = %summarizer.health_url(),
        generate = %summarizer.generate_url(),
        "LLM API endpoints configured"
    );

    let (orchestrator, receiver) =
        Orchestrator::new(validator.clone(), store.clone(), config.jobs.queue_capacity);
    let pipeline = Arc::new(Pipeline::new(
        validator,
        extractor,
        summarizer,
        store.clone(),
        &config.llm.format,
    ));
    let pool = WorkerPool::spawn(receiver, config.jobs.workers, pipeline);
    info!(workers = config.jobs.workers, queue = config.jobs.queue_capacity, "worker pool started");

    let sweeper = spawn_sweeper(store, config.jobs.result_ttl);

    let app = create_router(AppState {
        orchestrator: Arc::new(orchestrator),
    });

    let listener = TcpListener::bind(config.server_addr).await?;
    info!("Listening on {}", config.server_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down worker pool");
    sweeper.abort();
    let cancelled = pool.shutdown().await;
    info!(cancelled, "Worker pool stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
