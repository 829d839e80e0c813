use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use rag_gateway::config::Settings;
use rag_gateway::gateway::{ChatCompletionsBackend, GenerationGateway, ModelConfig, RetryPolicy};
use rag_gateway::rag::{self, Retriever};
use rag_gateway::server::{router, AppState};
use rag_gateway::service::{RagService, ServiceDefaults};

#[derive(Parser, Debug)]
#[command(name = "rag-gateway")]
#[command(about = "Retrieval-augmented prompt service")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, env = "RAG_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;
    rag_gateway::logging::init();

    // Credentials are resolved once here and handed to the components.
    let secrets = settings.secret_provider();
    let llm_key = secrets.get(&settings.llm.api_key_secret)?;
    if llm_key.is_none() {
        tracing::warn!(
            "Secret {} not found; generation requests will fail with AuthError",
            settings.llm.api_key_secret
        );
    }

    let embedder = rag::build_embedder(&settings, secrets.as_ref())?;
    let store = rag::build_store(&settings, secrets.as_ref()).await?;
    let retriever = Retriever::new(embedder, store, settings.timeouts.embed(), settings.timeouts.store());

    tracing::info!("Using generation backend: {}", settings.llm.base_url);
    let backend = ChatCompletionsBackend::new(settings.llm.base_url.clone(), llm_key, settings.timeouts.generation())?;
    let gateway = GenerationGateway::new(
        Arc::new(backend),
        RetryPolicy::from_settings(&settings.llm),
        settings.timeouts.generation(),
    );

    let defaults = ServiceDefaults {
        top_k: settings.retrieval.top_k,
        max_top_k: settings.retrieval.max_top_k,
        model: ModelConfig::from_settings(&settings.llm),
        request_timeout: settings.timeouts.request(),
    };
    let state = Arc::new(AppState {
        service: RagService::new(retriever, gateway, defaults),
    });

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&settings.server.bind).await?;
    tracing::info!("rag-gateway listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
