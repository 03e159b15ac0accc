use infra_analysis_orchestrator::{
    agent::Orchestrator,
    api::start_server,
    clock::SystemClock,
    config::OrchestratorConfig,
    datastore::{DataStore, InMemoryDataStore, PgDataStore},
    llm::{gemini::GeminiProvider, LlmProvider},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Loads .env as well
    let config = OrchestratorConfig::from_env()?;

    info!("Infrastructure Analysis Orchestrator - API Server");
    info!("Port: {}", config.port);

    let data_store: Arc<dyn DataStore> = match &config.database_url {
        Some(url) => Arc::new(
            PgDataStore::connect_lazy(url)?.with_max_attempts(config.database_max_attempts),
        ),
        None => {
            warn!("DATABASE_URL not set, serving the in-memory demo dataset");
            Arc::new(InMemoryDataStore::sample(Utc::now()))
        }
    };

    let provider = match &config.gemini_api_key {
        Some(key) => {
            let mut gemini = GeminiProvider::new(key.clone(), config.gemini_model.clone())?;
            if let Some(base_url) = &config.gemini_base_url {
                gemini = gemini.with_base_url(base_url.clone());
            }
            Some(Arc::new(gemini) as Arc<dyn LlmProvider>)
        }
        None => {
            warn!("GEMINI_API_KEY not set, answers use the template formatter");
            None
        }
    };

    let orchestrator = Arc::new(Orchestrator::from_config(
        &config,
        data_store,
        provider,
        Arc::new(SystemClock),
    )?);

    info!("Orchestrator initialized, starting API server");

    start_server(orchestrator, config.port).await?;

    Ok(())
}
