use infra_analysis_orchestrator::{
    agent::Orchestrator,
    clock::SystemClock,
    config::OrchestratorConfig,
    datastore::InMemoryDataStore,
    llm::{gemini::GeminiProvider, LlmProvider},
    models::AccountScope,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_QUERY: &str = "What are our biggest cost drivers and is anything sitting idle?";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = OrchestratorConfig::from_env()?;

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let query = if query.trim().is_empty() {
        DEFAULT_QUERY.to_string()
    } else {
        query
    };

    info!(strategy = %config.planner_strategy, "Infrastructure Analysis Orchestrator starting");

    let provider = match &config.gemini_api_key {
        Some(key) => {
            let mut gemini = GeminiProvider::new(key.clone(), config.gemini_model.clone())?;
            if let Some(base_url) = &config.gemini_base_url {
                gemini = gemini.with_base_url(base_url.clone());
            }
            Some(Arc::new(gemini) as Arc<dyn LlmProvider>)
        }
        None => None,
    };

    let orchestrator = Orchestrator::from_config(
        &config,
        Arc::new(InMemoryDataStore::sample(Utc::now())),
        provider,
        Arc::new(SystemClock),
    )?;

    info!(query = %query, "Running one-shot analysis against the demo dataset");

    match orchestrator
        .process_turn("cli", &query, Some(AccountScope::All))
        .await
    {
        Ok(result) => {
            println!("\n=== ANALYSIS RESULT ===");
            println!("Turn ID: {}", result.turn_id);
            println!("Cycles: {}{}", result.cycles, if result.planning_exhausted { " (cap reached)" } else { "" });
            println!("\n{}", result.answer);
            println!("\nReasoning Trace:");
            for (i, trace) in result.reasoning_trace.iter().enumerate() {
                println!("  {}: {}", i + 1, trace);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Analysis failed: {}", e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
