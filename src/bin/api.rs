use financial_advisory_core::api::start_server;
use financial_advisory_core::audit::AuditSink;
use financial_advisory_core::config::AgentConfig;
use financial_advisory_core::inference::GeminiClient;
use financial_advisory_core::knowledge::{HttpKnowledgeBase, KnowledgeBase, NoopKnowledge};
use financial_advisory_core::pipeline::Pipeline;
use financial_advisory_core::tools::create_default_registry;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        warn!("GEMINI_API_KEY not set; inference calls will fail");
        String::new()
    });

    let port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    let config = AgentConfig::from_env();
    let backend = Arc::new(GeminiClient::new(api_key)?);
    let registry = Arc::new(create_default_registry());
    let knowledge: Arc<dyn KnowledgeBase> = match HttpKnowledgeBase::from_env() {
        Some(kb) => Arc::new(kb),
        None => {
            warn!("KNOWLEDGE_API_BASE_URL not set; citation retrieval disabled");
            Arc::new(NoopKnowledge)
        }
    };
    let audit = AuditSink::from_env();

    let pipeline = Arc::new(Pipeline::new(config, backend, registry, knowledge, audit));

    info!("Financial advisory core — API server on port {}", port);

    start_server(pipeline, port).await
}
