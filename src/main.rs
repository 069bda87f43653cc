use std::sync::Arc;

use log::{info, warn};

use outcome_desk::config::Config;
use outcome_desk::core::brain::{Brain, OpenRouterBackend};
use outcome_desk::core::safety::{ContentSafety, SafetyLayer};
use outcome_desk::core::workflow::{RequestRegistry, Services};
use outcome_desk::tools::billing::BillingSystem;
use outcome_desk::tools::fixer::DatabaseFixer;
use outcome_desk::tools::vault::ClientVault;
use outcome_desk::web::server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = Config::from_env();
    info!("Outcome Desk starting up");

    let backend = OpenRouterBackend::new(
        config.openrouter_api_key.clone(),
        config.openrouter_model.clone(),
    );
    if !backend.has_credentials() {
        warn!("OPENROUTER_API_KEY not set; webhook requests will fail at the model call");
    }
    if config.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET not set; admin endpoints are disabled");
    }

    let vault = ClientVault::open(config.vault_path(), config.encryption_key.clone())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    let billing = BillingSystem::new(&config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

    let services = Arc::new(Services {
        brain: Brain::new(Arc::new(backend)),
        safety: SafetyLayer::new(),
        content_safety: ContentSafety::new(),
        vault,
        billing,
        fixer: DatabaseFixer::new(),
        requests: RequestRegistry::new(),
        config,
    });

    server::run(services).await
}
