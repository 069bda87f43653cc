use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use log::info;

use crate::core::workflow::Services;
use crate::web::handlers::{admin, payments, system, webhook};

/// Route table, shared between the server and handler tests.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(system::index))
        .route("/health", web::get().to(system::health))
        .route("/agents", web::get().to(system::agents))
        .route("/metrics", web::get().to(system::prometheus_metrics))
        .route("/webhook/fix", web::post().to(webhook::report_error))
        .route("/webhook/support", web::post().to(webhook::support_ticket))
        .route("/webhook/sales", web::post().to(webhook::sales_lead))
        .route("/webhook/email", web::post().to(webhook::email_request))
        .route(
            "/webhook/appointment",
            web::post().to(webhook::appointment_request),
        )
        .route(
            "/webhook/universal",
            web::post().to(webhook::universal_request),
        )
        .route(
            "/webhook/nowpayments",
            web::post().to(payments::payment_callback),
        )
        .route("/requests/{id}", web::get().to(webhook::request_status))
        .route("/stats", web::get().to(admin::stats))
        .route("/stats/recent", web::get().to(admin::recent))
        .route("/payments/{id}", web::get().to(admin::payment_status))
        .route("/clients/register", web::post().to(admin::register_client))
        .route("/clients", web::get().to(admin::list_clients));
}

/// Run the webhook server until shutdown.
pub async fn run(services: Arc<Services>) -> std::io::Result<()> {
    let host = services.config.host.clone();
    let port = services.config.port;
    let data = web::Data::from(services);

    info!("listening on {}:{}", host, port);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(middleware::Logger::default())
            .configure(routes)
    })
    .bind((host, port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::brain::{Brain, ChatRequest, LlmBackend};
    use crate::core::safety::{ContentSafety, SafetyLayer};
    use crate::core::workflow::RequestRegistry;
    use crate::error::DeskError;
    use crate::tools::billing::BillingSystem;
    use crate::tools::fixer::DatabaseFixer;
    use crate::tools::vault::ClientVault;
    use actix_web::{http::StatusCode, test, App};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    struct SilentBackend;

    #[async_trait]
    impl LlmBackend for SilentBackend {
        async fn chat(&self, _request: ChatRequest) -> Result<String, DeskError> {
            Err(DeskError::Config("no backend in tests".to_string()))
        }
    }

    fn test_services(dir: &tempfile::TempDir) -> Arc<Services> {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            openrouter_api_key: None,
            openrouter_model: "deepseek/deepseek-chat".to_string(),
            webhook_secret: Some("topsecret".to_string()),
            fix_price_usd: 5.0,
            encryption_key: "k".to_string(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            nowpayments_api_key: None,
            pay_currency: "usdttrc20".to_string(),
            data_dir: dir.path().to_path_buf(),
        };
        Arc::new(Services {
            brain: Brain::new(Arc::new(SilentBackend)),
            safety: SafetyLayer::new(),
            content_safety: ContentSafety::new(),
            vault: ClientVault::open(config.vault_path(), config.encryption_key.clone()).unwrap(),
            billing: BillingSystem::new(&config).unwrap(),
            fixer: DatabaseFixer::new(),
            requests: RequestRegistry::new(),
            config,
        })
    }

    #[actix_web::test]
    async fn test_health_endpoint() {
        let dir = tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(test_services(&dir)))
                .configure(routes),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request())
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["llm_configured"], false);
    }

    #[actix_web::test]
    async fn test_agents_catalog() {
        let dir = tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(test_services(&dir)))
                .configure(routes),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/agents").to_request())
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["agents"].as_array().unwrap().len(), 5);
    }

    #[actix_web::test]
    async fn test_fix_webhook_requires_api_key() {
        let dir = tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(test_services(&dir)))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/webhook/fix")
            .set_json(json!({"error_message": "table is locked"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_deactivated_client_gets_403() {
        let dir = tempdir().unwrap();
        let services = test_services(&dir);
        let (client_id, api_key) = services
            .vault
            .register_client("Acme", "sqlite", "/tmp/a.db", "per-fix")
            .await
            .unwrap();
        assert!(services.vault.deactivate_client(&client_id).await);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(services))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/webhook/support")
            .insert_header(("x-api-key", api_key))
            .set_json(json!({"message": "help"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn test_admin_stats_gated_by_secret() {
        let dir = tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(test_services(&dir)))
                .configure(routes),
        )
        .await;

        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/stats").to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/stats")
            .insert_header(("x-api-key", "topsecret"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["total_fixes"], 0);
    }

    #[actix_web::test]
    async fn test_client_registration_returns_key_once() {
        let dir = tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(test_services(&dir)))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/clients/register")
            .insert_header(("x-api-key", "topsecret"))
            .set_json(json!({
                "company_name": "Acme",
                "connection_string": "sqlite:///tmp/acme.db",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["api_key"].as_str().unwrap().starts_with("amp_"));

        // The listing never echoes keys or connection strings back.
        let req = test::TestRequest::get()
            .uri("/clients")
            .insert_header(("x-api-key", "topsecret"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let body: Value = test::read_body_json(resp).await;
        let clients = body["clients"].as_array().unwrap();
        assert_eq!(clients.len(), 1);
        assert!(clients[0].get("api_key").is_none());
        assert!(clients[0].get("connection_string_encrypted").is_none());
    }

    #[actix_web::test]
    async fn test_payment_callback_always_acknowledges() {
        let dir = tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(test_services(&dir)))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/webhook/nowpayments")
            .set_json(json!({"payment_status": "entirely_new_status", "order_id": "fix_1"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "received");
    }

    #[actix_web::test]
    async fn test_unknown_request_id_is_404() {
        let dir = tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(test_services(&dir)))
                .configure(routes),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/requests/fix_nope").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
