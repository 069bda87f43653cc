use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use serde_json::json;

use crate::core::agents::list_agents;
use crate::core::metrics;
use crate::core::workflow::Services;

/// GET / — service banner with live earnings.
pub async fn index(services: web::Data<Services>) -> impl Responder {
    let stats = services.billing.stats().unwrap_or_else(|_| json!({}));
    HttpResponse::Ok().json(json!({
        "service": "Outcome Desk",
        "status": "printing",
        "agents": list_agents(),
        "stats": stats,
    }))
}

/// GET /health
pub async fn health(services: web::Data<Services>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "llm_configured": services.config.openrouter_api_key.is_some(),
    }))
}

/// GET /agents — the catalog of available agents and their prices.
pub async fn agents() -> impl Responder {
    HttpResponse::Ok().json(json!({"agents": list_agents()}))
}

/// GET /metrics — Prometheus exposition format.
pub async fn prometheus_metrics() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::render())
}
