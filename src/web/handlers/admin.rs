use actix_web::{web, HttpRequest, HttpResponse, Responder};
use log::info;
use serde::Deserialize;
use serde_json::json;

use crate::core::workflow::Services;
use crate::web::handlers::api_key;
use crate::web::models::RegisterClientRequest;

/// Admin endpoints are gated by the shared webhook secret, not a client key.
fn check_admin(services: &Services, req: &HttpRequest) -> Result<(), HttpResponse> {
    let Some(secret) = &services.config.webhook_secret else {
        return Err(HttpResponse::ServiceUnavailable()
            .json(json!({"detail": "Admin secret not configured"})));
    };
    match api_key(req) {
        Some(key) if key == secret => Ok(()),
        _ => Err(HttpResponse::Unauthorized().json(json!({"detail": "Invalid admin key"}))),
    }
}

/// GET /stats — earnings summary from the billing ledger.
pub async fn stats(services: web::Data<Services>, req: HttpRequest) -> impl Responder {
    if let Err(response) = check_admin(&services, &req) {
        return response;
    }
    match services.billing.stats() {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => HttpResponse::InternalServerError().json(json!({"detail": e.to_string()})),
    }
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

/// GET /stats/recent?limit=N — latest ledger entries.
pub async fn recent(
    services: web::Data<Services>,
    req: HttpRequest,
    query: web::Query<RecentQuery>,
) -> impl Responder {
    if let Err(response) = check_admin(&services, &req) {
        return response;
    }
    match services.billing.recent_records(query.limit) {
        Ok(records) => HttpResponse::Ok().json(json!({"transactions": records})),
        Err(e) => HttpResponse::InternalServerError().json(json!({"detail": e.to_string()})),
    }
}

/// POST /clients/register — onboard a client, returning the API key exactly
/// once. Only its hash is stored.
pub async fn register_client(
    services: web::Data<Services>,
    req: HttpRequest,
    body: web::Json<RegisterClientRequest>,
) -> impl Responder {
    if let Err(response) = check_admin(&services, &req) {
        return response;
    }
    let body = body.into_inner();
    match services
        .vault
        .register_client(
            &body.company_name,
            &body.database_type,
            &body.connection_string,
            &body.plan,
        )
        .await
    {
        Ok((client_id, api_key)) => {
            info!("registered client {} ({})", client_id, body.company_name);
            HttpResponse::Ok().json(json!({
                "client_id": client_id,
                "api_key": api_key,
                "message": "Store this API key now. It is not shown again.",
            }))
        }
        Err(e) => HttpResponse::InternalServerError().json(json!({"detail": e.to_string()})),
    }
}

/// GET /payments/{id} — upstream status of a crypto invoice.
pub async fn payment_status(
    services: web::Data<Services>,
    req: HttpRequest,
    path: web::Path<String>,
) -> impl Responder {
    if let Err(response) = check_admin(&services, &req) {
        return response;
    }
    HttpResponse::Ok().json(services.billing.payment_status(&path.into_inner()).await)
}

/// GET /clients — active clients, secrets omitted.
pub async fn list_clients(services: web::Data<Services>, req: HttpRequest) -> impl Responder {
    if let Err(response) = check_admin(&services, &req) {
        return response;
    }
    let clients: Vec<_> = services
        .vault
        .list_active_clients()
        .await
        .into_iter()
        .map(|c| {
            json!({
                "client_id": c.client_id,
                "company_name": c.company_name,
                "database_type": c.database_type,
                "plan": c.plan,
                "created_at": c.created_at,
                "last_activity": c.last_activity,
                "total_fixes": c.total_fixes,
                "total_billed": c.total_billed,
            })
        })
        .collect();
    HttpResponse::Ok().json(json!({"clients": clients}))
}
