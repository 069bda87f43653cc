use actix_web::{web, HttpRequest, HttpResponse, Responder};
use log::info;
use serde_json::json;
use uuid::Uuid;

use crate::core::agents::{agent_config, AgentKind};
use crate::core::metrics;
use crate::core::workflow::{process_agent_request, process_fix, AgentJob, FixJob, RequestPhase, Services};
use crate::tools::vault::Client;
use crate::web::handlers::api_key;
use crate::web::models::{
    AppointmentRequest, EmailRequest, ErrorReport, SalesLead, SupportTicket, UniversalRequest,
};

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// A fix report may name a database type; when it doesn't, the type the
/// client registered with applies.
fn resolve_database_type(report: &ErrorReport, client: &Client) -> String {
    report
        .database_type
        .clone()
        .unwrap_or_else(|| client.database_type.clone())
}

/// Resolve the x-api-key header to an active client, or the HTTP error to
/// return instead.
async fn authenticate(services: &Services, req: &HttpRequest) -> Result<Client, HttpResponse> {
    let Some(key) = api_key(req) else {
        return Err(HttpResponse::Unauthorized().json(json!({"detail": "Missing API key"})));
    };
    if let Some(client) = services.vault.verify_client(key).await {
        return Ok(client);
    }
    if services.vault.key_known(key).await {
        Err(HttpResponse::Forbidden().json(json!({"detail": "Account is deactivated"})))
    } else {
        Err(HttpResponse::Unauthorized().json(json!({"detail": "Invalid API key"})))
    }
}

/// POST /webhook/fix — queue a database error for autonomous repair.
pub async fn report_error(
    services: web::Data<Services>,
    req: HttpRequest,
    body: web::Json<ErrorReport>,
) -> impl Responder {
    let client = match authenticate(&services, &req).await {
        Ok(client) => client,
        Err(response) => return response,
    };

    let connection_string = match services.vault.decrypted_connection(&client) {
        Ok(connection_string) => connection_string,
        Err(e) => {
            return HttpResponse::InternalServerError()
                .json(json!({"detail": format!("Stored connection unusable: {e}")}));
        }
    };

    let fix_id = format!("fix_{}", short_id());
    let agent = AgentKind::DatabaseFixer.wire_name();
    metrics::REQUESTS_TOTAL.with_label_values(&[agent]).inc();
    info!(
        "[{}] error report from {} (priority {})",
        fix_id, client.company_name, body.priority
    );

    let job = FixJob {
        fix_id: fix_id.clone(),
        client_id: client.client_id.clone(),
        company_name: client.company_name.clone(),
        error_message: body.error_message.clone(),
        additional_context: body.additional_context.clone(),
        database_type: resolve_database_type(&body, &client),
        connection_string,
    };
    services
        .requests
        .set(&fix_id, agent, RequestPhase::Queued, "Queued for analysis");
    tokio::spawn(process_fix(services.clone().into_inner(), job));

    HttpResponse::Ok().json(json!({
        "status": "queued",
        "fix_id": fix_id,
        "message": format!(
            "Fix in progress. You are billed ${:.2} only if it succeeds.",
            services.config.fix_price_usd
        ),
    }))
}

fn queue_agent_job(
    services: &web::Data<Services>,
    client: Client,
    kind: AgentKind,
    prefix: &str,
    data: serde_json::Value,
    context: Option<String>,
) -> HttpResponse {
    let config = agent_config(kind);
    let request_id = format!("{prefix}_{}", short_id());
    metrics::REQUESTS_TOTAL
        .with_label_values(&[kind.wire_name()])
        .inc();
    info!(
        "[{}] {} request from {}",
        request_id, config.name, client.company_name
    );

    let job = AgentJob {
        request_id: request_id.clone(),
        client_id: client.client_id,
        company_name: client.company_name,
        kind,
        data,
        context,
    };
    services
        .requests
        .set(&request_id, kind.wire_name(), RequestPhase::Queued, "Queued");
    tokio::spawn(process_agent_request(services.clone().into_inner(), job));

    HttpResponse::Ok().json(json!({
        "status": "queued",
        "request_id": request_id,
        "agent": config.name,
        "price_on_success": config.price_per_outcome,
        "message": "Processing. You are billed only on a successful outcome.",
    }))
}

/// POST /webhook/support
pub async fn support_ticket(
    services: web::Data<Services>,
    req: HttpRequest,
    body: web::Json<SupportTicket>,
) -> impl Responder {
    let client = match authenticate(&services, &req).await {
        Ok(client) => client,
        Err(response) => return response,
    };
    let body = body.into_inner();
    let data = json!({
        "message": body.message,
        "customer_name": body.customer_name,
        "customer_email": body.customer_email,
    });
    queue_agent_job(
        &services,
        client,
        AgentKind::CustomerSupport,
        "support",
        data,
        body.context,
    )
}

/// POST /webhook/sales
pub async fn sales_lead(
    services: web::Data<Services>,
    req: HttpRequest,
    body: web::Json<SalesLead>,
) -> impl Responder {
    let client = match authenticate(&services, &req).await {
        Ok(client) => client,
        Err(response) => return response,
    };
    let body = body.into_inner();
    let data = json!({
        "message": body.message,
        "lead_name": body.lead_name,
        "company": body.company,
    });
    queue_agent_job(
        &services,
        client,
        AgentKind::SalesAgent,
        "sales",
        data,
        body.context,
    )
}

/// POST /webhook/email
pub async fn email_request(
    services: web::Data<Services>,
    req: HttpRequest,
    body: web::Json<EmailRequest>,
) -> impl Responder {
    let client = match authenticate(&services, &req).await {
        Ok(client) => client,
        Err(response) => return response,
    };
    let body = body.into_inner();
    let data = json!({
        "email_content": body.email_content,
        "sender": body.sender,
        "subject": body.subject,
    });
    queue_agent_job(
        &services,
        client,
        AgentKind::EmailResponder,
        "email",
        data,
        body.context,
    )
}

/// POST /webhook/appointment
pub async fn appointment_request(
    services: web::Data<Services>,
    req: HttpRequest,
    body: web::Json<AppointmentRequest>,
) -> impl Responder {
    let client = match authenticate(&services, &req).await {
        Ok(client) => client,
        Err(response) => return response,
    };
    let body = body.into_inner();
    let data = json!({
        "message": body.message,
        "contact_name": body.contact_name,
        "preferred_times": body.preferred_times,
    });
    queue_agent_job(
        &services,
        client,
        AgentKind::AppointmentSetter,
        "appt",
        data,
        body.context,
    )
}

/// POST /webhook/universal — any non-fixer agent, selected by payload.
pub async fn universal_request(
    services: web::Data<Services>,
    req: HttpRequest,
    body: web::Json<UniversalRequest>,
) -> impl Responder {
    let client = match authenticate(&services, &req).await {
        Ok(client) => client,
        Err(response) => return response,
    };
    let body = body.into_inner();
    let kind = match AgentKind::from_wire(&body.agent_type) {
        Ok(AgentKind::DatabaseFixer) => {
            return HttpResponse::BadRequest()
                .json(json!({"detail": "Database fixes go through /webhook/fix"}));
        }
        Ok(kind) => kind,
        Err(e) => return HttpResponse::BadRequest().json(json!({"detail": e.to_string()})),
    };
    queue_agent_job(&services, client, kind, "uni", body.data, body.context)
}

/// GET /requests/{id} — status of a queued request.
pub async fn request_status(
    services: web::Data<Services>,
    path: web::Path<String>,
) -> impl Responder {
    match services.requests.get(&path.into_inner()) {
        Some(state) => HttpResponse::Ok().json(state),
        None => HttpResponse::NotFound().json(json!({"detail": "Unknown request id"})),
    }
}
