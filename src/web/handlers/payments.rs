use actix_web::{web, HttpResponse, Responder};
use log::{info, warn};
use serde_json::json;

use crate::core::workflow::Services;
use crate::web::models::PaymentCallback;

/// POST /webhook/nowpayments — IPN callback from the payment processor.
/// Always acknowledges; the processor retries on anything else.
pub async fn payment_callback(
    services: web::Data<Services>,
    body: web::Json<PaymentCallback>,
) -> impl Responder {
    let body = body.into_inner();
    let status = body.payment_status.as_deref().unwrap_or("unknown");
    let order_id = body.order_id.as_deref().unwrap_or("unknown");

    match status {
        "finished" => {
            let actually_paid = body
                .actually_paid
                .as_ref()
                .and_then(|v| v.as_f64().or_else(|| v.as_str()?.parse().ok()))
                .unwrap_or(0.0);
            let pay_currency = body.pay_currency.as_deref().unwrap_or("?");
            info!(
                "payment finished for {}: {} {}",
                order_id, actually_paid, pay_currency
            );
            services
                .billing
                .notify_payment_confirmed(order_id, actually_paid, pay_currency)
                .await;
        }
        "waiting" | "confirming" | "confirmed" | "sending" | "partially_paid" => {
            info!("payment {} for {}", status, order_id);
        }
        "failed" | "refunded" | "expired" => {
            warn!("payment {} for {}", status, order_id);
        }
        other => {
            warn!("unrecognized payment status '{}' for {}", other, order_id);
        }
    }

    HttpResponse::Ok().json(json!({"status": "received"}))
}
