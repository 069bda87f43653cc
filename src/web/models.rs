use serde::Deserialize;
use serde_json::Value;

fn default_priority() -> String {
    "normal".to_string()
}

fn default_database_type() -> String {
    "sqlite".to_string()
}

fn default_plan() -> String {
    "per-fix".to_string()
}

/// Body of POST /webhook/fix.
#[derive(Debug, Deserialize)]
pub struct ErrorReport {
    pub error_message: String,
    pub error_code: Option<String>,
    /// When absent, the client's registered database type is used.
    pub database_type: Option<String>,
    pub table_name: Option<String>,
    pub additional_context: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
}

/// Body of POST /webhook/support.
#[derive(Debug, Deserialize)]
pub struct SupportTicket {
    pub message: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub context: Option<String>,
}

/// Body of POST /webhook/sales.
#[derive(Debug, Deserialize)]
pub struct SalesLead {
    pub message: String,
    pub lead_name: Option<String>,
    pub company: Option<String>,
    pub context: Option<String>,
}

/// Body of POST /webhook/email.
#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email_content: String,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub context: Option<String>,
}

/// Body of POST /webhook/appointment.
#[derive(Debug, Deserialize)]
pub struct AppointmentRequest {
    pub message: String,
    pub contact_name: Option<String>,
    pub preferred_times: Option<String>,
    pub context: Option<String>,
}

/// Body of POST /webhook/universal, routed by agent type.
#[derive(Debug, Deserialize)]
pub struct UniversalRequest {
    pub agent_type: String,
    pub data: Value,
    pub context: Option<String>,
}

/// Body of POST /clients/register.
#[derive(Debug, Deserialize)]
pub struct RegisterClientRequest {
    pub company_name: String,
    #[serde(default = "default_database_type")]
    pub database_type: String,
    pub connection_string: String,
    #[serde(default = "default_plan")]
    pub plan: String,
}

/// NOWPayments IPN callback payload. Fields beyond these are ignored.
#[derive(Debug, Deserialize)]
pub struct PaymentCallback {
    pub payment_status: Option<String>,
    pub order_id: Option<String>,
    pub actually_paid: Option<Value>,
    pub pay_currency: Option<String>,
}
