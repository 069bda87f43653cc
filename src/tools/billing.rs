use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::DeskError;

const LEDGER_HEADER: &[&str] = &[
    "timestamp",
    "client_id",
    "company_name",
    "fix_id",
    "fix_type",
    "error_summary",
    "amount_usd",
    "status",
    "execution_time_ms",
    "rows_affected",
];

/// One billable outcome, as stored in the CSV ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingRecord {
    pub timestamp: String,
    pub client_id: String,
    pub company_name: String,
    pub fix_id: String,
    pub fix_type: String,
    pub error_summary: String,
    pub amount_usd: f64,
    pub status: String,
    pub execution_time_ms: f64,
    pub rows_affected: u64,
}

/// The outcome tracker: appends every success to the ledger, notifies
/// Telegram, and raises crypto invoices via NOWPayments.
pub struct BillingSystem {
    ledger_path: PathBuf,
    fix_price: f64,
    telegram_token: Option<String>,
    telegram_chat_id: Option<String>,
    nowpayments_api_key: Option<String>,
    pay_currency: String,
    http: reqwest::Client,
}

impl BillingSystem {
    pub fn new(config: &Config) -> Result<Self, DeskError> {
        let system = Self {
            ledger_path: config.ledger_path(),
            fix_price: config.fix_price_usd,
            telegram_token: config.telegram_bot_token.clone(),
            telegram_chat_id: config.telegram_chat_id.clone(),
            nowpayments_api_key: config.nowpayments_api_key.clone(),
            pay_currency: config.pay_currency.clone(),
            http: reqwest::Client::new(),
        };
        system.ensure_ledger_exists()?;
        Ok(system)
    }

    fn ensure_ledger_exists(&self) -> Result<(), DeskError> {
        if self.ledger_path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.ledger_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(&self.ledger_path)?;
        writer.write_record(LEDGER_HEADER)?;
        writer.flush()?;
        Ok(())
    }

    /// Append a completed record to the ledger and notify Telegram.
    /// Notification failures are logged, never propagated.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_success(
        &self,
        client_id: &str,
        company_name: &str,
        fix_id: &str,
        fix_type: &str,
        error_summary: &str,
        execution_time_ms: f64,
        rows_affected: u64,
        custom_amount: Option<f64>,
    ) -> Result<BillingRecord, DeskError> {
        let record = BillingRecord {
            timestamp: Utc::now().to_rfc3339(),
            client_id: client_id.to_string(),
            company_name: company_name.to_string(),
            fix_id: fix_id.to_string(),
            fix_type: fix_type.to_string(),
            error_summary: error_summary.chars().take(100).collect(),
            amount_usd: custom_amount.unwrap_or(self.fix_price),
            status: "completed".to_string(),
            execution_time_ms,
            rows_affected,
        };

        let file = OpenOptions::new().append(true).open(&self.ledger_path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.serialize(&record)?;
        writer.flush()?;

        info!(
            "billed {} ${:.2} for {} ({})",
            record.company_name, record.amount_usd, record.fix_id, record.fix_type
        );
        self.notify_success(&record).await;

        Ok(record)
    }

    async fn notify_success(&self, record: &BillingRecord) {
        let (Some(token), Some(chat_id)) = (&self.telegram_token, &self.telegram_chat_id) else {
            return;
        };

        let daily = self.daily_total(Utc::now().date_naive()).unwrap_or(0.0);
        let now = Utc::now();
        let monthly = self.monthly_total(now.year(), now.month()).unwrap_or(0.0);

        let message = format!(
            "*NEW OUTCOME COMPLETED*\n\n\
             Client: {}\n\
             Agent: {}\n\
             Issue: {}\n\
             Time: {:.0}ms\n\
             Rows: {}\n\n\
             Earned: ${:.2}\n\
             Today: ${:.2}\n\
             This Month: ${:.2}",
            record.company_name,
            record.fix_type,
            record.error_summary,
            record.execution_time_ms,
            record.rows_affected,
            record.amount_usd,
            daily,
            monthly,
        );

        if let Err(e) = self.send_telegram(token, chat_id, &message).await {
            warn!("telegram notification failed: {e}");
        }
    }

    /// Sent from the IPN listener when NOWPayments reports a finished payment.
    pub async fn notify_payment_confirmed(
        &self,
        order_id: &str,
        actually_paid: f64,
        pay_currency: &str,
    ) {
        let (Some(token), Some(chat_id)) = (&self.telegram_token, &self.telegram_chat_id) else {
            return;
        };

        let message = format!(
            "*PAYMENT CONFIRMED*\n\n\
             Order: {}\n\
             Amount: {} {}\n\
             Status: PAID",
            order_id,
            actually_paid,
            pay_currency.to_uppercase(),
        );

        if let Err(e) = self.send_telegram(token, chat_id, &message).await {
            warn!("telegram payment notification failed: {e}");
        }
    }

    async fn send_telegram(
        &self,
        token: &str,
        chat_id: &str,
        message: &str,
    ) -> Result<(), DeskError> {
        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        self.http
            .post(&url)
            .timeout(Duration::from_secs(10))
            .json(&json!({
                "chat_id": chat_id,
                "text": message,
                "parse_mode": "Markdown",
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    // =========================================================================
    // NOWPayments invoicing - all best-effort, never blocks the billing path
    // =========================================================================

    /// Minimum payable amount for a currency pair, 0.0 when unknown.
    pub async fn min_payment_amount(&self, currency_from: &str, currency_to: &str) -> f64 {
        let Some(api_key) = &self.nowpayments_api_key else {
            return 0.0;
        };

        let url = format!(
            "https://api.nowpayments.io/v1/min-amount?currency_from={currency_from}&currency_to={currency_to}"
        );
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(10))
            .header("x-api-key", api_key)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| value_as_f64(&v["min_amount"]))
                .unwrap_or(0.0),
            Ok(_) | Err(_) => 0.0,
        }
    }

    /// Create a crypto invoice and return its payment URL. Returns None when
    /// the key is missing, the amount is below the network minimum (plus a 10%
    /// buffer for rate drift), or the upstream call fails.
    pub async fn create_invoice(
        &self,
        amount: f64,
        order_id: &str,
        description: &str,
    ) -> Option<String> {
        let api_key = self.nowpayments_api_key.as_ref()?;

        let min_amount = self.min_payment_amount("usd", &self.pay_currency).await;
        let safe_min = min_amount * 1.10;
        if amount < safe_min {
            warn!(
                "billing skipped: ${:.2} is below network minimum (${:.2} for {})",
                amount, safe_min, self.pay_currency
            );
            return None;
        }

        let payload = json!({
            "price_amount": amount,
            "price_currency": "usd",
            "pay_currency": self.pay_currency,
            "order_id": order_id,
            "order_description": description,
            "is_fixed_rate": true,
            "is_fee_paid_by_user": true,
        });

        let response = self
            .http
            .post("https://api.nowpayments.io/v1/invoice")
            .timeout(Duration::from_secs(30))
            .header("x-api-key", api_key)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let body: Value = resp.json().await.ok()?;
                let invoice_url = body["invoice_url"].as_str()?.to_string();
                info!("invoice created: id={} url={}", body["id"], invoice_url);
                Some(invoice_url)
            }
            Ok(resp) => {
                warn!("nowpayments error: {}", resp.status());
                None
            }
            Err(e) => {
                warn!("nowpayments request failed: {e}");
                None
            }
        }
    }

    /// Check the payment status of an invoice.
    pub async fn payment_status(&self, invoice_id: &str) -> Value {
        let Some(api_key) = &self.nowpayments_api_key else {
            return json!({"payment_status": "unknown", "error": "API key not configured"});
        };

        let url = format!("https://api.nowpayments.io/v1/payment/{invoice_id}");
        match self
            .http
            .get(&url)
            .timeout(Duration::from_secs(30))
            .header("x-api-key", api_key)
            .send()
            .await
        {
            Ok(resp) => resp
                .json()
                .await
                .unwrap_or_else(|e| json!({"payment_status": "error", "error": e.to_string()})),
            Err(e) => json!({"payment_status": "error", "error": e.to_string()}),
        }
    }

    // =========================================================================
    // Ledger aggregations - only "completed" records count
    // =========================================================================

    pub fn read_records(&self) -> Result<Vec<BillingRecord>, DeskError> {
        let mut reader = csv::Reader::from_path(&self.ledger_path)?;
        let mut records = Vec::new();
        for row in reader.deserialize() {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn completed_records(&self) -> Result<Vec<BillingRecord>, DeskError> {
        Ok(self
            .read_records()?
            .into_iter()
            .filter(|r| r.status == "completed")
            .collect())
    }

    pub fn daily_total(&self, date: NaiveDate) -> Result<f64, DeskError> {
        let prefix = date.format("%Y-%m-%d").to_string();
        Ok(self
            .completed_records()?
            .iter()
            .filter(|r| r.timestamp.starts_with(&prefix))
            .map(|r| r.amount_usd)
            .sum())
    }

    pub fn monthly_total(&self, year: i32, month: u32) -> Result<f64, DeskError> {
        let prefix = format!("{year}-{month:02}");
        Ok(self
            .completed_records()?
            .iter()
            .filter(|r| r.timestamp.starts_with(&prefix))
            .map(|r| r.amount_usd)
            .sum())
    }

    pub fn all_time_total(&self) -> Result<f64, DeskError> {
        Ok(self.completed_records()?.iter().map(|r| r.amount_usd).sum())
    }

    pub fn client_total(&self, client_id: &str) -> Result<f64, DeskError> {
        Ok(self
            .completed_records()?
            .iter()
            .filter(|r| r.client_id == client_id)
            .map(|r| r.amount_usd)
            .sum())
    }

    pub fn recent_records(&self, limit: usize) -> Result<Vec<BillingRecord>, DeskError> {
        let records = self.read_records()?;
        let skip = records.len().saturating_sub(limit);
        Ok(records.into_iter().skip(skip).collect())
    }

    /// Comprehensive stats for the admin and index endpoints.
    pub fn stats(&self) -> Result<Value, DeskError> {
        let completed = self.completed_records()?;
        if completed.is_empty() {
            return Ok(json!({
                "total_fixes": 0,
                "total_earnings": 0.0,
                "daily_earnings": 0.0,
                "monthly_earnings": 0.0,
                "avg_fix_time_ms": 0.0,
                "total_rows_fixed": 0,
                "unique_clients": 0,
            }));
        }

        let now = Utc::now();
        let total_earnings: f64 = completed.iter().map(|r| r.amount_usd).sum();
        let avg_time: f64 =
            completed.iter().map(|r| r.execution_time_ms).sum::<f64>() / completed.len() as f64;
        let unique_clients = completed
            .iter()
            .map(|r| r.client_id.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();

        Ok(json!({
            "total_fixes": completed.len(),
            "total_earnings": total_earnings,
            "daily_earnings": self.daily_total(now.date_naive())?,
            "monthly_earnings": self.monthly_total(now.year(), now.month())?,
            "avg_fix_time_ms": avg_time,
            "total_rows_fixed": completed.iter().map(|r| r.rows_affected).sum::<u64>(),
            "unique_clients": unique_clients,
        }))
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &Path) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            openrouter_api_key: None,
            openrouter_model: "deepseek/deepseek-chat".to_string(),
            webhook_secret: None,
            fix_price_usd: 5.0,
            encryption_key: "k".to_string(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            nowpayments_api_key: None,
            pay_currency: "usdttrc20".to_string(),
            data_dir: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_ledger_created_with_header_once() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let _first = BillingSystem::new(&config).unwrap();
        let _second = BillingSystem::new(&config).unwrap();

        let raw = fs::read_to_string(config.ledger_path()).unwrap();
        assert_eq!(raw.matches("timestamp").count(), 1);
    }

    #[tokio::test]
    async fn test_log_success_and_totals() {
        let dir = tempdir().unwrap();
        let billing = BillingSystem::new(&test_config(dir.path())).unwrap();

        let record = billing
            .log_success("client_1", "Acme", "fix_1", "sql", "broken index", 120.0, 3, None)
            .await
            .unwrap();
        assert_eq!(record.amount_usd, 5.0);

        billing
            .log_success(
                "client_2",
                "Globex",
                "support_1",
                "customer_support",
                "password reset",
                80.0,
                0,
                Some(0.99),
            )
            .await
            .unwrap();

        assert!((billing.all_time_total().unwrap() - 5.99).abs() < 1e-9);
        assert!((billing.client_total("client_1").unwrap() - 5.0).abs() < 1e-9);
        assert!(
            (billing.daily_total(Utc::now().date_naive()).unwrap() - 5.99).abs() < 1e-9
        );
    }

    #[tokio::test]
    async fn test_error_summary_truncated() {
        let dir = tempdir().unwrap();
        let billing = BillingSystem::new(&test_config(dir.path())).unwrap();
        let long = "e".repeat(500);
        let record = billing
            .log_success("c", "Acme", "fix", "sql", &long, 1.0, 0, None)
            .await
            .unwrap();
        assert_eq!(record.error_summary.len(), 100);
    }

    #[tokio::test]
    async fn test_recent_respects_limit() {
        let dir = tempdir().unwrap();
        let billing = BillingSystem::new(&test_config(dir.path())).unwrap();
        for i in 0..5 {
            billing
                .log_success("c", "Acme", &format!("fix_{i}"), "sql", "x", 1.0, 0, None)
                .await
                .unwrap();
        }
        let recent = billing.recent_records(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].fix_id, "fix_4");
    }

    #[tokio::test]
    async fn test_stats_shape() {
        let dir = tempdir().unwrap();
        let billing = BillingSystem::new(&test_config(dir.path())).unwrap();

        let empty = billing.stats().unwrap();
        assert_eq!(empty["total_fixes"], 0);

        billing
            .log_success("c", "Acme", "fix", "sql", "x", 200.0, 4, None)
            .await
            .unwrap();
        let stats = billing.stats().unwrap();
        assert_eq!(stats["total_fixes"], 1);
        assert_eq!(stats["total_rows_fixed"], 4);
        assert_eq!(stats["unique_clients"], 1);
        assert!((stats["avg_fix_time_ms"].as_f64().unwrap() - 200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_invoice_requires_api_key() {
        let dir = tempdir().unwrap();
        let billing = BillingSystem::new(&test_config(dir.path())).unwrap();
        assert!(billing.create_invoice(5.0, "fix_1", "desc").await.is_none());
        assert_eq!(billing.min_payment_amount("usd", "usdttrc20").await, 0.0);
    }
}
