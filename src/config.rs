use std::env;
use std::path::PathBuf;

/// Runtime configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address for the webhook server
    pub host: String,
    /// Bind port for the webhook server
    pub port: u16,
    /// OpenRouter API key; the server starts without one but LLM calls fail
    pub openrouter_api_key: Option<String>,
    /// Chat model identifier
    pub openrouter_model: String,
    /// Shared secret gating the admin endpoints
    pub webhook_secret: Option<String>,
    /// Default price for a database fix in USD
    pub fix_price_usd: f64,
    /// Key used to encrypt client connection strings at rest
    pub encryption_key: String,
    /// Telegram notification credentials
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// NOWPayments invoicing credentials
    pub nowpayments_api_key: Option<String>,
    pub pay_currency: String,
    /// Directory holding the client vault and billing ledger
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            openrouter_api_key: non_empty(env::var("OPENROUTER_API_KEY").ok()),
            openrouter_model: env::var("OPENROUTER_MODEL")
                .unwrap_or_else(|_| "deepseek/deepseek-chat".to_string()),
            webhook_secret: non_empty(env::var("WEBHOOK_SECRET").ok()),
            fix_price_usd: env::var("FIX_PRICE_USD")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5.00),
            encryption_key: env::var("ENCRYPTION_KEY")
                .unwrap_or_else(|_| "default_key_change_me!".to_string()),
            telegram_bot_token: non_empty(env::var("TELEGRAM_BOT_TOKEN").ok()),
            telegram_chat_id: non_empty(env::var("TELEGRAM_CHAT_ID").ok()),
            nowpayments_api_key: non_empty(env::var("NOWPAYMENTS_API_KEY").ok()),
            pay_currency: env::var("PAY_CURRENCY").unwrap_or_else(|_| "usdttrc20".to_string()),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
        }
    }

    pub fn vault_path(&self) -> PathBuf {
        self.data_dir.join("client_vault.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("billing_log.csv")
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
