use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::Utc;
use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::DeskError;

/// A registered client of the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    pub company_name: String,
    pub api_key_hash: String,
    pub webhook_secret: String,
    /// "sqlite", "postgres", "mysql"
    pub database_type: String,
    pub connection_string_encrypted: String,
    pub is_active: bool,
    pub created_at: String,
    #[serde(default)]
    pub last_activity: Option<String>,
    #[serde(default)]
    pub total_fixes: u64,
    #[serde(default)]
    pub total_billed: f64,
    #[serde(default = "default_plan")]
    pub plan: String,
}

fn default_plan() -> String {
    "per-fix".to_string()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VaultData {
    clients: HashMap<String, Client>,
    /// SHA-256(api key) -> client_id
    api_keys: HashMap<String, String>,
}

/// Credential store for clients. A small JSON file on disk, mirrored in
/// memory; every mutation is persisted before returning.
pub struct ClientVault {
    path: PathBuf,
    encryption_key: String,
    data: RwLock<VaultData>,
}

impl ClientVault {
    pub fn open(path: impl AsRef<Path>, encryption_key: String) -> Result<Self, DeskError> {
        let path = path.as_ref().to_path_buf();

        let data = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)
                .map_err(|e| DeskError::Vault(format!("corrupt vault file: {e}")))?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let empty = VaultData::default();
            fs::write(&path, serde_json::to_string_pretty(&empty)?)?;
            empty
        };

        Ok(Self {
            path,
            encryption_key,
            data: RwLock::new(data),
        })
    }

    /// Register a new client. Returns `(client_id, api_key)` — the API key is
    /// returned exactly once and only its hash is stored.
    pub async fn register_client(
        &self,
        company_name: &str,
        database_type: &str,
        connection_string: &str,
        plan: &str,
    ) -> Result<(String, String), DeskError> {
        let client_id = format!("client_{}", random_hex(8));
        let api_key = format!("amp_{}", random_urlsafe(32));
        let webhook_secret = random_urlsafe(16);

        let client = Client {
            client_id: client_id.clone(),
            company_name: company_name.to_string(),
            api_key_hash: hash_api_key(&api_key),
            webhook_secret,
            database_type: database_type.to_string(),
            connection_string_encrypted: xor_encrypt(connection_string, &self.encryption_key),
            is_active: true,
            created_at: Utc::now().to_rfc3339(),
            last_activity: None,
            total_fixes: 0,
            total_billed: 0.0,
            plan: plan.to_string(),
        };

        {
            let mut data = self.data.write().await;
            data.api_keys
                .insert(client.api_key_hash.clone(), client_id.clone());
            data.clients.insert(client_id.clone(), client);
            self.persist(&data)?;
        }

        info!("registered client {} ({})", client_id, company_name);
        Ok((client_id, api_key))
    }

    /// Verify an API key. Inactive clients are rejected; a successful lookup
    /// refreshes last_activity.
    pub async fn verify_client(&self, api_key: &str) -> Option<Client> {
        let hash = hash_api_key(api_key);
        let mut data = self.data.write().await;

        let client_id = data.api_keys.get(&hash)?.clone();
        let client = data.clients.get_mut(&client_id)?;
        if !client.is_active {
            return None;
        }

        client.last_activity = Some(Utc::now().to_rfc3339());
        let snapshot = client.clone();
        if let Err(e) = self.persist(&data) {
            warn!("vault persist failed after verification: {e}");
        }
        Some(snapshot)
    }

    /// Whether an API key maps to any client at all, active or not. Used to
    /// tell an unknown key apart from a deactivated account.
    pub async fn key_known(&self, api_key: &str) -> bool {
        let hash = hash_api_key(api_key);
        self.data.read().await.api_keys.contains_key(&hash)
    }

    pub async fn client_by_id(&self, client_id: &str) -> Option<Client> {
        self.data.read().await.clients.get(client_id).cloned()
    }

    /// Update totals after a successful billing event.
    pub async fn update_client_stats(&self, client_id: &str, amount_billed: f64) {
        let mut data = self.data.write().await;
        if let Some(client) = data.clients.get_mut(client_id) {
            client.total_fixes += 1;
            client.total_billed += amount_billed;
            client.last_activity = Some(Utc::now().to_rfc3339());
            if let Err(e) = self.persist(&data) {
                warn!("vault persist failed after stats update: {e}");
            }
        }
    }

    /// Deactivate a client, e.g. for non-payment.
    pub async fn deactivate_client(&self, client_id: &str) -> bool {
        let mut data = self.data.write().await;
        match data.clients.get_mut(client_id) {
            Some(client) => {
                client.is_active = false;
                if let Err(e) = self.persist(&data) {
                    warn!("vault persist failed after deactivation: {e}");
                }
                true
            }
            None => false,
        }
    }

    pub async fn list_active_clients(&self) -> Vec<Client> {
        let data = self.data.read().await;
        let mut clients: Vec<Client> = data
            .clients
            .values()
            .filter(|c| c.is_active)
            .cloned()
            .collect();
        clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        clients
    }

    /// Decrypt the client's database connection string.
    pub fn decrypted_connection(&self, client: &Client) -> Result<String, DeskError> {
        xor_decrypt(&client.connection_string_encrypted, &self.encryption_key)
    }

    fn persist(&self, data: &VaultData) -> Result<(), DeskError> {
        fs::write(&self.path, serde_json::to_string_pretty(data)?)?;
        Ok(())
    }
}

fn hash_api_key(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(buf.as_mut_slice());
    buf.iter().map(|b| format!("{:02x}", b)).collect()
}

fn random_urlsafe(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(buf.as_mut_slice());
    URL_SAFE_NO_PAD.encode(buf)
}

// Connection strings are XOR-obfuscated and base64-encoded at rest.
// TODO: move to aes-gcm once key rotation for existing vault files is
// worked out.
fn xor_encrypt(data: &str, key: &str) -> String {
    let mixed: Vec<u8> = data
        .as_bytes()
        .iter()
        .zip(key.as_bytes().iter().cycle())
        .map(|(a, b)| a ^ b)
        .collect();
    STANDARD.encode(mixed)
}

fn xor_decrypt(data: &str, key: &str) -> Result<String, DeskError> {
    let raw = STANDARD
        .decode(data)
        .map_err(|e| DeskError::Vault(format!("invalid encrypted payload: {e}")))?;
    let plain: Vec<u8> = raw
        .iter()
        .zip(key.as_bytes().iter().cycle())
        .map(|(a, b)| a ^ b)
        .collect();
    String::from_utf8(plain).map_err(|e| DeskError::Vault(format!("decryption failed: {e}")))
}
