use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::agents::{agent_config, AgentConfig, AgentKind};
use crate::error::DeskError;

const OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// One chat-completion call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Shown to OpenRouter as the X-Title header
    pub title: String,
}

/// Seam between the workflows and the model provider, so pipelines can be
/// exercised in tests without network access.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<String, DeskError>;
}

/// Production backend talking to OpenRouter.
pub struct OpenRouterBackend {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
}

impl OpenRouterBackend {
    pub fn new(api_key: Option<String>, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            endpoint: OPENROUTER_ENDPOINT.to_string(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl LlmBackend for OpenRouterBackend {
    async fn chat(&self, request: ChatRequest) -> Result<String, DeskError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| DeskError::Config("OPENROUTER_API_KEY not set".to_string()))?;

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.user}));

        let payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .timeout(Duration::from_secs(60))
            .bearer_auth(api_key)
            .header("HTTP-Referer", "https://outcome-desk.local")
            .header("X-Title", request.title)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                DeskError::ModelResponse("completion missing message content".to_string())
            })
    }
}

/// Quick triage of an incoming error report.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorAnalysis {
    #[serde(default)]
    pub is_fixable: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub requires_human: bool,
    #[serde(default)]
    pub reason: String,
}

/// A generated fix, ready for the safety layer.
#[derive(Debug, Clone, Deserialize)]
pub struct FixPlan {
    pub fix_type: String,
    pub code: String,
    pub explanation: String,
    pub risk_level: String,
    #[serde(default)]
    pub estimated_rows_affected: Option<i64>,
    #[serde(default)]
    pub verification_query: Option<String>,
    #[serde(default)]
    pub rollback_code: Option<String>,
}

/// The intelligence layer: builds prompts, parses structured model replies.
pub struct Brain {
    backend: Arc<dyn LlmBackend>,
}

impl Brain {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }

    /// Decide whether an error is worth attempting automatically.
    pub async fn analyze_error(&self, error_message: &str) -> Result<ErrorAnalysis, DeskError> {
        let user = format!(
            "Analyze this database error and categorize it:\n\n\
             ERROR: {error_message}\n\n\
             Respond with JSON only:\n\
             {{\n\
                 \"is_fixable\": true/false (can an automated system safely fix this?),\n\
                 \"category\": \"data_integrity\", \"schema\", \"performance\", \"connection\", or \"unknown\",\n\
                 \"confidence\": 0.0 to 1.0,\n\
                 \"requires_human\": true/false (does this need human review?),\n\
                 \"reason\": \"brief explanation\"\n\
             }}"
        );

        let content = self
            .backend
            .chat(ChatRequest {
                system: None,
                user,
                temperature: 0.1,
                max_tokens: 500,
                title: "Outcome Desk".to_string(),
            })
            .await?;

        parse_model_json(&content)
    }

    /// Generate a fix for an error, with optional schema and caller context.
    pub async fn generate_fix(
        &self,
        error_message: &str,
        database_schema: Option<&str>,
        context: Option<&str>,
    ) -> Result<FixPlan, DeskError> {
        let config = agent_config(AgentKind::DatabaseFixer);

        let mut user = format!("DATABASE ERROR REPORT:\n{error_message}\n");
        if let Some(schema) = database_schema {
            user.push_str(&format!("\nSCHEMA CONTEXT:\n{schema}\n"));
        }
        if let Some(extra) = context {
            user.push_str(&format!("\nADDITIONAL CONTEXT:\n{extra}\n"));
        }
        user.push_str(&format!(
            "\nGenerate a fix. Respond ONLY with valid JSON in this exact format:\n{}",
            serde_json::to_string_pretty(&config.response_format)?
        ));

        let content = self
            .backend
            .chat(ChatRequest {
                system: Some(config.system_prompt.to_string()),
                user,
                temperature: 0.2,
                max_tokens: 2000,
                title: "Outcome Desk".to_string(),
            })
            .await?;

        parse_model_json(&content)
    }

    /// Universal processor used by every non-database agent.
    pub async fn process_request(
        &self,
        config: &AgentConfig,
        input: &Value,
        context: Option<&str>,
    ) -> Result<Value, DeskError> {
        let mut user = format!(
            "INPUT DATA:\n{}\n",
            serde_json::to_string_pretty(input)?
        );
        if let Some(extra) = context {
            user.push_str(&format!("\nADDITIONAL CONTEXT:\n{extra}\n"));
        }
        user.push_str(&format!(
            "\nRespond with JSON matching this exact format:\n{}",
            serde_json::to_string_pretty(&config.response_format)?
        ));

        let content = self
            .backend
            .chat(ChatRequest {
                system: Some(config.system_prompt.to_string()),
                user,
                temperature: 0.3,
                max_tokens: config.max_response_length as u32,
                title: format!("Outcome Desk - {}", config.name),
            })
            .await?;

        let mut response: Value = parse_model_json(&content)?;
        if let Some(object) = response.as_object_mut() {
            object.insert("_agent_type".to_string(), json!(config.kind.wire_name()));
            object.insert("_price".to_string(), json!(config.price_per_outcome));
        }
        debug!("{} produced response", config.kind.wire_name());

        Ok(response)
    }

    /// Did the agent reach its billable outcome?
    pub fn outcome_success(&self, response: &Value, config: &AgentConfig) -> bool {
        match response.get(config.outcome_field) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(text)) => text.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

/// Models often wrap JSON replies in markdown fences; strip them first.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    for fence in ["```json", "```"] {
        if let Some(rest) = trimmed.split_once(fence).map(|(_, rest)| rest) {
            if let Some((inner, _)) = rest.split_once("```") {
                return inner.trim();
            }
            return rest.trim();
        }
    }
    trimmed
}

fn parse_model_json<T: serde::de::DeserializeOwned>(content: &str) -> Result<T, DeskError> {
    let cleaned = strip_code_fences(content);
    serde_json::from_str(cleaned)
        .map_err(|e| DeskError::ModelResponse(format!("{e}: {cleaned}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedBackend {
        reply: String,
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn chat(&self, _request: ChatRequest) -> Result<String, DeskError> {
            Ok(self.reply.clone())
        }
    }

    fn brain_with_reply(reply: &str) -> Brain {
        Brain::new(Arc::new(ScriptedBackend {
            reply: reply.to_string(),
        }))
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("text ```\n{\"a\": 1}\n``` more"), "{\"a\": 1}");
    }

    #[tokio::test]
    async fn test_analyze_error_parses_fenced_json() {
        let brain = brain_with_reply(
            "```json\n{\"is_fixable\": true, \"category\": \"schema\", \
             \"confidence\": 0.9, \"requires_human\": false, \"reason\": \"missing column\"}\n```",
        );
        let analysis = brain.analyze_error("no such column: email").await.unwrap();
        assert!(analysis.is_fixable);
        assert_eq!(analysis.category, "schema");
        assert!(!analysis.requires_human);
    }

    #[tokio::test]
    async fn test_generate_fix_requires_core_fields() {
        let brain = brain_with_reply("{\"fix_type\": \"sql\"}");
        let err = brain.generate_fix("boom", None, None).await.unwrap_err();
        assert!(matches!(err, DeskError::ModelResponse(_)));
    }

    #[tokio::test]
    async fn test_process_request_injects_metadata() {
        let brain = brain_with_reply(
            "{\"response_to_customer\": \"Absolutely, happy to help!\", \"is_resolved\": true}",
        );
        let config = agent_config(AgentKind::CustomerSupport);
        let response = brain
            .process_request(config, &json!({"issue": "login broken"}), None)
            .await
            .unwrap();
        assert_eq!(response["_agent_type"], "customer_support");
        assert_eq!(response["_price"], 0.99);
        assert!(brain.outcome_success(&response, config));
    }

    #[test]
    fn test_outcome_success_accepts_string_booleans() {
        let brain = brain_with_reply("{}");
        let config = agent_config(AgentKind::SalesAgent);
        assert!(brain.outcome_success(&json!({"meeting_booked": "TRUE"}), config));
        assert!(!brain.outcome_success(&json!({"meeting_booked": "no"}), config));
        assert!(!brain.outcome_success(&json!({}), config));
    }

    #[tokio::test]
    async fn test_openrouter_requires_key() {
        let backend = OpenRouterBackend::new(None, "deepseek/deepseek-chat".to_string());
        let err = backend
            .chat(ChatRequest {
                system: None,
                user: "hi".to_string(),
                temperature: 0.1,
                max_tokens: 10,
                title: "t".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::Config(_)));
    }
}
