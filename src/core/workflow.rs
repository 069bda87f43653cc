use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::core::agents::{agent_config, AgentKind};
use crate::core::brain::Brain;
use crate::core::metrics;
use crate::core::safety::{ContentSafety, FixType, RiskLevel, SafetyLayer};
use crate::error::DeskError;
use crate::tools::billing::BillingSystem;
use crate::tools::fixer::{DatabaseFixer, DatabaseKind};
use crate::tools::vault::ClientVault;

/// Lifecycle of a background request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestPhase {
    Queued,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl RequestPhase {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestPhase::Completed | RequestPhase::Failed | RequestPhase::Skipped
        )
    }
}

/// Current state of one background request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestState {
    pub status: RequestPhase,
    pub agent: String,
    pub message: String,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Finished requests stay queryable for an hour after their last update,
/// then age out so the map stays bounded on a long-running service.
const TERMINAL_TTL_SECS: i64 = 3600;

/// In-memory registry of background request statuses, queryable over HTTP.
#[derive(Default)]
pub struct RequestRegistry {
    inner: DashMap<String, RequestState>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: &str, agent: &str, status: RequestPhase, message: impl Into<String>) {
        self.prune_expired(Duration::seconds(TERMINAL_TTL_SECS));
        self.inner.insert(
            id.to_string(),
            RequestState {
                status,
                agent: agent.to_string(),
                message: message.into(),
                updated_at: Utc::now(),
                result: None,
            },
        );
    }

    pub fn complete(&self, id: &str, agent: &str, message: impl Into<String>, result: Value) {
        self.prune_expired(Duration::seconds(TERMINAL_TTL_SECS));
        self.inner.insert(
            id.to_string(),
            RequestState {
                status: RequestPhase::Completed,
                agent: agent.to_string(),
                message: message.into(),
                updated_at: Utc::now(),
                result: Some(result),
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<RequestState> {
        self.inner.get(id).map(|entry| entry.clone())
    }

    /// Drop terminal entries whose last update is older than `ttl`. In-flight
    /// entries are never evicted.
    pub fn prune_expired(&self, ttl: Duration) {
        let cutoff = Utc::now() - ttl;
        self.inner
            .retain(|_, state| !state.status.is_terminal() || state.updated_at > cutoff);
    }
}

/// Everything the pipelines need, shared across handlers and background tasks.
pub struct Services {
    pub config: Config,
    pub brain: Brain,
    pub safety: SafetyLayer,
    pub content_safety: ContentSafety,
    pub vault: ClientVault,
    pub billing: BillingSystem,
    pub fixer: DatabaseFixer,
    pub requests: RequestRegistry,
}

/// A queued database-fix job.
#[derive(Debug, Clone)]
pub struct FixJob {
    pub fix_id: String,
    pub client_id: String,
    pub company_name: String,
    pub error_message: String,
    pub additional_context: Option<String>,
    pub database_type: String,
    pub connection_string: String,
}

/// A queued non-database agent job.
#[derive(Debug, Clone)]
pub struct AgentJob {
    pub request_id: String,
    pub client_id: String,
    pub company_name: String,
    pub kind: AgentKind,
    pub data: Value,
    pub context: Option<String>,
}

/// The complete fix pipeline: analyze, generate, sandbox, apply, bill.
pub async fn process_fix(services: Arc<Services>, job: FixJob) {
    let agent = AgentKind::DatabaseFixer.wire_name();
    let start = Instant::now();
    services
        .requests
        .set(&job.fix_id, agent, RequestPhase::Processing, "Analyzing error");

    if let Err(e) = run_fix_pipeline(&services, &job, start).await {
        warn!("[{}] fix pipeline error: {e}", job.fix_id);
        services.requests.set(
            &job.fix_id,
            agent,
            RequestPhase::Failed,
            format!("Pipeline error: {e}"),
        );
    }
}

async fn run_fix_pipeline(
    services: &Services,
    job: &FixJob,
    start: Instant,
) -> Result<(), DeskError> {
    let agent = AgentKind::DatabaseFixer.wire_name();
    let skip = |message: String| {
        services
            .requests
            .set(&job.fix_id, agent, RequestPhase::Skipped, message);
    };

    info!("[{}] analyzing error", job.fix_id);
    let analysis = services.brain.analyze_error(&job.error_message).await?;

    if !analysis.is_fixable {
        info!("[{}] not automatically fixable: {}", job.fix_id, analysis.reason);
        skip(format!("Not automatically fixable: {}", analysis.reason));
        return Ok(());
    }
    if analysis.requires_human {
        info!("[{}] requires human review, skipping", job.fix_id);
        skip("Requires human review".to_string());
        return Ok(());
    }

    let db_kind = DatabaseKind::from_wire(&job.database_type)?;
    let schema = services
        .fixer
        .get_schema(db_kind, &job.connection_string)
        .unwrap_or_else(|e| {
            warn!("[{}] schema fetch failed: {e}", job.fix_id);
            None
        });

    info!("[{}] generating fix", job.fix_id);
    let plan = services
        .brain
        .generate_fix(
            &job.error_message,
            schema.as_deref(),
            job.additional_context.as_deref(),
        )
        .await?;
    let fix_type = FixType::from_wire(&plan.fix_type)?;

    info!("[{}] testing fix in sandbox", job.fix_id);
    let dry_run = services
        .safety
        .dry_run(&plan.code, fix_type, schema.as_deref(), None);

    if !services.safety.green_light(&dry_run, RiskLevel::Medium) {
        warn!("[{}] safety check FAILED: {}", job.fix_id, dry_run.message);
        metrics::SAFETY_REJECTIONS_TOTAL.with_label_values(&[agent]).inc();
        skip(format!("Safety check failed: {}", dry_run.message));
        return Ok(());
    }

    info!("[{}] safety check passed, applying fix", job.fix_id);
    let outcome = services
        .fixer
        .apply_fix(&plan.code, fix_type, db_kind, &job.connection_string);

    if !outcome.success {
        warn!(
            "[{}] fix failed to apply: {}",
            job.fix_id,
            outcome.error.as_deref().unwrap_or("unknown")
        );
        services.requests.set(
            &job.fix_id,
            agent,
            RequestPhase::Failed,
            format!(
                "Fix failed to apply: {}",
                outcome.error.as_deref().unwrap_or("unknown")
            ),
        );
        return Ok(());
    }

    let execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
    let record = services
        .billing
        .log_success(
            &job.client_id,
            &job.company_name,
            &job.fix_id,
            &plan.fix_type,
            &job.error_message,
            execution_time_ms,
            outcome.rows_affected,
            None,
        )
        .await?;

    services
        .vault
        .update_client_stats(&job.client_id, record.amount_usd)
        .await;
    metrics::OUTCOMES_TOTAL.with_label_values(&[agent]).inc();
    metrics::EARNINGS_CENTS.inc_by((record.amount_usd * 100.0).round() as u64);

    info!("[{}] complete, earned ${:.2}", job.fix_id, record.amount_usd);
    services.requests.complete(
        &job.fix_id,
        agent,
        format!("Fix applied, {} rows affected", outcome.rows_affected),
        serde_json::json!({
            "rows_affected": outcome.rows_affected,
            "execution_time_ms": execution_time_ms,
            "amount_charged": record.amount_usd,
            "explanation": plan.explanation,
        }),
    );
    Ok(())
}

/// Universal pipeline for support, sales, appointment, and email agents.
pub async fn process_agent_request(services: Arc<Services>, job: AgentJob) {
    let agent = job.kind.wire_name();
    let start = Instant::now();
    services.requests.set(
        &job.request_id,
        agent,
        RequestPhase::Processing,
        "Processing request",
    );

    if let Err(e) = run_agent_pipeline(&services, &job, start).await {
        warn!("[{}] agent pipeline error: {e}", job.request_id);
        services.requests.set(
            &job.request_id,
            agent,
            RequestPhase::Failed,
            format!("Pipeline error: {e}"),
        );
    }
}

async fn run_agent_pipeline(
    services: &Services,
    job: &AgentJob,
    start: Instant,
) -> Result<(), DeskError> {
    let config = agent_config(job.kind);
    let agent = job.kind.wire_name();

    info!("[{}] processing {} request", job.request_id, config.name);
    let mut response = services
        .brain
        .process_request(config, &job.data, job.context.as_deref())
        .await?;

    // The reply field varies per agent; check whichever is present.
    let reply_text = ["response_to_customer", "response_to_lead", "email_body", "response_to_client"]
        .iter()
        .find_map(|field| response.get(*field).and_then(Value::as_str))
        .map(|s| s.to_string());

    if let Some(reply) = &reply_text {
        let check = services.content_safety.check_content(
            reply,
            config.forbidden_words,
            config.required_tone,
            config.max_response_length,
        );
        if !services.content_safety.green_light(&check) {
            warn!(
                "[{}] content safety check FAILED: {:?}",
                job.request_id, check.issues_found
            );
            metrics::SAFETY_REJECTIONS_TOTAL.with_label_values(&[agent]).inc();
            services.requests.set(
                &job.request_id,
                agent,
                RequestPhase::Skipped,
                format!("Content safety failed: {}", check.message),
            );
            return Ok(());
        }
    }

    if !services.brain.outcome_success(&response, config) {
        info!("[{}] outcome not successful, no billing", job.request_id);
        services.requests.complete(
            &job.request_id,
            agent,
            "Outcome not reached, client not billed",
            response,
        );
        return Ok(());
    }

    let execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
    info!("[{}] success, logging billing", job.request_id);

    let record = services
        .billing
        .log_success(
            &job.client_id,
            &job.company_name,
            &job.request_id,
            agent,
            &job.data.to_string(),
            execution_time_ms,
            0,
            Some(config.price_per_outcome),
        )
        .await?;

    let description = format!(
        "{}: {}",
        config.name,
        job.data.to_string().chars().take(50).collect::<String>()
    );
    if let Some(payment_url) = services
        .billing
        .create_invoice(config.price_per_outcome, &job.request_id, &description)
        .await
    {
        info!("[{}] invoice created: {}", job.request_id, payment_url);
        if let Some(object) = response.as_object_mut() {
            object.insert("payment_url".to_string(), Value::String(payment_url));
        }
    }

    services
        .vault
        .update_client_stats(&job.client_id, record.amount_usd)
        .await;
    metrics::OUTCOMES_TOTAL.with_label_values(&[agent]).inc();
    metrics::EARNINGS_CENTS.inc_by((record.amount_usd * 100.0).round() as u64);

    info!("[{}] complete, earned ${:.2}", job.request_id, record.amount_usd);
    services.requests.complete(
        &job.request_id,
        agent,
        format!("Outcome reached, billed ${:.2}", record.amount_usd),
        response,
    );
    Ok(())
}
