use std::collections::BTreeMap;
use std::fmt::{self, Display};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::DeskError;

/// The agent personalities the service can run on behalf of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    DatabaseFixer,
    CustomerSupport,
    SalesAgent,
    AppointmentSetter,
    EmailResponder,
}

impl AgentKind {
    /// Wire name used in URLs and JSON payloads.
    pub fn wire_name(&self) -> &'static str {
        match self {
            AgentKind::DatabaseFixer => "database_fixer",
            AgentKind::CustomerSupport => "customer_support",
            AgentKind::SalesAgent => "sales_agent",
            AgentKind::AppointmentSetter => "appointment_setter",
            AgentKind::EmailResponder => "email_responder",
        }
    }

    pub fn from_wire(name: &str) -> Result<Self, DeskError> {
        match name {
            "database_fixer" => Ok(AgentKind::DatabaseFixer),
            "customer_support" => Ok(AgentKind::CustomerSupport),
            "sales_agent" => Ok(AgentKind::SalesAgent),
            "appointment_setter" => Ok(AgentKind::AppointmentSetter),
            "email_responder" => Ok(AgentKind::EmailResponder),
            other => Err(DeskError::InvalidInput(format!(
                "unknown agent type: {}",
                other
            ))),
        }
    }
}

impl Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// Tone the content safety layer enforces on an agent's replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Technical,
    Professional,
    Friendly,
}

/// Full configuration for one agent type.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub kind: AgentKind,
    pub name: &'static str,
    pub description: &'static str,
    pub system_prompt: &'static str,
    /// Billed to the client each time the outcome field reports success
    pub price_per_outcome: f64,
    /// JSON field in the model reply that decides whether to bill
    pub outcome_field: &'static str,
    pub forbidden_words: &'static [&'static str],
    pub required_tone: Tone,
    pub max_response_length: usize,
    /// Shape the model is instructed to reply with
    pub response_format: Value,
}

lazy_static! {
    static ref REGISTRY: BTreeMap<AgentKind, AgentConfig> = {
        let mut agents = BTreeMap::new();

        agents.insert(AgentKind::DatabaseFixer, AgentConfig {
            kind: AgentKind::DatabaseFixer,
            name: "Database Fixer",
            description: "Fixes database errors automatically",
            price_per_outcome: 5.00,
            outcome_field: "fix_applied",
            forbidden_words: &[],
            required_tone: Tone::Technical,
            max_response_length: 2000,
            system_prompt: "You are an expert database repair AI. Your job is to:\n\
                1. Analyze database errors sent by automated systems\n\
                2. Generate SAFE, minimal fixes that solve the specific problem\n\
                3. Always prefer SELECT before UPDATE/DELETE to verify scope\n\
                4. Never drop tables or delete data unless explicitly required\n\
                5. Return fixes in a structured JSON format\n\n\
                CRITICAL SAFETY RULES:\n\
                - Always add WHERE clauses to UPDATE/DELETE statements\n\
                - Limit affected rows when possible\n\
                - Prefer reversible operations\n\
                - Include rollback instructions for risky operations",
            response_format: json!({
                "fix_type": "sql or python",
                "code": "the actual fix code",
                "explanation": "what this fix does and why",
                "risk_level": "low, medium, or high",
                "estimated_rows_affected": "number",
                "verification_query": "SQL to verify the fix worked",
                "rollback_code": "code to undo the fix if needed"
            }),
        });

        agents.insert(AgentKind::CustomerSupport, AgentConfig {
            kind: AgentKind::CustomerSupport,
            name: "Customer Support Agent",
            description: "Resolves customer inquiries and issues",
            price_per_outcome: 0.99,
            outcome_field: "is_resolved",
            forbidden_words: &[
                "I can't help",
                "not my problem",
                "figure it out yourself",
                "stupid",
                "idiot",
                "complain to someone else",
            ],
            required_tone: Tone::Friendly,
            max_response_length: 500,
            system_prompt: "You are a friendly and professional customer support agent. Your job is to:\n\
                1. Understand the customer's issue completely\n\
                2. Provide a clear, helpful solution\n\
                3. Be empathetic and patient\n\
                4. Offer alternatives if the first solution doesn't work\n\
                5. Always end with confirming the customer is satisfied\n\n\
                RULES:\n\
                - Never be rude or dismissive\n\
                - Always acknowledge the customer's frustration\n\
                - Provide step-by-step instructions when needed\n\
                - If you can't solve it, escalate politely\n\
                - Keep responses concise but complete\n\
                - IMPORTANT: Always use friendly words like 'awesome', 'great', 'absolutely', or 'no problem' and use exclamation marks to show energy!\n\
                - CRITICAL: If you have answered the customer's question completely, you MUST set 'is_resolved' to true so the system can log the success.",
            response_format: json!({
                "response_to_customer": "Your friendly reply message",
                "is_resolved": "true/false - did we solve their problem?",
                "resolution_type": "refund, replacement, information, escalation",
                "action_taken": "what you did to help them",
                "follow_up_needed": "true/false",
                "sentiment": "positive, neutral, negative - customer mood after"
            }),
        });

        agents.insert(AgentKind::SalesAgent, AgentConfig {
            kind: AgentKind::SalesAgent,
            name: "Sales Agent",
            description: "Qualifies leads and books appointments",
            price_per_outcome: 2.50,
            outcome_field: "meeting_booked",
            forbidden_words: &[
                "spam",
                "buy now or else",
                "limited time only",
                "act fast",
                "you're missing out",
            ],
            required_tone: Tone::Professional,
            max_response_length: 500,
            system_prompt: "You are a professional sales development representative. Your job is to:\n\
                1. Qualify incoming leads based on their needs\n\
                2. Understand their pain points and budget\n\
                3. Match them with the right product/service\n\
                4. Book meetings with qualified prospects\n\
                5. Nurture relationships for future opportunities\n\n\
                RULES:\n\
                - Never be pushy or aggressive\n\
                - Ask qualifying questions naturally\n\
                - Focus on their problems, not your features\n\
                - Provide value in every interaction\n\
                - Always aim for a next step (meeting, demo, callback)\n\
                - IMPORTANT: Always include professional markers like 'please', 'thank you', 'appreciate', and 'let me know' to maintain professionalism.",
            response_format: json!({
                "response_to_lead": "Your professional reply",
                "lead_score": "1-10 how qualified is this lead",
                "meeting_booked": "true/false",
                "meeting_time": "proposed datetime or null",
                "qualification_notes": "budget, authority, need, timeline",
                "next_action": "follow_up, demo, proposal, nurture, disqualify"
            }),
        });

        agents.insert(AgentKind::AppointmentSetter, AgentConfig {
            kind: AgentKind::AppointmentSetter,
            name: "Appointment Setter",
            description: "Books and confirms appointments",
            price_per_outcome: 1.50,
            outcome_field: "appointment_confirmed",
            forbidden_words: &["cancel", "nevermind", "forget it"],
            required_tone: Tone::Professional,
            max_response_length: 300,
            system_prompt: "You are an efficient appointment scheduling assistant. Your job is to:\n\
                1. Find available time slots that work for both parties\n\
                2. Confirm appointment details clearly\n\
                3. Send reminders and handle rescheduling\n\
                4. Minimize no-shows with confirmations\n\
                5. Handle timezone differences professionally\n\n\
                RULES:\n\
                - Always confirm date, time, and timezone\n\
                - Offer 2-3 time options when possible\n\
                - Send clear confirmation with all details\n\
                - Be flexible with rescheduling requests\n\
                - IMPORTANT: Always use 'please', 'thank you', and 'happy to help' in your responses.",
            response_format: json!({
                "response_to_client": "Your scheduling message",
                "appointment_confirmed": "true/false",
                "appointment_datetime": "ISO datetime string",
                "timezone": "client's timezone",
                "reminder_scheduled": "true/false",
                "meeting_link": "video call link if applicable"
            }),
        });

        agents.insert(AgentKind::EmailResponder, AgentConfig {
            kind: AgentKind::EmailResponder,
            name: "Email Auto-Responder",
            description: "Drafts professional email responses",
            price_per_outcome: 0.50,
            outcome_field: "email_drafted",
            forbidden_words: &["ASAP", "per my last email", "as I mentioned"],
            required_tone: Tone::Professional,
            max_response_length: 600,
            system_prompt: "You are a professional email writing assistant. Your job is to:\n\
                1. Understand the context of the incoming email\n\
                2. Draft a clear, professional response\n\
                3. Match the appropriate tone for the situation\n\
                4. Include all necessary information\n\
                5. End with a clear call-to-action\n\n\
                RULES:\n\
                - Keep emails concise and scannable\n\
                - Use proper email etiquette\n\
                - Avoid jargon unless industry-specific\n\
                - Always include a clear subject line suggestion\n\
                - Proofread for grammar and tone\n\
                - IMPORTANT: Always include 'thank you', 'please', 'appreciate', or 'best regards' for professionalism.",
            response_format: json!({
                "subject_line": "Suggested email subject",
                "email_body": "The full email response",
                "email_drafted": "true/false",
                "tone_used": "formal, friendly, urgent, apologetic",
                "follow_up_date": "when to check back if no reply"
            }),
        });

        agents
    };
}

/// Look up the configuration for an agent type.
pub fn agent_config(kind: AgentKind) -> &'static AgentConfig {
    // The registry holds every variant, so the lookup cannot miss.
    REGISTRY
        .get(&kind)
        .unwrap_or_else(|| panic!("agent registry missing {}", kind.wire_name()))
}

/// Look up an agent configuration by its wire name.
pub fn agent_config_by_name(name: &str) -> Result<&'static AgentConfig, DeskError> {
    Ok(agent_config(AgentKind::from_wire(name)?))
}

/// Summaries of every registered agent, for the `/agents` endpoint.
pub fn list_agents() -> Vec<Value> {
    REGISTRY
        .values()
        .map(|config| {
            json!({
                "type": config.kind.wire_name(),
                "name": config.name,
                "description": config.description,
                "price": config.price_per_outcome,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_name_round_trip() {
        for kind in [
            AgentKind::DatabaseFixer,
            AgentKind::CustomerSupport,
            AgentKind::SalesAgent,
            AgentKind::AppointmentSetter,
            AgentKind::EmailResponder,
        ] {
            assert_eq!(AgentKind::from_wire(kind.wire_name()).unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_wire_name_rejected() {
        assert!(AgentKind::from_wire("crypto_trader").is_err());
        assert!(agent_config_by_name("").is_err());
    }

    #[test]
    fn test_registry_prices() {
        assert_eq!(agent_config(AgentKind::DatabaseFixer).price_per_outcome, 5.00);
        assert_eq!(agent_config(AgentKind::CustomerSupport).price_per_outcome, 0.99);
        assert_eq!(agent_config(AgentKind::SalesAgent).price_per_outcome, 2.50);
        assert_eq!(agent_config(AgentKind::AppointmentSetter).price_per_outcome, 1.50);
        assert_eq!(agent_config(AgentKind::EmailResponder).price_per_outcome, 0.50);
    }

    #[test]
    fn test_list_agents_covers_registry() {
        let listed = list_agents();
        assert_eq!(listed.len(), 5);
        assert!(listed.iter().any(|a| a["type"] == "customer_support"));
    }

    #[test]
    fn test_outcome_fields() {
        assert_eq!(agent_config(AgentKind::CustomerSupport).outcome_field, "is_resolved");
        assert_eq!(agent_config(AgentKind::SalesAgent).outcome_field, "meeting_booked");
        assert_eq!(agent_config(AgentKind::EmailResponder).outcome_field, "email_drafted");
    }
}
