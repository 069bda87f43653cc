use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::DeskError;

/// Risk assessment of a generated fix, ordered from safest to blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Blocked,
}

/// What kind of code the model produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixType {
    Sql,
    Python,
}

impl FixType {
    pub fn from_wire(name: &str) -> Result<Self, DeskError> {
        match name {
            "sql" => Ok(FixType::Sql),
            "python" => Ok(FixType::Python),
            other => Err(DeskError::InvalidInput(format!(
                "unknown fix type: {}",
                other
            ))),
        }
    }
}

/// Outcome of a static check or sandbox dry run.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyResult {
    pub passed: bool,
    pub risk_level: RiskLevel,
    pub message: String,
    pub rows_affected: u64,
    pub dry_run_output: Option<String>,
}

impl SafetyResult {
    fn rejected(risk_level: RiskLevel, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            risk_level,
            message: message.into(),
            rows_affected: 0,
            dry_run_output: None,
        }
    }
}

lazy_static! {
    // DROP TABLE IF EXISTS is allowed for temp tables; scrub it before the
    // DROP TABLE check since the regex crate has no lookahead.
    static ref DROP_IF_EXISTS: Regex =
        Regex::new(r"(?i)\bDROP\s+TABLE\s+IF\s+EXISTS\b").expect("valid regex");

    static ref BLOCKED_SQL: Vec<Regex> = [
        r"(?i)\bDROP\s+DATABASE\b",
        r"(?i)\bDROP\s+TABLE\b",
        r"(?i)\bTRUNCATE\s+TABLE\b",
        r"(?is)\bDELETE\s+FROM\s+\w+\s*;",  // DELETE without WHERE
        r"(?is)--.*DROP",                   // SQL injection attempts
        r"(?i);\s*DROP",
        r"(?i)GRANT\s+ALL",
        r"(?i)CREATE\s+USER",
        r"(?i)ALTER\s+USER",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect();

    static ref BLOCKED_PYTHON: Vec<Regex> = [
        r"(?i)\bos\.system\b",
        r"(?i)\bsubprocess\b",
        r"(?i)\beval\b",
        r"(?i)\bexec\b",
        r"(?i)\b__import__\b",
        r#"(?i)\bopen\s*\([^)]*['"]w['"]"#, // file write
        r"(?i)\brequests\.delete\b",
        r"(?i)\bshutil\.rmtree\b",
        r"(?i)\bos\.remove\b",
        r"(?i)\bos\.unlink\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect();
}

/// The verification layer between the model and a client's database:
/// static analysis first, then a sandboxed dry run.
pub struct SafetyLayer {
    /// A fix touching more rows than this never gets a green light.
    max_rows_affected: u64,
}

impl Default for SafetyLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyLayer {
    pub fn new() -> Self {
        Self {
            max_rows_affected: 10_000,
        }
    }

    /// Static analysis of generated code.
    pub fn validate_code(&self, code: &str, fix_type: FixType) -> SafetyResult {
        let scrubbed;
        let (candidate, patterns): (&str, &Vec<Regex>) = match fix_type {
            FixType::Sql => {
                scrubbed = DROP_IF_EXISTS.replace_all(code, "").into_owned();
                (&scrubbed, &BLOCKED_SQL)
            }
            FixType::Python => (code, &BLOCKED_PYTHON),
        };

        for pattern in patterns.iter() {
            if pattern.is_match(candidate) {
                return SafetyResult::rejected(
                    RiskLevel::Blocked,
                    format!("Blocked pattern detected: {}", pattern.as_str()),
                );
            }
        }

        let mut risk_level = RiskLevel::Low;
        if fix_type == FixType::Sql {
            let upper = code.to_uppercase();
            if upper.contains("UPDATE") && !upper.contains("WHERE") {
                return SafetyResult::rejected(RiskLevel::Blocked, "UPDATE without WHERE clause");
            }
            if upper.contains("DELETE") || upper.contains("ALTER") {
                risk_level = RiskLevel::Medium;
            }
            if upper.contains("DROP") {
                risk_level = RiskLevel::High;
            }
        }

        SafetyResult {
            passed: true,
            risk_level,
            message: "Code passed static analysis".to_string(),
            rows_affected: 0,
            dry_run_output: None,
        }
    }

    /// Execute the fix against a throwaway SQLite database.
    ///
    /// Python fixes cannot be executed natively here and are rejected; only
    /// SQL goes through the sandbox.
    pub fn dry_run(
        &self,
        code: &str,
        fix_type: FixType,
        schema_sql: Option<&str>,
        sample_data_sql: Option<&str>,
    ) -> SafetyResult {
        let static_check = self.validate_code(code, fix_type);
        if !static_check.passed {
            return static_check;
        }

        if fix_type == FixType::Python {
            return SafetyResult::rejected(
                RiskLevel::High,
                "Python fixes cannot be sandboxed in this build",
            );
        }

        let sandbox = match self.run_in_sandbox(code, schema_sql, sample_data_sql) {
            Ok(rows_affected) => rows_affected,
            Err(e) => {
                return SafetyResult::rejected(RiskLevel::High, format!("Dry run failed: {e}"));
            }
        };

        if sandbox > self.max_rows_affected {
            return SafetyResult {
                passed: false,
                risk_level: RiskLevel::High,
                message: format!(
                    "Too many rows affected: {} > {}",
                    sandbox, self.max_rows_affected
                ),
                rows_affected: sandbox,
                dry_run_output: None,
            };
        }

        debug!("dry run affected {} rows", sandbox);
        SafetyResult {
            passed: true,
            risk_level: static_check.risk_level,
            message: "Dry run completed successfully".to_string(),
            rows_affected: sandbox,
            dry_run_output: Some(format!("Affected {} rows", sandbox)),
        }
    }

    fn run_in_sandbox(
        &self,
        code: &str,
        schema_sql: Option<&str>,
        sample_data_sql: Option<&str>,
    ) -> Result<u64, DeskError> {
        let conn = Connection::open_in_memory()?;

        if let Some(schema) = schema_sql {
            conn.execute_batch(schema)?;
        }
        if let Some(sample) = sample_data_sql {
            conn.execute_batch(sample)?;
        }

        let mut rows_affected: u64 = 0;
        for statement in code.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let mut prepared = conn.prepare(statement)?;
            if prepared.column_count() == 0 {
                rows_affected += prepared.execute([])? as u64;
            } else {
                let mut rows = prepared.query([])?;
                while rows.next()?.is_some() {
                    rows_affected += 1;
                }
            }
        }

        Ok(rows_affected)
    }

    /// Final decision before touching a live database.
    pub fn green_light(&self, result: &SafetyResult, risk_tolerance: RiskLevel) -> bool {
        result.passed && result.risk_level <= risk_tolerance
    }
}

// =============================================================================
// CONTENT SAFETY - for support, sales, appointment, and email agents
// =============================================================================

/// Result of a content check on a non-code agent reply.
#[derive(Debug, Clone, Serialize)]
pub struct ContentCheck {
    pub passed: bool,
    pub message: String,
    pub issues_found: Vec<String>,
    pub tone_score: f64,
    pub professionalism_score: f64,
}

const UNIVERSAL_FORBIDDEN: &[&str] = &[
    "kill yourself",
    "go die",
    "i hate you",
    "you're stupid",
    "f**k",
    "shit",
    "damn",
    "crap",
    "idiot",
    "moron",
];

const PROFESSIONAL_INDICATORS: &[&str] = &[
    "thank you",
    "please",
    "appreciate",
    "happy to help",
    "let me know",
    "best regards",
    "sincerely",
];

const FRIENDLY_INDICATORS: &[&str] = &[
    "hey",
    "awesome",
    "great",
    "absolutely",
    "no problem",
    "glad to",
    "happy to",
    "!",
];

const INFORMAL_WORDS: &[&str] = &["gonna", "wanna", "gotta", "dunno", "lol", "lmao", "omg", "wtf"];

/// Quality control for AI-generated text. Stands in for the code sandbox on
/// agents whose output is prose rather than SQL.
#[derive(Default)]
pub struct ContentSafety;

impl ContentSafety {
    pub fn new() -> Self {
        Self
    }

    pub fn check_content(
        &self,
        content: &str,
        forbidden_words: &[&str],
        required_tone: crate::core::agents::Tone,
        max_length: usize,
    ) -> ContentCheck {
        let mut issues = Vec::new();
        let lower = content.to_lowercase();

        for word in UNIVERSAL_FORBIDDEN {
            if lower.contains(&word.to_lowercase()) {
                issues.push(format!("Forbidden word detected: '{}'", word));
            }
        }
        for word in forbidden_words {
            if lower.contains(&word.to_lowercase()) {
                issues.push(format!("Client-forbidden word: '{}'", word));
            }
        }

        let char_count = content.chars().count();
        if char_count > max_length {
            issues.push(format!("Response too long: {} > {}", char_count, max_length));
        }
        if content.trim().chars().count() < 10 {
            issues.push("Response too short or empty".to_string());
        }

        let tone_score = tone_score(content, required_tone);
        let professionalism_score = professionalism_score(content);

        if tone_score < 0.3 {
            issues.push(format!("Tone mismatch: expected '{:?}'", required_tone));
        }
        if matches!(
            required_tone,
            crate::core::agents::Tone::Professional | crate::core::agents::Tone::Friendly
        ) && professionalism_score < 0.2
        {
            issues.push("Response lacks professionalism markers".to_string());
        }

        let passed = issues.is_empty();
        ContentCheck {
            passed,
            message: if passed {
                "Content passed all checks".to_string()
            } else {
                format!("Found {} issues", issues.len())
            },
            issues_found: issues,
            tone_score,
            professionalism_score,
        }
    }

    /// Final decision: send the reply and bill the client?
    pub fn green_light(&self, check: &ContentCheck) -> bool {
        const MIN_TONE_SCORE: f64 = 0.1;
        const MIN_PROF_SCORE: f64 = 0.1;

        check.passed
            && check.tone_score >= MIN_TONE_SCORE
            && check.professionalism_score >= MIN_PROF_SCORE
    }
}

fn tone_score(content: &str, required_tone: crate::core::agents::Tone) -> f64 {
    let lower = content.to_lowercase();
    let indicators = match required_tone {
        crate::core::agents::Tone::Professional | crate::core::agents::Tone::Technical => {
            PROFESSIONAL_INDICATORS
        }
        crate::core::agents::Tone::Friendly => FRIENDLY_INDICATORS,
    };

    let matches = indicators
        .iter()
        .filter(|ind| lower.contains(&ind.to_lowercase()))
        .count() as f64;

    let denominator = (indicators.len() as f64 * 0.3).max(3.0);
    (matches / denominator).min(1.0)
}

fn professionalism_score(content: &str) -> f64 {
    let lower = content.to_lowercase();

    let positive = PROFESSIONAL_INDICATORS
        .iter()
        .filter(|ind| lower.contains(&ind.to_lowercase()))
        .count() as f64;
    let negative = INFORMAL_WORDS
        .iter()
        .filter(|word| lower.contains(*word))
        .count() as f64;

    (0.5 + positive * 0.2 - negative * 0.3).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agents::Tone;

    #[test]
    fn test_drop_table_blocked_but_if_exists_allowed() {
        let safety = SafetyLayer::new();
        let blocked = safety.validate_code("DROP TABLE users", FixType::Sql);
        assert!(!blocked.passed);
        assert_eq!(blocked.risk_level, RiskLevel::Blocked);

        let allowed = safety.validate_code(
            "DROP TABLE IF EXISTS tmp_backup; SELECT 1",
            FixType::Sql,
        );
        assert!(allowed.passed);
    }

    #[test]
    fn test_update_without_where_blocked() {
        let safety = SafetyLayer::new();
        let result = safety.validate_code("UPDATE users SET active = 1", FixType::Sql);
        assert!(!result.passed);
        assert_eq!(result.risk_level, RiskLevel::Blocked);
    }

    #[test]
    fn test_delete_raises_risk_to_medium() {
        let safety = SafetyLayer::new();
        let result = safety.validate_code(
            "DELETE FROM sessions WHERE expired = 1",
            FixType::Sql,
        );
        assert!(result.passed);
        assert_eq!(result.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_grant_all_blocked() {
        let safety = SafetyLayer::new();
        let result = safety.validate_code("GRANT ALL ON db.* TO 'x'", FixType::Sql);
        assert!(!result.passed);
    }

    #[test]
    fn test_python_dangerous_patterns_blocked() {
        let safety = SafetyLayer::new();
        let result = safety.validate_code("import subprocess", FixType::Python);
        assert!(!result.passed);
        let result = safety.validate_code("os.system('rm -rf /')", FixType::Python);
        assert!(!result.passed);
    }

    #[test]
    fn test_dry_run_counts_affected_rows() {
        let safety = SafetyLayer::new();
        let schema = "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT);";
        let sample = "INSERT INTO users (email) VALUES ('a@x.com'), (NULL), (NULL);";
        let result = safety.dry_run(
            "UPDATE users SET email = 'unknown@x.com' WHERE email IS NULL",
            FixType::Sql,
            Some(schema),
            Some(sample),
        );
        assert!(result.passed, "{}", result.message);
        assert_eq!(result.rows_affected, 2);
    }

    #[test]
    fn test_dry_run_reports_sql_errors() {
        let safety = SafetyLayer::new();
        let result = safety.dry_run(
            "UPDATE missing_table SET x = 1 WHERE id = 1",
            FixType::Sql,
            None,
            None,
        );
        assert!(!result.passed);
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_dry_run_rejects_python() {
        let safety = SafetyLayer::new();
        let result = safety.dry_run("rows_affected = 0", FixType::Python, None, None);
        assert!(!result.passed);
    }

    #[test]
    fn test_green_light_honors_tolerance() {
        let safety = SafetyLayer::new();
        let medium = SafetyResult {
            passed: true,
            risk_level: RiskLevel::Medium,
            message: String::new(),
            rows_affected: 1,
            dry_run_output: None,
        };
        assert!(safety.green_light(&medium, RiskLevel::Medium));
        assert!(!safety.green_light(&medium, RiskLevel::Low));

        let failed = SafetyResult::rejected(RiskLevel::Low, "nope");
        assert!(!safety.green_light(&failed, RiskLevel::High));
    }

    #[test]
    fn test_content_forbidden_word_fails() {
        let content_safety = ContentSafety::new();
        let check = content_safety.check_content(
            "That is not my problem, please contact someone else. Thank you!",
            &["not my problem"],
            Tone::Friendly,
            500,
        );
        assert!(!check.passed);
        assert!(check.issues_found.iter().any(|i| i.contains("not my problem")));
    }

    #[test]
    fn test_content_friendly_reply_passes() {
        let content_safety = ContentSafety::new();
        let check = content_safety.check_content(
            "Absolutely, no problem! I'd be happy to help you reset that password. Thank you for your patience!",
            &[],
            Tone::Friendly,
            500,
        );
        assert!(check.passed, "{:?}", check.issues_found);
        assert!(content_safety.green_light(&check));
    }

    #[test]
    fn test_content_too_long_fails() {
        let content_safety = ContentSafety::new();
        let long_reply = format!("thank you please appreciate {}", "x".repeat(600));
        let check = content_safety.check_content(&long_reply, &[], Tone::Professional, 500);
        assert!(!check.passed);
    }

    #[test]
    fn test_length_budget_counts_chars_not_bytes() {
        let content_safety = ContentSafety::new();
        // 427 chars but 827 bytes; must fit a 500-char budget.
        let reply = format!("Absolutely, happy to help! {}", "é".repeat(400));
        let check = content_safety.check_content(&reply, &[], Tone::Friendly, 500);
        assert!(
            !check.issues_found.iter().any(|i| i.contains("too long")),
            "{:?}",
            check.issues_found
        );
        assert!(check.passed, "{:?}", check.issues_found);
    }

    #[test]
    fn test_informal_words_lower_professionalism() {
        let base = professionalism_score("thank you, please let me know");
        let slangy = professionalism_score("thank you, please let me know lol omg");
        assert!(slangy < base);
    }
}
