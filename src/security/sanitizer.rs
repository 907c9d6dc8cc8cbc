//! Blocklist input sanitizer and shape validators.
//!
//! Every catalogue pattern is compiled case-insensitively once per process.
//! `sanitize` guarantees that its output holds no verbatim match of any
//! catalogue entry; stripping repeats until nothing matches because a removal
//! can splice two fragments into a fresh match.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_MAX_LENGTH: usize = 1000;

/// (pattern, description) in catalogue order
const CATALOGUE: [(&str, &str); 24] = [
    (r"(\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC|EXECUTE)\b)", "SQL DML commands detected"),
    (r"(\b(UNION|OR|AND)\s+\d+\s*=\s*\d+)", "Boolean-based injection pattern"),
    (r"(\b(UNION)\s+(ALL\s+)?SELECT)", "UNION-based injection pattern"),
    (r"(--|#|/\*|\*/)", "SQL comment injection"),
    (r"(\bxp_\w+|\bsp_\w+)", "Extended stored procedures"),
    (r"(\b(WAITFOR|DELAY)\b)", "Time-based injection"),
    (r"(\b(CAST|CONVERT|CHAR|ASCII)\s*\()", "Type conversion functions"),
    (r"(\b(LOAD_FILE|INTO\s+OUTFILE|INTO\s+DUMPFILE)\b)", "File operation functions"),
    (r"(\b(BENCHMARK|SLEEP)\s*\()", "Benchmark/sleep functions"),
    (r"(\b(INFORMATION_SCHEMA|MYSQL\.USER|PG_USER)\b)", "Information schema access"),
    (r"(\$where|\$ne|\$gt|\$lt|\$regex)", "NoSQL injection patterns"),
    (r"(<script|<iframe|<object|<embed|javascript:|vbscript:|onload=|onerror=)", "XSS patterns"),
    (r"(\.\./|\.\.\\|%2e%2e%2f|%2e%2e%5c)", "Path traversal patterns"),
    (r"(\b(GRANT|REVOKE|TRUNCATE|REPLACE)\b)", "SQL DDL commands"),
    (r"(\b(SHOW|DESCRIBE|EXPLAIN)\b)", "SQL metadata commands"),
    (r"(\b(BACKUP|RESTORE|ATTACH|DETACH)\b)", "Backup/restore commands"),
    (r"(\b(PRAGMA|VACUUM|ANALYZE)\b)", "Database maintenance commands"),
    (r"(\b(BEGIN|COMMIT|ROLLBACK|SAVEPOINT)\b)", "Transaction control commands"),
    (r"(\b(DECLARE|CURSOR|FETCH|CLOSE)\b)", "Cursor operations"),
    (r"(\b(BULK|OPENROWSET|OPENDATASOURCE)\b)", "Bulk operations"),
    (r"(\b(pg_\w+|current_\w+|version\(\))\b)", "PostgreSQL system functions"),
    (r"(\b(pg_sleep|waitfor\s+delay|benchmark)\b)", "Time-based attack functions"),
    (r"(\b(copy|\\copy|lo_import|lo_export)\b)", "File system access"),
    (r"(\b(system|shell|cmd|exec|eval)\b)", "System command execution"),
];

static PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    CATALOGUE
        .iter()
        .map(|(pattern, _)| Regex::new(&format!("(?i){}", pattern)).unwrap())
        .collect()
});

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap());

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SanitizeError {
    #[error("Invalid UUID format")]
    InvalidUuid,
    #[error("Invalid integer format")]
    InvalidInteger,
    #[error("Integer out of range")]
    IntegerOutOfRange,
    #[error("Invalid email format")]
    InvalidEmail,
    #[error("Invalid SQL identifier")]
    InvalidIdentifier,
}

/// Shape a parameter must have before it reaches the datastore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Uuid,
    Integer,
    Email,
    Identifier,
    String,
}

impl std::str::FromStr for ParamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uuid" => Ok(ParamKind::Uuid),
            "integer" => Ok(ParamKind::Integer),
            "email" => Ok(ParamKind::Email),
            "identifier" => Ok(ParamKind::Identifier),
            "string" => Ok(ParamKind::String),
            other => Err(format!("unknown parameter kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    fn from_match_count(count: usize) -> Self {
        match count {
            0 => RiskLevel::Low,
            1 => RiskLevel::Medium,
            2 | 3 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternMatch {
    pub pattern_id: usize,
    pub pattern: &'static str,
    pub description: &'static str,
    pub matches: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InjectionReport {
    pub is_suspicious: bool,
    pub risk_level: RiskLevel,
    pub detected_patterns: Vec<PatternMatch>,
    pub input_length: usize,
    pub sanitized_input: String,
}

fn strip_patterns(mut value: String) -> String {
    loop {
        let mut changed = false;
        for (re, (pattern, _)) in PATTERNS.iter().zip(CATALOGUE.iter()) {
            if re.is_match(&value) {
                tracing::debug!(pattern, "Stripping dangerous pattern from input");
                value = re.replace_all(&value, "").into_owned();
                changed = true;
            }
        }
        if !changed {
            return value;
        }
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Clean free text: truncate, strip catalogue matches, HTML-escape, drop
/// control characters other than tab/newline/CR, and trim.
pub fn sanitize(value: &str, max_length: usize) -> String {
    let truncated: String = value
        .chars()
        .take(max_length)
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect();

    let before = truncated.len();
    let stripped = strip_patterns(truncated);
    if stripped.len() != before {
        tracing::warn!(input = %value.chars().take(100).collect::<String>(), "Dangerous pattern detected in input");
    }

    let escaped = escape_html(&stripped);
    strip_patterns(escaped).trim().to_string()
}

/// Sanitize every string leaf of a JSON document. Object keys are kept as-is.
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize(s, DEFAULT_MAX_LENGTH)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_json).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_json(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Report which catalogue entries match, with a risk grade.
pub fn detect_injection(value: &str) -> InjectionReport {
    let detected_patterns: Vec<PatternMatch> = PATTERNS
        .iter()
        .zip(CATALOGUE.iter())
        .enumerate()
        .filter_map(|(pattern_id, (re, &(pattern, description)))| {
            let matches: Vec<String> = re.find_iter(value).map(|m| m.as_str().to_string()).collect();
            if matches.is_empty() {
                None
            } else {
                Some(PatternMatch {
                    pattern_id,
                    pattern,
                    description,
                    matches,
                })
            }
        })
        .collect();

    InjectionReport {
        is_suspicious: !detected_patterns.is_empty(),
        risk_level: RiskLevel::from_match_count(detected_patterns.len()),
        input_length: value.chars().count(),
        sanitized_input: sanitize(value, DEFAULT_MAX_LENGTH),
        detected_patterns,
    }
}

pub fn sanitize_parameter(value: &str, kind: ParamKind) -> Result<String, SanitizeError> {
    match kind {
        ParamKind::Uuid => {
            if !validate_uuid(value) {
                return Err(SanitizeError::InvalidUuid);
            }
            Ok(value.to_string())
        }
        ParamKind::Integer => {
            let parsed: i64 = value.trim().parse().map_err(|_| SanitizeError::InvalidInteger)?;
            let narrowed = i32::try_from(parsed).map_err(|_| SanitizeError::IntegerOutOfRange)?;
            Ok(narrowed.to_string())
        }
        ParamKind::Email => {
            if !validate_email(value) {
                return Err(SanitizeError::InvalidEmail);
            }
            Ok(sanitize(value, DEFAULT_MAX_LENGTH))
        }
        ParamKind::Identifier => {
            if !validate_sql_identifier(value) {
                return Err(SanitizeError::InvalidIdentifier);
            }
            Ok(value.to_string())
        }
        ParamKind::String => Ok(sanitize(value, DEFAULT_MAX_LENGTH)),
    }
}

pub fn validate_uuid(value: &str) -> bool {
    UUID_RE.is_match(value)
}

pub fn validate_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

pub fn validate_sql_identifier(value: &str) -> bool {
    value.len() <= 63 && IDENTIFIER_RE.is_match(value)
}

/// Escape `\`, `%` and `_` so the text matches literally inside LIKE.
pub fn escape_like_pattern(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
