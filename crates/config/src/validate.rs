//! Configuration validation.
//!
//! Checks a config file for syntax errors, unknown (likely misspelled)
//! fields, type errors, and dispatch settings that cannot work.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::{
    env_subst::substitute_env,
    loader::{find_config_file, parse_config, parse_config_value},
    schema::{CourierConfig, MAX_CONCURRENCY_IN_SESSION},
};

/// Ticks longer than this make the dispatcher feel stuck.
const SLOW_TICK_MS: u64 = 5_000;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "dispatch", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "dispatch.pool_size"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}]: {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Known keys ──────────────────────────────────────────────────────────────

const TOP_LEVEL_KEYS: &[&str] = &["dispatch", "chat"];

const DISPATCH_KEYS: &[&str] = &[
    "concurrency_in_session",
    "pool_size",
    "tick_ms",
    "admin_prefix",
    "send_retries",
    "send_retry_backoff_ms",
];

const CHAT_KEYS: &[&str] = &[
    "single_chat_prefix",
    "single_chat_reply_prefix",
    "single_chat_reply_suffix",
    "group_chat_prefix",
    "group_chat_keyword",
    "group_name_white_list",
    "group_name_keyword_white_list",
    "group_chat_in_one_session",
    "group_at_off",
    "group_chat_reply_prefix",
    "group_chat_reply_suffix",
    "nick_name_black_list",
    "image_create_prefix",
    "trigger_by_self",
    "always_reply_voice",
    "voice_reply_voice",
    "accept_friend_commands",
];

fn section_keys(section: &str) -> Option<&'static [&'static str]> {
    match section {
        "dispatch" => Some(DISPATCH_KEYS),
        "chat" => Some(CHAT_KEYS),
        _ => None,
    }
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

fn unknown_field(path: String, key: &str, candidates: &[&str]) -> Diagnostic {
    let message = match suggest(key, candidates, 3) {
        Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
        None => "unknown field".to_string(),
    };
    Diagnostic::new(Severity::Error, "unknown-field", path, message)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config_file(),
    };

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(raw) => validate_str(&substitute_env(&raw), &actual_path),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate raw config text. `path` only selects the format.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let tree = match parse_config_value(raw, path) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(Severity::Error, "syntax", "", e.to_string()));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&tree, &mut diagnostics);

    match parse_config(raw, path) {
        Ok(config) => diagnostics.extend(validate_config(&config)),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            e.to_string(),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(tree: &serde_json::Value, diagnostics: &mut Vec<Diagnostic>) {
    let Some(root) = tree.as_object() else {
        return;
    };
    for (section, value) in root {
        let Some(known) = section_keys(section) else {
            diagnostics.push(unknown_field(section.clone(), section, TOP_LEVEL_KEYS));
            continue;
        };
        let Some(fields) = value.as_object() else {
            continue;
        };
        for key in fields.keys() {
            if !known.contains(&key.as_str()) {
                diagnostics.push(unknown_field(format!("{section}.{key}"), key, known));
            }
        }
    }
}

/// Semantic checks on a parsed config.
#[must_use]
pub fn validate_config(config: &CourierConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let d = &config.dispatch;

    if d.concurrency_in_session == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "dispatch",
            "dispatch.concurrency_in_session",
            "must be at least 1, no context could ever start",
        ));
    } else if d.concurrency_in_session > MAX_CONCURRENCY_IN_SESSION {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "dispatch",
            "dispatch.concurrency_in_session",
            format!(
                "{} exceeds the maximum of {MAX_CONCURRENCY_IN_SESSION}",
                d.concurrency_in_session
            ),
        ));
    }
    if d.pool_size == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "dispatch",
            "dispatch.pool_size",
            "must be at least 1, no worker would run contexts",
        ));
    }
    if d.tick_ms == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "dispatch",
            "dispatch.tick_ms",
            "must be greater than 0",
        ));
    } else if d.tick_ms > SLOW_TICK_MS {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "dispatch",
            "dispatch.tick_ms",
            format!("{} ms delays session reaping noticeably", d.tick_ms),
        ));
    }
    if d.pool_size > 0 && d.pool_size < d.concurrency_in_session {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "dispatch",
            "dispatch.pool_size",
            format!(
                "pool of {} workers cannot run {} contexts of one session at once",
                d.pool_size, d.concurrency_in_session
            ),
        ));
    }
    if d.admin_prefix.is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Info,
            "dispatch",
            "dispatch.admin_prefix",
            "empty prefix disables admin command priority",
        ));
    }

    diagnostics
}
