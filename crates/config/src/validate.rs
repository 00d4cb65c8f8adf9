//! Configuration validation.
//!
//! Parses a config file into a generic value tree, reports unknown or
//! misspelled keys, type errors, and semantic problems the loader would
//! silently accept.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use {secrecy::ExposeSecret, serde_json::Value, valet_common::StrategyKind};

use crate::{
    env_subst::{substitute_env, unresolved_placeholders},
    schema::ValetConfig,
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
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
    /// "syntax", "unknown-field", "type-error", "semantic", "env", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "peers.strategies[1]"
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

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    /// Free-form keys, e.g. a hook's `env`.
    Map,
    Array(Box<KnownKeys>),
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Array, Leaf, Map, Struct};

    let hook = Struct(HashMap::from([
        ("name", Leaf),
        ("command", Leaf),
        ("phases", Leaf),
        ("priority", Leaf),
        ("timeout", Leaf),
        ("env", Map),
    ]));

    Struct(HashMap::from([
        (
            "protocol",
            Struct(HashMap::from([
                ("api_id", Leaf),
                ("api_hash", Leaf),
                ("session_file", Leaf),
            ])),
        ),
        (
            "bot",
            Struct(HashMap::from([
                ("command_prefix", Leaf),
                ("plugins_dir", Leaf),
                ("sudo_users", Leaf),
                ("disabled_plugins", Leaf),
            ])),
        ),
        (
            "peers",
            Struct(HashMap::from([
                ("database", Leaf),
                ("cache_expiry_secs", Leaf),
                ("failure_threshold", Leaf),
                ("strategies", Leaf),
                ("dialog_limit", Leaf),
                ("search_limit", Leaf),
                ("participant_limit", Leaf),
                ("channel_dialog_limit", Leaf),
                ("channel_dialog_limit_extended", Leaf),
            ])),
        ),
        (
            "logging",
            Struct(HashMap::from([("level", Leaf), ("json", Leaf)])),
        ),
        ("hooks", Array(Box::new(hook))),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate the file at `path`, or the discovered config file when `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let Some(actual_path) = path
        .map(Path::to_path_buf)
        .or_else(crate::loader::find_config_file)
    else {
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
        Ok(content) => {
            let ext = actual_path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("toml");
            validate_str(&content, ext)
        },
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

/// Validate config text in the format named by `ext`.
#[must_use]
pub fn validate_str(raw: &str, ext: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();
    let text = substitute_env(raw);

    for name in unresolved_placeholders(&text) {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "env",
            "",
            format!("environment variable {name} is not set"),
        ));
    }

    let tree = match parse_tree(&text, ext) {
        Ok(tree) => tree,
        Err(message) => {
            diagnostics.push(Diagnostic::new(Severity::Error, "syntax", "", message));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&tree, &build_schema_map(), "", &mut diagnostics);

    match serde_json::from_value::<ValetConfig>(tree) {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn parse_tree(text: &str, ext: &str) -> Result<Value, String> {
    let tree = match ext {
        "json" => serde_json::from_str(text).map_err(|e| format!("JSON syntax error: {e}"))?,
        "yaml" | "yml" => {
            let v: serde_yaml::Value =
                serde_yaml::from_str(text).map_err(|e| format!("YAML syntax error: {e}"))?;
            serde_json::to_value(v).map_err(|e| e.to_string())?
        },
        _ => {
            let v: toml::Value = toml::from_str(text).map_err(|e| format!("TOML syntax error: {e}"))?;
            serde_json::to_value(v).map_err(|e| e.to_string())?
        },
    };
    // An empty YAML document parses as null.
    Ok(if tree.is_null() {
        Value::Object(Default::default())
    } else {
        tree
    })
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

fn check_unknown_fields(
    value: &Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match (value, schema) {
        (Value::Object(table), KnownKeys::Struct(fields)) => {
            let known: Vec<&str> = fields.keys().copied().collect();
            for (key, child) in table {
                let path = join(prefix, key);
                match fields.get(key.as_str()) {
                    Some(child_schema) => check_unknown_fields(child, child_schema, &path, diagnostics),
                    None => {
                        let message = match suggest(key, &known, 3) {
                            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                            None => "unknown field".to_owned(),
                        };
                        diagnostics.push(Diagnostic::new(Severity::Error, "unknown-field", path, message));
                    },
                }
            }
        },
        (Value::Array(items), KnownKeys::Array(item_schema)) => {
            for (i, item) in items.iter().enumerate() {
                check_unknown_fields(item, item_schema, &format!("{prefix}[{i}]"), diagnostics);
            }
        },
        // Leaf, free-form map or type mismatch; type errors are caught later.
        _ => {},
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

fn check_semantics(config: &ValetConfig, diagnostics: &mut Vec<Diagnostic>) {
    let mut push = |severity, path: &str, message: String| {
        diagnostics.push(Diagnostic::new(severity, "semantic", path, message));
    };

    // bot
    let prefix = &config.bot.command_prefix;
    if prefix.is_empty() {
        push(Severity::Error, "bot.command_prefix", "command prefix must not be empty".into());
    } else if prefix.chars().any(char::is_whitespace) {
        push(
            Severity::Error,
            "bot.command_prefix",
            format!("command prefix {prefix:?} contains whitespace"),
        );
    }
    if config.bot.plugins_dir.as_os_str().is_empty() {
        push(Severity::Error, "bot.plugins_dir", "plugins directory must not be empty".into());
    }
    if config.bot.sudo_users.iter().any(|&id| id <= 0) {
        push(Severity::Warning, "bot.sudo_users", "sudo users must be positive user ids".into());
    }

    // peers
    let peers = &config.peers;
    if peers.failure_threshold == 0 {
        push(
            Severity::Error,
            "peers.failure_threshold",
            "threshold 0 would block every identity before its first lookup".into(),
        );
    }
    if peers.cache_expiry_secs == 0 {
        push(
            Severity::Warning,
            "peers.cache_expiry_secs",
            "expiry 0 disables identity caching; every call will hit the network".into(),
        );
    }
    if peers.strategies.is_empty() {
        push(Severity::Error, "peers.strategies", "at least one strategy is required".into());
    }
    let mut seen = HashSet::new();
    for (i, kind) in peers.strategies.iter().enumerate() {
        let path = format!("peers.strategies[{i}]");
        if !seen.insert(*kind) {
            push(Severity::Warning, &path, format!("strategy {kind} is listed more than once"));
        }
        if !StrategyKind::DEFAULT_ORDER.contains(kind) {
            push(
                Severity::Warning,
                &path,
                format!("strategy {kind} needs group or message context and is added automatically"),
            );
        }
    }
    for (name, value) in [
        ("dialog_limit", peers.dialog_limit),
        ("search_limit", peers.search_limit),
        ("participant_limit", peers.participant_limit),
        ("channel_dialog_limit", peers.channel_dialog_limit),
        ("channel_dialog_limit_extended", peers.channel_dialog_limit_extended),
    ] {
        if value == 0 {
            push(Severity::Error, &format!("peers.{name}"), "limit must be positive".into());
        }
    }
    if peers.channel_dialog_limit_extended < peers.channel_dialog_limit {
        push(
            Severity::Warning,
            "peers.channel_dialog_limit_extended",
            "extended channel scan is smaller than the first scan".into(),
        );
    }

    // protocol
    if !config.protocol.has_credentials() {
        let detail = match &config.protocol.api_hash {
            Some(hash) if hash.expose_secret().is_empty() => "api_hash is empty",
            _ => "api_id and api_hash are not both set",
        };
        push(
            Severity::Warning,
            "protocol",
            format!("{detail}; only the console transport will work"),
        );
    }

    // logging
    let level = config.logging.level.trim();
    if !level.contains('=') && !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        let hint = suggest(&level.to_ascii_lowercase(), LOG_LEVELS, 2)
            .map(|s| format!(" (did you mean \"{s}\"?)"))
            .unwrap_or_default();
        push(
            Severity::Warning,
            "logging.level",
            format!("unknown log level {level:?}{hint}"),
        );
    }

    // hooks
    let mut names = HashSet::new();
    for (i, hook) in config.hooks.iter().enumerate() {
        let path = format!("hooks[{i}]");
        if hook.name.trim().is_empty() {
            push(Severity::Error, &format!("{path}.name"), "hook name must not be empty".into());
        } else if !names.insert(hook.name.as_str()) {
            push(
                Severity::Error,
                &format!("{path}.name"),
                format!("hook name {:?} is used more than once", hook.name),
            );
        }
        if hook.command.trim().is_empty() {
            push(Severity::Error, &format!("{path}.command"), "hook command must not be empty".into());
        }
        if hook.phases.is_empty() {
            push(
                Severity::Warning,
                &format!("{path}.phases"),
                "hook subscribes to no phase and will never run".into(),
            );
        }
        let mut phases = HashSet::new();
        for phase in &hook.phases {
            if !phases.insert(*phase) {
                push(
                    Severity::Warning,
                    &format!("{path}.phases"),
                    format!("phase {phase} is listed more than once; the hook still runs once"),
                );
            }
        }
        if hook.timeout == 0 {
            push(Severity::Error, &format!("{path}.timeout"), "timeout must be positive".into());
        }
    }
}
