use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use deedline_core::config::{AppConfig, LoadOptions};
use deedline_core::Role;
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let grants = &config.grants;
    let buyers = config.auth.tokens.iter().filter(|token| token.role == Role::Buyer).count();
    let sellers = config.auth.tokens.len() - buyers;

    vec![
        Field::new("database.url", config.database.url.clone(), &["DEEDLINE_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["DEEDLINE_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["DEEDLINE_DATABASE_TIMEOUT_SECS"],
        ),
        Field::new(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["DEEDLINE_SERVER_BIND_ADDRESS"],
        ),
        Field::new("server.port", config.server.port.to_string(), &["DEEDLINE_SERVER_PORT"]),
        Field::new(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["DEEDLINE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        Field::new(
            "grants.default_expiry_days",
            grants.default_expiry_days.to_string(),
            &["DEEDLINE_GRANTS_DEFAULT_EXPIRY_DAYS"],
        ),
        Field::new(
            "grants.max_expiry_days",
            grants.max_expiry_days.to_string(),
            &["DEEDLINE_GRANTS_MAX_EXPIRY_DAYS"],
        ),
        Field::new(
            "grants.max_downloads_per_document",
            grants.max_downloads_per_document.to_string(),
            &["DEEDLINE_GRANTS_MAX_DOWNLOADS_PER_DOCUMENT"],
        ),
        Field::new(
            "grants.ticket_ttl_hours",
            grants.ticket_ttl_hours.to_string(),
            &["DEEDLINE_GRANTS_TICKET_TTL_HOURS"],
        ),
        Field::new(
            "grants.reuse_open_requests",
            grants.reuse_open_requests.to_string(),
            &["DEEDLINE_GRANTS_REUSE_OPEN_REQUESTS"],
        ),
        Field::new(
            "auth.ticket_secret",
            redact_secret(config.auth.ticket_secret.expose_secret()),
            &["DEEDLINE_AUTH_TICKET_SECRET"],
        ),
        Field::new("auth.tokens", format!("{buyers} buyer, {sellers} seller"), &[]),
        Field::new(
            "logging.level",
            config.logging.level.clone(),
            &["DEEDLINE_LOGGING_LEVEL", "DEEDLINE_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["DEEDLINE_LOGGING_FORMAT", "DEEDLINE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["deedline.toml", "config/deedline.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    match secret.trim().chars().count() {
        0 => "<empty>".to_string(),
        length => format!("<redacted:{length} chars>"),
    }
}
