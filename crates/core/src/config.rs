use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grants::policy::{
    DEFAULT_EXPIRY_DAYS, DEFAULT_MAX_DOWNLOADS_PER_DOCUMENT, DEFAULT_MAX_EXPIRY_DAYS,
    MAX_EXPIRY_DAYS_CEILING,
};
use crate::session::Role;

const MIN_TICKET_SECRET_LEN: usize = 16;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub grants: GrantsConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrantsConfig {
    pub default_expiry_days: u32,
    pub max_expiry_days: u32,
    pub max_downloads_per_document: u32,
    pub ticket_ttl_hours: u32,
    pub reuse_open_requests: bool,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub ticket_secret: SecretString,
    pub tokens: Vec<TokenConfig>,
}

/// A static bearer token mapped to a marketplace identity.
#[derive(Clone, Debug)]
pub struct TokenConfig {
    pub token: SecretString,
    pub user_id: String,
    pub role: Role,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub ticket_secret: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://deedline.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            grants: GrantsConfig::default(),
            auth: AuthConfig { ticket_secret: String::new().into(), tokens: Vec::new() },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for GrantsConfig {
    fn default() -> Self {
        Self {
            default_expiry_days: DEFAULT_EXPIRY_DAYS,
            max_expiry_days: DEFAULT_MAX_EXPIRY_DAYS,
            max_downloads_per_document: DEFAULT_MAX_DOWNLOADS_PER_DOCUMENT,
            ticket_ttl_hours: 24,
            reuse_open_requests: true,
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("deedline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(grants) = patch.grants {
            if let Some(days) = grants.default_expiry_days {
                self.grants.default_expiry_days = days;
            }
            if let Some(days) = grants.max_expiry_days {
                self.grants.max_expiry_days = days;
            }
            if let Some(max_downloads) = grants.max_downloads_per_document {
                self.grants.max_downloads_per_document = max_downloads;
            }
            if let Some(hours) = grants.ticket_ttl_hours {
                self.grants.ticket_ttl_hours = hours;
            }
            if let Some(reuse) = grants.reuse_open_requests {
                self.grants.reuse_open_requests = reuse;
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(ticket_secret_value) = auth.ticket_secret {
                self.auth.ticket_secret = secret_value(ticket_secret_value);
            }
            if let Some(tokens) = auth.tokens {
                self.auth.tokens = tokens
                    .into_iter()
                    .map(|token| {
                        let role = token.role.parse::<Role>().map_err(ConfigError::Validation)?;
                        Ok(TokenConfig {
                            token: secret_value(token.token),
                            user_id: token.user_id,
                            role,
                        })
                    })
                    .collect::<Result<Vec<_>, ConfigError>>()?;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("DEEDLINE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("DEEDLINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("DEEDLINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("DEEDLINE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("DEEDLINE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("DEEDLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("DEEDLINE_SERVER_PORT") {
            self.server.port = parse_u16("DEEDLINE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("DEEDLINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("DEEDLINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("DEEDLINE_GRANTS_DEFAULT_EXPIRY_DAYS") {
            self.grants.default_expiry_days =
                parse_u32("DEEDLINE_GRANTS_DEFAULT_EXPIRY_DAYS", &value)?;
        }
        if let Some(value) = read_env("DEEDLINE_GRANTS_MAX_EXPIRY_DAYS") {
            self.grants.max_expiry_days = parse_u32("DEEDLINE_GRANTS_MAX_EXPIRY_DAYS", &value)?;
        }
        if let Some(value) = read_env("DEEDLINE_GRANTS_MAX_DOWNLOADS_PER_DOCUMENT") {
            self.grants.max_downloads_per_document =
                parse_u32("DEEDLINE_GRANTS_MAX_DOWNLOADS_PER_DOCUMENT", &value)?;
        }
        if let Some(value) = read_env("DEEDLINE_GRANTS_TICKET_TTL_HOURS") {
            self.grants.ticket_ttl_hours = parse_u32("DEEDLINE_GRANTS_TICKET_TTL_HOURS", &value)?;
        }
        if let Some(value) = read_env("DEEDLINE_GRANTS_REUSE_OPEN_REQUESTS") {
            self.grants.reuse_open_requests =
                parse_bool("DEEDLINE_GRANTS_REUSE_OPEN_REQUESTS", &value)?;
        }

        if let Some(value) = read_env("DEEDLINE_AUTH_TICKET_SECRET") {
            self.auth.ticket_secret = secret_value(value);
        }

        let log_level =
            read_env("DEEDLINE_LOGGING_LEVEL").or_else(|| read_env("DEEDLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("DEEDLINE_LOGGING_FORMAT").or_else(|| read_env("DEEDLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(ticket_secret) = overrides.ticket_secret {
            self.auth.ticket_secret = secret_value(ticket_secret);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_grants(&self.grants)?;
        validate_auth(&self.auth)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("deedline.toml"), PathBuf::from("config/deedline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address is required".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_grants(grants: &GrantsConfig) -> Result<(), ConfigError> {
    if grants.max_expiry_days == 0 || grants.max_expiry_days > MAX_EXPIRY_DAYS_CEILING {
        return Err(ConfigError::Validation(format!(
            "grants.max_expiry_days must be in range 1..={MAX_EXPIRY_DAYS_CEILING}"
        )));
    }

    if grants.default_expiry_days == 0 || grants.default_expiry_days > grants.max_expiry_days {
        return Err(ConfigError::Validation(format!(
            "grants.default_expiry_days must be in range 1..={}",
            grants.max_expiry_days
        )));
    }

    if grants.max_downloads_per_document == 0 {
        return Err(ConfigError::Validation(
            "grants.max_downloads_per_document must be greater than zero".to_string(),
        ));
    }

    if grants.ticket_ttl_hours == 0 || grants.ticket_ttl_hours > 24 * 30 {
        return Err(ConfigError::Validation(
            "grants.ticket_ttl_hours must be in range 1..=720".to_string(),
        ));
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    let ticket_secret = auth.ticket_secret.expose_secret();
    if ticket_secret.trim().is_empty() {
        return Err(ConfigError::Validation(
            "auth.ticket_secret is required (set DEEDLINE_AUTH_TICKET_SECRET)".to_string(),
        ));
    }
    if ticket_secret.len() < MIN_TICKET_SECRET_LEN {
        return Err(ConfigError::Validation(format!(
            "auth.ticket_secret must be at least {MIN_TICKET_SECRET_LEN} characters"
        )));
    }

    let mut seen = HashSet::new();
    for (position, token) in auth.tokens.iter().enumerate() {
        let value = token.token.expose_secret();
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "auth.tokens[{position}].token must not be empty"
            )));
        }
        if token.user_id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "auth.tokens[{position}].user_id must not be empty"
            )));
        }
        if !seen.insert(value) {
            return Err(ConfigError::Validation(format!(
                "auth.tokens[{position}].token duplicates an earlier token"
            )));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    grants: Option<GrantsPatch>,
    auth: Option<AuthPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GrantsPatch {
    default_expiry_days: Option<u32>,
    max_expiry_days: Option<u32>,
    max_downloads_per_document: Option<u32>,
    ticket_ttl_hours: Option<u32>,
    reuse_open_requests: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    ticket_secret: Option<String>,
    tokens: Option<Vec<TokenPatch>>,
}

#[derive(Debug, Deserialize)]
struct TokenPatch {
    token: String,
    user_id: String,
    role: String,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::session::Role;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const TEST_SECRET: &str = "test-ticket-secret-0123456789";

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation_and_tokens() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_DEEDLINE_TICKET_SECRET", TEST_SECRET);

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("deedline.toml");
            fs::write(
                &path,
                r#"
[auth]
ticket_secret = "${TEST_DEEDLINE_TICKET_SECRET}"

[[auth.tokens]]
token = "buyer-token"
user_id = "buyer-1"
role = "buyer"

[[auth.tokens]]
token = "seller-token"
user_id = "seller-1"
role = "Seller"

[grants]
default_expiry_days = 14
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.auth.ticket_secret.expose_secret() == TEST_SECRET,
                "ticket secret should be interpolated from environment",
            )?;
            ensure(config.auth.tokens.len() == 2, "both tokens should be loaded")?;
            ensure(
                config.auth.tokens[1].role == Role::Seller,
                "role should parse case-insensitively",
            )?;
            ensure(config.grants.default_expiry_days == 14, "file expiry default should apply")?;
            ensure(
                config.grants.max_downloads_per_document == 3,
                "download limit should keep its default",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_DEEDLINE_TICKET_SECRET"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DEEDLINE_AUTH_TICKET_SECRET", TEST_SECRET);
        env::set_var("DEEDLINE_LOG_LEVEL", "warn");
        env::set_var("DEEDLINE_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["DEEDLINE_AUTH_TICKET_SECRET", "DEEDLINE_LOG_LEVEL", "DEEDLINE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DEEDLINE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("DEEDLINE_GRANTS_MAX_DOWNLOADS_PER_DOCUMENT", "5");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("deedline.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[grants]
max_downloads_per_document = 4

[auth]
ticket_secret = "file-secret-0123456789"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.grants.max_downloads_per_document == 5,
                "env download limit should win over file",
            )?;
            ensure(
                config.auth.ticket_secret.expose_secret() == "file-secret-0123456789",
                "file ticket secret should win over defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["DEEDLINE_DATABASE_URL", "DEEDLINE_GRANTS_MAX_DOWNLOADS_PER_DOCUMENT"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DEEDLINE_AUTH_TICKET_SECRET", "short");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("auth.ticket_secret")
            );
            ensure(has_message, "validation failure should mention auth.ticket_secret")
        })();

        clear_vars(&["DEEDLINE_AUTH_TICKET_SECRET"]);
        result
    }

    #[test]
    fn default_expiry_beyond_maximum_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DEEDLINE_AUTH_TICKET_SECRET", TEST_SECRET);
        env::set_var("DEEDLINE_GRANTS_DEFAULT_EXPIRY_DAYS", "400");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected validation failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::Validation(ref message)
                        if message.contains("grants.default_expiry_days")
                ),
                "validation failure should mention grants.default_expiry_days",
            )
        })();

        clear_vars(&["DEEDLINE_AUTH_TICKET_SECRET", "DEEDLINE_GRANTS_DEFAULT_EXPIRY_DAYS"]);
        result
    }

    #[test]
    fn max_expiry_beyond_ceiling_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DEEDLINE_AUTH_TICKET_SECRET", TEST_SECRET);
        env::set_var("DEEDLINE_GRANTS_MAX_EXPIRY_DAYS", "200000000");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected validation failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::Validation(ref message)
                        if message.contains("grants.max_expiry_days")
                ),
                "validation failure should mention grants.max_expiry_days",
            )?;

            env::set_var("DEEDLINE_GRANTS_MAX_EXPIRY_DAYS", "3650");
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|error| format!("ten-year maximum should load: {error}"))?;
            ensure(config.grants.max_expiry_days == 3650, "ceiling itself is accepted")
        })();

        clear_vars(&["DEEDLINE_AUTH_TICKET_SECRET", "DEEDLINE_GRANTS_MAX_EXPIRY_DAYS"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DEEDLINE_AUTH_TICKET_SECRET", TEST_SECRET);
        env::set_var("DEEDLINE_SERVER_PORT", "eighty");

        let result = (|| -> Result<(), String> {
            let outcome = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(
                    outcome,
                    Err(ConfigError::InvalidEnvOverride { ref key, .. })
                        if key == "DEEDLINE_SERVER_PORT"
                ),
                "bad port should surface as an env override error",
            )
        })();

        clear_vars(&["DEEDLINE_AUTH_TICKET_SECRET", "DEEDLINE_SERVER_PORT"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DEEDLINE_AUTH_TICKET_SECRET", "ticket-secret-value-xyz");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("ticket-secret-value-xyz"),
                "debug output should not contain the ticket secret",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["DEEDLINE_AUTH_TICKET_SECRET"]);
        result
    }
}
