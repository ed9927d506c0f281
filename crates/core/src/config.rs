use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::DEFAULT_MAX_HISTORY;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub enrichment: EnrichmentConfig,
    pub session: SessionConfig,
    pub access: AccessConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub name: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub max_history: usize,
}

#[derive(Clone, Debug)]
pub struct AccessConfig {
    pub permissions: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
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
    pub log_level: Option<String>,
    pub model_name: Option<String>,
    pub model_base_url: Option<String>,
    pub enrichment_enabled: Option<bool>,
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
            model: ModelConfig {
                base_url: "http://localhost:11434/v1".to_string(),
                api_key: None,
                name: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            enrichment: EnrichmentConfig { enabled: true, endpoint: None, timeout_secs: 8 },
            session: SessionConfig { max_history: DEFAULT_MAX_HISTORY },
            access: AccessConfig {
                permissions: vec![
                    "crm.read".to_string(),
                    "crm.write".to_string(),
                    "crm.delete".to_string(),
                ],
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8787,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
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
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("hearth.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(model) = patch.model {
            if let Some(base_url) = model.base_url {
                self.model.base_url = base_url;
            }
            if let Some(model_api_key_value) = model.api_key {
                self.model.api_key = Some(secret_value(model_api_key_value));
            }
            if let Some(name) = model.name {
                self.model.name = name;
            }
            if let Some(timeout_secs) = model.timeout_secs {
                self.model.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = model.max_retries {
                self.model.max_retries = max_retries;
            }
        }

        if let Some(enrichment) = patch.enrichment {
            if let Some(enabled) = enrichment.enabled {
                self.enrichment.enabled = enabled;
            }
            if let Some(endpoint) = enrichment.endpoint {
                self.enrichment.endpoint = Some(endpoint);
            }
            if let Some(timeout_secs) = enrichment.timeout_secs {
                self.enrichment.timeout_secs = timeout_secs;
            }
        }

        if let Some(session) = patch.session {
            if let Some(max_history) = session.max_history {
                self.session.max_history = max_history;
            }
        }

        if let Some(access) = patch.access {
            if let Some(permissions) = access.permissions {
                self.access.permissions = permissions;
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

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("HEARTH_MODEL_BASE_URL") {
            self.model.base_url = value;
        }
        if let Some(value) = read_env("HEARTH_MODEL_API_KEY") {
            self.model.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("HEARTH_MODEL_NAME") {
            self.model.name = value;
        }
        if let Some(value) = read_env("HEARTH_MODEL_TIMEOUT_SECS") {
            self.model.timeout_secs = parse_u64("HEARTH_MODEL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("HEARTH_MODEL_MAX_RETRIES") {
            self.model.max_retries = parse_u32("HEARTH_MODEL_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("HEARTH_ENRICHMENT_ENABLED") {
            self.enrichment.enabled = parse_bool("HEARTH_ENRICHMENT_ENABLED", &value)?;
        }
        if let Some(value) = read_env("HEARTH_ENRICHMENT_ENDPOINT") {
            self.enrichment.endpoint = Some(value);
        }
        if let Some(value) = read_env("HEARTH_ENRICHMENT_TIMEOUT_SECS") {
            self.enrichment.timeout_secs = parse_u64("HEARTH_ENRICHMENT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HEARTH_SESSION_MAX_HISTORY") {
            self.session.max_history = parse_usize("HEARTH_SESSION_MAX_HISTORY", &value)?;
        }

        if let Some(value) = read_env("HEARTH_ACCESS_PERMISSIONS") {
            self.access.permissions = split_permissions(&value);
        }

        if let Some(value) = read_env("HEARTH_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("HEARTH_SERVER_PORT") {
            self.server.port = parse_u16("HEARTH_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("HEARTH_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("HEARTH_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("HEARTH_LOGGING_LEVEL").or_else(|| read_env("HEARTH_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("HEARTH_LOGGING_FORMAT").or_else(|| read_env("HEARTH_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(model_name) = overrides.model_name {
            self.model.name = model_name;
        }
        if let Some(model_base_url) = overrides.model_base_url {
            self.model.base_url = model_base_url;
        }
        if let Some(enabled) = overrides.enrichment_enabled {
            self.enrichment.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_model(&self.model)?;
        validate_enrichment(&self.enrichment)?;
        validate_session(&self.session)?;
        validate_access(&self.access)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("hearth.toml"), PathBuf::from("config/hearth.toml")]
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

fn validate_model(model: &ModelConfig) -> Result<(), ConfigError> {
    let base_url = model.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "model.base_url must start with http:// or https://".to_string(),
        ));
    }

    if model.name.trim().is_empty() {
        return Err(ConfigError::Validation("model.name must not be empty".to_string()));
    }

    if model.timeout_secs == 0 || model.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "model.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if model.max_retries > 10 {
        return Err(ConfigError::Validation("model.max_retries must be at most 10".to_string()));
    }

    Ok(())
}

fn validate_enrichment(enrichment: &EnrichmentConfig) -> Result<(), ConfigError> {
    if enrichment.timeout_secs == 0 || enrichment.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "enrichment.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if let Some(endpoint) = &enrichment.endpoint {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::Validation(
                "enrichment.endpoint must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.max_history == 0 || session.max_history > 500 {
        return Err(ConfigError::Validation(
            "session.max_history must be in range 1..=500".to_string(),
        ));
    }

    Ok(())
}

fn validate_access(access: &AccessConfig) -> Result<(), ConfigError> {
    if access.permissions.is_empty() {
        return Err(ConfigError::Validation(
            "access.permissions must grant at least one capability".to_string(),
        ));
    }

    for permission in &access.permissions {
        if permission.trim().is_empty() || permission.contains(char::is_whitespace) {
            return Err(ConfigError::Validation(format!(
                "access.permissions entry `{permission}` must be a single non-empty token"
            )));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
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

fn split_permissions(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|permission| permission.trim().to_string())
        .filter(|permission| !permission.is_empty())
        .collect()
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

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
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
    model: Option<ModelPatch>,
    enrichment: Option<EnrichmentPatch>,
    session: Option<SessionPatch>,
    access: Option<AccessPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    name: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EnrichmentPatch {
    enabled: Option<bool>,
    endpoint: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    max_history: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct AccessPatch {
    permissions: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
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

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

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
    fn defaults_validate_without_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.model.base_url.starts_with("http://localhost"), "default model endpoint should be local")?;
        ensure(config.access.permissions.len() == 3, "default grants should cover read, write, delete")?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "default log format should be compact")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_MODEL_API_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("hearth.toml");
            fs::write(
                &path,
                r#"
[model]
api_key = "${TEST_MODEL_API_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let api_key = config.model.api_key.as_ref().ok_or("api key should be set")?;
            ensure(
                api_key.expose_secret() == "sk-from-env",
                "api key should be loaded from environment",
            )
        })();

        clear_vars(&["TEST_MODEL_API_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HEARTH_LOG_LEVEL", "warn");
        env::set_var("HEARTH_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["HEARTH_LOG_LEVEL", "HEARTH_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HEARTH_MODEL_BASE_URL", "http://env.example/v1");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("hearth.toml");
            fs::write(
                &path,
                r#"
[model]
base_url = "http://file.example/v1"
name = "model-from-file"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    model_name: Some("model-from-override".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.model.base_url == "http://env.example/v1",
                "env base url should win over the file",
            )?;
            ensure(
                config.model.name == "model-from-override",
                "override model name should win over the file",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")
        })();

        clear_vars(&["HEARTH_MODEL_BASE_URL"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HEARTH_SERVER_PORT", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("server.port")
            );
            ensure(has_message, "validation failure should mention server.port")
        })();

        clear_vars(&["HEARTH_SERVER_PORT"]);
        result
    }

    #[test]
    fn malformed_numeric_env_overrides_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HEARTH_MODEL_TIMEOUT_SECS", "soon");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "HEARTH_MODEL_TIMEOUT_SECS"
                ),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["HEARTH_MODEL_TIMEOUT_SECS"]);
        result
    }

    #[test]
    fn permissions_env_override_splits_on_commas() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HEARTH_ACCESS_PERMISSIONS", "crm.read, crm.write");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(
                config.access.permissions == vec!["crm.read".to_string(), "crm.write".to_string()],
                "permissions should be split and trimmed",
            )
        })();

        clear_vars(&["HEARTH_ACCESS_PERMISSIONS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HEARTH_MODEL_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain the api key")
        })();

        clear_vars(&["HEARTH_MODEL_API_KEY"]);
        result
    }

    #[test]
    fn missing_required_file_is_an_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("absent.toml");

        let error = match AppConfig::load(LoadOptions {
            config_path: Some(path.clone()),
            require_file: true,
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected missing-file failure".to_string()),
            Err(error) => error,
        };

        ensure(
            matches!(error, ConfigError::MissingConfigFile(ref missing) if *missing == path),
            "error should carry the expected path",
        )
    }

    #[test]
    fn unterminated_interpolation_is_an_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("hearth.toml");
        fs::write(&path, "[model]\nname = \"${UNCLOSED\"\n").map_err(|err| err.to_string())?;

        let error = match AppConfig::load(LoadOptions {
            config_path: Some(path),
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected interpolation failure".to_string()),
            Err(error) => error,
        };

        ensure(
            matches!(error, ConfigError::UnterminatedInterpolation),
            "error should flag the unterminated expression",
        )
    }
}
