use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use hearth_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "model.base_url",
        &config.model.base_url,
        source("model.base_url", "HEARTH_MODEL_BASE_URL"),
    ));
    lines.push(render_line(
        "model.name",
        &config.model.name,
        source("model.name", "HEARTH_MODEL_NAME"),
    ));
    let api_key = match &config.model.api_key {
        Some(key) => redact_key(key.expose_secret()),
        None => "<unset>".to_string(),
    };
    lines.push(render_line(
        "model.api_key",
        &api_key,
        source("model.api_key", "HEARTH_MODEL_API_KEY"),
    ));
    lines.push(render_line(
        "model.timeout_secs",
        &config.model.timeout_secs.to_string(),
        source("model.timeout_secs", "HEARTH_MODEL_TIMEOUT_SECS"),
    ));
    lines.push(render_line(
        "model.max_retries",
        &config.model.max_retries.to_string(),
        source("model.max_retries", "HEARTH_MODEL_MAX_RETRIES"),
    ));

    lines.push(render_line(
        "enrichment.enabled",
        &config.enrichment.enabled.to_string(),
        source("enrichment.enabled", "HEARTH_ENRICHMENT_ENABLED"),
    ));
    lines.push(render_line(
        "enrichment.endpoint",
        config.enrichment.endpoint.as_deref().unwrap_or("<unset>"),
        source("enrichment.endpoint", "HEARTH_ENRICHMENT_ENDPOINT"),
    ));
    lines.push(render_line(
        "enrichment.timeout_secs",
        &config.enrichment.timeout_secs.to_string(),
        source("enrichment.timeout_secs", "HEARTH_ENRICHMENT_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "session.max_history",
        &config.session.max_history.to_string(),
        source("session.max_history", "HEARTH_SESSION_MAX_HISTORY"),
    ));
    lines.push(render_line(
        "access.permissions",
        &config.access.permissions.join(", "),
        source("access.permissions", "HEARTH_ACCESS_PERMISSIONS"),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", "HEARTH_SERVER_BIND_ADDRESS"),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", "HEARTH_SERVER_PORT"),
    ));
    lines.push(render_line(
        "server.graceful_shutdown_secs",
        &config.server.graceful_shutdown_secs.to_string(),
        source("server.graceful_shutdown_secs", "HEARTH_SERVER_GRACEFUL_SHUTDOWN_SECS"),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "HEARTH_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", "HEARTH_LOGGING_FORMAT"),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("hearth.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/hearth.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
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

fn redact_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
